//! Registry of in-flight transactions
//!
//! Tracks the start timestamps of transactions that have begun but not yet
//! committed or aborted. Its only consumer is history pruning: the minimum
//! live start timestamp is the watermark below which committed records can
//! no longer invalidate anyone.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Instant;

/// In-flight transaction registry.
///
/// Thread-safe. Keys are start timestamps, which double as transaction
/// ids, so the minimum key is the pruning watermark.
#[derive(Debug, Default)]
pub struct LiveRegistry {
    inner: Mutex<BTreeMap<u64, Instant>>,
}

impl LiveRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a transaction with start timestamp `ts_start` is live
    pub fn register(&self, ts_start: u64) {
        self.inner.lock().insert(ts_start, Instant::now());
    }

    /// Remove a transaction; returns false if it was not live
    ///
    /// A false return means the transaction already terminated, or was
    /// expired by [`expire_older_than`](Self::expire_older_than).
    pub fn deregister(&self, ts_start: u64) -> bool {
        self.inner.lock().remove(&ts_start).is_some()
    }

    /// Whether a transaction is currently live
    pub fn is_live(&self, ts_start: u64) -> bool {
        self.inner.lock().contains_key(&ts_start)
    }

    /// The minimum live start timestamp, or `None` when nothing is live
    pub fn ts_low(&self) -> Option<u64> {
        self.inner.lock().keys().next().copied()
    }

    /// Number of live transactions
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no transactions are live
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop registrations older than `max_age`, returning the expired ids.
    ///
    /// Lets the watermark advance past abandoned transactions; an expired
    /// transaction that later shows up to commit is refused.
    pub fn expire_older_than(&self, max_age: std::time::Duration) -> Vec<u64> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<u64> = inner
            .iter()
            .filter(|(_, started)| now.duration_since(**started) > max_age)
            .map(|(&ts, _)| ts)
            .collect();
        for ts in &expired {
            inner.remove(ts);
        }
        expired
    }
}
