//! The logical clock
//!
//! One counter serves both `begin` (start timestamps, which double as
//! transaction ids) and commit-timestamp assignment. Every value issued is
//! strictly greater than every previously issued value, across both uses
//! and across concurrent callers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly-increasing timestamp issuer.
///
/// Thread-safe; callers racing on [`next`](Self::next) each receive a
/// distinct value, and values never repeat or decrease.
#[derive(Debug)]
pub struct TimestampOracle {
    counter: AtomicU64,
}

impl TimestampOracle {
    /// Create an oracle whose first issued value is 1
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Issue the next timestamp.
    ///
    /// # Panics
    ///
    /// Panics if the counter reaches `u64::MAX` (overflow).
    pub fn next(&self) -> u64 {
        self.counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("timestamp counter overflow: u64::MAX reached")
            + 1
    }

    /// The most recently issued timestamp (0 if none yet)
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for TimestampOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_timestamp_is_one() {
        let oracle = TimestampOracle::new();
        assert_eq!(oracle.current(), 0);
        assert_eq!(oracle.next(), 1);
        assert_eq!(oracle.current(), 1);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let oracle = TimestampOracle::new();
        let mut last = 0;
        for _ in 0..1000 {
            let ts = oracle.next();
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn test_parallel_callers_get_distinct_values() {
        let oracle = Arc::new(TimestampOracle::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let oracle = Arc::clone(&oracle);
                std::thread::spawn(move || (0..500).map(|_| oracle.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let len = all.len();
        all.dedup();
        assert_eq!(all.len(), len, "issued timestamps must be unique");
        assert_eq!(*all.last().unwrap(), len as u64);
    }
}
