//! Per-key shared/exclusive locks with wound-wait deadlock prevention
//!
//! # Design
//!
//! One `parking_lot::Mutex` guards the whole table; it is held only for
//! bookkeeping, never while a requester waits. Waiting happens on a single
//! `Condvar`: releases and woundings broadcast, and each waiter re-checks
//! its own grant condition. Grants therefore execute in the waiter's
//! thread, in queue order.
//!
//! # Grant rules
//!
//! - Free key, or request compatible with every current holder: granted
//!   immediately (shared joins shared, even past queued writers).
//! - A transaction already holding a covering mode is granted again as a
//!   no-op; a sole shared holder requesting exclusive is upgraded in place.
//! - Otherwise the request queues. Queued waiters are promoted in FIFO
//!   order subject to mode compatibility: a waiter is granted only when it
//!   is compatible with the holders and with every waiter queued ahead of
//!   it that could be granted alongside it.
//!
//! # Deadlock prevention: wound-wait
//!
//! Priority is by TxnId; smaller id = started earlier = older = higher
//! priority. When a request would wait behind a younger transaction
//! (a conflicting holder, or a blocked waiter queued ahead of it), the
//! younger transaction is wounded: its locks and queued waits are removed
//! everywhere, its in-flight acquires return [`Acquisition::Deadlock`],
//! and every later operation it sends is rejected until `release_all`.
//! A request only ever waits on strictly older transactions, so the
//! waits-for relation is well-founded and no execution can block forever.
//! Every acquire terminates in Granted, Timeout, or Deadlock within its
//! timeout bound.
//!
//! # Commit fence
//!
//! A transaction that has reached its commit point calls
//! [`begin_commit`](LockTable::begin_commit). From then on it cannot be
//! wounded: it already holds every lock it will ever take, so it has no
//! outgoing waits, and exempting it cannot close a waits-for cycle. An
//! older requester that runs into a fenced younger holder simply waits for
//! the imminent release. Without the fence, a wound landing between a
//! committer's first and last write application would expose a partial
//! commit.
//!
//! Wound-wait over wait-die: the old transaction keeps making progress,
//! which is the behavior worth observing when comparing against OCC.

use basalt_core::{Key, LockMode, TxnId};
use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of a lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The lock is held in the requested (or a covering) mode
    Granted,
    /// The wait exceeded its timeout; the request was withdrawn
    Timeout,
    /// The requester was wounded and must abort
    Deadlock,
}

#[derive(Default)]
struct LockEntry {
    /// Current holders. One exclusive holder, or any number of shared.
    holders: SmallVec<[(TxnId, LockMode); 2]>,
    /// Blocked requests in arrival order.
    waiters: VecDeque<(TxnId, LockMode)>,
}

impl LockEntry {
    fn is_unused(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty()
    }
}

#[derive(Default)]
struct TableInner {
    entries: FxHashMap<Key, LockEntry>,
    /// Deadlock victims that have not yet called `release_all`.
    wounded: FxHashSet<TxnId>,
    /// Transactions past their commit point, exempt from wounding.
    committing: FxHashSet<TxnId>,
}

enum Check {
    Grant,
    /// Transactions this request would have to wait on.
    Blocked(SmallVec<[TxnId; 4]>),
}

/// The per-node lock table.
///
/// Thread-safe; one instance serves every connection of a data node.
#[derive(Default)]
pub struct LockTable {
    inner: Mutex<TableInner>,
    changed: Condvar,
}

impl LockTable {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `key` in `mode` for `tid`, waiting up to `timeout`.
    ///
    /// Blocks the calling thread while waiting; the table latch is not
    /// held during the wait.
    pub fn acquire(&self, tid: TxnId, key: &Key, mode: LockMode, timeout: Duration) -> Acquisition {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.wounded.contains(&tid) {
                Self::remove_waiter(&mut inner, key, tid);
                return Acquisition::Deadlock;
            }

            match Self::try_grant(&mut inner, key, tid, mode) {
                Check::Grant => {
                    self.changed.notify_all();
                    return Acquisition::Granted;
                }
                Check::Blocked(blockers) => {
                    // Wound every younger transaction we would wait on,
                    // except those past their commit fence.
                    let victims: SmallVec<[TxnId; 4]> = blockers
                        .iter()
                        .copied()
                        .filter(|&b| b > tid && !inner.committing.contains(&b))
                        .collect();
                    if !victims.is_empty() {
                        for victim in victims {
                            tracing::debug!(requester = tid, victim, "wound-wait: aborting younger holder");
                            Self::wound(&mut inner, victim);
                        }
                        self.changed.notify_all();
                        continue; // re-check; the lock may be free now
                    }
                }
            }

            // Every remaining blocker is older: wait our turn.
            Self::enqueue(&mut inner, key, tid, mode);
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                let wounded = inner.wounded.contains(&tid);
                Self::remove_waiter(&mut inner, key, tid);
                self.changed.notify_all();
                return if wounded {
                    Acquisition::Deadlock
                } else {
                    Acquisition::Timeout
                };
            }
        }
    }

    /// Release everything `tid` holds or waits for, and clear its wounded
    /// mark. Waiters are re-examined in queue order.
    ///
    /// Returns the number of holds released.
    pub fn release_all(&self, tid: TxnId) -> usize {
        let mut inner = self.inner.lock();
        inner.wounded.remove(&tid);
        inner.committing.remove(&tid);
        let mut released = 0;
        inner.entries.retain(|_, entry| {
            let before = entry.holders.len();
            entry.holders.retain(|&mut (holder, _)| holder != tid);
            released += before - entry.holders.len();
            entry.waiters.retain(|&(waiter, _)| waiter != tid);
            !entry.is_unused()
        });
        drop(inner);
        self.changed.notify_all();
        released
    }

    /// Whether `tid` currently holds `key` in a mode covering `mode`
    pub fn holds(&self, tid: TxnId, key: &Key, mode: LockMode) -> bool {
        let inner = self.inner.lock();
        if inner.wounded.contains(&tid) {
            return false;
        }
        inner
            .entries
            .get(key)
            .map(|entry| {
                entry
                    .holders
                    .iter()
                    .any(|&(holder, held)| holder == tid && held.covers(mode))
            })
            .unwrap_or(false)
    }

    /// Whether `tid` has been wounded and not yet released
    pub fn is_wounded(&self, tid: TxnId) -> bool {
        self.inner.lock().wounded.contains(&tid)
    }

    /// Fence `tid` at its commit point: from now until `release_all` it
    /// cannot be wounded. Returns false (and fences nothing) if `tid` is
    /// already a victim, in which case it must abort instead.
    pub fn begin_commit(&self, tid: TxnId) -> bool {
        let mut inner = self.inner.lock();
        if inner.wounded.contains(&tid) {
            return false;
        }
        inner.committing.insert(tid);
        true
    }

    /// Number of keys with at least one holder or waiter
    pub fn active_keys(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Try to grant `tid` the lock right now, or report who blocks it.
    fn try_grant(inner: &mut TableInner, key: &Key, tid: TxnId, mode: LockMode) -> Check {
        let entry = inner.entries.entry(key.clone()).or_default();

        // Reentrant and upgrade paths for an existing holder.
        if let Some(&(_, held)) = entry.holders.iter().find(|&&(holder, _)| holder == tid) {
            if held.covers(mode) {
                Self::unqueue(entry, tid);
                return Check::Grant;
            }
            // Shared holder requesting exclusive: upgrade once sole holder.
            if entry.holders.len() == 1 {
                entry.holders[0].1 = LockMode::Exclusive;
                Self::unqueue(entry, tid);
                return Check::Grant;
            }
            let blockers = entry
                .holders
                .iter()
                .filter(|&&(holder, _)| holder != tid)
                .map(|&(holder, _)| holder)
                .collect();
            return Check::Blocked(blockers);
        }

        let mut blockers: SmallVec<[TxnId; 4]> = SmallVec::new();
        for &(holder, held) in entry.holders.iter() {
            if !held.compatible_with(mode) {
                blockers.push(holder);
            }
        }

        let queued_at = entry.waiters.iter().position(|&(waiter, _)| waiter == tid);
        if let Some(position) = queued_at {
            // FIFO promotion: everyone queued ahead must be grantable
            // alongside us, and we must be compatible with them.
            let mut virtual_holders: SmallVec<[(TxnId, LockMode); 4]> =
                entry.holders.iter().copied().collect();
            for &(waiter, waiter_mode) in entry.waiters.iter().take(position) {
                let grantable = virtual_holders
                    .iter()
                    .all(|&(_, held)| held.compatible_with(waiter_mode));
                if grantable {
                    virtual_holders.push((waiter, waiter_mode));
                    if !waiter_mode.compatible_with(mode) {
                        blockers.push(waiter);
                    }
                } else {
                    blockers.push(waiter);
                }
            }
        }
        // A first-time request is not queue-constrained: compatibility with
        // the holders alone decides (shared joins shared immediately).

        if blockers.is_empty() {
            Self::unqueue(entry, tid);
            entry.holders.push((tid, mode));
            Check::Grant
        } else {
            Check::Blocked(blockers)
        }
    }

    /// Mark `victim` wounded and strip its holds and waits everywhere.
    fn wound(inner: &mut TableInner, victim: TxnId) {
        inner.wounded.insert(victim);
        inner.entries.retain(|_, entry| {
            entry.holders.retain(|&mut (holder, _)| holder != victim);
            entry.waiters.retain(|&(waiter, _)| waiter != victim);
            !entry.is_unused()
        });
    }

    fn enqueue(inner: &mut TableInner, key: &Key, tid: TxnId, mode: LockMode) {
        let entry = inner.entries.entry(key.clone()).or_default();
        if !entry.waiters.iter().any(|&(waiter, _)| waiter == tid) {
            entry.waiters.push_back((tid, mode));
        }
    }

    fn unqueue(entry: &mut LockEntry, tid: TxnId) {
        entry.waiters.retain(|&(waiter, _)| waiter != tid);
    }

    fn remove_waiter(inner: &mut TableInner, key: &Key, tid: TxnId) {
        if let Some(entry) = inner.entries.get_mut(key) {
            Self::unqueue(entry, tid);
            if entry.is_unused() {
                inner.entries.remove(key);
            }
        }
    }
}
