//! Committed-transaction history and backward validation
//!
//! The coordinator keeps one record per committed writer, ordered by
//! commit timestamp. Backward validation for a committing transaction T
//! asks: did any transaction commit after T started and write a key T
//! read? Records at or below the live watermark can never answer yes for
//! any live transaction, so they are pruned.
//!
//! Callers serialize access externally (the coordinator's validation
//! critical section); this type is plain data.

use basalt_core::{Key, TxnId};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

/// Record of one committed transaction
#[derive(Debug, Clone)]
pub struct CommittedRecord {
    /// The transaction's id (= its start timestamp)
    pub tid: TxnId,
    /// Its position in the global commit order
    pub ts_commit: u64,
    /// The keys its write phase touched. Values are not retained here;
    /// the authoritative value lives on the data nodes.
    pub written_keys: FxHashSet<Key>,
}

/// Ordered, bounded history of committed transactions.
///
/// Keyed by commit timestamp, so "everything committed after `ts_start`"
/// is a range query and pruning splits the map at the watermark.
#[derive(Debug, Default)]
pub struct CommitHistory {
    records: BTreeMap<u64, CommittedRecord>,
}

impl CommitHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Backward validation: find the first committed record that
    /// invalidates a transaction which started at `ts_start` and read
    /// `read_set`.
    ///
    /// A record invalidates the reader when it committed after the reader
    /// started and its written keys intersect the read set. Blind writes
    /// (keys written but never read) cannot conflict.
    pub fn conflicts_with<'a>(
        &'a self,
        ts_start: u64,
        read_set: &FxHashSet<Key>,
    ) -> Option<&'a CommittedRecord> {
        if read_set.is_empty() {
            return None;
        }
        self.records
            .range(ts_start + 1..)
            .map(|(_, record)| record)
            .find(|record| !record.written_keys.is_disjoint(read_set))
    }

    /// Append a record. Commit timestamps arrive in increasing order from
    /// the oracle, so this always appends at the tail.
    pub fn append(&mut self, record: CommittedRecord) {
        debug_assert!(
            self.records
                .last_key_value()
                .map(|(&last, _)| record.ts_commit > last)
                .unwrap_or(true),
            "commit timestamps must arrive in increasing order"
        );
        self.records.insert(record.ts_commit, record);
    }

    /// Drop every record with `ts_commit <= watermark`.
    ///
    /// The watermark is the minimum start timestamp of any live
    /// transaction (`u64::MAX` when nothing is live): no live or future
    /// transaction can be invalidated by a record at or below it.
    /// Returns the number of records dropped.
    pub fn prune(&mut self, watermark: u64) -> usize {
        if watermark == u64::MAX {
            let dropped = self.records.len();
            self.records.clear();
            return dropped;
        }
        let keep = self.records.split_off(&(watermark + 1));
        let dropped = self.records.len();
        self.records = keep;
        dropped
    }

    /// Number of records retained
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> FxHashSet<Key> {
        names.iter().map(|&n| Key::from(n)).collect()
    }

    fn record(tid: TxnId, ts_commit: u64, written: &[&str]) -> CommittedRecord {
        CommittedRecord {
            tid,
            ts_commit,
            written_keys: keys(written),
        }
    }

    #[test]
    fn test_later_writer_invalidates_reader() {
        let mut history = CommitHistory::new();
        history.append(record(2, 5, &["x"]));
        // Reader started at 1 and read x; the writer committed at 5.
        let conflict = history.conflicts_with(1, &keys(&["x"]));
        assert_eq!(conflict.map(|c| c.ts_commit), Some(5));
    }

    #[test]
    fn test_earlier_commit_does_not_conflict() {
        let mut history = CommitHistory::new();
        history.append(record(2, 5, &["x"]));
        // A reader that started at 5 saw the committed state: no conflict.
        assert!(history.conflicts_with(5, &keys(&["x"])).is_none());
        assert!(history.conflicts_with(9, &keys(&["x"])).is_none());
    }

    #[test]
    fn test_disjoint_keys_do_not_conflict() {
        let mut history = CommitHistory::new();
        history.append(record(2, 5, &["x"]));
        assert!(history.conflicts_with(1, &keys(&["y", "z"])).is_none());
    }

    #[test]
    fn test_empty_read_set_never_conflicts() {
        let mut history = CommitHistory::new();
        history.append(record(2, 5, &["x"]));
        assert!(history.conflicts_with(1, &keys(&[])).is_none());
    }

    #[test]
    fn test_first_conflicting_record_is_reported() {
        let mut history = CommitHistory::new();
        history.append(record(2, 4, &["a"]));
        history.append(record(3, 6, &["x"]));
        history.append(record(5, 8, &["x"]));
        let conflict = history.conflicts_with(1, &keys(&["x"])).unwrap();
        assert_eq!(conflict.ts_commit, 6);
    }

    #[test]
    fn test_prune_drops_at_or_below_watermark() {
        let mut history = CommitHistory::new();
        history.append(record(1, 3, &["a"]));
        history.append(record(2, 5, &["b"]));
        history.append(record(4, 7, &["c"]));
        assert_eq!(history.prune(5), 2);
        assert_eq!(history.len(), 1);
        // The surviving record is still visible to a pre-commit reader.
        assert!(history.conflicts_with(6, &keys(&["c"])).is_none());
        assert!(history.conflicts_with(5, &keys(&["c"])).is_some());
    }

    #[test]
    fn test_prune_with_no_live_transactions_clears_all() {
        let mut history = CommitHistory::new();
        history.append(record(1, 3, &["a"]));
        history.append(record(2, 5, &["b"]));
        assert_eq!(history.prune(u64::MAX), 2);
        assert!(history.is_empty());
    }

    #[test]
    fn test_pruning_preserves_validation_for_live_reader() {
        // A reader with ts_start 4 is live. Records above 4 must survive
        // pruning at watermark 4 and still invalidate the reader.
        let mut history = CommitHistory::new();
        history.append(record(2, 3, &["x"]));
        history.append(record(3, 6, &["x"]));
        history.prune(4);
        let conflict = history.conflicts_with(4, &keys(&["x"]));
        assert_eq!(conflict.map(|c| c.ts_commit), Some(6));
    }

    proptest::proptest! {
        /// Pruning at a watermark never changes the validation verdict of
        /// any transaction that started at or after it.
        #[test]
        fn prop_pruning_is_invisible_above_the_watermark(
            commits in proptest::collection::btree_set(1u64..200, 1..20),
            key_picks in proptest::collection::vec(0u8..8, 1..20),
            watermark in 0u64..200,
            offset in 0u64..50,
        ) {
            let mut full = CommitHistory::new();
            let mut pruned = CommitHistory::new();
            for (ts_commit, pick) in commits.iter().zip(key_picks.iter().cycle()) {
                let written: FxHashSet<Key> =
                    std::iter::once(Key::from(format!("k{pick}"))).collect();
                let rec = CommittedRecord { tid: ts_commit - 1, ts_commit: *ts_commit, written_keys: written };
                full.append(rec.clone());
                pruned.append(rec);
            }
            pruned.prune(watermark);

            let ts_start = watermark + offset;
            for pick in 0u8..8 {
                let read_set: FxHashSet<Key> =
                    std::iter::once(Key::from(format!("k{pick}"))).collect();
                let before = full.conflicts_with(ts_start, &read_set).map(|c| c.ts_commit);
                let after = pruned.conflicts_with(ts_start, &read_set).map(|c| c.ts_commit);
                proptest::prop_assert_eq!(before, after);
            }
        }
    }
}
