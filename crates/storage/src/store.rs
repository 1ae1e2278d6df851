//! The in-memory key→value map for one shard
//!
//! # Design
//!
//! - DashMap: sharded internally, lock-free reads, per-bucket write locks
//! - Operations on disjoint keys never serialize against each other
//! - Atomic per key: concurrent `put`s on one key serialize to some order
//!   chosen by the bucket lock; a concurrent `get` observes the prior or
//!   the next value, never a torn one
//!
//! The store is stateless with respect to transaction identity. On the OCC
//! path it is the whole data plane; on the S2PL path the lock table in
//! `basalt-lock` arbitrates access before requests reach here.

use basalt_core::{Key, Value};
use dashmap::DashMap;

/// One shard's key→value mapping.
///
/// Values are created on first write and updated in place; the core never
/// deletes them. An absent key reads as `None`.
#[derive(Debug, Default)]
pub struct ShardStore {
    data: DashMap<Key, Value>,
}

impl ShardStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Read the current value of `key`, or `None` if it was never written
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Write `value` under `key`, creating or replacing
    pub fn put(&self, key: Key, value: Value) {
        self.data.insert(key, value);
    }

    /// Number of keys present in this shard
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the shard holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_missing_key_reads_none() {
        let store = ShardStore::new();
        assert_eq!(store.get(&Key::from("nope")), None);
    }

    #[test]
    fn test_put_then_get() {
        let store = ShardStore::new();
        store.put(Key::from("x"), Value::from("1"));
        assert_eq!(store.get(&Key::from("x")), Some(Value::from("1")));
    }

    #[test]
    fn test_put_replaces_in_place() {
        let store = ShardStore::new();
        store.put(Key::from("x"), Value::from("1"));
        store.put(Key::from("x"), Value::from("2"));
        assert_eq!(store.get(&Key::from("x")), Some(Value::from("2")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_puts_one_wins_untorn() {
        // Hammer one key from many threads; the surviving value must be one
        // of the written values in full, never interleaved bytes.
        let store = Arc::new(ShardStore::new());
        let key = Key::from("contended");
        let threads = 8;
        let writes_per_thread = 200;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let store = Arc::clone(&store);
                let key = key.clone();
                std::thread::spawn(move || {
                    for i in 0..writes_per_thread {
                        store.put(key.clone(), Value::from(format!("t{t}-i{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let value = store.get(&key).unwrap();
        let text = value.to_string();
        let mut parts = text.split("-i");
        let t: usize = parts.next().unwrap()[1..].parse().unwrap();
        let i: usize = parts.next().unwrap().parse().unwrap();
        assert!(t < threads && i < writes_per_thread);
    }

    #[test]
    fn test_concurrent_disjoint_keys() {
        let store = Arc::new(ShardStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.put(Key::from(format!("k{t}-{i}")), Value::from(i as u64));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 400);
    }
}
