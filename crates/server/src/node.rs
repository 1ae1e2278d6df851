//! The data node service
//!
//! Owns one shard: a lockless key→value map for the OCC path and a lock
//! table for the S2PL path. The two paths are distinguished per request:
//! `Get`/`Put` with `tid: None` bypass the lock table entirely; with
//! `tid: Some` the node enforces that the sender holds a compatible lock
//! and refuses wounded senders outright.

use basalt_core::{Key, LockMode, TxnId};
use basalt_lock::{Acquisition, LockTable};
use basalt_storage::ShardStore;
use basalt_wire::{LockReply, NodeRequest, NodeResponse};
use std::sync::Arc;
use std::time::Duration;

/// One data node: a shard of storage plus its lock table.
///
/// Thread-safe; a single instance serves every connection.
pub struct NodeService {
    index: usize,
    store: ShardStore,
    locks: Arc<LockTable>,
}

impl NodeService {
    /// Create the service for shard `index`
    pub fn new(index: usize) -> Self {
        Self {
            index,
            store: ShardStore::new(),
            locks: Arc::new(LockTable::new()),
        }
    }

    /// This node's shard index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Serve one request.
    ///
    /// Lock acquisition can block for its full timeout, so it runs on the
    /// blocking pool; everything else answers inline.
    pub async fn handle(&self, request: NodeRequest) -> NodeResponse {
        match request {
            NodeRequest::Get { tid, key } => match tid {
                None => NodeResponse::Value(self.store.get(&key)),
                Some(tid) => match self.check_access(tid, &key, LockMode::Shared) {
                    Ok(()) => NodeResponse::Value(self.store.get(&key)),
                    Err(response) => response,
                },
            },
            NodeRequest::Put { tid, key, value } => match tid {
                None => {
                    self.store.put(key, value);
                    NodeResponse::Ok
                }
                Some(tid) => match self.check_access(tid, &key, LockMode::Exclusive) {
                    Ok(()) => {
                        self.store.put(key, value);
                        NodeResponse::Ok
                    }
                    Err(response) => response,
                },
            },
            NodeRequest::LockAcquire {
                tid,
                key,
                mode,
                timeout_ms,
            } => {
                let locks = Arc::clone(&self.locks);
                let timeout = Duration::from_millis(timeout_ms);
                let outcome = tokio::task::spawn_blocking(move || {
                    locks.acquire(tid, &key, mode, timeout)
                })
                .await
                .unwrap_or(Acquisition::Timeout);
                let reply = match outcome {
                    Acquisition::Granted => LockReply::Granted,
                    Acquisition::Timeout => LockReply::Timeout,
                    Acquisition::Deadlock => LockReply::DeadlockAbort,
                };
                NodeResponse::Lock(reply)
            }
            NodeRequest::CommitFence { tid } => {
                if self.locks.begin_commit(tid) {
                    NodeResponse::Ok
                } else {
                    NodeResponse::DeadlockAbort
                }
            }
            NodeRequest::LockReleaseAll { tid } => {
                let released = self.locks.release_all(tid);
                tracing::debug!(node = self.index, tid, released, "released all locks");
                NodeResponse::Ok
            }
        }
    }

    /// S2PL-path admission: wounded senders are refused with the deadlock
    /// verdict, unlocked access with a rejection.
    fn check_access(
        &self,
        tid: TxnId,
        key: &Key,
        mode: LockMode,
    ) -> std::result::Result<(), NodeResponse> {
        if self.locks.is_wounded(tid) {
            return Err(NodeResponse::DeadlockAbort);
        }
        if !self.locks.holds(tid, key, mode) {
            return Err(NodeResponse::Rejected {
                message: format!("transaction {tid} does not hold a {mode} lock on {key}"),
            });
        }
        Ok(())
    }
}
