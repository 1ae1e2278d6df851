//! The coordinator service
//!
//! Owns the logical clock, the live-transaction registry, and the
//! committed history. Commit handling runs under one validation critical
//! section (an async mutex over the history): conflict check, commit
//! timestamp assignment, write-phase dispatch, history append, and
//! pruning all happen inside it, trading validation throughput for an
//! obviously correct ordering.
//!
//! Once the commit timestamp is assigned the transaction is logically
//! committed. A write-phase failure after bounded retries is surfaced to
//! the client as `ApplyFailed`, but the history record is still appended;
//! in-memory nodes are expected to apply, and a persistent refusal is a
//! node-local inconsistency to report, not grounds for rollback.

use basalt_client::NodeConn;
use basalt_core::{AbortReason, Error, Key, Result, ShardMap};
use basalt_txn::{CommitHistory, CommittedRecord, LiveRegistry, TimestampOracle};
use basalt_wire::{CoordinatorRequest, CoordinatorResponse, WriteEntry};
use rustc_hash::{FxHashMap, FxHashSet};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Mutex;

/// Tunables for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Retries per node `put` during the write phase before giving up
    pub write_retries: u32,
    /// Age bound after which a live transaction is expired so the
    /// pruning watermark can advance. `None` disables expiry.
    pub max_txn_age: Option<Duration>,
    /// Bound on (re)connecting to a data node
    pub connect_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            write_retries: 3,
            max_txn_age: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Write-phase connection to one data node, dialed lazily and redialed
/// after a failed attempt.
struct WriteTarget {
    addr: SocketAddr,
    conn: Mutex<Option<NodeConn>>,
}

/// The coordinator: timestamps, validation, write fan-out, history.
///
/// Thread-safe; a single instance serves every connection.
pub struct CoordinatorService {
    oracle: TimestampOracle,
    live: LiveRegistry,
    history: Mutex<CommitHistory>,
    targets: Vec<WriteTarget>,
    shard_map: ShardMap,
    config: CoordinatorConfig,
}

impl CoordinatorService {
    /// Create a coordinator for the given data nodes, in shard order
    pub fn new(node_addrs: Vec<SocketAddr>, config: CoordinatorConfig) -> Self {
        let shard_map = ShardMap::new(node_addrs.len());
        let targets = node_addrs
            .into_iter()
            .map(|addr| WriteTarget {
                addr,
                conn: Mutex::new(None),
            })
            .collect();
        Self {
            oracle: TimestampOracle::new(),
            live: LiveRegistry::new(),
            history: Mutex::new(CommitHistory::new()),
            targets,
            shard_map,
            config,
        }
    }

    /// Number of live transactions (observability)
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Serve one request
    pub async fn handle(&self, request: CoordinatorRequest) -> CoordinatorResponse {
        match request {
            CoordinatorRequest::Begin => {
                self.expire_aged();
                let tid = self.oracle.next();
                self.live.register(tid);
                tracing::debug!(tid, "transaction begun");
                CoordinatorResponse::Started { tid }
            }
            CoordinatorRequest::ValidateCommit {
                tid,
                read_keys,
                writes,
            } => self.validate_and_commit(tid, read_keys, writes).await,
            CoordinatorRequest::Abort { tid } => {
                let was_live = self.live.deregister(tid);
                tracing::debug!(tid, was_live, "transaction aborted by client");
                CoordinatorResponse::Ok
            }
        }
    }

    /// The commit protocol, entirely inside the validation critical
    /// section: other commits queue on the history mutex until this one
    /// has appended its record and pruned.
    async fn validate_and_commit(
        &self,
        tid: u64,
        read_keys: Vec<Key>,
        writes: Vec<WriteEntry>,
    ) -> CoordinatorResponse {
        let mut history = self.history.lock().await;
        self.expire_aged();

        if !self.live.is_live(tid) {
            // Unknown, expired, or already terminated.
            tracing::debug!(tid, "commit refused: transaction is not live");
            return CoordinatorResponse::Aborted {
                reason: AbortReason::ClientAbort,
            };
        }

        let read_set: FxHashSet<Key> = read_keys.into_iter().collect();
        if let Some(record) = history.conflicts_with(tid, &read_set) {
            tracing::debug!(
                tid,
                conflicting_tid = record.tid,
                conflicting_commit = record.ts_commit,
                "validation failed: stale read"
            );
            self.live.deregister(tid);
            self.prune(&mut history);
            return CoordinatorResponse::Aborted {
                reason: AbortReason::StaleRead,
            };
        }

        let ts_commit = self.oracle.next();
        let applied = self.apply_writes(&writes).await;

        if !writes.is_empty() {
            history.append(CommittedRecord {
                tid,
                ts_commit,
                written_keys: writes.iter().map(|entry| entry.key.clone()).collect(),
            });
        }
        self.live.deregister(tid);
        self.prune(&mut history);

        match applied {
            Ok(()) => {
                tracing::debug!(tid, ts_commit, writes = writes.len(), "committed");
                CoordinatorResponse::Committed { ts_commit }
            }
            Err(e) => {
                // Logically committed (the record stands); the failure to
                // apply is surfaced, not rolled back.
                tracing::error!(tid, ts_commit, error = %e, "write phase failed after commit point");
                CoordinatorResponse::Aborted {
                    reason: AbortReason::ApplyFailed,
                }
            }
        }
    }

    /// Fan the write map out to the owning nodes, in parallel across
    /// shards, sequentially within one shard's connection.
    async fn apply_writes(&self, writes: &[WriteEntry]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut by_shard: FxHashMap<usize, Vec<&WriteEntry>> = FxHashMap::default();
        for entry in writes {
            by_shard
                .entry(self.shard_map.shard_of(&entry.key))
                .or_default()
                .push(entry);
        }
        let shard_jobs = by_shard
            .into_iter()
            .map(|(shard, entries)| self.apply_to_shard(shard, entries));
        futures::future::try_join_all(shard_jobs).await.map(|_| ())
    }

    async fn apply_to_shard(&self, shard: usize, entries: Vec<&WriteEntry>) -> Result<()> {
        for entry in entries {
            self.put_with_retry(shard, entry).await?;
        }
        Ok(())
    }

    /// One write-phase `put`, retried up to the configured bound with a
    /// fresh connection after each failure.
    async fn put_with_retry(&self, shard: usize, entry: &WriteEntry) -> Result<()> {
        let target = &self.targets[shard];
        let mut attempt = 0;
        loop {
            let mut slot = target.conn.lock().await;
            let result = match Self::connected(&mut slot, target.addr, self.config.connect_timeout)
                .await
            {
                Ok(conn) => conn.put(None, entry.key.clone(), entry.value.clone()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    *slot = None;
                    attempt += 1;
                    if attempt > self.config.write_retries {
                        return Err(e);
                    }
                    tracing::warn!(shard, attempt, error = %e, "write-phase put failed; retrying");
                }
            }
        }
    }

    async fn connected<'a>(
        slot: &'a mut Option<NodeConn>,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<&'a mut NodeConn> {
        if slot.is_none() {
            *slot = Some(NodeConn::connect(addr, timeout).await?);
        }
        slot.as_mut()
            .ok_or_else(|| Error::InvalidState(format!("no connection to {addr}")))
    }

    fn expire_aged(&self) {
        if let Some(max_age) = self.config.max_txn_age {
            for tid in self.live.expire_older_than(max_age) {
                tracing::warn!(tid, "expired over-age transaction");
            }
        }
    }

    /// Prune history at the live watermark. Runs inside the validation
    /// critical section, so pruning is serialized with validation and can
    /// never remove a record a live transaction might still conflict with.
    fn prune(&self, history: &mut CommitHistory) {
        let watermark = self.live.ts_low().unwrap_or(u64::MAX);
        let dropped = history.prune(watermark);
        if dropped > 0 {
            tracing::debug!(watermark, dropped, retained = history.len(), "pruned history");
        }
    }
}
