//! Per-transaction state machines
//!
//! A [`Transaction`] is one of two concrete variants behind the common
//! read/write/commit/abort surface, fixed at `begin`:
//!
//! - **OCC**: reads go to the owning node and are cached locally; writes
//!   are buffered and never touch a node before commit. Commit ships the
//!   read keys and buffered writes to the coordinator for backward
//!   validation.
//! - **S2PL**: every access first acquires the key's lock on the owning
//!   node (shared for reads, exclusive for writes). Writes are still
//!   buffered client-side and applied between acquisition and release,
//!   at commit time, so an abort never needs rollback. Commit first
//!   fences every touched node (no wound can land once application has
//!   begun), then applies, then releases all locks at once (strictness).
//!
//! Both variants cache reads, so a key read twice returns the same value
//! unless this transaction wrote it in between. Once a handle terminates,
//! every further operation fails fast with the recorded outcome.

use crate::client::ClientConfig;
use crate::conn::{CoordConn, NodeConn};
use basalt_core::{AbortReason, Error, Key, LockMode, Mode, Result, ShardMap, TxnId, Value};
use basalt_wire::{LockReply, WriteEntry};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed(u64),
    Aborted(AbortReason),
}

/// Connections and lifecycle state shared by both variants
struct Ctx {
    tid: TxnId,
    state: TxnState,
    coord: CoordConn,
    config: ClientConfig,
    shard_map: ShardMap,
    nodes: Vec<Option<NodeConn>>,
}

impl Ctx {
    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed(ts_commit) => Err(Error::InvalidState(format!(
                "transaction {} already committed at {ts_commit}",
                self.tid
            ))),
            TxnState::Aborted(reason) => Err(Error::Aborted {
                tid: self.tid,
                reason,
            }),
        }
    }

    /// Connection to the node owning `shard`, dialing on first use
    async fn node(&mut self, shard: usize) -> Result<&mut NodeConn> {
        let slot = &mut self.nodes[shard];
        if slot.is_none() {
            let conn =
                NodeConn::connect(self.config.nodes[shard], self.config.connect_timeout).await?;
            *slot = Some(conn);
        }
        slot.as_mut().ok_or_else(|| {
            Error::InvalidState(format!("no connection to shard {shard}"))
        })
    }

    /// Best-effort `release_all` on every node this transaction touched
    async fn release_locks(&mut self, touched: &FxHashSet<usize>) {
        let tid = self.tid;
        for &shard in touched {
            match self.node(shard).await {
                Ok(conn) => {
                    if let Err(e) = conn.lock_release_all(tid).await {
                        tracing::warn!(tid, shard, error = %e, "lock release failed");
                    }
                }
                Err(e) => tracing::warn!(tid, shard, error = %e, "lock release unreachable"),
            }
        }
    }

    /// Abort with `reason`: drop locks, tell the coordinator, seal the
    /// handle, and return the error the caller will see.
    async fn fail(&mut self, touched: &FxHashSet<usize>, reason: AbortReason) -> Error {
        self.release_locks(touched).await;
        if let Err(e) = self.coord.abort(self.tid).await {
            tracing::warn!(tid = self.tid, error = %e, "coordinator abort failed");
        }
        self.state = TxnState::Aborted(reason);
        tracing::debug!(tid = self.tid, %reason, "transaction aborted");
        Error::Aborted {
            tid: self.tid,
            reason,
        }
    }
}

#[derive(Default)]
struct OccState {
    /// Keys read from nodes, with the value observed first. Re-reads are
    /// served from here so a transaction sees a stable snapshot of what
    /// it has looked at.
    reads: FxHashMap<Key, Option<Value>>,
    /// Buffered writes; nothing reaches a node before the write phase.
    writes: FxHashMap<Key, Value>,
}

#[derive(Default)]
struct S2plState {
    /// Shards where this transaction attempted any lock. `release_all`
    /// goes to every one of them, including a shard where the only
    /// attempt was wounded, so the node's victim bookkeeping is cleared.
    touched: FxHashSet<usize>,
    /// Reads observed under a shared lock
    reads: FxHashMap<Key, Option<Value>>,
    /// Writes buffered under an exclusive lock, applied at commit
    writes: FxHashMap<Key, Value>,
}

enum Discipline {
    Occ(OccState),
    S2pl(S2plState),
}

/// A transaction handle.
///
/// Obtained from [`Client::begin`](crate::Client::begin). Terminates in
/// exactly one of committed or aborted; afterwards every operation fails
/// with the recorded outcome. The handle owns its connections, so
/// dropping it tears them down (locks held by an abandoned S2PL handle
/// remain until a timeout-driven wound or an explicit `abort`).
pub struct Transaction {
    ctx: Ctx,
    discipline: Discipline,
}

impl Transaction {
    pub(crate) fn new(
        tid: TxnId,
        mode: Mode,
        coord: CoordConn,
        config: ClientConfig,
        shard_map: ShardMap,
    ) -> Self {
        let nodes = (0..config.nodes.len()).map(|_| None).collect();
        Self {
            ctx: Ctx {
                tid,
                state: TxnState::Active,
                coord,
                config,
                shard_map,
                nodes,
            },
            discipline: match mode {
                Mode::Occ => Discipline::Occ(OccState::default()),
                Mode::S2pl => Discipline::S2pl(S2plState::default()),
            },
        }
    }

    /// This transaction's id (= its start timestamp)
    pub fn tid(&self) -> TxnId {
        self.ctx.tid
    }

    /// The discipline chosen at `begin`
    pub fn mode(&self) -> Mode {
        match self.discipline {
            Discipline::Occ(_) => Mode::Occ,
            Discipline::S2pl(_) => Mode::S2pl,
        }
    }

    /// Whether the transaction can still issue operations
    pub fn is_active(&self) -> bool {
        self.ctx.state == TxnState::Active
    }

    /// The commit timestamp, once committed
    pub fn ts_commit(&self) -> Option<u64> {
        match self.ctx.state {
            TxnState::Committed(ts_commit) => Some(ts_commit),
            _ => None,
        }
    }

    /// Why the transaction aborted, once aborted
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self.ctx.state {
            TxnState::Aborted(reason) => Some(reason),
            _ => None,
        }
    }

    /// Read a key; `None` means the key is missing.
    ///
    /// Reads the transaction's own buffered write first, then its earlier
    /// reads, then the owning node.
    pub async fn read(&mut self, key: &Key) -> Result<Option<Value>> {
        self.ctx.ensure_active()?;
        match &mut self.discipline {
            Discipline::Occ(occ) => occ_read(&mut self.ctx, occ, key).await,
            Discipline::S2pl(s2pl) => s2pl_read(&mut self.ctx, s2pl, key).await,
        }
    }

    /// Write a key.
    ///
    /// Buffered in both disciplines; under S2PL the key's exclusive lock
    /// is acquired now, on the owning node.
    pub async fn write(&mut self, key: Key, value: Value) -> Result<()> {
        self.ctx.ensure_active()?;
        match &mut self.discipline {
            Discipline::Occ(occ) => {
                occ.writes.insert(key, value);
                Ok(())
            }
            Discipline::S2pl(s2pl) => s2pl_write(&mut self.ctx, s2pl, key, value).await,
        }
    }

    /// Commit. Returns the commit timestamp on success; on failure the
    /// handle is aborted and the typed reason is in the error.
    pub async fn commit(&mut self) -> Result<u64> {
        self.ctx.ensure_active()?;
        match &mut self.discipline {
            Discipline::Occ(occ) => occ_commit(&mut self.ctx, occ).await,
            Discipline::S2pl(s2pl) => s2pl_commit(&mut self.ctx, s2pl).await,
        }
    }

    /// Abort: discard buffered state, release any locks, and seal the
    /// handle. The returned error from later operations carries
    /// [`AbortReason::ClientAbort`].
    pub async fn abort(&mut self) -> Result<()> {
        self.ctx.ensure_active()?;
        let touched = match &mut self.discipline {
            Discipline::Occ(_) => FxHashSet::default(),
            Discipline::S2pl(s2pl) => std::mem::take(&mut s2pl.touched),
        };
        self.ctx.fail(&touched, AbortReason::ClientAbort).await;
        Ok(())
    }
}

async fn occ_read(ctx: &mut Ctx, occ: &mut OccState, key: &Key) -> Result<Option<Value>> {
    if let Some(value) = occ.writes.get(key) {
        return Ok(Some(value.clone()));
    }
    if let Some(cached) = occ.reads.get(key) {
        return Ok(cached.clone());
    }
    let shard = ctx.shard_map.shard_of(key);
    let value = ctx.node(shard).await?.get(None, key.clone()).await?;
    occ.reads.insert(key.clone(), value.clone());
    Ok(value)
}

async fn occ_commit(ctx: &mut Ctx, occ: &mut OccState) -> Result<u64> {
    let read_keys: Vec<Key> = occ.reads.keys().cloned().collect();
    let writes: Vec<WriteEntry> = occ
        .writes
        .drain()
        .map(|(key, value)| WriteEntry { key, value })
        .collect();
    match ctx.coord.validate_commit(ctx.tid, read_keys, writes).await {
        Ok(ts_commit) => {
            ctx.state = TxnState::Committed(ts_commit);
            tracing::debug!(tid = ctx.tid, ts_commit, "transaction committed");
            Ok(ts_commit)
        }
        Err(Error::Aborted { tid, reason }) => {
            // The coordinator already dropped the transaction; only the
            // local handle needs sealing.
            ctx.state = TxnState::Aborted(reason);
            tracing::debug!(tid, %reason, "commit refused");
            Err(Error::Aborted { tid, reason })
        }
        Err(other) => {
            ctx.state = TxnState::Aborted(AbortReason::ClientAbort);
            Err(other)
        }
    }
}

async fn s2pl_read(ctx: &mut Ctx, s2pl: &mut S2plState, key: &Key) -> Result<Option<Value>> {
    if let Some(value) = s2pl.writes.get(key) {
        return Ok(Some(value.clone()));
    }
    if let Some(cached) = s2pl.reads.get(key) {
        return Ok(cached.clone());
    }
    let shard = ctx.shard_map.shard_of(key);
    s2pl.touched.insert(shard);
    let reply = {
        let tid = ctx.tid;
        let timeout = ctx.config.lock_timeout;
        ctx.node(shard)
            .await?
            .lock_acquire(tid, key.clone(), LockMode::Shared, timeout)
            .await?
    };
    match reply {
        LockReply::Granted => {
            let tid = ctx.tid;
            let value = ctx.node(shard).await?.get(Some(tid), key.clone()).await?;
            s2pl.reads.insert(key.clone(), value.clone());
            Ok(value)
        }
        LockReply::Timeout => Err(ctx.fail(&s2pl.touched, AbortReason::LockTimeout).await),
        LockReply::DeadlockAbort => Err(ctx.fail(&s2pl.touched, AbortReason::DeadlockAbort).await),
    }
}

async fn s2pl_write(ctx: &mut Ctx, s2pl: &mut S2plState, key: Key, value: Value) -> Result<()> {
    if s2pl.writes.contains_key(&key) {
        // Exclusive lock already held from the first buffered write.
        s2pl.writes.insert(key, value);
        return Ok(());
    }
    let shard = ctx.shard_map.shard_of(&key);
    s2pl.touched.insert(shard);
    let reply = {
        let tid = ctx.tid;
        let timeout = ctx.config.lock_timeout;
        ctx.node(shard)
            .await?
            .lock_acquire(tid, key.clone(), LockMode::Exclusive, timeout)
            .await?
    };
    match reply {
        LockReply::Granted => {
            s2pl.writes.insert(key, value);
            Ok(())
        }
        LockReply::Timeout => Err(ctx.fail(&s2pl.touched, AbortReason::LockTimeout).await),
        LockReply::DeadlockAbort => Err(ctx.fail(&s2pl.touched, AbortReason::DeadlockAbort).await),
    }
}

async fn s2pl_commit(ctx: &mut Ctx, s2pl: &mut S2plState) -> Result<u64> {
    // Fence every touched node first. After the fences this transaction
    // cannot be wounded anywhere, so the write application below cannot
    // be interrupted into a partial commit. A fence refusal means a wound
    // already landed; nothing has been applied yet, so the abort is clean.
    let touched: Vec<usize> = s2pl.touched.iter().copied().collect();
    for shard in touched {
        let tid = ctx.tid;
        let fenced = match ctx.node(shard).await {
            Ok(conn) => conn.commit_fence(tid).await,
            Err(e) => Err(e),
        };
        if let Err(e) = fenced {
            let reason = e.abort_reason().unwrap_or(AbortReason::ClientAbort);
            return Err(ctx.fail(&s2pl.touched, reason).await);
        }
    }

    // Apply buffered writes while the exclusive locks are still held.
    let writes: Vec<(Key, Value)> = s2pl.writes.drain().collect();
    for (key, value) in writes {
        let shard = ctx.shard_map.shard_of(&key);
        let tid = ctx.tid;
        let applied = match ctx.node(shard).await {
            Ok(conn) => conn.put(Some(tid), key, value).await,
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            let reason = e.abort_reason().unwrap_or(AbortReason::ClientAbort);
            return Err(ctx.fail(&s2pl.touched, reason).await);
        }
    }

    // The "simple commit": nothing to validate, but the commit timestamp
    // places this transaction in the global order.
    let ts_commit = match ctx.coord.validate_commit(ctx.tid, Vec::new(), Vec::new()).await {
        Ok(ts_commit) => ts_commit,
        Err(e) => {
            let reason = e.abort_reason().unwrap_or(AbortReason::ClientAbort);
            return Err(ctx.fail(&s2pl.touched, reason).await);
        }
    };

    // Strictness: locks are released only now, after the writes landed.
    let touched = std::mem::take(&mut s2pl.touched);
    ctx.release_locks(&touched).await;
    ctx.state = TxnState::Committed(ts_commit);
    tracing::debug!(tid = ctx.tid, ts_commit, "transaction committed");
    Ok(ts_commit)
}
