//! RPC connections to nodes and the coordinator
//!
//! One request in flight per connection: the caller writes a frame and
//! reads the matching response. Transactions are single-threaded, so no
//! multiplexing is needed; the response's echoed request id is still
//! checked to catch a desynchronized peer.

use basalt_core::{AbortReason, Error, Key, LockMode, Result, TxnId, Value};
use basalt_wire::{
    read_frame, write_frame, CoordinatorRequest, CoordinatorResponse, Envelope, LockReply,
    NodeRequest, NodeResponse, WriteEntry,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// A framed request/response connection to one peer
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    next_id: u64,
}

impl Connection {
    /// Connect within `timeout`, with TCP_NODELAY for request latency
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                ))
            })??;
        stream.set_nodelay(true)?;
        Ok(Self { stream, next_id: 0 })
    }

    async fn call<Req, Resp>(&mut self, body: Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let request_id = self.next_id;
        self.next_id += 1;
        write_frame(&mut self.stream, &Envelope::new(request_id, body)).await?;
        let reply: Envelope<Resp> = read_frame(&mut self.stream).await?;
        if reply.request_id != request_id {
            return Err(Error::Protocol(format!(
                "response id {} does not match request id {request_id}",
                reply.request_id
            )));
        }
        Ok(reply.body)
    }
}

/// Typed connection to a data node
#[derive(Debug)]
pub struct NodeConn {
    conn: Connection,
}

impl NodeConn {
    /// Connect to the node at `addr`
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        Ok(Self {
            conn: Connection::connect(addr, timeout).await?,
        })
    }

    /// Read a key. `tid` present marks the S2PL path (lock enforced).
    pub async fn get(&mut self, tid: Option<TxnId>, key: Key) -> Result<Option<Value>> {
        match self.conn.call(NodeRequest::Get { tid, key }).await? {
            NodeResponse::Value(value) => Ok(value),
            other => Self::unexpected(tid, other, "Get"),
        }
    }

    /// Write a key. `tid` present marks the S2PL path (lock enforced).
    pub async fn put(&mut self, tid: Option<TxnId>, key: Key, value: Value) -> Result<()> {
        match self.conn.call(NodeRequest::Put { tid, key, value }).await? {
            NodeResponse::Ok => Ok(()),
            other => Self::unexpected(tid, other, "Put"),
        }
    }

    /// Acquire a lock, waiting up to `timeout`
    pub async fn lock_acquire(
        &mut self,
        tid: TxnId,
        key: Key,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<LockReply> {
        let request = NodeRequest::LockAcquire {
            tid,
            key,
            mode,
            timeout_ms: timeout.as_millis() as u64,
        };
        match self.conn.call(request).await? {
            NodeResponse::Lock(reply) => Ok(reply),
            other => Self::unexpected(Some(tid), other, "LockAcquire"),
        }
    }

    /// Fence `tid` at its commit point on this node (see
    /// `NodeRequest::CommitFence`). Fails with the deadlock abort if the
    /// transaction was already chosen as a victim.
    pub async fn commit_fence(&mut self, tid: TxnId) -> Result<()> {
        match self.conn.call(NodeRequest::CommitFence { tid }).await? {
            NodeResponse::Ok => Ok(()),
            other => Self::unexpected(Some(tid), other, "CommitFence"),
        }
    }

    /// Release every lock and queued wait owned by `tid` on this node
    pub async fn lock_release_all(&mut self, tid: TxnId) -> Result<()> {
        match self.conn.call(NodeRequest::LockReleaseAll { tid }).await? {
            NodeResponse::Ok => Ok(()),
            other => Self::unexpected(Some(tid), other, "LockReleaseAll"),
        }
    }

    fn unexpected<T>(tid: Option<TxnId>, response: NodeResponse, op: &str) -> Result<T> {
        match response {
            NodeResponse::DeadlockAbort => Err(Error::Aborted {
                tid: tid.unwrap_or_default(),
                reason: AbortReason::DeadlockAbort,
            }),
            NodeResponse::Rejected { message } => Err(Error::Rejected(message)),
            other => Err(Error::Protocol(format!(
                "unexpected node response to {op}: {other:?}"
            ))),
        }
    }
}

/// Typed connection to the coordinator
#[derive(Debug)]
pub struct CoordConn {
    conn: Connection,
}

impl CoordConn {
    /// Connect to the coordinator at `addr`
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        Ok(Self {
            conn: Connection::connect(addr, timeout).await?,
        })
    }

    /// Start a transaction; the returned id is its start timestamp
    pub async fn begin(&mut self) -> Result<TxnId> {
        match self.conn.call(CoordinatorRequest::Begin).await? {
            CoordinatorResponse::Started { tid } => Ok(tid),
            other => Err(Error::Protocol(format!(
                "unexpected coordinator response to Begin: {other:?}"
            ))),
        }
    }

    /// Submit a commit. Returns the commit timestamp, or the typed abort.
    pub async fn validate_commit(
        &mut self,
        tid: TxnId,
        read_keys: Vec<Key>,
        writes: Vec<WriteEntry>,
    ) -> Result<u64> {
        let request = CoordinatorRequest::ValidateCommit {
            tid,
            read_keys,
            writes,
        };
        match self.conn.call(request).await? {
            CoordinatorResponse::Committed { ts_commit } => Ok(ts_commit),
            CoordinatorResponse::Aborted { reason } => Err(Error::Aborted { tid, reason }),
            other => Err(Error::Protocol(format!(
                "unexpected coordinator response to ValidateCommit: {other:?}"
            ))),
        }
    }

    /// Abandon a transaction
    pub async fn abort(&mut self, tid: TxnId) -> Result<()> {
        match self.conn.call(CoordinatorRequest::Abort { tid }).await? {
            CoordinatorResponse::Ok => Ok(()),
            other => Err(Error::Protocol(format!(
                "unexpected coordinator response to Abort: {other:?}"
            ))),
        }
    }
}
