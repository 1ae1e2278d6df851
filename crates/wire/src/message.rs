//! Message set for the node and coordinator RPC surfaces

use basalt_core::{AbortReason, Key, LockMode, TxnId, Value};
use serde::{Deserialize, Serialize};

/// Envelope wrapping every request and response on the wire.
///
/// `request_id` is chosen by the caller and echoed back verbatim, letting
/// the caller match responses to requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Caller-chosen id, echoed by the response
    pub request_id: u64,
    /// The operation (requests) or its result (responses)
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wrap `body` under `request_id`
    pub fn new(request_id: u64, body: T) -> Self {
        Self { request_id, body }
    }
}

/// One buffered write shipped to the coordinator at OCC commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteEntry {
    /// The key to write
    pub key: Key,
    /// The value to install
    pub value: Value,
}

/// Requests served by a data node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRequest {
    /// Read a key. `tid` present marks the S2PL path: the node verifies a
    /// compatible lock is held. `tid` absent is the lockless OCC path.
    Get {
        /// Lock owner for S2PL-path enforcement, `None` on the OCC path
        tid: Option<TxnId>,
        /// Key to read
        key: Key,
    },
    /// Write a key; `tid` as for `Get`
    Put {
        /// Lock owner for S2PL-path enforcement, `None` on the OCC path
        tid: Option<TxnId>,
        /// Key to write
        key: Key,
        /// Value to install
        value: Value,
    },
    /// Acquire a lock, waiting up to `timeout_ms`
    LockAcquire {
        /// Requesting transaction
        tid: TxnId,
        /// Key to lock
        key: Key,
        /// Requested mode
        mode: LockMode,
        /// Wait bound in milliseconds
        timeout_ms: u64,
    },
    /// Fence `tid` at its commit point: afterwards it cannot be chosen as
    /// a deadlock victim on this node, so applying its buffered writes is
    /// safe. Answered with `Ok`, or `DeadlockAbort` if `tid` was already
    /// wounded.
    CommitFence {
        /// The committing transaction
        tid: TxnId,
    },
    /// Release every lock and queued wait owned by `tid`
    LockReleaseAll {
        /// The transaction releasing
        tid: TxnId,
    },
}

/// Outcome of a lock acquisition, on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockReply {
    /// The lock is held
    Granted,
    /// The wait timed out; the request was withdrawn
    Timeout,
    /// The requester was wounded and must abort
    DeadlockAbort,
}

/// Responses from a data node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeResponse {
    /// Result of `Get`: the value, or `None` for a missing key
    Value(Option<Value>),
    /// Acknowledgement for `Put`, `CommitFence`, and `LockReleaseAll`
    Ok,
    /// Result of `LockAcquire`
    Lock(LockReply),
    /// The sender was wounded as a deadlock victim; it must abort
    DeadlockAbort,
    /// The operation violated the node's access discipline
    ///
    /// Returned for S2PL-path `Get`/`Put` without a compatible lock held
    /// by the sending transaction.
    Rejected {
        /// What was violated
        message: String,
    },
}

/// Requests served by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordinatorRequest {
    /// Start a transaction; the reply carries its id / start timestamp
    Begin,
    /// OCC commit: validate the read set against recent committers, then
    /// apply the write map. S2PL commits send empty sets and use this
    /// purely to obtain a commit timestamp.
    ValidateCommit {
        /// The committing transaction
        tid: TxnId,
        /// Keys the transaction read
        read_keys: Vec<Key>,
        /// Buffered writes to apply
        writes: Vec<WriteEntry>,
    },
    /// Abandon a transaction
    Abort {
        /// The transaction to abandon
        tid: TxnId,
    },
}

/// Responses from the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordinatorResponse {
    /// Reply to `Begin`
    Started {
        /// The new transaction's id (= start timestamp)
        tid: TxnId,
    },
    /// The transaction committed at `ts_commit`
    Committed {
        /// Position in the global commit order
        ts_commit: u64,
    },
    /// The transaction aborted
    Aborted {
        /// Why it aborted
        reason: AbortReason,
    },
    /// Acknowledgement for `Abort`
    Ok,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_preserves_request_id() {
        let env = Envelope::new(42, NodeRequest::Get {
            tid: None,
            key: Key::from("x"),
        });
        assert_eq!(env.request_id, 42);
    }

    #[test]
    fn test_lock_reply_equality() {
        assert_eq!(LockReply::Granted, LockReply::Granted);
        assert_ne!(LockReply::Granted, LockReply::DeadlockAbort);
    }
}
