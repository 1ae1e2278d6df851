//! Error types for Basalt
//!
//! One unified error enum serves the whole system; crates closer to the
//! wire or the lock table define narrower errors and convert into this one
//! at the API boundary. We use `thiserror` for `Display`/`Error` impls.

use crate::types::AbortReason;
use std::io;
use thiserror::Error;

/// Result type alias for Basalt operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Basalt operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket operations, connect failures)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wire serialization or framing error
    #[error("wire error: {0}")]
    Wire(String),

    /// The transaction terminated without committing
    ///
    /// Carries the typed reason. `reason.is_retryable()` tells the caller
    /// whether starting over is worthwhile.
    #[error("transaction {tid} aborted: {reason}")]
    Aborted {
        /// The transaction that aborted
        tid: u64,
        /// Why it aborted
        reason: AbortReason,
    },

    /// Operation on a handle that already committed or aborted
    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    /// A node rejected an operation that violated its access discipline
    ///
    /// On the S2PL path, `get`/`put` without a compatible lock held by the
    /// same transaction are rejected rather than served.
    #[error("rejected by node: {0}")]
    Rejected(String),

    /// The peer answered with something the protocol does not allow here
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether this error is an abort the caller may retry from scratch
    pub fn is_retryable_abort(&self) -> bool {
        matches!(self, Error::Aborted { reason, .. } if reason.is_retryable())
    }

    /// The abort reason, if this error is a transaction abort
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Error::Aborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_error_exposes_reason() {
        let err = Error::Aborted {
            tid: 7,
            reason: AbortReason::StaleRead,
        };
        assert_eq!(err.abort_reason(), Some(AbortReason::StaleRead));
        assert!(err.is_retryable_abort());
    }

    #[test]
    fn test_non_abort_errors_have_no_reason() {
        let err = Error::InvalidState("already committed".into());
        assert_eq!(err.abort_reason(), None);
        assert!(!err.is_retryable_abort());
    }

    #[test]
    fn test_display_includes_reason_tag() {
        let err = Error::Aborted {
            tid: 3,
            reason: AbortReason::DeadlockAbort,
        };
        assert!(err.to_string().contains("DEADLOCK_ABORT"));
    }
}
