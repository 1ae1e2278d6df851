//! Foundational types for Basalt
//!
//! Keys and values are opaque byte strings: the store assigns no structure
//! to them beyond equality, ordering, and hashing. Transaction identifiers
//! are issued by the coordinator from a single strictly-increasing counter,
//! so a `TxnId` doubles as the transaction's start timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier, issued by the coordinator.
///
/// TxnIds are globally unique and strictly increasing; the numeric value is
/// also the transaction's start timestamp. Commit timestamps are drawn from
/// the same sequence, so any two issued values are totally ordered.
pub type TxnId = u64;

/// An opaque key.
///
/// Keys are byte strings. Placement on nodes is decided by
/// [`ShardMap`](crate::routing::ShardMap); nothing else interprets the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Create a key from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw bytes of this key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the key in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// An opaque value.
///
/// Values are byte strings, created on first write and updated in place.
/// The core never deletes them; an absent key reads as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Create a value from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw bytes of this value
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the value in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the value is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self(n.to_string().into_bytes())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Lock mode for the S2PL access path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared lock: any number of readers
    Shared,
    /// Exclusive lock: a single writer
    Exclusive,
}

impl LockMode {
    /// Whether a lock held in `self` mode can coexist with one in `other` mode
    pub fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// Whether a lock held in `self` mode satisfies a request for `needed`
    ///
    /// An exclusive hold covers a shared request; the reverse does not hold.
    pub fn covers(self, needed: LockMode) -> bool {
        match needed {
            LockMode::Shared => true,
            LockMode::Exclusive => self == LockMode::Exclusive,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Concurrency-control discipline, chosen at `begin` and fixed for the
/// transaction's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Optimistic concurrency control: execute freely, validate at commit
    Occ,
    /// Strict two-phase locking: lock on access, release all at commit
    S2pl,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Occ => write!(f, "occ"),
            Mode::S2pl => write!(f, "s2pl"),
        }
    }
}

/// Why a transaction aborted.
///
/// Every failed transaction surfaces exactly one of these. The first three
/// are transient: the caller may retry with a fresh transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Backward validation found a committed writer that invalidated a read
    StaleRead,
    /// The transaction was chosen as a deadlock victim (wound-wait)
    DeadlockAbort,
    /// A lock acquisition did not complete within its timeout
    LockTimeout,
    /// The client requested the abort
    ClientAbort,
    /// The write phase could not apply to every shard within its retry bound
    ApplyFailed,
}

impl AbortReason {
    /// Whether a caller may reasonably retry the transaction from scratch
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            AbortReason::StaleRead | AbortReason::DeadlockAbort | AbortReason::LockTimeout
        )
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::StaleRead => write!(f, "STALE_READ"),
            AbortReason::DeadlockAbort => write!(f, "DEADLOCK_ABORT"),
            AbortReason::LockTimeout => write!(f, "LOCK_TIMEOUT"),
            AbortReason::ClientAbort => write!(f, "CLIENT_ABORT"),
            AbortReason::ApplyFailed => write!(f, "APPLY_FAILED"),
        }
    }
}
