//! Core types for Basalt
//!
//! This crate defines the vocabulary shared by every other Basalt crate:
//! - Key / Value: opaque byte strings
//! - TxnId: coordinator-issued transaction identifier (also the start timestamp)
//! - LockMode / Mode: lock compatibility and concurrency-control discipline
//! - AbortReason: typed reasons a transaction can fail
//! - Error / Result: the unified error type
//! - ShardMap: deterministic key → node placement

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod routing;
pub mod types;

pub use error::{Error, Result};
pub use routing::ShardMap;
pub use types::{AbortReason, Key, LockMode, Mode, TxnId, Value};
