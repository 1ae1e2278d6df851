//! Transaction bookkeeping for the Basalt coordinator
//!
//! This crate is the coordinator's brain, free of any I/O so every piece
//! is unit-testable:
//! - [`TimestampOracle`]: the single strictly-increasing logical clock
//! - [`LiveRegistry`]: in-flight transactions, for the pruning watermark
//! - [`CommitHistory`]: bounded record of recent commits, backward validation
//!
//! The coordinator service in `basalt-server` composes these under its
//! validation critical section.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod history;
mod live;
mod oracle;

pub use history::{CommitHistory, CommittedRecord};
pub use live::LiveRegistry;
pub use oracle::TimestampOracle;
