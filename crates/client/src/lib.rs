//! Transactional client for Basalt
//!
//! [`Client`] connects to a coordinator and a fixed set of data nodes.
//! [`Client::begin`] starts a transaction in either discipline and hands
//! back a [`Transaction`] handle exposing the common capability set:
//! read, write, commit, abort. The two disciplines are concrete variants
//! behind that one surface; the mode is fixed at `begin` and never mixed.
//!
//! The client does not retry aborted transactions. Abort reasons are
//! typed ([`basalt_core::AbortReason`]) and marked retryable or not, and
//! the retry loop belongs to the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod client;
mod conn;
mod transaction;

pub use client::{Client, ClientConfig};
pub use conn::{CoordConn, NodeConn};
pub use transaction::Transaction;
