//! Lock table for the S2PL access path
//!
//! Implements per-key shared/exclusive locks with FIFO waiter promotion,
//! bounded waits, and wound-wait deadlock prevention. The OCC access path
//! never touches this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod table;

pub use table::{Acquisition, LockTable};
