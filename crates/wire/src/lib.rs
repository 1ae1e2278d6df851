//! Wire protocol for Basalt
//!
//! Request/response over a reliable byte stream. Every message travels in
//! an envelope carrying a request id (echoed by the response) and a typed
//! body; the body's enum variant is the operation tag. Frames are a u32
//! big-endian length prefix followed by a bincode-encoded envelope.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod framing;
mod message;

pub use framing::{read_frame, write_frame, WireError, MAX_FRAME_BYTES};
pub use message::{
    CoordinatorRequest, CoordinatorResponse, Envelope, LockReply, NodeRequest, NodeResponse,
    WriteEntry,
};
