//! Length-prefixed bincode framing
//!
//! A frame is a u32 big-endian byte length followed by that many bytes of
//! bincode. The length is bounded to keep a corrupt or hostile peer from
//! inducing an unbounded allocation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame's payload
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Errors arising at the framing layer
#[derive(Debug, Error)]
pub enum WireError {
    /// The underlying stream failed or closed mid-frame
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload did not encode or decode as the expected message
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer announced a frame larger than [`MAX_FRAME_BYTES`]
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced payload length
        len: u32,
        /// The configured limit
        max: u32,
    },
}

impl From<bincode::Error> for WireError {
    fn from(e: bincode::Error) -> Self {
        WireError::Codec(e.to_string())
    }
}

impl From<WireError> for basalt_core::Error {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(io) => basalt_core::Error::Io(io),
            other => basalt_core::Error::Wire(other.to_string()),
        }
    }
}

/// Write one frame: length prefix, then the bincode-encoded message
pub async fn write_frame<T, W>(writer: &mut W, message: &T) -> Result<(), WireError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(message)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    writer.write_u32(len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it.
///
/// A clean EOF before the length prefix surfaces as
/// `WireError::Io(UnexpectedEof)`; callers treat it as the peer hanging up.
pub async fn read_frame<T, R>(reader: &mut R) -> Result<T, WireError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Envelope, NodeRequest, NodeResponse};
    use basalt_core::{Key, Value};

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let sent = Envelope::new(
            7,
            NodeRequest::Put {
                tid: Some(3),
                key: Key::from("k"),
                value: Value::from("v"),
            },
        );
        write_frame(&mut client, &sent).await.unwrap();
        let received: Envelope<NodeRequest> = read_frame(&mut server).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        for id in 0..3u64 {
            write_frame(&mut client, &Envelope::new(id, NodeResponse::Ok))
                .await
                .unwrap();
        }
        for id in 0..3u64 {
            let env: Envelope<NodeResponse> = read_frame(&mut server).await.unwrap();
            assert_eq!(env.request_id, id);
        }
    }

    #[tokio::test]
    async fn test_oversized_announcement_is_refused() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_u32(&mut client, MAX_FRAME_BYTES + 1)
            .await
            .unwrap();
        let result: Result<Envelope<NodeResponse>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(WireError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_peer_hangup_surfaces_as_io_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let result: Result<Envelope<NodeResponse>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(WireError::Io(_))));
    }
}
