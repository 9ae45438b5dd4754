//! Length-prefixed framing for [`Message`]s over stream sockets.
//!
//! Frame format:
//! ```text
//! +----------------+------------------+
//! |  4 bytes       |  N bytes         |
//! |  (length BE)   |  (JSON payload)  |
//! +----------------+------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::Message;

/// Default upper bound for one frame's payload (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    fn check_size(&self, size: usize) -> Result<(), CodecError> {
        if size > self.max_frame_bytes {
            return Err(CodecError::FrameTooLarge {
                size,
                max: self.max_frame_bytes,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek the prefix; it is only consumed once the whole frame is buffered
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_be_bytes(prefix) as usize;
        self.check_size(length)?;

        let frame_len = LENGTH_PREFIX_SIZE + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length);
        let message: Message = serde_json::from_slice(&payload)?;

        Ok(Some(message.normalize()))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        self.check_size(payload.len())?;
        let length = u32::try_from(payload.len()).map_err(|_| CodecError::FrameTooLarge {
            size: payload.len(),
            max: self.max_frame_bytes,
        })?;

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(length);
        dst.put_slice(&payload);

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}
