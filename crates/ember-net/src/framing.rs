//! Message framing for byte streams.
//!
//! A stream carries back-to-back messages in their wire form; the
//! `body_size` prefix doubles as the frame length:
//!
//! ```text
//! +---------------------+---------------+--------------------------+
//! | body_size (2 bytes) | type (1 byte) | payload (body_size - 1)  |
//! +---------------------+---------------+--------------------------+
//! ```
//!
//! [`FrameReader`] buffers partial reads until a whole frame is available.

use crate::message::{BODY_SIZE_PREFIX, MAX_BODY_SIZE, Message, TYPE_ID_SIZE};

/// Errors raised while decoding a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame header announced a body size no message can have.
    #[error("invalid body size {size} (must be 1..={max})")]
    InvalidBodySize {
        /// Announced body size.
        size: u16,
        /// Largest valid body size.
        max: usize,
    },
}

/// Reassembles messages from arbitrarily split stream reads.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame.
    ///
    /// Returns `Ok(None)` while the frame is incomplete. An invalid body size
    /// means the stream is corrupt and cannot be resynchronised.
    pub fn next_message(&mut self) -> Result<Option<Message>, FrameError> {
        if self.buffer.len() < BODY_SIZE_PREFIX {
            return Ok(None);
        }

        let body_size = u16::from_le_bytes([self.buffer[0], self.buffer[1]]);
        let body = usize::from(body_size);
        if body < TYPE_ID_SIZE || body > MAX_BODY_SIZE {
            return Err(FrameError::InvalidBodySize {
                size: body_size,
                max: MAX_BODY_SIZE,
            });
        }

        let frame_len = BODY_SIZE_PREFIX + body;
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        let mut message = Message::default();
        // The payload length is bounded by MAX_BODY_SIZE above.
        message.load(
            self.buffer[BODY_SIZE_PREFIX],
            &self.buffer[BODY_SIZE_PREFIX + TYPE_ID_SIZE..frame_len],
        );
        self.buffer.drain(..frame_len);
        Ok(Some(message))
    }
}

/// Append the wire form of `message` to `out`.
pub fn write_frame(message: &Message, out: &mut Vec<u8>) {
    message.append_to(out);
}
