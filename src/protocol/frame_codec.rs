//! Frame codec for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented socket reads:
//! - `WaitingForLength`: need the 4-byte length prefix
//! - `WaitingForBody`: length known, need that many body bytes
//!
//! # Example
//!
//! ```ignore
//! use spop_agent::protocol::FrameCodec;
//!
//! let mut codec = FrameCodec::new(16380);
//!
//! // Data arrives in chunks from the socket
//! let frames = codec.push(&chunk)?;
//! for frame in frames {
//!     println!("got {:?}", frame.frame_type());
//! }
//! ```

use bytes::{Buf, BytesMut};

use super::frame::{Frame, LENGTH_PREFIX_SIZE};
use crate::error::{Result, SpopError};

/// State machine for frame extraction.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete length prefix.
    WaitingForLength,
    /// Prefix consumed, waiting for `body_len` bytes of frame body.
    WaitingForBody { body_len: usize },
}

/// Buffer turning raw socket reads into complete decoded frames.
///
/// All data accumulates in a single `BytesMut`; complete bodies are split
/// off zero-copy and decoded. The configured maximum frame size is
/// enforced against the length prefix before a body is ever buffered.
pub struct FrameCodec {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum accepted frame body size.
    max_frame_size: u32,
}

impl FrameCodec {
    /// Create a codec enforcing the given maximum frame body size.
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push. Returns an
    /// error on an oversized length prefix or an undecodable body; both
    /// are protocol-fatal for the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::WaitingForLength => {
                if self.buffer.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }

                let body_len = self.buffer.get_u32() as usize;
                if body_len > self.max_frame_size as usize {
                    return Err(SpopError::Protocol(format!(
                        "announced frame length {} exceeds maximum {}",
                        body_len, self.max_frame_size
                    )));
                }

                self.state = State::WaitingForBody { body_len };
                self.try_extract_one()
            }

            State::WaitingForBody { body_len } => {
                if self.buffer.len() < body_len {
                    return Ok(None);
                }

                let body = self.buffer.split_to(body_len).freeze();
                self.state = State::WaitingForLength;

                Frame::decode_body(body).map(Some)
            }
        }
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True when no partial frame is pending.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && matches!(self.state, State::WaitingForLength)
    }
}
