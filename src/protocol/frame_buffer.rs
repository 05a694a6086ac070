//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented reads:
//! - `WaitingForHeader`: Need at least 16 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{Frame, FrameBuffer, MessageType};
//! use bytes::Bytes;
//!
//! let bytes = Frame::new(MessageType::PingReq, 7, Bytes::new()).unwrap().encode();
//!
//! let mut buffer = FrameBuffer::new();
//! assert!(buffer.push(&bytes[..10]).unwrap().is_empty());
//!
//! let frames = buffer.push(&bytes[10..]).unwrap();
//! assert_eq!(frames[0].message_id(), 7);
//! ```

use bytes::BytesMut;

use super::wire_format::{FrameHeader, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// Default initial buffer capacity (64KB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 16 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { header: FrameHeader },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// A malformed header (unknown type, size smaller than the header) is
/// reported as a framing error; the buffer is not usable afterwards and
/// the connection should be dropped.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a new frame buffer with a custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            state: State::WaitingForHeader,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Frames are returned in wire order. Partial data is kept for the
    /// next push.
    ///
    /// # Errors
    ///
    /// Returns a framing error if a header is malformed.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header = FrameHeader::decode(&self.buffer[..HEADER_SIZE])?;
                let _ = self.buffer.split_to(HEADER_SIZE);

                self.state = State::WaitingForPayload { header };
                self.try_extract_one()
            }

            State::WaitingForPayload { header } => {
                let remaining = header.payload_len();
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                let header = *header;
                self.state = State::WaitingForHeader;

                Ok(Some(Frame::from_parts(header, payload)?))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
