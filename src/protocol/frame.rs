//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` so relaying a frame never copies its payload.
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{Frame, MessageType};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(MessageType::PingReq, 42, Bytes::new()).unwrap();
//!
//! assert_eq!(frame.message_id(), 42);
//! assert_eq!(frame.size(), 16);
//! ```

use bytes::Bytes;

use super::wire_format::{FrameHeader, MessageType, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::FramingError;

/// A complete protocol frame.
///
/// The size invariant (`header.size == HEADER_SIZE + payload.len()`) is
/// checked by every constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame, computing the size field from the payload.
    pub fn new(
        message_type: MessageType,
        message_id: u32,
        payload: Bytes,
    ) -> Result<Self, FramingError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FramingError::PayloadTooLarge(payload.len()));
        }
        let size = (HEADER_SIZE + payload.len()) as u16;
        Ok(Self {
            header: FrameHeader::new(size, message_type, message_id),
            payload,
        })
    }

    /// Create a frame from an already decoded header.
    ///
    /// Fails if the declared size disagrees with the payload.
    pub fn from_parts(header: FrameHeader, payload: Bytes) -> Result<Self, FramingError> {
        let actual = HEADER_SIZE + payload.len();
        if header.size as usize != actual {
            return Err(FramingError::SizeMismatch {
                declared: header.size,
                actual,
            });
        }
        Ok(Self { header, payload })
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Total on-wire size.
    #[inline]
    pub fn size(&self) -> u16 {
        self.header.size
    }

    /// Get the message type.
    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Get the message id.
    #[inline]
    pub fn message_id(&self) -> u32 {
        self.header.message_id
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        build_frame(&self.header, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer.
///
/// # Example
///
/// ```
/// use muxwire::protocol::{build_frame, FrameHeader, MessageType};
///
/// let header = FrameHeader::new(21, MessageType::CallRes, 42);
/// let bytes = build_frame(&header, b"hello");
/// assert_eq!(bytes.len(), 16 + 5);
/// ```
pub fn build_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
