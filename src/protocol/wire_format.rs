//! Wire format encoding and decoding.
//!
//! Implements the 16-byte frame header:
//! ```text
//! ┌──────────┬────────┬──────────┬──────────┬──────────┐
//! │ Size     │ Type   │ Reserved │ Msg ID   │ Reserved │
//! │ 2 bytes  │ 1 byte │ 1 byte   │ 4 bytes  │ 8 bytes  │
//! │ uint16 BE│        │          │ uint32 BE│          │
//! └──────────┴────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! `size` counts the header itself. All multi-byte integers are Big Endian.
//! The module also holds the fixed call-request offsets shared by the lazy
//! reader and the payload encoders.

use std::fmt;

use crate::error::FramingError;

/// Header size in bytes (fixed, exactly 16).
pub const HEADER_SIZE: usize = 16;

/// Largest frame the 16-bit size field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// Offset of the flags byte in call and continuation payloads.
pub const FLAGS_INDEX: usize = 0;

/// Offset of the ttl field in call-request payloads.
pub const TTL_INDEX: usize = 1;

/// Length of the ttl field (milliseconds, uint32 BE).
pub const TTL_LEN: usize = 4;

/// Length of the opaque tracing block.
pub const TRACING_LEN: usize = 25;

/// Offset of the service length byte in call-request payloads.
pub const SERVICE_LEN_INDEX: usize = FLAGS_INDEX + 1 + TTL_LEN + TRACING_LEN;

/// Offset of the first service name byte in call-request payloads.
pub const SERVICE_NAME_INDEX: usize = SERVICE_LEN_INDEX + 1;

/// Flag constants for call and continuation payloads.
pub mod flags {
    /// More continuation frames follow for this call.
    pub const MORE_FRAGMENTS: u8 = 0b0000_0001;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Message type carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Connection handshake request.
    InitReq = 0x01,
    /// Connection handshake response.
    InitRes = 0x02,
    /// First frame of a call.
    CallReq = 0x03,
    /// First frame of a call's response.
    CallRes = 0x04,
    /// Further request fragments.
    CallReqContinue = 0x13,
    /// Further response fragments.
    CallResContinue = 0x14,
    /// Caller gave up on a call.
    Cancel = 0xc0,
    /// Claim a call on behalf of another peer.
    Claim = 0xc1,
    /// Liveness check.
    PingReq = 0xd0,
    /// Liveness reply.
    PingRes = 0xd1,
    /// Call or protocol failure.
    Error = 0xff,
}

impl MessageType {
    /// Wire byte for this type.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte.
    pub fn from_u8(value: u8) -> std::result::Result<Self, FramingError> {
        Ok(match value {
            0x01 => MessageType::InitReq,
            0x02 => MessageType::InitRes,
            0x03 => MessageType::CallReq,
            0x04 => MessageType::CallRes,
            0x13 => MessageType::CallReqContinue,
            0x14 => MessageType::CallResContinue,
            0xc0 => MessageType::Cancel,
            0xc1 => MessageType::Claim,
            0xd0 => MessageType::PingReq,
            0xd1 => MessageType::PingRes,
            0xff => MessageType::Error,
            other => return Err(FramingError::UnknownMessageType(other)),
        })
    }

    /// Whether frames of this type belong to a logical call.
    pub fn is_call_frame(self) -> bool {
        matches!(
            self,
            MessageType::CallReq
                | MessageType::CallReqContinue
                | MessageType::CallRes
                | MessageType::CallResContinue
                | MessageType::Cancel
                | MessageType::Error
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = FramingError;

    fn try_from(value: u8) -> std::result::Result<Self, FramingError> {
        Self::from_u8(value)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::InitReq => "init-req",
            MessageType::InitRes => "init-res",
            MessageType::CallReq => "call-req",
            MessageType::CallRes => "call-res",
            MessageType::CallReqContinue => "call-req-continue",
            MessageType::CallResContinue => "call-res-continue",
            MessageType::Cancel => "cancel",
            MessageType::Claim => "claim",
            MessageType::PingReq => "ping-req",
            MessageType::PingRes => "ping-res",
            MessageType::Error => "error",
        };
        f.write_str(name)
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame size in bytes, header included.
    pub size: u16,
    /// How the payload must be interpreted.
    pub message_type: MessageType,
    /// Correlates all frames of one logical call.
    pub message_id: u32,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(size: u16, message_type: MessageType, message_id: u32) -> Self {
        Self {
            size,
            message_type,
            message_id,
        }
    }

    /// Payload length implied by `size`.
    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Encode header to bytes (Big Endian, reserved bytes zeroed).
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire::protocol::{FrameHeader, MessageType};
    ///
    /// let header = FrameHeader::new(21, MessageType::CallRes, 42);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 16);
    /// assert_eq!(bytes[2], 0x04);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (16 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        assert!(buf.len() >= HEADER_SIZE, "header buffer too small");
        buf[0..2].copy_from_slice(&self.size.to_be_bytes());
        buf[2] = self.message_type.as_u8();
        buf[3] = 0;
        buf[4..8].copy_from_slice(&self.message_id.to_be_bytes());
        buf[8..HEADER_SIZE].fill(0);
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Fails if the buffer is shorter than a header, the type byte is
    /// unknown, or the declared size cannot even hold the header.
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire::protocol::{FrameHeader, MessageType};
    ///
    /// let bytes = [0, 16, 0xd0, 0, 0, 0, 0, 42, 0, 0, 0, 0, 0, 0, 0, 0];
    /// let header = FrameHeader::decode(&bytes).unwrap();
    /// assert_eq!(header.message_type, MessageType::PingReq);
    /// assert_eq!(header.message_id, 42);
    /// assert_eq!(header.payload_len(), 0);
    /// ```
    pub fn decode(buf: &[u8]) -> std::result::Result<Self, FramingError> {
        if buf.len() < HEADER_SIZE {
            return Err(FramingError::Truncated {
                field: "frame header",
                offset: 0,
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let size = u16::from_be_bytes([buf[0], buf[1]]);
        if (size as usize) < HEADER_SIZE {
            return Err(FramingError::FrameTooSmall(size));
        }

        Ok(Self {
            size,
            message_type: MessageType::from_u8(buf[2])?,
            message_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = FrameHeader::new(0x0102, MessageType::CallReq, 0x04050607);
        let bytes = header.encode();

        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[1], 0x02);
        assert_eq!(bytes[2], 0x03);
        assert_eq!(bytes[3], 0x00);
        assert_eq!(&bytes[4..8], &[0x04, 0x05, 0x06, 0x07]);
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_size_is_exactly_16() {
        assert_eq!(HEADER_SIZE, 16);
        let header = FrameHeader::new(16, MessageType::PingReq, 1);
        assert_eq!(header.encode().len(), 16);
    }

    #[test]
    fn test_decode_ignores_reserved_bytes() {
        let mut bytes = FrameHeader::new(20, MessageType::CallRes, 9).encode();
        bytes[3] = 0xAA;
        bytes[15] = 0xBB;

        let header = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(header, FrameHeader::new(20, MessageType::CallRes, 9));
        assert_eq!(header.payload_len(), 4);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 15];
        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(FramingError::Truncated { needed: 16, available: 15, .. })
        ));
    }

    #[test]
    fn test_decode_unknown_message_type() {
        let mut bytes = FrameHeader::new(16, MessageType::PingReq, 1).encode();
        bytes[2] = 0x42;
        assert_eq!(
            FrameHeader::decode(&bytes),
            Err(FramingError::UnknownMessageType(0x42))
        );
    }

    #[test]
    fn test_decode_size_smaller_than_header() {
        let bytes = FrameHeader::new(8, MessageType::PingReq, 1).encode();
        assert_eq!(
            FrameHeader::decode(&bytes),
            Err(FramingError::FrameTooSmall(8))
        );
    }

    #[test]
    fn test_message_type_bytes() {
        let all = [
            (MessageType::InitReq, 0x01),
            (MessageType::InitRes, 0x02),
            (MessageType::CallReq, 0x03),
            (MessageType::CallRes, 0x04),
            (MessageType::CallReqContinue, 0x13),
            (MessageType::CallResContinue, 0x14),
            (MessageType::Cancel, 0xc0),
            (MessageType::Claim, 0xc1),
            (MessageType::PingReq, 0xd0),
            (MessageType::PingRes, 0xd1),
            (MessageType::Error, 0xff),
        ];
        for (ty, byte) in all {
            assert_eq!(ty.as_u8(), byte);
            assert_eq!(MessageType::from_u8(byte), Ok(ty));
        }
    }

    #[test]
    fn test_call_request_offsets() {
        assert_eq!(FLAGS_INDEX, 0);
        assert_eq!(TTL_INDEX, 1);
        assert_eq!(SERVICE_LEN_INDEX, 30);
        assert_eq!(SERVICE_NAME_INDEX, 31);
    }

    #[test]
    fn test_flags_has_flag() {
        assert!(flags::has_flag(0x01, flags::MORE_FRAGMENTS));
        assert!(!flags::has_flag(0x02, flags::MORE_FRAGMENTS));
    }
}
