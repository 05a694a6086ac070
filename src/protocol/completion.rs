//! Fragmentation flags and call completion detection.
//!
//! A logical call ends on the response side at the first error frame, or at
//! the first call-response / response-continuation frame whose flags say no
//! more fragments follow. The request side ends the same way on call-request
//! and request-continuation frames; the relay tracks both directions.
//!
//! ```
//! use muxwire::protocol::{finishes_call, Frame, MessageType};
//! use bytes::Bytes;
//!
//! let last = Frame::new(MessageType::CallResContinue, 1, Bytes::from_static(&[0x00])).unwrap();
//! let more = Frame::new(MessageType::CallResContinue, 1, Bytes::from_static(&[0x01])).unwrap();
//!
//! assert!(finishes_call(&last).unwrap());
//! assert!(!finishes_call(&more).unwrap());
//! ```

use super::cursor::Cursor;
use super::wire_format::{flags, MessageType, FLAGS_INDEX};
use super::Frame;
use crate::error::FramingResult;

/// Whether more frames follow for the same call and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fragmentation {
    /// This is the final fragment.
    #[default]
    Last,
    /// Continuation frames follow.
    MoreFragments,
}

/// Decoded flags byte of call and continuation payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallFlags {
    /// Fragmentation state carried by bit 0.
    pub fragmentation: Fragmentation,
}

impl CallFlags {
    /// Flags for a final fragment.
    pub const LAST: CallFlags = CallFlags {
        fragmentation: Fragmentation::Last,
    };

    /// Flags for a fragment followed by continuations.
    pub const MORE_FRAGMENTS: CallFlags = CallFlags {
        fragmentation: Fragmentation::MoreFragments,
    };

    /// Decode a flags byte. Unknown bits are ignored.
    pub fn from_u8(byte: u8) -> Self {
        let fragmentation = if flags::has_flag(byte, flags::MORE_FRAGMENTS) {
            Fragmentation::MoreFragments
        } else {
            Fragmentation::Last
        };
        Self { fragmentation }
    }

    /// Encode to the wire byte.
    pub fn as_u8(self) -> u8 {
        match self.fragmentation {
            Fragmentation::Last => 0,
            Fragmentation::MoreFragments => flags::MORE_FRAGMENTS,
        }
    }

    /// Whether continuation frames follow.
    #[inline]
    pub fn has_more_fragments(self) -> bool {
        self.fragmentation == Fragmentation::MoreFragments
    }

    /// Read the flags byte at the start of a call or continuation payload.
    pub fn read(payload: &[u8]) -> FramingResult<Self> {
        let byte = Cursor::at(payload, FLAGS_INDEX).read_u8("flags")?;
        Ok(Self::from_u8(byte))
    }
}

/// Check whether this frame is the last one to expect for its call.
///
/// Error frames always finish a call. Call responses and response
/// continuations finish it when their more-fragments bit is clear. Every
/// other type, call requests included, never does.
///
/// # Errors
///
/// A response frame without a flags byte is a framing error.
pub fn finishes_call(frame: &Frame) -> FramingResult<bool> {
    match frame.message_type() {
        MessageType::Error => Ok(true),
        MessageType::CallRes | MessageType::CallResContinue => {
            Ok(!CallFlags::read(frame.payload())?.has_more_fragments())
        }
        _ => Ok(false),
    }
}

/// Check whether this frame is the last request fragment of its call.
///
/// Only call requests and request continuations can finish the request
/// direction.
pub fn finishes_request(frame: &Frame) -> FramingResult<bool> {
    match frame.message_type() {
        MessageType::CallReq | MessageType::CallReqContinue => {
            Ok(!CallFlags::read(frame.payload())?.has_more_fragments())
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FramingError;
    use bytes::Bytes;

    fn frame(message_type: MessageType, payload: &'static [u8]) -> Frame {
        Frame::new(message_type, 1, Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn test_error_always_finishes() {
        assert!(finishes_call(&frame(MessageType::Error, &[0x05])).unwrap());
        assert!(finishes_call(&frame(MessageType::Error, &[])).unwrap());
    }

    #[test]
    fn test_response_fragments() {
        for ty in [MessageType::CallRes, MessageType::CallResContinue] {
            assert!(!finishes_call(&frame(ty, &[0x01])).unwrap());
            assert!(finishes_call(&frame(ty, &[0x00])).unwrap());
        }
    }

    #[test]
    fn test_unknown_flag_bits_ignored() {
        assert!(finishes_call(&frame(MessageType::CallRes, &[0x02])).unwrap());
        assert!(!finishes_call(&frame(MessageType::CallRes, &[0x03])).unwrap());
    }

    #[test]
    fn test_requests_never_finish_call() {
        for bits in [&[0x00u8][..], &[0x01u8][..]] {
            let f = Frame::new(MessageType::CallReq, 1, Bytes::copy_from_slice(bits)).unwrap();
            assert!(!finishes_call(&f).unwrap());
        }
        assert!(!finishes_call(&frame(MessageType::PingReq, &[])).unwrap());
        assert!(!finishes_call(&frame(MessageType::Cancel, &[])).unwrap());
    }

    #[test]
    fn test_empty_response_is_framing_error() {
        assert!(matches!(
            finishes_call(&frame(MessageType::CallRes, &[])),
            Err(FramingError::Truncated { field: "flags", .. })
        ));
    }

    #[test]
    fn test_finishes_request() {
        assert!(finishes_request(&frame(MessageType::CallReq, &[0x00])).unwrap());
        assert!(!finishes_request(&frame(MessageType::CallReq, &[0x01])).unwrap());
        assert!(!finishes_request(&frame(MessageType::CallReqContinue, &[0x01])).unwrap());
        assert!(finishes_request(&frame(MessageType::CallReqContinue, &[0x00])).unwrap());
        assert!(!finishes_request(&frame(MessageType::CallRes, &[0x00])).unwrap());
    }

    #[test]
    fn test_call_flags_encoding() {
        assert_eq!(CallFlags::LAST.as_u8(), 0x00);
        assert_eq!(CallFlags::MORE_FRAGMENTS.as_u8(), 0x01);
        assert_eq!(CallFlags::from_u8(0x01), CallFlags::MORE_FRAGMENTS);
        assert!(CallFlags::MORE_FRAGMENTS.has_more_fragments());
        assert!(!CallFlags::default().has_more_fragments());
    }
}
