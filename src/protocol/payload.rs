//! Payload encoders for frames the relay and its peers originate.
//!
//! The layouts mirror what [`LazyCallReq`](super::LazyCallReq) reads, and
//! share its offset constants, so the reader and the writers cannot drift
//! apart.
//!
//! # Example
//!
//! ```
//! use muxwire::protocol::{ErrorCode, ErrorFrame, MessageType};
//!
//! let frame = ErrorFrame::new(ErrorCode::Declined, "no peer for service").encode(9).unwrap();
//! assert_eq!(frame.message_type(), MessageType::Error);
//!
//! let decoded = ErrorFrame::decode(&frame).unwrap();
//! assert_eq!(decoded.code, ErrorCode::Declined);
//! ```

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::checksum::ChecksumType;
use super::completion::CallFlags;
use super::cursor::Cursor;
use super::wire_format::{FrameHeader, MessageType, HEADER_SIZE, SERVICE_LEN_INDEX, TRACING_LEN};
use super::Frame;
use crate::error::{FramingError, FramingResult};

/// Opaque tracing block carried by call and error payloads.
pub type Tracing = [u8; TRACING_LEN];

/// Builder for call-request frames.
#[derive(Debug, Clone)]
pub struct CallReqBuilder {
    flags: CallFlags,
    ttl: Duration,
    tracing: Tracing,
    service: String,
    headers: Vec<(String, String)>,
    checksum: (ChecksumType, u32),
    arg1: Bytes,
    arg2: Bytes,
    arg3: Bytes,
}

impl CallReqBuilder {
    /// Start a request for `method` on `service`.
    pub fn new(service: &str, method: &str) -> Self {
        Self {
            flags: CallFlags::LAST,
            ttl: Duration::from_secs(1),
            tracing: [0u8; TRACING_LEN],
            service: service.to_owned(),
            headers: Vec::new(),
            checksum: (ChecksumType::None, 0),
            arg1: Bytes::copy_from_slice(method.as_bytes()),
            arg2: Bytes::new(),
            arg3: Bytes::new(),
        }
    }

    /// Set the time to live. Sub-millisecond precision is dropped.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mark this frame as followed by request continuations.
    pub fn more_fragments(mut self) -> Self {
        self.flags = CallFlags::MORE_FRAGMENTS;
        self
    }

    /// Set the opaque tracing block.
    pub fn tracing(mut self, tracing: Tracing) -> Self {
        self.tracing = tracing;
        self
    }

    /// Append a transport header.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Set the checksum type and value.
    pub fn checksum(mut self, checksum_type: ChecksumType, value: u32) -> Self {
        self.checksum = (checksum_type, value);
        self
    }

    /// Set arg2 (application headers).
    pub fn arg2(mut self, arg2: impl Into<Bytes>) -> Self {
        self.arg2 = arg2.into();
        self
    }

    /// Set arg3 (application body).
    pub fn arg3(mut self, arg3: impl Into<Bytes>) -> Self {
        self.arg3 = arg3.into();
        self
    }

    /// Encode the frame with the given message id.
    pub fn build(&self, message_id: u32) -> FramingResult<Frame> {
        let mut buf = BytesMut::with_capacity(SERVICE_LEN_INDEX + 64);
        buf.put_u8(self.flags.as_u8());
        buf.put_u32(u32::try_from(self.ttl.as_millis()).unwrap_or(u32::MAX));
        buf.put_slice(&self.tracing);
        put_len8(&mut buf, self.service.as_bytes(), "service")?;
        put_headers(&mut buf, &self.headers)?;
        put_checksum(&mut buf, self.checksum);
        for (arg, field) in [(&self.arg1, "arg1"), (&self.arg2, "arg2"), (&self.arg3, "arg3")] {
            put_len16(&mut buf, arg, field)?;
        }
        Frame::new(MessageType::CallReq, message_id, buf.freeze())
    }
}

/// Response code carried by call-response frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    /// The call succeeded.
    Ok = 0x00,
    /// The handler returned an application error.
    Error = 0x01,
}

/// Builder for call-response frames.
#[derive(Debug, Clone)]
pub struct CallResBuilder {
    flags: CallFlags,
    code: ResponseCode,
    tracing: Tracing,
    headers: Vec<(String, String)>,
    checksum: (ChecksumType, u32),
    args: Vec<Bytes>,
}

impl CallResBuilder {
    /// Start a successful response.
    pub fn new() -> Self {
        Self {
            flags: CallFlags::LAST,
            code: ResponseCode::Ok,
            tracing: [0u8; TRACING_LEN],
            headers: Vec::new(),
            checksum: (ChecksumType::None, 0),
            args: Vec::new(),
        }
    }

    /// Set the response code.
    pub fn code(mut self, code: ResponseCode) -> Self {
        self.code = code;
        self
    }

    /// Mark this frame as followed by response continuations.
    pub fn more_fragments(mut self) -> Self {
        self.flags = CallFlags::MORE_FRAGMENTS;
        self
    }

    /// Append a transport header.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Set the checksum type and value.
    pub fn checksum(mut self, checksum_type: ChecksumType, value: u32) -> Self {
        self.checksum = (checksum_type, value);
        self
    }

    /// Append an argument chunk.
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Encode the frame with the given message id.
    pub fn build(&self, message_id: u32) -> FramingResult<Frame> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.flags.as_u8());
        buf.put_u8(self.code as u8);
        buf.put_slice(&self.tracing);
        put_headers(&mut buf, &self.headers)?;
        put_checksum(&mut buf, self.checksum);
        for arg in &self.args {
            put_len16(&mut buf, arg, "arg")?;
        }
        Frame::new(MessageType::CallRes, message_id, buf.freeze())
    }
}

impl Default for CallResBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a request or response continuation frame.
///
/// # Panics
///
/// Panics if `message_type` is not a continuation type.
pub fn continuation(
    message_type: MessageType,
    message_id: u32,
    flags: CallFlags,
    args: &[Bytes],
) -> FramingResult<Frame> {
    assert!(
        matches!(
            message_type,
            MessageType::CallReqContinue | MessageType::CallResContinue
        ),
        "continuation called for non-continuation message type {message_type}"
    );

    let mut buf = BytesMut::with_capacity(8);
    buf.put_u8(flags.as_u8());
    put_checksum(&mut buf, (ChecksumType::None, 0));
    for arg in args {
        put_len16(&mut buf, arg, "arg")?;
    }
    Frame::new(message_type, message_id, buf.freeze())
}

/// Ping request with an empty payload.
pub fn ping_req(message_id: u32) -> Frame {
    Frame {
        header: FrameHeader::new(HEADER_SIZE as u16, MessageType::PingReq, message_id),
        payload: Bytes::new(),
    }
}

/// Ping response answering the request with the same id.
pub fn ping_res(message_id: u32) -> Frame {
    Frame {
        header: FrameHeader::new(HEADER_SIZE as u16, MessageType::PingRes, message_id),
        payload: Bytes::new(),
    }
}

/// Error code carried by error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Not a valid value for code.
    Invalid,
    /// The call timed out.
    Timeout,
    /// The call was cancelled.
    Cancelled,
    /// The peer is too busy to accept the call.
    Busy,
    /// The call was declined, e.g. no route.
    Declined,
    /// Unexpected failure while handling the call.
    Unexpected,
    /// The request was malformed.
    BadRequest,
    /// A network error broke the call.
    Network,
    /// The peer is unhealthy.
    Unhealthy,
    /// Connection-level protocol violation.
    ProtocolError,
    /// Code outside the known set.
    Other(u8),
}

impl ErrorCode {
    /// Parse a wire byte. Unknown codes are kept as [`ErrorCode::Other`].
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => ErrorCode::Invalid,
            0x01 => ErrorCode::Timeout,
            0x02 => ErrorCode::Cancelled,
            0x03 => ErrorCode::Busy,
            0x04 => ErrorCode::Declined,
            0x05 => ErrorCode::Unexpected,
            0x06 => ErrorCode::BadRequest,
            0x07 => ErrorCode::Network,
            0x08 => ErrorCode::Unhealthy,
            0xff => ErrorCode::ProtocolError,
            other => ErrorCode::Other(other),
        }
    }

    /// Wire byte for this code.
    pub fn as_u8(self) -> u8 {
        match self {
            ErrorCode::Invalid => 0x00,
            ErrorCode::Timeout => 0x01,
            ErrorCode::Cancelled => 0x02,
            ErrorCode::Busy => 0x03,
            ErrorCode::Declined => 0x04,
            ErrorCode::Unexpected => 0x05,
            ErrorCode::BadRequest => 0x06,
            ErrorCode::Network => 0x07,
            ErrorCode::Unhealthy => 0x08,
            ErrorCode::ProtocolError => 0xff,
            ErrorCode::Other(value) => value,
        }
    }
}

/// Decoded error frame payload: `code:1 tracing:25 message~2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    /// What went wrong.
    pub code: ErrorCode,
    /// Opaque tracing block.
    pub tracing: Tracing,
    /// Human readable description.
    pub message: String,
}

impl ErrorFrame {
    /// Create an error with an empty tracing block.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            tracing: [0u8; TRACING_LEN],
            message: message.into(),
        }
    }

    /// Encode as an error frame for `message_id`.
    pub fn encode(&self, message_id: u32) -> FramingResult<Frame> {
        let mut buf = BytesMut::with_capacity(1 + TRACING_LEN + 2 + self.message.len());
        buf.put_u8(self.code.as_u8());
        buf.put_slice(&self.tracing);
        put_len16(&mut buf, self.message.as_bytes(), "error message")?;
        Frame::new(MessageType::Error, message_id, buf.freeze())
    }

    /// Decode the payload of an error frame.
    pub fn decode(frame: &Frame) -> FramingResult<Self> {
        let mut cursor = Cursor::new(frame.payload());
        let code = ErrorCode::from_u8(cursor.read_u8("error code")?);
        let mut tracing = [0u8; TRACING_LEN];
        tracing.copy_from_slice(cursor.read_bytes(TRACING_LEN, "tracing")?);
        let message = String::from_utf8_lossy(cursor.read_len16("error message")?).into_owned();
        Ok(Self {
            code,
            tracing,
            message,
        })
    }

    /// Read only the code byte of an error frame.
    pub fn peek_code(frame: &Frame) -> FramingResult<ErrorCode> {
        Ok(ErrorCode::from_u8(Cursor::new(frame.payload()).read_u8("error code")?))
    }
}

fn put_len8(buf: &mut BytesMut, bytes: &[u8], field: &'static str) -> FramingResult<()> {
    let len = u8::try_from(bytes.len()).map_err(|_| FramingError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    buf.put_u8(len);
    buf.put_slice(bytes);
    Ok(())
}

fn put_len16(buf: &mut BytesMut, bytes: &[u8], field: &'static str) -> FramingResult<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| FramingError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    buf.put_u16(len);
    buf.put_slice(bytes);
    Ok(())
}

fn put_headers(buf: &mut BytesMut, headers: &[(String, String)]) -> FramingResult<()> {
    let count = u8::try_from(headers.len()).map_err(|_| FramingError::FieldTooLong {
        field: "header count",
        len: headers.len(),
    })?;
    buf.put_u8(count);
    for (key, value) in headers {
        put_len8(buf, key.as_bytes(), "header key")?;
        put_len8(buf, value.as_bytes(), "header value")?;
    }
    Ok(())
}

fn put_checksum(buf: &mut BytesMut, (checksum_type, value): (ChecksumType, u32)) {
    buf.put_u8(checksum_type.as_u8());
    if checksum_type.size() == 4 {
        buf.put_u32(value);
    }
}
