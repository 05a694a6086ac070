//! Lazy reader for call-request frames.
//!
//! Extracts the fields the relay needs to route a call without decoding
//! arg2/arg3:
//! ```text
//! flags:1 ttl:4 tracing:25
//! service~1
//! nh:1 (hk~1 hv~1){nh}
//! csumtype:1 (csum:4){0,1}
//! arg1~2 arg2~2 arg3~2
//! ```
//! (`~N` is an N-byte big-endian length prefix.)
//!
//! Every accessor returns a view into the frame's payload. Length bytes are
//! bounds-checked before use; a length that runs past the payload is a
//! [`FramingError::Truncated`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use muxwire::protocol::{CallReqBuilder, LazyCallReq};
//!
//! let frame = CallReqBuilder::new("search", "Query")
//!     .ttl(Duration::from_millis(5000))
//!     .header("cn", "client")
//!     .build(7)
//!     .unwrap();
//!
//! let call = LazyCallReq::new(&frame);
//! assert_eq!(call.service().unwrap(), b"search");
//! assert_eq!(call.method().unwrap(), b"Query");
//! assert_eq!(call.ttl().unwrap(), Duration::from_millis(5000));
//! ```

use std::time::Duration;

use serde::Serialize;

use super::checksum::ChecksumType;
use super::completion::CallFlags;
use super::cursor::Cursor;
use super::wire_format::{MessageType, SERVICE_LEN_INDEX, TTL_INDEX};
use super::Frame;
use crate::error::{FramingError, FramingResult};

/// Borrowed view over a call-request frame.
#[derive(Debug, Clone, Copy)]
pub struct LazyCallReq<'a> {
    frame: &'a Frame,
}

impl<'a> LazyCallReq<'a> {
    /// Interpret `frame` as a call request.
    ///
    /// # Panics
    ///
    /// Panics if the frame is not a call request. Callers decide which view
    /// to build, so a mismatch is a bug in the caller.
    pub fn new(frame: &'a Frame) -> Self {
        assert_eq!(
            frame.message_type(),
            MessageType::CallReq,
            "LazyCallReq::new called for wrong message type"
        );
        Self { frame }
    }

    /// Interpret `frame` as a call request if it is one.
    pub fn try_new(frame: &'a Frame) -> Option<Self> {
        (frame.message_type() == MessageType::CallReq).then_some(Self { frame })
    }

    /// The underlying frame.
    pub fn frame(&self) -> &'a Frame {
        self.frame
    }

    fn payload(&self) -> &'a [u8] {
        &self.frame.payload
    }

    /// Flags byte of the request.
    pub fn flags(&self) -> FramingResult<CallFlags> {
        CallFlags::read(self.payload())
    }

    /// Time the caller is willing to wait, with millisecond precision.
    pub fn ttl(&self) -> FramingResult<Duration> {
        let ms = Cursor::at(self.payload(), TTL_INDEX).read_u32("ttl")?;
        Ok(Duration::from_millis(u64::from(ms)))
    }

    /// Name of the destination service.
    pub fn service(&self) -> FramingResult<&'a [u8]> {
        Cursor::at(self.payload(), SERVICE_LEN_INDEX).read_len8("service")
    }

    /// Name of the destination service as UTF-8.
    pub fn service_str(&self) -> FramingResult<&'a str> {
        std::str::from_utf8(self.service()?).map_err(|_| FramingError::InvalidUtf8("service"))
    }

    /// Transport headers as `(key, value)` pairs, in wire order.
    pub fn headers(&self) -> FramingResult<Vec<(&'a [u8], &'a [u8])>> {
        let mut cursor = self.headers_cursor()?;
        let count = cursor.read_u8("header count")? as usize;

        let mut headers = Vec::with_capacity(count);
        for _ in 0..count {
            let key = cursor.read_len8("header key")?;
            let value = cursor.read_len8("header value")?;
            headers.push((key, value));
        }
        Ok(headers)
    }

    /// Checksum type announced by the request.
    pub fn checksum_type(&self) -> FramingResult<ChecksumType> {
        let mut cursor = self.checksum_cursor()?;
        ChecksumType::from_u8(cursor.read_u8("checksum type")?)
    }

    /// Name of the method being called (arg1).
    pub fn method(&self) -> FramingResult<&'a [u8]> {
        let mut cursor = self.checksum_cursor()?;
        let checksum = ChecksumType::from_u8(cursor.read_u8("checksum type")?)?;
        cursor.skip(checksum.size(), "checksum")?;
        cursor.read_len16("arg1")
    }

    /// Copy the routing fields out of the frame.
    ///
    /// Use this when the values must outlive the frame, e.g. for tracing
    /// once the call completes.
    pub fn metadata(&self) -> FramingResult<CallMetadata> {
        Ok(CallMetadata {
            service: self.service_str()?.to_owned(),
            method: String::from_utf8_lossy(self.method()?).into_owned(),
            ttl_ms: u32::try_from(self.ttl()?.as_millis()).unwrap_or(u32::MAX),
        })
    }

    /// Cursor positioned at the header count byte.
    fn headers_cursor(&self) -> FramingResult<Cursor<'a>> {
        let mut cursor = Cursor::at(self.payload(), SERVICE_LEN_INDEX);
        cursor.read_len8("service")?;
        Ok(cursor)
    }

    /// Cursor positioned at the checksum type byte.
    fn checksum_cursor(&self) -> FramingResult<Cursor<'a>> {
        let mut cursor = self.headers_cursor()?;
        let count = cursor.read_u8("header count")? as usize;
        for _ in 0..count * 2 {
            cursor.read_len8("header")?;
        }
        Ok(cursor)
    }
}

/// Owned copy of a call's routing fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallMetadata {
    /// Destination service.
    pub service: String,
    /// Called method (arg1), lossily decoded.
    pub method: String,
    /// Time to live in milliseconds.
    pub ttl_ms: u32,
}

impl CallMetadata {
    /// Time to live as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(u64::from(self.ttl_ms))
    }
}
