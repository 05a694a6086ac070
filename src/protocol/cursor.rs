//! Bounds-checked forward reader over a payload.

use crate::error::{FramingError, FramingResult};

/// Running position in a borrowed payload.
///
/// Every read checks the remaining length first, so a corrupt length byte
/// turns into `FramingError::Truncated` instead of an out-of-bounds slice.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub(crate) fn read_bytes(&mut self, len: usize, field: &'static str) -> FramingResult<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let bytes = &self.buf[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(FramingError::Truncated {
                field,
                offset: self.pos,
                needed: len,
                available: self.buf.len(),
            }),
        }
    }

    pub(crate) fn skip(&mut self, len: usize, field: &'static str) -> FramingResult<()> {
        self.read_bytes(len, field).map(|_| ())
    }

    pub(crate) fn read_u8(&mut self, field: &'static str) -> FramingResult<u8> {
        Ok(self.read_bytes(1, field)?[0])
    }

    pub(crate) fn read_u16(&mut self, field: &'static str) -> FramingResult<u16> {
        let bytes = self.read_bytes(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self, field: &'static str) -> FramingResult<u32> {
        let bytes = self.read_bytes(4, field)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a string prefixed by a one-byte length.
    pub(crate) fn read_len8(&mut self, field: &'static str) -> FramingResult<&'a [u8]> {
        let len = self.read_u8(field)? as usize;
        self.read_bytes(len, field)
    }

    /// Read a string prefixed by a two-byte length.
    pub(crate) fn read_len16(&mut self, field: &'static str) -> FramingResult<&'a [u8]> {
        let len = self.read_u16(field)? as usize;
        self.read_bytes(len, field)
    }
}
