//! Checksum type byte.
//!
//! Call and continuation payloads carry a checksum type followed by zero or
//! four checksum bytes. The relay never verifies checksums; it only needs
//! the size to skip over them.

use crate::error::FramingError;

/// Checksum algorithm announced in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ChecksumType {
    /// No checksum bytes follow.
    #[default]
    None = 0x00,
    /// CRC-32 (IEEE).
    Crc32 = 0x01,
    /// Farmhash Fingerprint32.
    Farmhash = 0x02,
    /// CRC-32C (Castagnoli).
    Crc32C = 0x03,
}

impl ChecksumType {
    /// Parse the checksum type byte.
    pub fn from_u8(value: u8) -> Result<Self, FramingError> {
        match value {
            0x00 => Ok(ChecksumType::None),
            0x01 => Ok(ChecksumType::Crc32),
            0x02 => Ok(ChecksumType::Farmhash),
            0x03 => Ok(ChecksumType::Crc32C),
            other => Err(FramingError::UnknownChecksumType(other)),
        }
    }

    /// Wire byte for this checksum type.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Number of checksum bytes following the type byte.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Crc32 | ChecksumType::Farmhash | ChecksumType::Crc32C => 4,
        }
    }
}
