//! Status records streamed by device-side code.
//!
//! Once a loaded application runs it may report progress over the same UART.
//! Each record is an 8-byte little-endian header followed by optional data:
//!
//! ```text
//! +-------------+-------------+----------------------+
//! |   Status    |  Data size  |         Data         |
//! +-------------+-------------+----------------------+
//! | 4 bytes LE  | 4 bytes LE  |  `Data size` bytes   |
//! +-------------+-------------+----------------------+
//! ```
//!
//! A record whose status is [`STATUS_APP_END`] ends the stream; its data size
//! field is ignored.

use byteorder::{ByteOrder, LittleEndian};

/// Status code that terminates the stream.
pub const STATUS_APP_END: u32 = 0x09;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusHeader {
    /// Status code.
    pub status: u32,
    /// Number of data bytes that follow the header.
    pub data_size: u32,
}

impl StatusHeader {
    /// Header length on the wire.
    pub const LEN: usize = 8;

    /// Parse a header from the first [`Self::LEN`] bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header = buf.get(..Self::LEN)?;
        Some(Self {
            status: LittleEndian::read_u32(&header[..4]),
            data_size: LittleEndian::read_u32(&header[4..]),
        })
    }

    /// Whether this record ends the stream.
    pub fn is_end(&self) -> bool {
        self.status == STATUS_APP_END
    }

    /// Data bytes still to be read after this header.
    pub fn trailing_len(&self) -> usize {
        if self.is_end() {
            0
        } else {
            self.data_size as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let header = StatusHeader::parse(&[0x01, 0, 0, 0, 0x10, 0x02, 0, 0]).unwrap();
        assert_eq!(header.status, 1);
        assert_eq!(header.data_size, 0x0210);
        assert!(!header.is_end());
        assert_eq!(header.trailing_len(), 0x0210);
    }

    #[test]
    fn test_end_record_ignores_size() {
        let header = StatusHeader::parse(&[0x09, 0, 0, 0, 0x04, 0, 0, 0]).unwrap();
        assert!(header.is_end());
        assert_eq!(header.trailing_len(), 0);
    }

    #[test]
    fn test_parse_short_buffer() {
        assert!(StatusHeader::parse(&[0x09, 0, 0, 0]).is_none());
    }
}
