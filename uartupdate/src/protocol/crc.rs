//! CRC engine for command frames.
//!
//! Both widths are the reflected (right-shifting) table-driven variants with
//! a zero seed and no final XOR:
//!
//! - CRC-16: polynomial 0xA001
//! - CRC-32: polynomial 0xEDB88320
//!
//! The device recomputes these over every frame byte before the trailer, so
//! the tables must reproduce the boot ROM bit for bit.

/// CRC-16 polynomial (reflected).
pub const CRC16_POLY: u16 = 0xA001;

/// CRC-32 polynomial (reflected).
pub const CRC32_POLY: u32 = 0xEDB88320;

static CRC16_TABLE: [u16; 256] = crc16_table();
static CRC32_TABLE: [u32; 256] = crc32_table();

#[allow(clippy::cast_possible_truncation)]
const fn crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = 0u16;
        let mut c = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if (crc ^ c) & 1 != 0 {
                (crc >> 1) ^ CRC16_POLY
            } else {
                crc >> 1
            };
            c >>= 1;
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[allow(clippy::cast_possible_truncation)]
const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Fold one byte into a CRC-16 state.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub fn crc16_update(crc: u16, byte: u8) -> u16 {
    (crc >> 8) ^ CRC16_TABLE[usize::from((crc ^ u16::from(byte)) as u8)]
}

/// Fold one byte into a CRC-32 state.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub fn crc32_update(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC32_TABLE[usize::from((crc as u8) ^ byte)]
}

/// CRC width selected for a session.
///
/// Fixed for the lifetime of a run; the device is not told which width is in
/// use, so both ends must agree out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CrcWidth {
    /// 16-bit CRC, two trailer bytes.
    #[default]
    Crc16,
    /// 32-bit CRC, four trailer bytes.
    Crc32,
}

impl CrcWidth {
    /// Trailer length in bytes.
    pub const fn trailer_len(self) -> usize {
        match self {
            Self::Crc16 => 2,
            Self::Crc32 => 4,
        }
    }

    /// Width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            Self::Crc16 => 16,
            Self::Crc32 => 32,
        }
    }

    /// Fold one byte into a running state of this width.
    #[allow(clippy::cast_possible_truncation)]
    pub fn update(self, state: u32, byte: u8) -> u32 {
        match self {
            Self::Crc16 => u32::from(crc16_update(state as u16, byte)),
            Self::Crc32 => crc32_update(state, byte),
        }
    }

    /// CRC of a whole buffer, seeded at zero.
    pub fn checksum(self, bytes: &[u8]) -> u32 {
        bytes.iter().fold(0, |state, &b| self.update(state, b))
    }

    /// Append the CRC of `buf` to itself, most significant byte first.
    pub fn append(self, buf: &mut Vec<u8>) {
        let crc = self.checksum(buf);
        let be = crc.to_be_bytes();
        buf.extend_from_slice(&be[4 - self.trailer_len()..]);
    }

    /// Split a frame into its body and trailer, returning the trailer value.
    ///
    /// Returns `None` when the frame is too short to carry a trailer.
    pub fn split_trailer(self, frame: &[u8]) -> Option<(&[u8], u32)> {
        let body_len = frame.len().checked_sub(self.trailer_len())?;
        let (body, trailer) = frame.split_at(body_len);
        let value = trailer
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        Some((body, value))
    }
}

impl std::str::FromStr for CrcWidth {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "16" | "crc16" => Ok(Self::Crc16),
            "32" | "crc32" => Ok(Self::Crc32),
            other => Err(crate::Error::InvalidInput(format!(
                "CRC width must be 16 or 32, got {other}"
            ))),
        }
    }
}

impl std::fmt::Display for CrcWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CRC-{}", self.bits())
    }
}

/// CRC of `bytes` at the given width, seeded at zero.
pub fn crc_of(bytes: &[u8], width: CrcWidth) -> u32 {
    width.checksum(bytes)
}
