//! Boot-ROM UART command frames.
//!
//! ## Frame Format
//!
//! Addressed commands share one layout. The address is always big-endian and
//! the CRC covers every byte before it:
//!
//! ```text
//! +--------+------+-----------------+--------------+-----------+
//! | Opcode | Size |     Address     |     Data     |    CRC    |
//! +--------+------+-----------------+--------------+-----------+
//! | 1 byte | 1    | 4 bytes (BE)    | 0..256 bytes | 2/4 (BE)  |
//! +--------+------+-----------------+--------------+-----------+
//! ```
//!
//! `Size` carries the byte count minus one for reads and writes and is zero
//! for execute. Sync (0x55) and set-high-baud-rate (0xA0) are single bare
//! bytes without size, address or CRC.
//!
//! ## Responses
//!
//! | Command             | Response size | Check                         |
//! |---------------------|---------------|-------------------------------|
//! | Sync                | 1             | byte 0 == 0x5A                |
//! | Write               | 1             | byte 0 == 0x07                |
//! | Read (N bytes)      | N + 3         | byte 0 == 0x1C, data at 1..=N |
//! | Execute (exit)      | 1             | byte 0 == 0x70                |
//! | Execute (return)    | 3             | byte 1 == 0x73, result byte 2 |
//! | Set high baud rate  | 0             | none                          |

use crate::error::{Error, Result};
use crate::protocol::crc::CrcWidth;
use byteorder::{BigEndian, WriteBytesExt};

/// Largest data payload carried by a single read or write frame.
pub const MAX_PACKET_SIZE: usize = 256;

/// Protocol opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Host-to-device sync request (0x55).
    Sync = 0x55,
    /// Device-to-host sync answer (0x5A).
    SyncResponse = 0x5A,
    /// Memory write (0x07).
    Write = 0x07,
    /// Memory read (0x1C).
    Read = 0x1C,
    /// Read CRC of a memory range (0x89).
    ReadCrc = 0x89,
    /// Function call / execute (0x70).
    Call = 0x70,
    /// Result of a returning call (0x73).
    CallResult = 0x73,
    /// SPI flash pass-through (0x92).
    Spi = 0x92,
    /// Switch the device to its high baud rate (0xA0).
    SetHighRate = 0xA0,
    /// Error reply (0xFF).
    Error = 0xFF,
}

impl Opcode {
    /// Map a raw byte back to a known opcode.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x55 => Self::Sync,
            0x5A => Self::SyncResponse,
            0x07 => Self::Write,
            0x1C => Self::Read,
            0x89 => Self::ReadCrc,
            0x70 => Self::Call,
            0x73 => Self::CallResult,
            0x92 => Self::Spi,
            0xA0 => Self::SetHighRate,
            0xFF => Self::Error,
            _ => return None,
        })
    }
}

/// Which timeout bound applies while waiting for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Ordinary commands.
    Command,
    /// Commands that may trigger slow device work such as a flash erase.
    Long,
}

/// One protocol operation with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Sync handshake.
    Sync,
    /// Write `data` at `addr`.
    Write {
        /// Target address.
        addr: u32,
        /// Payload, 1..=256 bytes.
        data: &'a [u8],
    },
    /// Read `len` bytes from `addr`.
    Read {
        /// Source address.
        addr: u32,
        /// Byte count, 1..=256.
        len: usize,
    },
    /// Jump to `addr`; the ROM leaves command mode.
    ExecuteExit {
        /// Entry point.
        addr: u32,
    },
    /// Call `addr` and wait for the returned result code.
    ExecuteReturn {
        /// Entry point.
        addr: u32,
    },
    /// Ask the device to switch to its high baud rate.
    SetHighBaudRate,
}

/// An encoded frame paired with the response length it must produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Bytes to put on the wire.
    pub frame: Vec<u8>,
    /// Exact response length to wait for.
    pub expected_len: usize,
    /// Timeout bound for the wait.
    pub class: TimeoutClass,
}

/// Decoded response of a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Device answered the sync request.
    Synced,
    /// Write window accepted.
    WriteAck,
    /// Read payload with echo and trailer stripped.
    Data(Vec<u8>),
    /// Execute (exit) acknowledged.
    Executed,
    /// Execute (return) finished with this result code.
    Returned(u8),
    /// Command has no response.
    NoResponse,
}

fn check_packet_len(len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::EmptyPayload);
    }
    if len > MAX_PACKET_SIZE {
        return Err(Error::PacketTooLarge {
            len,
            max: MAX_PACKET_SIZE,
        });
    }
    Ok(())
}

/// Size field: byte count minus one.
#[allow(clippy::cast_possible_truncation)]
fn size_byte(len: usize) -> u8 {
    len.clamp(1, MAX_PACKET_SIZE).saturating_sub(1) as u8
}

impl<'a> Command<'a> {
    /// Write command for one window.
    pub fn write(addr: u32, data: &'a [u8]) -> Result<Self> {
        check_packet_len(data.len())?;
        Ok(Self::Write { addr, data })
    }

    /// Read command for one window.
    pub fn read(addr: u32, len: usize) -> Result<Self> {
        check_packet_len(len)?;
        Ok(Self::Read { addr, len })
    }

    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Write { .. } => "write",
            Self::Read { .. } => "read",
            Self::ExecuteExit { .. } => "execute",
            Self::ExecuteReturn { .. } => "call",
            Self::SetHighBaudRate => "set-high-baud-rate",
        }
    }

    /// Opcode placed in byte 0 of the frame.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Sync => Opcode::Sync,
            Self::Write { .. } => Opcode::Write,
            Self::Read { .. } => Opcode::Read,
            Self::ExecuteExit { .. } | Self::ExecuteReturn { .. } => Opcode::Call,
            Self::SetHighBaudRate => Opcode::SetHighRate,
        }
    }

    /// Number of response bytes the device sends back.
    pub fn expected_response_len(&self) -> usize {
        match self {
            Self::Sync | Self::Write { .. } | Self::ExecuteExit { .. } => 1,
            Self::Read { len, .. } => len + 3,
            Self::ExecuteReturn { .. } => 3,
            Self::SetHighBaudRate => 0,
        }
    }

    /// Timeout bound for the response wait.
    pub fn timeout_class(&self) -> TimeoutClass {
        match self {
            Self::ExecuteReturn { .. } => TimeoutClass::Long,
            _ => TimeoutClass::Command,
        }
    }

    /// Encode the frame, appending a CRC of the given width when the
    /// command carries one.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self, crc: CrcWidth) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 + MAX_PACKET_SIZE + crc.trailer_len());
        buf.push(self.opcode() as u8);

        let addr = match *self {
            Self::Sync | Self::SetHighBaudRate => return buf,
            Self::Write { addr, data } => {
                buf.push(size_byte(data.len()));
                addr
            },
            Self::Read { addr, len } => {
                buf.push(size_byte(len));
                addr
            },
            Self::ExecuteExit { addr } | Self::ExecuteReturn { addr } => {
                buf.push(0x00);
                addr
            },
        };

        // Writing into a Vec cannot fail
        buf.write_u32::<BigEndian>(addr).unwrap();
        if let Self::Write { data, .. } = self {
            buf.extend_from_slice(data);
        }

        crc.append(&mut buf);
        buf
    }

    /// Check the packet limits of a directly constructed command.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Write { data, .. } => check_packet_len(data.len()),
            Self::Read { len, .. } => check_packet_len(*len),
            _ => Ok(()),
        }
    }

    /// Encode and pair with the expected response length.
    pub fn request(&self, crc: CrcWidth) -> Result<CommandRequest> {
        self.validate()?;
        Ok(CommandRequest {
            frame: self.encode(crc),
            expected_len: self.expected_response_len(),
            class: self.timeout_class(),
        })
    }

    /// Validate a response buffer against this command.
    ///
    /// The buffer must already hold [`expected_response_len`] bytes; shorter
    /// buffers are reported as [`Error::ShortRead`] rather than panicking.
    ///
    /// [`expected_response_len`]: Self::expected_response_len
    pub fn decode(&self, buf: &[u8]) -> Result<Response> {
        let expected_len = self.expected_response_len();
        if buf.len() < expected_len {
            return Err(Error::ShortRead {
                received: buf.len(),
                expected: expected_len,
            });
        }

        let (index, expected) = match self {
            Self::SetHighBaudRate => return Ok(Response::NoResponse),
            Self::Sync => (0, Opcode::SyncResponse),
            Self::ExecuteReturn { .. } => (1, Opcode::CallResult),
            _ => (0, self.opcode()),
        };

        let actual = buf[index];
        if actual != expected as u8 {
            return Err(Error::ResponseMismatch {
                command: self.name(),
                expected: expected as u8,
                actual,
            });
        }

        Ok(match self {
            Self::Sync => Response::Synced,
            Self::Write { .. } => Response::WriteAck,
            Self::Read { len, .. } => Response::Data(buf[1..=*len].to_vec()),
            Self::ExecuteExit { .. } => Response::Executed,
            Self::ExecuteReturn { .. } => Response::Returned(buf[2]),
            Self::SetHighBaudRate => Response::NoResponse,
        })
    }
}
