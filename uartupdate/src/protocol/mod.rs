//! Wire protocol of the boot-ROM UART loader.

pub mod command;
pub mod crc;
pub mod status;

// Re-export common types
pub use command::{Command, CommandRequest, MAX_PACKET_SIZE, Opcode, Response, TimeoutClass};
pub use crc::{CrcWidth, crc_of, crc16_update, crc32_update};
pub use status::{STATUS_APP_END, StatusHeader};
