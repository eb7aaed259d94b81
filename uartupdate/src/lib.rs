//! # uartupdate
//!
//! Host-side client for boot-ROM UART loaders.
//!
//! The device ROM listens on a serial line for short binary command frames:
//! a sync byte, memory writes and reads of up to 256 bytes, jumps and calls.
//! This crate provides:
//!
//! - CRC-16 and CRC-32 frame trailers
//! - Command frame encoding and response validation
//! - A send/wait/read link engine with per-command timeouts
//! - Baud-rate and serial-port discovery by sync handshake
//! - Windowed memory transfers and the status message stream
//!
//! ## Features
//!
//! - `native` (default): Serial port support via the `serialport` crate
//! - `serde`: Serialization support for scan results
//!
//! ## Example
//!
//! ```rust,no_run
//! use uartupdate::{LinkSession, SerialConfig, WriteSource};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut link = LinkSession::open("ttyUSB0", SerialConfig::default())?;
//!         link.synchronize()?;
//!
//!         let image = std::fs::read("app.bin")?;
//!         link.write_memory(0x2000_0000, &WriteSource::Bytes(image), |p| {
//!             println!("{}/{} bytes", p.bytes, p.total);
//!         })?;
//!         link.execute_exit(0x2000_0000)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod clock;
pub mod discovery;
pub mod error;
pub mod link;
pub mod port;
pub mod protocol;
pub mod transfer;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by scan and transfer loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Loops check it
/// between commands, never in the middle of one.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativeOpener, NativePort, list_ports};
pub use {
    clock::{Clock, SystemClock},
    discovery::{
        BaudObservation, BaudScan, BaudScanConfig, DiscoveredPort, PortScanConfig, PortScanner,
        persist_discovery,
    },
    error::{Error, Result},
    link::{LinkSession, MAX_SYNC_TRIALS, SyncResult, Timeouts},
    port::{
        DEFAULT_BAUD, DEFAULT_PORT_NAME, Port, PortInfo, PortOpener, SerialConfig, device_path,
        validate_port_name,
    },
    protocol::{Command, CrcWidth, MAX_PACKET_SIZE, Response, StatusHeader, crc_of},
    transfer::{Progress, TransferPlan, TransferReport, WriteSource},
};
