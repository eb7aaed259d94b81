//! Error types for uartupdate.

use crate::link::SyncResult;
use std::io;
use thiserror::Error;

/// Result type for uartupdate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for uartupdate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport accepted fewer bytes than the frame holds.
    #[error("Short write: {written} of {expected} bytes sent")]
    ShortWrite {
        /// Bytes accepted by the transport.
        written: usize,
        /// Frame length.
        expected: usize,
    },

    /// Expected response bytes did not arrive in time.
    #[error("Timeout: {available} of {expected} response bytes available")]
    Timeout {
        /// Bytes queued when the wait gave up.
        available: usize,
        /// Bytes the command should have produced.
        expected: usize,
    },

    /// The single bounded read returned fewer bytes than expected.
    #[error("Short read: received {received} of {expected} bytes")]
    ShortRead {
        /// Bytes actually read.
        received: usize,
        /// Bytes the command should have produced.
        expected: usize,
    },

    /// Response echo did not match the command that was sent.
    #[error("{command} response mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ResponseMismatch {
        /// Command name.
        command: &'static str,
        /// Expected echo byte.
        expected: u8,
        /// Byte actually received.
        actual: u8,
    },

    /// Sync handshake did not succeed.
    #[error("Sync failed: {0}")]
    SyncFailed(SyncResult),

    /// A multi-window transfer aborted part way.
    #[error("Transfer aborted at window {window}/{windows} ({committed} bytes committed): {source}")]
    Transfer {
        /// One-based index of the failed window.
        window: usize,
        /// Total number of windows planned.
        windows: usize,
        /// Bytes completed before the failure.
        committed: usize,
        /// Underlying failure.
        source: Box<Error>,
    },

    /// Payload to transfer is empty.
    #[error("Payload is empty")]
    EmptyPayload,

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Device name is not one of the accepted serial device families.
    #[error("Invalid port name: {0}")]
    InvalidPortName(String),

    /// A single packet exceeds the protocol payload limit.
    #[error("Packet of {len} bytes exceeds the {max} byte limit")]
    PacketTooLarge {
        /// Requested packet length.
        len: usize,
        /// Protocol limit.
        max: usize,
    },

    /// No candidate serial device answered the sync handshake.
    #[error("No device answered on any candidate port")]
    PortNotFound,

    /// Unsupported operation or setting.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The caller's output sink rejected received data.
    #[error("Cannot write output: {0}")]
    Output(#[source] io::Error),

    /// The embedding application asked to stop.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Returns `true` for failures raised at the transport boundary.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Io(_) | Self::ShortWrite { .. } | Self::Unsupported(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            Self::Transfer { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Returns `true` when the local output sink failed, not the device.
    pub fn is_output(&self) -> bool {
        match self {
            Self::Output(_) => true,
            Self::Transfer { source, .. } => source.is_output(),
            _ => false,
        }
    }

    /// Returns `true` for failures detected before any transport activity.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::EmptyPayload
                | Self::InvalidInput(_)
                | Self::InvalidPortName(_)
                | Self::PacketTooLarge { .. }
        )
    }
}
