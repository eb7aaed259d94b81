//! Port abstraction for the serial transport.
//!
//! The protocol layer only needs a handful of primitives from the transport:
//! write a frame, report how many bytes are queued, read a bounded number of
//! bytes, and re-apply the line configuration between commands. This module
//! captures those in the [`Port`] trait so the link, discovery and transfer
//! code never touch a concrete serial API.
//!
//! ```text
//! +------------------------------+
//! | transfer / discovery         |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! | LinkSession (send/wait/read) |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |          Port trait          |
//! +--------------+---------------+
//!                |
//!        +-------+--------+
//!        v                v
//! +------+------+  +------+------+
//! | NativePort  |  | test mocks  |
//! | (serialport)|  |             |
//! +-------------+  +-------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default device name when none is given.
#[cfg(windows)]
pub const DEFAULT_PORT_NAME: &str = "COM1";

/// Default device name when none is given.
#[cfg(not(windows))]
pub const DEFAULT_PORT_NAME: &str = "ttyS0";

/// Default line rate of the boot ROM.
pub const DEFAULT_BAUD: u32 = 115200;

/// Device name families accepted for an explicit port name.
#[cfg(windows)]
pub const PORT_NAME_PREFIXES: &[&str] = &["COM"];

/// Device name families accepted for an explicit port name.
#[cfg(not(windows))]
pub const PORT_NAME_PREFIXES: &[&str] = &["ttyS", "ttyUSB"];

/// Directory prefix of device paths.
#[cfg(windows)]
pub const DEVICE_DIR: &str = r"\\.\";

/// Directory prefix of device paths.
#[cfg(not(windows))]
pub const DEVICE_DIR: &str = "/dev/";

/// Check a short device name (e.g. `ttyUSB0`, `COM3`) against the accepted
/// families and return it without any device directory prefix.
pub fn validate_port_name(name: &str) -> Result<&str> {
    let short = name.strip_prefix(DEVICE_DIR).unwrap_or(name);
    let valid = PORT_NAME_PREFIXES.iter().any(|prefix| {
        short
            .strip_prefix(prefix)
            .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
    });

    if valid {
        Ok(short)
    } else {
        Err(Error::InvalidPortName(name.to_string()))
    }
}

/// Full device path for a validated short name.
pub fn device_path(name: &str) -> Result<String> {
    let short = validate_port_name(name)?;
    Ok(format!("{DEVICE_DIR}{short}"))
}

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Driver-level read timeout for a single read call.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(500),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the frame format.
    #[must_use]
    pub fn with_format(mut self, data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        self.data_bits = data_bits;
        self.parity = parity;
        self.stop_bits = stop_bits;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 1.5 stop bits.
    OnePointFive,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Transport primitives required by the link layer.
///
/// Reads are expected to be bounded by the driver timeout and may return
/// fewer bytes than requested.
pub trait Port: Read + Write + Send {
    /// Re-apply the full line configuration (rate, format, flow control).
    fn configure(&mut self, config: &SerialConfig) -> Result<()>;

    /// Number of received bytes queued for reading.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write a frame with a single write call.
    ///
    /// A partial write is reported as [`Error::ShortWrite`] and is not
    /// retried.
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let written = self.write(frame)?;
        if written != frame.len() {
            return Err(Error::ShortWrite {
                written,
                expected: frame.len(),
            });
        }
        self.flush()?;
        Ok(())
    }
}

/// Opens ports by device name.
///
/// Port discovery probes many candidate names; the opener decides what a
/// name maps to.
pub trait PortOpener {
    /// Port type produced by this opener.
    type Port: Port;

    /// Open the named device with the given configuration.
    fn open(&mut self, name: &str, config: &SerialConfig) -> Result<Self::Port>;
}

#[cfg(feature = "native")]
pub use native::{NativeOpener, NativePort, list_ports};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("ttyUSB0", 921600)
            .with_timeout(Duration::from_secs(5))
            .with_format(DataBits::Seven, Parity::Even, StopBits::Two)
            .with_flow_control(FlowControl::Hardware);

        assert_eq!(config.port_name, "ttyUSB0");
        assert_eq!(config.baud_rate, 921600);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.data_bits, DataBits::Seven);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.flow_control, FlowControl::Hardware);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_validate_port_name() {
        assert_eq!(validate_port_name("ttyS0").unwrap(), "ttyS0");
        assert_eq!(validate_port_name("ttyUSB12").unwrap(), "ttyUSB12");
        assert_eq!(validate_port_name("/dev/ttyUSB1").unwrap(), "ttyUSB1");

        for bad in ["", "tty0", "ttyS", "ttyACM0", "ttyUSBx", "COM3", "/dev/sda"] {
            assert!(
                matches!(validate_port_name(bad), Err(Error::InvalidPortName(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn test_device_path() {
        assert_eq!(device_path("ttyS3").unwrap(), "/dev/ttyS3");
        assert_eq!(device_path("/dev/ttyUSB0").unwrap(), "/dev/ttyUSB0");
        assert!(device_path("ttyACM0").is_err());
    }
}
