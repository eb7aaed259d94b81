//! Serial port discovery.
//!
//! Probes numbered device names family by family, opening each candidate at
//! the default line settings and attempting one sync handshake. The first
//! device that answers OK wins; later families are only tried once the
//! earlier ones are exhausted.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::is_interrupted_requested;
use crate::link::{LinkSession, SyncResult, Timeouts};
use crate::port::{DEVICE_DIR, PortOpener, SerialConfig};
use log::{debug, info, trace};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// File that receives the discovered device name.
pub const DISCOVERY_FILE: &str = "SerialPortNumber.txt";

/// Candidate device path prefixes, in probe order.
#[cfg(windows)]
pub const DEFAULT_FAMILIES: &[&str] = &[r"\\.\COM"];

/// Candidate device path prefixes, in probe order.
#[cfg(not(windows))]
pub const DEFAULT_FAMILIES: &[&str] = &["/dev/ttyS", "/dev/ttyUSB"];

/// Which device names to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortScanConfig {
    /// Device path prefixes, probed in order.
    pub families: Vec<String>,
    /// Numeric suffixes tried for each family.
    pub indices: Range<u32>,
    /// Where the discovered name is written.
    pub result_file: PathBuf,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            families: DEFAULT_FAMILIES.iter().map(ToString::to_string).collect(),
            indices: 0..256,
            result_file: PathBuf::from(DISCOVERY_FILE),
        }
    }
}

/// A device that answered the sync handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiscoveredPort {
    /// Short name accepted by `LinkSession::open` (e.g. `ttyUSB0`).
    pub name: String,
    /// Full device path that was opened.
    pub path: String,
    /// Index into [`PortScanConfig::families`].
    pub family: usize,
    /// Numeric suffix.
    pub index: u32,
}

/// Probes candidate devices through a [`PortOpener`].
pub struct PortScanner<O: PortOpener, C: Clock + Clone = SystemClock> {
    opener: O,
    serial: SerialConfig,
    timeouts: Timeouts,
    clock: C,
}

impl<O: PortOpener> PortScanner<O> {
    /// Create a scanner using default line settings.
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            serial: SerialConfig::default(),
            timeouts: Timeouts::default(),
            clock: SystemClock,
        }
    }
}

impl<O: PortOpener, C: Clock + Clone> PortScanner<O, C> {
    /// Line settings used for every candidate.
    #[must_use]
    pub fn with_serial_config(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    /// Timeout policy for the per-candidate handshake.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replace the clock.
    pub fn with_clock<C2: Clock + Clone>(self, clock: C2) -> PortScanner<O, C2> {
        PortScanner {
            opener: self.opener,
            serial: self.serial,
            timeouts: self.timeouts,
            clock,
        }
    }

    /// Get a reference to the opener.
    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Probe one device; `true` when it synced.
    fn probe(&mut self, path: &str) -> bool {
        let port = match self.opener.open(path, &self.serial) {
            Ok(port) => port,
            Err(e) => {
                trace!("Cannot open {path}: {e}");
                return false;
            },
        };

        let config = SerialConfig {
            port_name: path.to_string(),
            ..self.serial.clone()
        };
        let mut session = LinkSession::new(port, config)
            .with_timeouts(self.timeouts.clone())
            .with_clock(self.clock.clone());

        let result = session.check_sync(self.serial.baud_rate);
        debug!("{path}: {result}");

        if let Err(e) = session.close() {
            debug!("Closing {path} failed: {e}");
        }
        result == SyncResult::Ok
    }

    /// Find the first device that answers sync.
    pub fn scan(&mut self, config: &PortScanConfig) -> Result<DiscoveredPort> {
        for (family, prefix) in config.families.iter().enumerate() {
            info!(
                "Scanning {prefix}{}..{prefix}{}",
                config.indices.start,
                config.indices.end.saturating_sub(1)
            );

            for index in config.indices.clone() {
                if is_interrupted_requested() {
                    return Err(Error::Interrupted);
                }
                let path = format!("{prefix}{index}");
                if self.probe(&path) {
                    let name = path.strip_prefix(DEVICE_DIR).unwrap_or(&path).to_string();
                    info!("Found device on {path}");
                    return Ok(DiscoveredPort {
                        name,
                        path,
                        family,
                        index,
                    });
                }
            }
        }

        Err(Error::PortNotFound)
    }
}

/// Overwrite `path` with exactly the discovered short name.
pub fn persist_discovery(port: &DiscoveredPort, path: &Path) -> Result<()> {
    fs::write(path, &port.name)?;
    debug!("Saved {} to {}", port.name, path.display());
    Ok(())
}
