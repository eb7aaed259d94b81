//! Link session and the send/wait/read engine.
//!
//! A [`LinkSession`] owns the open transport together with its current line
//! configuration, the session CRC width and the timeout policy. Every command
//! goes through the same cycle:
//!
//! ```text
//! Idle -> Sent -> WaitingForData -> Complete
//!                               \-> TimedOut
//! ```
//!
//! The frame is written with one write call. The engine then polls the
//! queued byte count until the expected response length is available or the
//! timeout for the command's class runs out, and finally performs exactly one
//! bounded read. A timed-out command is never resent.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::port::{Port, SerialConfig};
use crate::protocol::{Command, CommandRequest, CrcWidth, Opcode, Response, TimeoutClass};
use log::{debug, info, trace};
use std::fmt;
use std::time::Duration;

/// Number of response waits after one sync request.
pub const MAX_SYNC_TRIALS: usize = 3;

/// Outcome of one sync handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SyncResult {
    /// Device answered 0x5A.
    Ok,
    /// Device answered with another byte.
    WrongData,
    /// Nothing arrived in any of the trials.
    Timeout,
    /// The link could not be reconfigured or written.
    Error,
}

impl SyncResult {
    /// Whether the device showed any sign of life.
    pub fn is_responsive(self) -> bool {
        matches!(self, Self::Ok | Self::WrongData)
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::WrongData => "wrong data",
            Self::Timeout => "timeout",
            Self::Error => "link error",
        };
        f.write_str(text)
    }
}

/// Per-class wait bounds and polling cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound for ordinary commands.
    pub command: Duration,
    /// Bound for commands that may run slow device work.
    pub long: Duration,
    /// Wait for one sync answer trial.
    pub sync_window: Duration,
    /// Pause between sync answer trials.
    pub sync_retry_delay: Duration,
    /// Pause between queued-byte polls.
    pub poll_interval: Duration,
}

/// Pause between sync trials.
#[cfg(windows)]
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Pause between sync trials.
#[cfg(not(windows))]
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(1);

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(10),
            long: Duration::from_secs(120),
            sync_window: Duration::from_millis(500),
            sync_retry_delay: SYNC_RETRY_DELAY,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl Timeouts {
    /// Bound for a timeout class.
    pub fn for_class(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Command => self.command,
            TimeoutClass::Long => self.long,
        }
    }

    /// Set the ordinary command bound.
    #[must_use]
    pub fn with_command(mut self, timeout: Duration) -> Self {
        self.command = timeout;
        self
    }

    /// Set the long operation bound.
    #[must_use]
    pub fn with_long(mut self, timeout: Duration) -> Self {
        self.long = timeout;
        self
    }

    /// Set the sync trial window and the pause between trials.
    #[must_use]
    pub fn with_sync(mut self, window: Duration, retry_delay: Duration) -> Self {
        self.sync_window = window;
        self.sync_retry_delay = retry_delay;
        self
    }
}

/// The live connection to a device in command mode.
///
/// Generic over the port type `P` and the clock `C` used by every wait.
pub struct LinkSession<P: Port, C: Clock = SystemClock> {
    port: P,
    config: SerialConfig,
    crc: CrcWidth,
    timeouts: Timeouts,
    clock: C,
}

impl<P: Port> LinkSession<P> {
    /// Wrap an already opened port.
    ///
    /// `config` should describe how the port is currently configured.
    pub fn new(port: P, config: SerialConfig) -> Self {
        Self {
            port,
            config,
            crc: CrcWidth::default(),
            timeouts: Timeouts::default(),
            clock: SystemClock,
        }
    }
}

impl<P: Port, C: Clock> LinkSession<P, C> {
    /// Set the session CRC width.
    #[must_use]
    pub fn with_crc(mut self, crc: CrcWidth) -> Self {
        self.crc = crc;
        self
    }

    /// Set the timeout policy.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replace the clock.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> LinkSession<P, C2> {
        LinkSession {
            port: self.port,
            config: self.config,
            crc: self.crc,
            timeouts: self.timeouts,
            clock,
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Current line configuration.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Current baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }

    /// Session CRC width.
    pub fn crc(&self) -> CrcWidth {
        self.crc
    }

    /// Timeout policy.
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Block for `duration` on the session clock.
    pub fn pause(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    #[cfg(test)]
    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }

    /// Close the port.
    pub fn close(mut self) -> Result<()> {
        debug!("Closing {}", self.port.name());
        self.port.close()
    }

    /// Apply a new line configuration.
    ///
    /// Only safe between commands. Bytes received at the old settings are
    /// discarded.
    pub fn configure(&mut self, config: SerialConfig) -> Result<()> {
        self.port.configure(&config)?;
        self.config = config;
        self.port.clear_buffers()
    }

    /// Change the baud rate, re-applying the full line configuration.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let config = self.config.clone().with_baud_rate(baud_rate);
        self.configure(config)
    }

    /// Poll until `expected` bytes are queued or `timeout` elapses.
    fn wait_for(&mut self, expected: usize, timeout: Duration) -> Result<usize> {
        let start = self.clock.now();
        loop {
            let available = self.port.bytes_available()?;
            if available >= expected {
                return Ok(available);
            }
            if self.clock.elapsed_since(start) >= timeout {
                return Err(Error::Timeout {
                    available,
                    expected,
                });
            }
            self.clock.sleep(self.timeouts.poll_interval);
        }
    }

    /// Wait for `expected` bytes, then read them with a single bounded read.
    pub fn receive(&mut self, expected: usize, timeout: Duration) -> Result<Vec<u8>> {
        if expected == 0 {
            return Ok(Vec::new());
        }

        self.wait_for(expected, timeout)?;

        let mut buf = vec![0u8; expected];
        let received = match self.port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(Error::Io(e)),
        };
        if received < expected {
            return Err(Error::ShortRead { received, expected });
        }

        trace!("Received {:02X?}", buf);
        Ok(buf)
    }

    /// Send a frame and collect its fixed-size response.
    ///
    /// Leftovers from an earlier failed command are dropped before the frame
    /// goes out.
    pub fn transact(&mut self, request: &CommandRequest) -> Result<Vec<u8>> {
        self.port.clear_buffers()?;

        trace!(
            "Sending {} bytes, expecting {}: {:02X?}",
            request.frame.len(),
            request.expected_len,
            request.frame
        );

        self.port.write_frame(&request.frame)?;

        let timeout = self.timeouts.for_class(request.class);
        self.receive(request.expected_len, timeout)
    }

    /// Encode, send and decode one command.
    pub fn execute(&mut self, command: &Command<'_>) -> Result<Response> {
        let request = command.request(self.crc)?;
        let response = self.transact(&request)?;
        command.decode(&response)
    }

    /// Reconfigure to `baud_rate` and attempt one sync handshake.
    ///
    /// The request is sent once; up to [`MAX_SYNC_TRIALS`] waits are made
    /// for the answer.
    pub fn check_sync(&mut self, baud_rate: u32) -> SyncResult {
        if let Err(e) = self.set_baud_rate(baud_rate) {
            debug!("Cannot configure {} baud: {e}", baud_rate);
            return SyncResult::Error;
        }

        let frame = Command::Sync.encode(self.crc);
        if let Err(e) = self.port.write_frame(&frame) {
            debug!("Sync write failed at {baud_rate} baud: {e}");
            return SyncResult::Error;
        }

        for trial in 1..=MAX_SYNC_TRIALS {
            match self.receive(1, self.timeouts.sync_window) {
                Ok(buf) => {
                    let result = if buf[0] == Opcode::SyncResponse as u8 {
                        SyncResult::Ok
                    } else {
                        SyncResult::WrongData
                    };
                    trace!("Sync at {baud_rate} baud: {result} (0x{:02X})", buf[0]);
                    return result;
                },
                Err(Error::Timeout { .. } | Error::ShortRead { .. }) => {
                    trace!("No sync answer (trial {trial}/{MAX_SYNC_TRIALS})");
                    if trial < MAX_SYNC_TRIALS {
                        self.clock.sleep(self.timeouts.sync_retry_delay);
                    }
                },
                Err(e) => {
                    debug!("Sync read failed at {baud_rate} baud: {e}");
                    return SyncResult::Error;
                },
            }
        }

        SyncResult::Timeout
    }

    /// Sync at the current baud rate, failing unless the device answers OK.
    pub fn synchronize(&mut self) -> Result<()> {
        let baud_rate = self.config.baud_rate;
        match self.check_sync(baud_rate) {
            SyncResult::Ok => {
                info!("Synchronized with device at {baud_rate} baud");
                Ok(())
            },
            other => Err(Error::SyncFailed(other)),
        }
    }
}

// Native-specific convenience functions
#[cfg(feature = "native")]
mod native_impl {
    use super::{LinkSession, Result, info};
    use crate::port::{NativePort, SerialConfig, device_path};

    impl LinkSession<NativePort> {
        /// Open a session on a named device.
        ///
        /// `name` must belong to one of the accepted device families
        /// (e.g. `ttyS0`, `ttyUSB1`, `COM3`); it is checked before the
        /// transport is touched.
        pub fn open(name: &str, config: SerialConfig) -> Result<Self> {
            let path = device_path(name)?;
            let config = SerialConfig {
                port_name: path,
                ..config
            };

            let port = NativePort::open(&config)?;
            info!("Port {} opened at {} baud", config.port_name, config.baud_rate);

            Ok(Self::new(port, config))
        }
    }
}
