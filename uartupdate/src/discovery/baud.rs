//! Baud-rate discovery.
//!
//! Walks the rate range upwards, reconfiguring the link and attempting one
//! sync handshake per candidate. The step is a percentage of the current
//! rate and shrinks as the answers improve:
//!
//! | Last result        | Next step        |
//! |--------------------|------------------|
//! | Timeout / Error    | 20 % (big)       |
//! | WrongData          | 10 % (medium)    |
//! | Ok                 | 1 % (small)      |
//!
//! The device's responsive window is contiguous, so once any answer has been
//! seen a later silent rate ends the scan.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::is_interrupted_requested;
use crate::link::{LinkSession, SyncResult};
use crate::port::Port;
use log::{debug, info};

/// Step after a silent rate, in percent.
pub const BIG_STEP_PERCENT: u32 = 20;

/// Step after a wrong answer, in percent.
pub const MEDIUM_STEP_PERCENT: u32 = 10;

/// Step after a good answer, in percent.
pub const SMALL_STEP_PERCENT: u32 = 1;

/// Smallest step in baud.
pub const MIN_STEP: u32 = 5;

/// Scan limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudScanConfig {
    /// First rate tried.
    pub low: u32,
    /// Rates at or above this are never tried.
    pub high: u32,
}

impl Default for BaudScanConfig {
    fn default() -> Self {
        Self {
            low: 400,
            high: 150_000,
        }
    }
}

impl BaudScanConfig {
    fn validate(&self) -> Result<()> {
        if self.low == 0 || self.low >= self.high {
            return Err(Error::InvalidInput(format!(
                "baud scan range {}..{} is empty",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

/// Step to the next candidate after seeing `result` at `baud_rate`.
#[allow(clippy::cast_possible_truncation)]
pub fn next_step(baud_rate: u32, result: SyncResult) -> u32 {
    let percent = match result {
        SyncResult::Ok => SMALL_STEP_PERCENT,
        SyncResult::WrongData => MEDIUM_STEP_PERCENT,
        SyncResult::Timeout | SyncResult::Error => BIG_STEP_PERCENT,
    };
    let step = u64::from(baud_rate) * u64::from(percent) / 100;
    (step.min(u64::from(u32::MAX)) as u32).max(MIN_STEP)
}

/// One probed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BaudObservation {
    /// Rate the link was configured to.
    pub baud_rate: u32,
    /// Handshake outcome.
    pub result: SyncResult,
    /// Step chosen afterwards; `None` when the scan stopped here.
    pub next_step: Option<u32>,
}

/// Result of a full scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BaudScan {
    /// Every probed rate, in order.
    pub observations: Vec<BaudObservation>,
    /// Whether the scan ended on the far side of the responsive window.
    pub stopped_early: bool,
}

impl BaudScan {
    /// Rates that synced.
    pub fn ok_rates(&self) -> Vec<u32> {
        self.observations
            .iter()
            .filter(|o| o.result == SyncResult::Ok)
            .map(|o| o.baud_rate)
            .collect()
    }

    /// Rates that produced any answer.
    pub fn responsive_rates(&self) -> Vec<u32> {
        self.observations
            .iter()
            .filter(|o| o.result.is_responsive())
            .map(|o| o.baud_rate)
            .collect()
    }

    /// Middle of the synced rates, the safest pick.
    pub fn suggested_rate(&self) -> Option<u32> {
        let ok = self.ok_rates();
        ok.get(ok.len() / 2).copied()
    }
}

impl<P: Port, C: Clock> LinkSession<P, C> {
    /// Search `config.low..config.high` for rates that answer sync.
    ///
    /// Handshake failures are recorded, not returned; the link is left at
    /// the last probed rate.
    pub fn scan_baud_rate(&mut self, config: &BaudScanConfig) -> Result<BaudScan> {
        config.validate()?;
        info!("Scanning baud rates {}..{}", config.low, config.high);

        let mut scan = BaudScan::default();
        let mut answered = false;
        let mut rate = config.low;

        while rate < config.high {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            let result = self.check_sync(rate);
            debug!("{rate} baud: {result}");

            if !result.is_responsive() && answered {
                scan.observations.push(BaudObservation {
                    baud_rate: rate,
                    result,
                    next_step: None,
                });
                scan.stopped_early = true;
                break;
            }
            answered |= result.is_responsive();

            let step = next_step(rate, result);
            scan.observations.push(BaudObservation {
                baud_rate: rate,
                result,
                next_step: Some(step),
            });
            rate = rate.saturating_add(step);
        }

        match scan.suggested_rate() {
            Some(best) => info!("Device answers at {best} baud"),
            None => info!("No rate answered sync"),
        }
        Ok(scan)
    }
}
