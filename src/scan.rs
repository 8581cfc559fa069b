//! Scan trigger and completion polling.
//!
//! A scan moves through three states:
//!
//! ```text
//! Triggered ──(SCAN, sleep per average)──▶ Polling ──(SYST:ERR? == 0)──▶ Settled
//!                                            │  ▲
//!                                            └──┘ nonzero: sleep, poll again
//! ```
//!
//! While polling, each attempt first reads `SYST:ERRD?` and discards it; the instrument
//! needs the description register read before the code register updates. Polling is
//! bounded by a [`PollLimit`]. Exceeding it fails with [`OvaError::UnboundedPoll`].

use crate::commands;
use crate::config::ScanConfig;
use crate::error::{OvaError, OvaResult};
use crate::query::QueryEngine;
use crate::transport::Transport;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where a scan currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// `SCAN` sent, waiting out the acquisition time
    Triggered,
    /// Querying the error registers
    Polling {
        /// Error-code queries made so far
        attempts: u32,
    },
    /// The error code read back as zero
    Settled {
        /// Error-code queries it took
        attempts: u32,
    },
}

/// Bound on completion polling.
///
/// Both fields `None` means poll until the instrument settles, however long that takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollLimit {
    /// Give up after this many error-code queries
    pub max_polls: Option<u32>,
    /// Give up once polling has run this long
    pub deadline: Option<Duration>,
}

impl PollLimit {
    /// Cap the number of error-code queries.
    pub fn attempts(max_polls: u32) -> Self {
        Self {
            max_polls: Some(max_polls),
            deadline: None,
        }
    }

    /// Cap the wall time spent polling.
    pub fn within(deadline: Duration) -> Self {
        Self {
            max_polls: None,
            deadline: Some(deadline),
        }
    }

    /// No bound at all. Hangs forever on an instrument that never reports zero.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Whether neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.max_polls.is_none() && self.deadline.is_none()
    }

    fn exceeded(&self, attempts: u32, elapsed: Duration) -> bool {
        self.max_polls.is_some_and(|max| attempts >= max)
            || self.deadline.is_some_and(|deadline| elapsed >= deadline)
    }
}

/// Sleeps and bound used by one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTiming {
    /// Sleep after `SCAN`, per average
    pub per_average: Duration,
    /// Sleep between busy polls
    pub poll_interval: Duration,
    /// Poll bound
    pub limit: PollLimit,
}

impl From<&ScanConfig> for ScanTiming {
    fn from(config: &ScanConfig) -> Self {
        Self {
            per_average: config.per_average,
            poll_interval: config.poll_interval,
            limit: config.poll_limit(),
        }
    }
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

/// Outcome of a settled scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Error-code queries made
    pub polls: u32,
    /// Time from trigger to settle
    pub elapsed: Duration,
}

/// Drives one scan from trigger to settle.
#[derive(Debug)]
pub struct ScanStateMachine {
    timing: ScanTiming,
    state: ScanState,
}

impl ScanStateMachine {
    /// Create a machine in the `Triggered` state.
    pub fn new(timing: ScanTiming) -> Self {
        if timing.limit.is_unbounded() {
            warn!("scan polling has no bound, a wedged instrument will hang the caller");
        }
        Self {
            timing,
            state: ScanState::Triggered,
        }
    }

    /// Current state.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Trigger a scan of `averages` averages and block until it settles.
    pub fn run<T: Transport>(
        &mut self,
        engine: &mut QueryEngine<T>,
        averages: u32,
    ) -> OvaResult<ScanReport> {
        let started = Instant::now();
        self.state = ScanState::Triggered;
        engine.send(commands::SCAN)?;
        std::thread::sleep(self.timing.per_average.saturating_mul(averages));

        let polling_started = Instant::now();
        let mut attempts = 0u32;
        loop {
            self.state = ScanState::Polling { attempts };
            poke_error_description(engine)?;
            let response = engine.query(commands::ERROR_CODE)?;
            attempts += 1;

            match response.parse::<i64>() {
                Ok(0) => {
                    self.state = ScanState::Settled { attempts };
                    let elapsed = started.elapsed();
                    debug!(polls = attempts, ?elapsed, "scan settled");
                    return Ok(ScanReport {
                        polls: attempts,
                        elapsed,
                    });
                }
                Ok(code) => debug!(code, attempts, "scan busy"),
                Err(_) => warn!(response = %response, attempts, "unparsable error code, polling again"),
            }

            let polling = polling_started.elapsed();
            if self.timing.limit.exceeded(attempts, polling) {
                self.state = ScanState::Polling { attempts };
                return Err(OvaError::UnboundedPoll {
                    attempts,
                    elapsed: polling,
                });
            }
            std::thread::sleep(self.timing.poll_interval);
        }
    }
}

/// Read the error description register and throw the text away.
///
/// Transport failures still propagate.
fn poke_error_description<T: Transport>(engine: &mut QueryEngine<T>) -> OvaResult<()> {
    let _description = engine.query(commands::ERROR_DESCRIPTION)?;
    Ok(())
}
