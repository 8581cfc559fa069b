//! Synchronous send / settle / read primitive.
//!
//! Every instrument interaction goes through [`QueryEngine`]. The OVA has no ready
//! signal, so a query waits a settle delay between writing the command and reading the
//! response. Reading earlier risks picking up a partial or stale buffer.
//!
//! The engine takes `&mut self` for every operation, so a second command can never be
//! written while a previous query is still waiting for its response.

use crate::codec::LineCodec;
use crate::error::OvaResult;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Upper bound on reads spent draining stale input before one query.
const MAX_DRAIN_READS: usize = 64;

/// What to do with unread input before sending a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushInput {
    /// Leave the input alone. The OVA does not need flushing today.
    #[default]
    Disabled,
    /// Read and discard until the socket is idle.
    Drain,
}

/// Pause between writing a command and reading the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleDelay {
    /// Read immediately
    None,
    /// Sleep a fixed duration
    Fixed(Duration),
}

impl SettleDelay {
    /// Fixed delay, or [`SettleDelay::None`] for a zero duration.
    pub fn fixed(duration: Duration) -> Self {
        if duration.is_zero() {
            SettleDelay::None
        } else {
            SettleDelay::Fixed(duration)
        }
    }

    /// How long [`wait`](Self::wait) blocks.
    pub fn duration(&self) -> Duration {
        match self {
            SettleDelay::None => Duration::ZERO,
            SettleDelay::Fixed(duration) => *duration,
        }
    }

    /// Block the calling thread for the delay.
    pub fn wait(&self) {
        if let SettleDelay::Fixed(duration) = self {
            std::thread::sleep(*duration);
        }
    }
}

/// Transport plus codec, with the settle and flush policies applied.
pub struct QueryEngine<T: Transport> {
    transport: T,
    codec: LineCodec,
    settle: SettleDelay,
    flush: FlushInput,
}

impl<T: Transport> QueryEngine<T> {
    /// Wrap an open transport.
    pub fn new(transport: T, codec: LineCodec, settle: SettleDelay, flush: FlushInput) -> Self {
        Self {
            transport,
            codec,
            settle,
            flush,
        }
    }

    /// The settle policy in use.
    pub fn settle(&self) -> SettleDelay {
        self.settle
    }

    /// Write a command without waiting for a response.
    pub fn send(&mut self, command: &str) -> OvaResult<()> {
        debug!(command, "send");
        self.codec.write_command(&mut self.transport, command)
    }

    /// Flush, send, settle, then read and decode the response.
    ///
    /// An instrument that stays silent yields `""`.
    pub fn query(&mut self, command: &str) -> OvaResult<String> {
        self.flush_input()?;
        self.send(command)?;
        self.settle.wait();
        let response = self.codec.read_response(&mut self.transport)?;
        debug!(command, response = %response.escape_debug(), "response");
        Ok(response)
    }

    /// Close the underlying transport.
    pub fn close(&mut self) {
        self.transport.close();
    }

    fn flush_input(&mut self) -> OvaResult<()> {
        match self.flush {
            FlushInput::Disabled => Ok(()),
            FlushInput::Drain => {
                let mut discarded = 0usize;
                for _ in 0..MAX_DRAIN_READS {
                    let stale = self.transport.read(self.codec.max_read())?;
                    if stale.is_empty() {
                        break;
                    }
                    discarded += stale.len();
                }
                if discarded > 0 {
                    debug!(bytes = discarded, "discarded stale input");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, SessionConfig};
    use crate::transport::mock::{MockDevice, MockTransport, TransportEvent};
    use crate::transport::Connector;
    use std::time::Instant;

    fn engine(device: &MockDevice, settle: SettleDelay, flush: FlushInput) -> QueryEngine<MockTransport> {
        let transport = device
            .open(&Endpoint::default(), &SessionConfig::default())
            .ok()
            .unwrap();
        QueryEngine::new(transport, LineCodec::new(1024), settle, flush)
    }

    #[test]
    fn query_reads_before_next_write() {
        let device = MockDevice::new(|cmd| match cmd {
            "CONF:CWL?" => Some("1550.00".into()),
            "CONF:RANG?" => Some("4.00".into()),
            _ => None,
        });
        let mut engine = engine(&device, SettleDelay::None, FlushInput::Disabled);

        assert_eq!(engine.query("CONF:CWL?").unwrap(), "1550.00");
        assert_eq!(engine.query("CONF:RANG?").unwrap(), "4.00");

        assert_eq!(
            device.events(),
            vec![
                TransportEvent::Open,
                TransportEvent::Write("CONF:CWL?".into()),
                TransportEvent::Read(8),
                TransportEvent::Write("CONF:RANG?".into()),
                TransportEvent::Read(5),
            ]
        );
    }

    #[test]
    fn send_does_not_read() {
        let device = MockDevice::silent();
        let mut engine = engine(&device, SettleDelay::None, FlushInput::Disabled);

        engine.send("SCAN").unwrap();
        assert_eq!(
            device.events(),
            vec![TransportEvent::Open, TransportEvent::Write("SCAN".into())]
        );
    }

    #[test]
    fn settle_delay_precedes_read() {
        let device = MockDevice::new(|_| Some("0".into()));
        let delay = Duration::from_millis(30);
        let mut engine = engine(&device, SettleDelay::fixed(delay), FlushInput::Disabled);

        let start = Instant::now();
        engine.query("SYST:ERR?").unwrap();
        assert!(start.elapsed() >= delay);
    }

    #[test]
    fn drain_discards_stale_bytes_before_query() {
        let device = MockDevice::new(|_| Some("fresh".into()));
        device.push_raw(b"stale\n");
        let mut engine = engine(&device, SettleDelay::None, FlushInput::Drain);

        assert_eq!(engine.query("*IDN?").unwrap(), "fresh");
    }

    #[test]
    fn disabled_flush_leaves_stale_bytes() {
        let device = MockDevice::new(|_| Some("fresh".into())).with_max_chunk(6);
        device.push_raw(b"stale\n");
        let mut engine = engine(&device, SettleDelay::None, FlushInput::Disabled);

        assert_eq!(engine.query("*IDN?").unwrap(), "stale");
    }

    #[test]
    fn zero_settle_is_none() {
        assert_eq!(SettleDelay::fixed(Duration::ZERO), SettleDelay::None);
        assert_eq!(SettleDelay::None.duration(), Duration::ZERO);
    }
}
