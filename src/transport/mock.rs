//! In-memory transport for protocol tests.
//!
//! [`MockDevice`] is a [`Connector`] whose transports feed every written line to a
//! responder closure and queue the reply for the next reads. It records the order of
//! transport calls so tests can check framing and half-duplex ordering without a socket.
//!
//! [`SimulatedOva`] is a stateful responder that answers the OVA command set, for
//! exercising whole measurement sequences.
//!
//! # Example
//!
//! ```
//! use luna_ova::transport::mock::{MockDevice, TransportEvent};
//! use luna_ova::transport::{Connector, Transport};
//! use luna_ova::config::{Endpoint, SessionConfig};
//!
//! let device = MockDevice::new(|cmd| (cmd == "*IDN?").then(|| "LUNA,OVA5000".to_string()));
//! let mut transport = device.open(&Endpoint::default(), &SessionConfig::default()).unwrap();
//! transport.write_all(b"*IDN?\n").unwrap();
//! assert_eq!(transport.read(1024).unwrap(), b"LUNA,OVA5000\n");
//! assert_eq!(device.writes(), vec!["*IDN?".to_string()]);
//! ```

use super::{Connector, Transport};
use crate::array::encode_array;
use crate::config::{Endpoint, SessionConfig};
use crate::error::{OvaError, OvaResult};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A transport was opened
    Open,
    /// A line was written (terminator stripped)
    Write(String),
    /// A read returned this many bytes
    Read(usize),
    /// The transport was closed
    Close,
}

struct MockState {
    responder: Responder,
    pending: VecDeque<u8>,
    events: Vec<TransportEvent>,
    connect_failure: Option<String>,
    fail_writes: bool,
    max_chunk: Option<usize>,
}

/// Scripted instrument shared between a test and the transports it hands out.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// Create a device that answers each written command with `responder`.
    ///
    /// The responder receives the command without its terminator. `Some(reply)` queues
    /// `reply` plus a newline; `None` leaves the device silent.
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState {
                responder: Box::new(responder),
                pending: VecDeque::new(),
                events: Vec::new(),
                connect_failure: None,
                fail_writes: false,
                max_chunk: None,
            })),
        }
    }

    /// A device backed by a [`SimulatedOva`].
    pub fn simulated(mut ova: SimulatedOva) -> Self {
        Self::new(move |cmd| ova.handle(cmd))
    }

    /// A device that never answers.
    pub fn silent() -> Self {
        Self::new(|_| None)
    }

    /// Make subsequent `open` calls fail with `reason`.
    pub fn fail_connect(&self, reason: impl Into<String>) {
        self.lock().connect_failure = Some(reason.into());
    }

    /// Make subsequent writes fail with a broken pipe.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Limit how many bytes a single read returns, to exercise reassembly.
    pub fn with_max_chunk(self, bytes: usize) -> Self {
        self.lock().max_chunk = Some(bytes.max(1));
        self
    }

    /// Queue raw bytes as if the device had sent them unprompted.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.lock().pending.extend(bytes.iter().copied());
    }

    /// All recorded transport calls, in order.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.lock().events.clone()
    }

    /// The commands written so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Write(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// How many times `command` was written.
    pub fn count_writes(&self, command: &str) -> usize {
        self.writes().iter().filter(|line| *line == command).count()
    }

    /// Forget recorded calls.
    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connector for MockDevice {
    type Transport = MockTransport;

    fn open(&self, endpoint: &Endpoint, _config: &SessionConfig) -> OvaResult<MockTransport> {
        let mut state = self.lock();
        if let Some(reason) = state.connect_failure.clone() {
            return Err(OvaError::Connect {
                endpoint: endpoint.to_string(),
                reason,
            });
        }
        state.events.push(TransportEvent::Open);
        Ok(MockTransport {
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

/// Transport handed out by [`MockDevice`].
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockTransport {
    fn lock(&self) -> OvaResult<MutexGuard<'_, MockState>> {
        if self.closed {
            return Err(OvaError::io(
                "mock transport",
                io::Error::new(io::ErrorKind::NotConnected, "transport closed"),
            ));
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, bytes: &[u8]) -> OvaResult<()> {
        let mut state = self.lock()?;
        let text = String::from_utf8_lossy(bytes).into_owned();
        let command = text.trim_end_matches('\n').to_string();
        state.events.push(TransportEvent::Write(command.clone()));

        if state.fail_writes {
            return Err(OvaError::io(
                "mock write",
                io::Error::from(io::ErrorKind::BrokenPipe),
            ));
        }

        let reply = (state.responder)(&command);
        if let Some(mut reply) = reply {
            if !reply.ends_with('\n') {
                reply.push('\n');
            }
            state.pending.extend(reply.into_bytes());
        }
        Ok(())
    }

    fn read(&mut self, max_bytes: usize) -> OvaResult<Vec<u8>> {
        let mut state = self.lock()?;
        let limit = state.max_chunk.map_or(max_bytes, |chunk| chunk.min(max_bytes));
        let n = limit.min(state.pending.len());
        let bytes: Vec<u8> = state.pending.drain(..n).collect();
        state.events.push(TransportEvent::Read(bytes.len()));
        Ok(bytes)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.events.push(TransportEvent::Close);
        }
    }
}

/// Speed of light in nm·THz, for converting the wavelength axis to frequency.
const C_NM_THZ: f64 = 299_792.458;

/// Stateful stand-in for an OVA answering the SCPI command set.
///
/// Settings are clamped to instrument limits and echoed with two decimals, so a setter
/// returns the applied value rather than the requested one. After `SCAN` the error-code
/// register reports `busy_code` for `busy_polls` polls before returning `0`.
#[derive(Debug, Clone)]
pub struct SimulatedOva {
    center_nm: f64,
    range_nm: f64,
    averaging: bool,
    averages: u32,
    dut_length_m: f64,
    sample_resolution_nm: f64,
    busy_polls: u32,
    busy_code: i32,
    busy_remaining: u32,
    points: usize,
}

impl Default for SimulatedOva {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedOva {
    /// Wavelength limits of the tunable laser, in nm.
    pub const WAVELENGTH_LIMITS: (f64, f64) = (1510.0, 1610.0);

    /// Create an idle instrument with no scan data.
    pub fn new() -> Self {
        Self {
            center_nm: 1550.0,
            range_nm: 2.0,
            averaging: false,
            averages: 1,
            dut_length_m: 1.25,
            sample_resolution_nm: 0.02,
            busy_polls: 0,
            busy_code: 5,
            busy_remaining: 0,
            points: 0,
        }
    }

    /// Report a nonzero error code for `polls` polls after each scan.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Set the sample resolution the instrument reports, in nm.
    pub fn with_sample_resolution(mut self, nm: f64) -> Self {
        self.sample_resolution_nm = nm;
        self
    }

    /// Answer one command line.
    pub fn handle(&mut self, command: &str) -> Option<String> {
        let (head, arg) = match command.split_once(' ') {
            Some((head, arg)) => (head, Some(arg.trim())),
            None => (command, None),
        };

        match (head.to_uppercase().as_str(), arg) {
            ("*IDN?", _) => Some("Luna Technologies,OVA 5000,SIM00001,5.3.1".to_string()),
            ("CONF:DUTL?", _) => Some(format!("{:.3}", self.dut_length_m)),
            ("CONF:SRES?", _) => Some(format!("{:.6}", self.sample_resolution_nm)),
            ("CONF:CWL", Some(value)) => {
                if let Ok(nm) = value.parse::<f64>() {
                    let (lo, hi) = Self::WAVELENGTH_LIMITS;
                    self.center_nm = nm.clamp(lo, hi);
                }
                None
            }
            ("CONF:CWL?", _) => Some(format!("{:.2}", self.center_nm)),
            ("CONF:RANG", Some(value)) => {
                if let Ok(nm) = value.parse::<f64>() {
                    self.range_nm = nm.clamp(0.1, 100.0);
                }
                None
            }
            ("CONF:RANG?", _) => Some(format!("{:.2}", self.range_nm)),
            ("CONF:AVGE", Some(value)) => {
                self.averaging = value != "0";
                None
            }
            ("CONF:AVGE?", _) => Some(if self.averaging { "1" } else { "0" }.to_string()),
            ("CONF:AVGS", Some(value)) => {
                if let Ok(count) = value.parse::<u32>() {
                    self.averages = count.clamp(1, 1000);
                }
                None
            }
            ("CONF:AVGS?", _) => Some(self.averages.to_string()),
            ("SCAN", _) => {
                self.points = (self.range_nm / self.sample_resolution_nm).round() as usize;
                self.busy_remaining = self.busy_polls;
                None
            }
            ("SYST:ERRD?", _) => Some(
                if self.busy_remaining > 0 {
                    "Scan in progress"
                } else {
                    "No error"
                }
                .to_string(),
            ),
            ("SYST:ERR?", _) => {
                if self.busy_remaining > 0 {
                    self.busy_remaining -= 1;
                    Some(self.busy_code.to_string())
                } else {
                    Some("0".to_string())
                }
            }
            ("FETC:FSIZ?", _) => Some(self.points.to_string()),
            ("FETC:XAXI?", Some(selector)) => Some(self.axis(selector)),
            ("FETC:MEAS?", Some(selector)) => Some(self.channel(selector)),
            _ => None,
        }
    }

    fn wavelengths(&self) -> Vec<f64> {
        let start = self.center_nm - self.range_nm / 2.0;
        (0..self.points)
            .map(|i| start + i as f64 * self.sample_resolution_nm)
            .collect()
    }

    fn axis(&self, selector: &str) -> String {
        let wavelengths = self.wavelengths();
        let values: Vec<f64> = match selector {
            "0" => wavelengths,
            "2" => wavelengths.iter().map(|nm| C_NM_THZ / nm).collect(),
            "3" => (0..self.points).map(|i| i as f64 * 0.05).collect(),
            _ => return String::new(),
        };
        encode_array(&values)
    }

    fn channel(&self, selector: &str) -> String {
        let n = self.points as f64;
        let values: Vec<f64> = (0..self.points)
            .map(|i| {
                let x = i as f64 / n.max(1.0);
                match selector {
                    "0" => -3.0 - 0.5 * x,
                    "1" => 12.0 + 2.0 * x,
                    "5" => 0.1 * (x - 0.5),
                    "9" => -40.0 + 10.0 * x,
                    "10" => 1550.0 + x,
                    _ => 0.0,
                }
            })
            .collect();
        match selector {
            "0" | "1" | "5" | "9" | "10" => encode_array(&values),
            _ => String::new(),
        }
    }
}
