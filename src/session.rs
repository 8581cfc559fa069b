//! Instrument session: connection lifecycle plus the typed command surface.
//!
//! A [`Session`] binds one [`Endpoint`] to at most one open transport. Every operation
//! other than [`connect`](Session::connect) requires a live connection and fails with
//! [`OvaError::NotConnected`] otherwise, without touching the wire. An
//! [`OvaError::Io`] failure closes the transport, so the session must be reconnected
//! before it is used again.
//!
//! The session caches nothing. Every getter goes back to the instrument.
//!
//! # Example
//! ```no_run
//! use luna_ova::config::OvaConfig;
//! use luna_ova::session::Session;
//!
//! let mut session = Session::new(&OvaConfig::default());
//! let il = session.with_connection(|ova| {
//!     ova.measure_insertion_loss_only(1550.0, 10.0, 4)
//! })?;
//! println!("{} points", il.len());
//! # Ok::<(), luna_ova::error::OvaError>(())
//! ```

use crate::array::decode_array;
use crate::codec::LineCodec;
use crate::commands;
use crate::config::{Endpoint, OvaConfig, ProtocolConfig, SessionConfig};
use crate::error::{OvaError, OvaResult};
use crate::measurement::{
    parse_count, AveragingStatus, Axis, Channel, FullMeasurement, Measurement, Resolutions,
};
use crate::query::QueryEngine;
use crate::scan::{ScanReport, ScanStateMachine, ScanTiming};
use crate::transport::{Connector, TcpConnector};
use tracing::{debug, info, warn};

/// Whether a session holds an open transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport
    Disconnected,
    /// Transport open and identified
    Connected,
}

/// Connection to one OVA.
pub struct Session<C: Connector = TcpConnector> {
    endpoint: Endpoint,
    session: SessionConfig,
    protocol: ProtocolConfig,
    scan: ScanTiming,
    connector: C,
    engine: Option<QueryEngine<C::Transport>>,
}

impl Session<TcpConnector> {
    /// Session over TCP using `config`. Does not connect.
    pub fn new(config: &OvaConfig) -> Self {
        Self::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> Session<C> {
    /// Session that opens its transport through `connector`. Does not connect.
    pub fn with_connector(config: &OvaConfig, connector: C) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            session: config.session.clone(),
            protocol: config.protocol.clone(),
            scan: ScanTiming::from(&config.scan),
            connector,
            engine: None,
        }
    }

    /// Instrument this session talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        if self.engine.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Whether a transport is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the transport and identify the instrument.
    ///
    /// Any existing connection is closed first. Returns the `*IDN?` response. If the
    /// identification query fails, the new transport is closed and the failure is
    /// reported as [`OvaError::Connect`].
    pub fn connect(&mut self) -> OvaResult<String> {
        self.disconnect();
        info!(endpoint = %self.endpoint, "connecting");

        let transport = self.connector.open(&self.endpoint, &self.session)?;
        let mut engine = QueryEngine::new(
            transport,
            LineCodec::new(self.session.recv_buffer_size),
            self.protocol.settle(),
            self.protocol.flush_input,
        );

        match engine.query(commands::IDN) {
            Ok(idn) => {
                info!(endpoint = %self.endpoint, idn = %idn, "connected");
                self.engine = Some(engine);
                Ok(idn)
            }
            Err(err) => {
                engine.close();
                Err(OvaError::Connect {
                    endpoint: self.endpoint.to_string(),
                    reason: format!("identification failed: {err}"),
                })
            }
        }
    }

    /// Close the transport. Does nothing when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.close();
            info!(endpoint = %self.endpoint, "disconnected");
        }
    }

    /// Connect, run `op`, then disconnect whether or not `op` succeeded.
    pub fn with_connection<R, F>(&mut self, op: F) -> OvaResult<R>
    where
        F: FnOnce(&mut Self) -> OvaResult<R>,
    {
        self.connect()?;
        let result = op(self);
        self.disconnect();
        result
    }

    fn with_engine<R, F>(&mut self, op: F) -> OvaResult<R>
    where
        F: FnOnce(&mut QueryEngine<C::Transport>) -> OvaResult<R>,
    {
        let engine = self.engine.as_mut().ok_or(OvaError::NotConnected)?;
        let result = op(engine);
        if let Err(err @ OvaError::Io { .. }) = &result {
            warn!(endpoint = %self.endpoint, error = %err, "I/O failure, closing session");
            self.disconnect();
        }
        result
    }

    /// Send `command` and return the decoded response.
    pub fn query(&mut self, command: &str) -> OvaResult<String> {
        self.with_engine(|engine| engine.query(command))
    }

    /// Send `command` without reading a response.
    pub fn send(&mut self, command: &str) -> OvaResult<()> {
        self.with_engine(|engine| engine.send(command))
    }

    /// Write a set command, wait for it to apply, then read back `readback`.
    fn set_and_read(&mut self, command: &str, readback: &str) -> OvaResult<String> {
        self.with_engine(|engine| {
            engine.send(command)?;
            engine.settle().wait();
            engine.query(readback)
        })
    }

    /// `*IDN?`
    pub fn identify(&mut self) -> OvaResult<String> {
        self.query(commands::IDN)
    }

    /// DUT length in metres.
    pub fn dut_length(&mut self) -> OvaResult<f64> {
        let response = self.query(commands::DUT_LENGTH)?;
        parse_float(&response, "DUT length")
    }

    /// Sample resolution in nm. Read-only on the instrument.
    pub fn sample_resolution(&mut self) -> OvaResult<f64> {
        let response = self.query(commands::SAMPLE_RESOLUTION)?;
        parse_float(&response, "sample resolution")
    }

    /// Number of points in the last scan.
    pub fn number_of_points(&mut self) -> OvaResult<usize> {
        let response = self.query(commands::FETCH_SIZE)?;
        parse_count(&response)
            .map(|points| points as usize)
            .ok_or_else(|| OvaError::parse("point count", response))
    }

    /// Centre wavelength in nm.
    pub fn center_wavelength(&mut self) -> OvaResult<f64> {
        let response = self.query(commands::CENTER_WAVELENGTH)?;
        parse_float(&response, "centre wavelength")
    }

    /// Wavelength range in nm.
    pub fn wavelength_range(&mut self) -> OvaResult<f64> {
        let response = self.query(commands::WAVELENGTH_RANGE)?;
        parse_float(&response, "wavelength range")
    }

    /// Averaging flag and count. Either read-back failing to parse is an error.
    pub fn averaging(&mut self) -> OvaResult<AveragingStatus> {
        let enabled = self.query(commands::AVERAGING_ENABLED)?;
        let count = self.query(commands::AVERAGING_COUNT)?;
        let status = AveragingStatus::from_echoes(enabled, count);
        if status.enabled.is_none() {
            return Err(OvaError::parse("averaging flag", status.enabled_echo));
        }
        if status.count.is_none() {
            return Err(OvaError::parse("averaging count", status.count_echo));
        }
        Ok(status)
    }

    /// Set the centre wavelength and return the value the instrument applied.
    pub fn set_center_wavelength(&mut self, nm: f64) -> OvaResult<f64> {
        let echo = self.set_and_read(
            &commands::set_center_wavelength(nm),
            commands::CENTER_WAVELENGTH,
        )?;
        parse_float(&echo, "centre wavelength")
    }

    /// Set the wavelength range and return the value the instrument applied.
    pub fn set_wavelength_range(&mut self, nm: f64) -> OvaResult<f64> {
        let echo = self.set_and_read(
            &commands::set_wavelength_range(nm),
            commands::WAVELENGTH_RANGE,
        )?;
        parse_float(&echo, "wavelength range")
    }

    /// Enable averaging over `count` scans and return the echoed settings.
    ///
    /// An empty or non-numeric echo is not an error; it is kept as raw text in the
    /// returned status.
    pub fn set_averaging(&mut self, count: u32) -> OvaResult<AveragingStatus> {
        let enabled = self.set_and_read(
            &commands::set_averaging_enabled(true),
            commands::AVERAGING_ENABLED,
        )?;
        let echoed = self.set_and_read(
            &commands::set_averaging_count(count),
            commands::AVERAGING_COUNT,
        )?;
        let status = AveragingStatus::from_echoes(enabled, echoed);
        if status.enabled.is_none() || status.count.is_none() {
            warn!(
                enabled = %status.enabled_echo.escape_debug(),
                count = %status.count_echo.escape_debug(),
                "averaging read-back not numeric"
            );
        }
        Ok(status)
    }

    /// Trigger a scan of `averages` averages and wait for the instrument to settle.
    pub fn scan(&mut self, averages: u32) -> OvaResult<ScanReport> {
        let timing = self.scan;
        self.with_engine(|engine| ScanStateMachine::new(timing).run(engine, averages))
    }

    /// Fetch one x axis of the last scan.
    pub fn fetch_axis(&mut self, axis: Axis) -> OvaResult<Measurement> {
        let response = self.query(&commands::fetch_axis(axis.selector()))?;
        let values = decode_array(&response)?;
        debug!(quantity = %axis.quantity(), points = values.len(), "fetched axis");
        Ok(Measurement::new(axis.quantity(), values))
    }

    /// Fetch one measurement channel of the last scan.
    pub fn fetch_channel(&mut self, channel: Channel) -> OvaResult<Measurement> {
        let response = self.query(&commands::fetch_measurement(channel.selector()))?;
        let values = decode_array(&response)?;
        debug!(quantity = %channel.quantity(), points = values.len(), "fetched channel");
        Ok(Measurement::new(channel.quantity(), values))
    }

    /// Wavelength axis (nm).
    pub fn wavelength_axis(&mut self) -> OvaResult<Measurement> {
        self.fetch_axis(Axis::Wavelength)
    }

    /// Frequency axis (THz).
    pub fn frequency_axis(&mut self) -> OvaResult<Measurement> {
        self.fetch_axis(Axis::Frequency)
    }

    /// Time axis (ns).
    pub fn time_axis(&mut self) -> OvaResult<Measurement> {
        self.fetch_axis(Axis::Time)
    }

    /// Insertion loss (dB).
    pub fn insertion_loss(&mut self) -> OvaResult<Measurement> {
        self.fetch_channel(Channel::InsertionLoss)
    }

    /// Group delay (ps).
    pub fn group_delay(&mut self) -> OvaResult<Measurement> {
        self.fetch_channel(Channel::GroupDelay)
    }

    /// Linear phase deviation (rad).
    pub fn linear_phase_deviation(&mut self) -> OvaResult<Measurement> {
        self.fetch_channel(Channel::LinearPhaseDeviation)
    }

    /// Time-domain amplitude (dB).
    pub fn time_domain_amplitude(&mut self) -> OvaResult<Measurement> {
        self.fetch_channel(Channel::TimeDomainAmplitude)
    }

    /// Time-domain wavelength (nm).
    pub fn time_domain_wavelength(&mut self) -> OvaResult<Measurement> {
        self.fetch_channel(Channel::TimeDomainWavelength)
    }

    /// Wavelength point spacing (nm).
    pub fn wavelength_resolution(&mut self) -> OvaResult<f64> {
        Ok(self.wavelength_axis()?.resolution())
    }

    /// Frequency point spacing (THz).
    pub fn frequency_resolution(&mut self) -> OvaResult<f64> {
        Ok(self.frequency_axis()?.resolution())
    }

    /// Time point spacing (ns).
    pub fn time_resolution(&mut self) -> OvaResult<f64> {
        Ok(self.time_axis()?.resolution())
    }

    /// Configure, scan and fetch every axis and channel.
    ///
    /// The first failure aborts the sequence; nothing partial is returned.
    pub fn measure_full(
        &mut self,
        center_wavelength_nm: f64,
        wavelength_range_nm: f64,
        averages: u32,
    ) -> OvaResult<FullMeasurement> {
        let dut_length_m = self.dut_length()?;
        info!(dut_length_m, "DUT length");
        let sample_resolution_nm = self.sample_resolution()?;
        info!(sample_resolution_nm, "sample resolution");

        let center_wavelength_nm = self.set_center_wavelength(center_wavelength_nm)?;
        info!(center_wavelength_nm, "centre wavelength set");
        let wavelength_range_nm = self.set_wavelength_range(wavelength_range_nm)?;
        info!(wavelength_range_nm, "wavelength range set");
        let averaging = self.set_averaging(averages)?;
        info!(averaging = %averaging, "averaging configured");

        info!(averages, "scanning");
        let report = self.scan(averages)?;
        info!(polls = report.polls, elapsed = ?report.elapsed, "scan complete");

        let wavelength = self.wavelength_axis()?;
        let frequency = self.frequency_axis()?;
        let time = self.time_axis()?;
        info!(points = wavelength.len(), "axes fetched");

        let insertion_loss = self.insertion_loss()?;
        let group_delay = self.group_delay()?;
        let time_domain_amplitude = self.time_domain_amplitude()?;
        let time_domain_wavelength = self.time_domain_wavelength()?;
        let linear_phase_deviation = self.linear_phase_deviation()?;

        let resolutions = Resolutions {
            wavelength_nm: wavelength.resolution(),
            frequency_thz: frequency.resolution(),
            time_ns: time.resolution(),
        };
        info!(
            wavelength_nm = resolutions.wavelength_nm,
            frequency_thz = resolutions.frequency_thz,
            time_ns = resolutions.time_ns,
            "resolutions"
        );

        Ok(FullMeasurement {
            dut_length_m,
            sample_resolution_nm,
            center_wavelength_nm,
            wavelength_range_nm,
            averaging,
            wavelength,
            frequency,
            time,
            insertion_loss,
            group_delay,
            time_domain_amplitude,
            time_domain_wavelength,
            linear_phase_deviation,
            resolutions,
        })
    }

    /// Configure, scan and fetch insertion loss only.
    pub fn measure_insertion_loss_only(
        &mut self,
        center_wavelength_nm: f64,
        wavelength_range_nm: f64,
        averages: u32,
    ) -> OvaResult<Measurement> {
        let dut_length_m = self.dut_length()?;
        debug!(dut_length_m, "DUT length");
        self.set_center_wavelength(center_wavelength_nm)?;
        self.set_wavelength_range(wavelength_range_nm)?;
        self.set_averaging(averages)?;
        self.scan(averages)?;
        self.insertion_loss()
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn parse_float(response: &str, what: &str) -> OvaResult<f64> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| OvaError::parse(what, response))
}
