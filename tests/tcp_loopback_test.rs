//! End-to-end tests over a real TCP socket.
//!
//! Each test runs a scripted instrument on a loopback listener in a background thread.
//! The thread serves one connection, answering line by line, and returns the commands it
//! received once the session hangs up.

use luna_ova::config::{Endpoint, OvaConfig};
use luna_ova::transport::mock::SimulatedOva;
use luna_ova::{OvaError, Session};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct ScriptedDevice {
    addr: SocketAddr,
    handle: JoinHandle<Vec<String>>,
}

impl ScriptedDevice {
    fn spawn<F>(mut respond: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut received = Vec::new();
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let command = line.trim_end().to_string();
                if let Some(reply) = respond(&command) {
                    if writer.write_all(format!("{reply}\n").as_bytes()).is_err() {
                        break;
                    }
                }
                received.push(command);
            }
            received
        });
        Self { addr, handle }
    }

    fn simulated(ova: SimulatedOva) -> Self {
        let mut ova = ova;
        Self::spawn(move |command| ova.handle(command))
    }

    fn config(&self) -> OvaConfig {
        let mut config = OvaConfig::default();
        config.endpoint = Endpoint::new(self.addr.ip().to_string(), self.addr.port());
        config.session.timeout = Duration::from_millis(100);
        config.session.connect_timeout = Duration::from_secs(2);
        config.protocol.settle_delay = Duration::ZERO;
        config.scan.per_average = Duration::ZERO;
        config.scan.poll_interval = Duration::from_millis(1);
        config.scan.max_polls = Some(50);
        config
    }

    fn received(self) -> Vec<String> {
        self.handle.join().unwrap()
    }
}

#[test]
fn identify_and_configure_over_tcp() {
    let device = ScriptedDevice::simulated(SimulatedOva::new());
    let mut session = Session::new(&device.config());

    let idn = session.connect().unwrap();
    assert!(idn.contains("OVA 5000"));
    assert_eq!(session.set_center_wavelength(1550.0).unwrap(), 1550.0);
    assert_eq!(session.set_wavelength_range(2.5).unwrap(), 2.5);
    session.disconnect();

    assert_eq!(
        device.received(),
        vec![
            "*IDN?",
            "CONF:CWL 1550.0",
            "CONF:CWL?",
            "CONF:RANG 2.5",
            "CONF:RANG?"
        ]
    );
}

#[test]
fn full_measurement_over_tcp() {
    let device = ScriptedDevice::simulated(SimulatedOva::new().with_busy_polls(2));
    let mut session = Session::new(&device.config());
    session.connect().unwrap();

    let result = session.measure_full(1550.0, 4.0, 1).unwrap();
    assert_eq!(result.wavelength.len(), 200);
    assert_eq!(result.group_delay.len(), 200);
    assert!((result.resolutions.wavelength_nm - 0.02).abs() < 1e-9);
    session.disconnect();

    let received = device.received();
    assert_eq!(received.iter().filter(|c| *c == "SYST:ERR?").count(), 3);
}

#[test]
fn large_array_is_reassembled_from_small_reads() {
    let device = ScriptedDevice::simulated(SimulatedOva::new().with_sample_resolution(0.001));
    let mut config = device.config();
    // Reads return at most 256 bytes, far less than one array response
    config.session.recv_buffer_size = 256;
    let mut session = Session::new(&config);
    session.connect().unwrap();

    session.set_wavelength_range(10.0).unwrap();
    session.scan(1).unwrap();
    let axis = session.wavelength_axis().unwrap();
    assert_eq!(axis.len(), 10_000);
    assert_eq!(session.number_of_points().unwrap(), 10_000);
    session.disconnect();
    device.received();
}

#[test]
fn silent_instrument_yields_empty_response() {
    let device = ScriptedDevice::spawn(|command| (command == "*IDN?").then(|| "OVA".to_string()));
    let mut session = Session::new(&device.config());
    session.connect().unwrap();

    assert_eq!(session.query("CONF:UNKNOWN?").unwrap(), "");
    assert!(matches!(session.dut_length(), Err(OvaError::Parse { .. })));
    assert!(session.is_connected());
    session.disconnect();
    device.received();
}

#[test]
fn refused_connection_is_a_connect_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = OvaConfig::default();
    config.endpoint = Endpoint::new(addr.ip().to_string(), addr.port());
    config.session.connect_timeout = Duration::from_secs(1);
    let mut session = Session::new(&config);

    assert!(matches!(session.connect(), Err(OvaError::Connect { .. })));
    assert!(!session.is_connected());
}

#[test]
fn dropping_session_hangs_up() {
    let device = ScriptedDevice::simulated(SimulatedOva::new());
    {
        let mut session = Session::new(&device.config());
        session.connect().unwrap();
        session.dut_length().unwrap();
    }
    // The device thread only finishes once the socket is closed
    assert_eq!(device.received(), vec!["*IDN?", "CONF:DUTL?"]);
}
