//! Driver configuration using Figment
//!
//! Configuration is layered:
//! 1. Built-in defaults (`OvaConfig::default()`)
//! 2. A TOML file, typically `config/luna_ova.toml`
//! 3. Environment variables prefixed with `LUNA_OVA_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use luna_ova::config::OvaConfig;
//!
//! let config = OvaConfig::load_from("config/luna_ova.toml")?;
//! println!("Instrument: {}", config.endpoint);
//! # Ok::<(), luna_ova::error::OvaError>(())
//! ```
//!
//! Override a single value from the shell:
//! ```bash
//! LUNA_OVA_ENDPOINT__ADDRESS=10.0.0.5 luna_ova identify
//! ```

use crate::error::{OvaError, OvaResult};
use crate::logging::LogFormat;
use crate::query::{FlushInput, SettleDelay};
use crate::scan::PollLimit;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default instrument address used by the lab setup.
pub const DEFAULT_ADDRESS: &str = "130.194.137.137";

/// The OVA listens for SCPI on TCP port 1.
pub const DEFAULT_PORT: u16 = 1;

/// Default socket buffer size (512 KiB), large enough for a full-range axis fetch.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 19;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "LUNA_OVA_";

/// Top-level driver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OvaConfig {
    /// Which instrument to dial
    pub endpoint: Endpoint,
    /// Socket-level settings applied on every connect
    pub session: SessionConfig,
    /// Query engine timing
    pub protocol: ProtocolConfig,
    /// Scan settle and completion polling
    pub scan: ScanConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Network address of the instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    /// Hostname or IP address
    pub address: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from an address and port.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Socket configuration, fixed for the lifetime of a connection.
///
/// `recv_buffer_size` is both the kernel receive buffer (`SO_RCVBUF`) and the largest
/// chunk a single transport read returns. A response larger than this arrives over
/// several reads and is reassembled by the codec; it is only truncated if the device
/// pauses for longer than `timeout` in the middle of sending it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Read/write idle timeout. A read that sees no data for this long returns empty.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Upper bound on establishing the TCP connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Send buffer size in bytes
    pub send_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            recv_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Query engine timing and pre-query behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Pause between writing a command and reading its response
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// What to do with stale input before each query
    pub flush_input: FlushInput,
}

impl ProtocolConfig {
    /// The settle policy described by this configuration.
    pub fn settle(&self) -> SettleDelay {
        SettleDelay::fixed(self.settle_delay)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            flush_input: FlushInput::Disabled,
        }
    }
}

/// Scan timing and the completion poll bound.
///
/// Setting both `max_polls` and `poll_deadline` to `None` polls forever, which matches
/// the instrument vendor's reference behaviour but hangs on a wedged device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Sleep after `SCAN`, multiplied by the average count
    #[serde(with = "humantime_serde")]
    pub per_average: Duration,
    /// Sleep between unsuccessful error-code polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Maximum number of `SYST:ERR?` queries before giving up
    pub max_polls: Option<u32>,
    /// Maximum wall time spent polling before giving up
    #[serde(with = "humantime_serde")]
    pub poll_deadline: Option<Duration>,
}

impl ScanConfig {
    /// The poll bound described by this configuration.
    pub fn poll_limit(&self) -> PollLimit {
        PollLimit {
            max_polls: self.max_polls,
            deadline: self.poll_deadline,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            per_average: Duration::from_millis(200),
            poll_interval: Duration::from_millis(100),
            max_polls: Some(600),
            poll_deadline: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl OvaConfig {
    /// Load configuration from a TOML file layered over the defaults, then apply
    /// `LUNA_OVA_` environment overrides and validate.
    ///
    /// A missing file is not an error; the defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> OvaResult<Self> {
        let config: OvaConfig = Figment::from(Serialized::defaults(OvaConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot drive a session.
    pub fn validate(&self) -> OvaResult<()> {
        if self.endpoint.address.trim().is_empty() {
            return Err(OvaError::Config("endpoint.address must not be empty".into()));
        }
        if self.endpoint.port == 0 {
            return Err(OvaError::Config("endpoint.port must be non-zero".into()));
        }
        // std rejects a zero socket timeout outright
        if self.session.timeout.is_zero() {
            return Err(OvaError::Config("session.timeout must be non-zero".into()));
        }
        if self.session.connect_timeout.is_zero() {
            return Err(OvaError::Config(
                "session.connect_timeout must be non-zero".into(),
            ));
        }
        if self.session.recv_buffer_size == 0 || self.session.send_buffer_size == 0 {
            return Err(OvaError::Config(
                "session buffer sizes must be non-zero".into(),
            ));
        }
        if self.scan.max_polls == Some(0) {
            return Err(OvaError::Config(
                "scan.max_polls must be at least 1 (omit it to poll without a cap)".into(),
            ));
        }
        crate::logging::parse_log_level(&self.logging.level).map_err(OvaError::Config)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = OvaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint.to_string(), "130.194.137.137:1");
        assert_eq!(config.session.timeout, Duration::from_millis(100));
        assert_eq!(config.protocol.settle_delay, Duration::from_millis(500));
        assert_eq!(config.scan.poll_limit().max_polls, Some(600));
    }

    #[test]
    #[serial]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[endpoint]
address = "192.168.1.50"

[protocol]
settle_delay = "250ms"
flush_input = "drain"

[scan]
max_polls = 20
poll_deadline = "30s"
"#
        )
        .unwrap();

        let config = OvaConfig::load_from(file.path()).unwrap();
        assert_eq!(config.endpoint.address, "192.168.1.50");
        assert_eq!(config.endpoint.port, DEFAULT_PORT);
        assert_eq!(config.protocol.settle_delay, Duration::from_millis(250));
        assert_eq!(config.protocol.flush_input, FlushInput::Drain);
        assert_eq!(config.scan.max_polls, Some(20));
        assert_eq!(config.scan.poll_deadline, Some(Duration::from_secs(30)));
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_defaults() {
        let config = OvaConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.endpoint, Endpoint::default());
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        std::env::set_var("LUNA_OVA_ENDPOINT__PORT", "5025");
        let result = OvaConfig::load_from("does/not/exist.toml");
        std::env::remove_var("LUNA_OVA_ENDPOINT__PORT");

        assert_eq!(result.unwrap().endpoint.port, 5025);
    }

    #[test]
    fn validation_rejects_zero_timeout() {
        let mut config = OvaConfig::default();
        config.session.timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(OvaError::Config(_))));
    }

    #[test]
    fn validation_rejects_zero_poll_cap() {
        let mut config = OvaConfig::default();
        config.scan.max_polls = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_log_level() {
        let mut config = OvaConfig::default();
        config.logging.level = "verbose".into();
        assert!(config.validate().is_err());
    }
}
