//! Error types for the OVA driver.
//!
//! Every fallible operation in the crate returns [`OvaError`]. The variants follow the
//! failure taxonomy of the session protocol:
//!
//! - **`Connect`**: the socket could not be opened or configured, or the device did not
//!   identify itself. The caller may retry with a fresh connect.
//! - **`NotConnected`**: a protocol operation was attempted while the session is
//!   disconnected. Nothing was written to the wire.
//! - **`Io`**: a read or write failed mid-session. The session tears its transport down
//!   and must be reconnected explicitly.
//! - **`Parse`**: a response did not have the expected shape. The raw response text is
//!   always carried for diagnosis.
//! - **`UnboundedPoll`**: the scan-completion poll exceeded its retry cap or deadline.
//! - **`InvalidCommand`**: command text that cannot be framed on the line protocol.
//! - **`Config`**: configuration could not be loaded or failed validation.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type OvaResult<T> = std::result::Result<T, OvaError>;

/// Driver error.
#[derive(Error, Debug)]
pub enum OvaError {
    #[error("Failed to connect to OVA at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Not connected to OVA. Call connect() first")]
    NotConnected,

    #[error("I/O error during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {expected} from response: '{response}'")]
    Parse { expected: String, response: String },

    #[error("Scan did not settle after {attempts} error-code polls ({elapsed:?} elapsed)")]
    UnboundedPoll { attempts: u32, elapsed: Duration },

    #[error("Invalid command '{0}': commands must be single-line ASCII")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OvaError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        OvaError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn parse(expected: impl Into<String>, response: impl Into<String>) -> Self {
        OvaError::Parse {
            expected: expected.into(),
            response: response.into(),
        }
    }

    /// Whether retrying the failed operation as-is may succeed.
    ///
    /// `Io` is not: the session has been torn down and needs an explicit reconnect.
    pub fn is_recoverable(&self) -> bool {
        match self {
            OvaError::Connect { .. } | OvaError::Parse { .. } | OvaError::UnboundedPoll { .. } => {
                true
            }
            OvaError::NotConnected
            | OvaError::Io { .. }
            | OvaError::InvalidCommand(_)
            | OvaError::Config(_) => false,
        }
    }
}

impl From<figment::Error> for OvaError {
    fn from(value: figment::Error) -> Self {
        OvaError::Config(value.to_string())
    }
}
