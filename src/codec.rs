//! Newline-terminated ASCII framing.
//!
//! Outgoing commands get exactly one `\n`. Incoming bytes are accumulated over as many
//! transport reads as it takes to see a `\n`, or until a read comes back empty because
//! the idle timeout expired. The OVA stays silent on some queries, so an empty response
//! is a normal outcome and decodes to `""`.

use crate::error::{OvaError, OvaResult};
use crate::transport::Transport;
use tracing::{trace, warn};

/// Line terminator for commands and responses.
pub const TERMINATOR: u8 = b'\n';

/// Frames commands and reassembles responses.
#[derive(Debug, Clone, Copy)]
pub struct LineCodec {
    max_read: usize,
}

impl LineCodec {
    /// Create a codec that requests up to `max_read` bytes per transport read.
    pub fn new(max_read: usize) -> Self {
        Self {
            max_read: max_read.max(1),
        }
    }

    /// Bytes requested per transport read.
    pub fn max_read(&self) -> usize {
        self.max_read
    }

    /// Frame `command` for the wire, appending the terminator if it is missing.
    ///
    /// Rejects non-ASCII text and embedded line breaks, which would split one command
    /// into several on the instrument side.
    pub fn encode(command: &str) -> OvaResult<Vec<u8>> {
        let body = command.strip_suffix('\n').unwrap_or(command);
        if !body.is_ascii() || body.contains(['\n', '\r']) {
            return Err(OvaError::InvalidCommand(command.escape_default().to_string()));
        }
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.extend_from_slice(body.as_bytes());
        bytes.push(TERMINATOR);
        Ok(bytes)
    }

    /// Encode and write one command.
    pub fn write_command<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        command: &str,
    ) -> OvaResult<()> {
        let bytes = Self::encode(command)?;
        transport.write_all(&bytes)
    }

    /// Read until a terminator arrives or the device goes quiet, then decode.
    pub fn read_response<T: Transport + ?Sized>(&self, transport: &mut T) -> OvaResult<String> {
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = transport.read(self.max_read)?;
            if chunk.is_empty() {
                if !buffer.is_empty() {
                    warn!(
                        bytes = buffer.len(),
                        "response ended without terminator, it may be truncated"
                    );
                }
                break;
            }
            trace!(bytes = chunk.len(), total = buffer.len() + chunk.len(), "chunk");
            let terminated = chunk.contains(&TERMINATOR);
            buffer.extend_from_slice(&chunk);
            if terminated {
                break;
            }
        }
        Self::decode(&buffer)
    }

    /// Decode accumulated response bytes.
    ///
    /// Surrounding whitespace and trailing NUL padding are removed.
    pub fn decode(bytes: &[u8]) -> OvaResult<String> {
        if !bytes.is_ascii() {
            return Err(OvaError::parse(
                "ASCII response",
                String::from_utf8_lossy(bytes).into_owned(),
            ));
        }
        // ASCII is valid UTF-8
        let text = String::from_utf8_lossy(bytes);
        Ok(text
            .trim()
            .trim_end_matches('\0')
            .trim_end()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockDevice, TransportEvent};
    use crate::transport::Connector;
    use crate::config::{Endpoint, SessionConfig};

    fn open(device: &MockDevice) -> impl Transport {
        device
            .open(&Endpoint::default(), &SessionConfig::default())
            .ok()
            .unwrap()
    }

    #[test]
    fn encode_appends_single_terminator() {
        assert_eq!(LineCodec::encode("*IDN?").unwrap(), b"*IDN?\n");
        assert_eq!(LineCodec::encode("SCAN\n").unwrap(), b"SCAN\n");
    }

    #[test]
    fn encode_rejects_multiple_lines() {
        assert!(matches!(
            LineCodec::encode("SCAN\nSYST:ERR?"),
            Err(OvaError::InvalidCommand(_))
        ));
        assert!(LineCodec::encode("CONF:CWL 1550\r\n").is_err());
        assert!(LineCodec::encode("CONF:CWL 1550µ").is_err());
    }

    #[test]
    fn decode_strips_whitespace_and_nul_padding() {
        assert_eq!(LineCodec::decode(b"  1550.00\r\n").unwrap(), "1550.00");
        assert_eq!(LineCodec::decode(b"0\n\0\0\0").unwrap(), "0");
        assert_eq!(LineCodec::decode(b"").unwrap(), "");
    }

    #[test]
    fn decode_rejects_non_ascii() {
        assert!(matches!(
            LineCodec::decode(&[0x31, 0xff, 0x0a]),
            Err(OvaError::Parse { .. })
        ));
    }

    #[test]
    fn reassembles_response_split_across_reads() {
        let device = MockDevice::new(|_| Some("1550.1\r1550.2\r1550.3\r".into())).with_max_chunk(5);
        let mut transport = open(&device);
        let codec = LineCodec::new(1024);

        codec.write_command(&mut transport, "FETC:XAXI? 0").unwrap();
        let response = codec.read_response(&mut transport).unwrap();
        assert_eq!(response, "1550.1\r1550.2\r1550.3");

        // Stops on the chunk holding the terminator, without an extra idle read
        let reads = device
            .events()
            .iter()
            .filter(|event| matches!(event, TransportEvent::Read(_)))
            .count();
        assert_eq!(reads, 5);
    }

    #[test]
    fn idle_device_decodes_to_empty_after_one_read() {
        let device = MockDevice::silent();
        let mut transport = open(&device);
        let codec = LineCodec::new(1024);

        assert_eq!(codec.read_response(&mut transport).unwrap(), "");
        assert_eq!(
            device.events(),
            vec![TransportEvent::Open, TransportEvent::Read(0)]
        );
    }

    #[test]
    fn unterminated_response_is_returned_on_idle() {
        let device = MockDevice::silent();
        device.push_raw(b"partial");
        let mut transport = open(&device);
        let codec = LineCodec::new(4);

        assert_eq!(codec.read_response(&mut transport).unwrap(), "partial");
    }
}
