//! Byte-stream transports to the instrument.
//!
//! A [`Connector`] dials an [`Endpoint`] and yields a [`Transport`]; the session owns the
//! transport exclusively until it disconnects. [`TcpConnector`] is the production
//! implementation, [`mock::MockDevice`] a scripted in-memory one for protocol tests.
//!
//! Reads are bounded by the idle timeout in [`SessionConfig::timeout`]. A read that
//! times out with nothing received returns an empty buffer rather than an error; the
//! line codec relies on that to detect that the device has gone quiet.

pub mod mock;

use crate::config::{Endpoint, SessionConfig};
use crate::error::{OvaError, OvaResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use tracing::{debug, trace, warn};

/// Raw duplex byte stream to one instrument.
pub trait Transport: Send {
    /// Write every byte or fail. A partial write is reported as [`OvaError::Io`].
    fn write_all(&mut self, bytes: &[u8]) -> OvaResult<()>;

    /// Read at most `max_bytes`.
    ///
    /// Returns an empty buffer when the idle timeout elapses without data.
    fn read(&mut self, max_bytes: usize) -> OvaResult<Vec<u8>>;

    /// Release the stream. Safe to call any number of times.
    fn close(&mut self);
}

/// Opens transports with the socket settings of a session.
pub trait Connector {
    /// Transport type produced by this connector
    type Transport: Transport;

    /// Dial `endpoint`, failing with [`OvaError::Connect`].
    fn open(&self, endpoint: &Endpoint, config: &SessionConfig) -> OvaResult<Self::Transport>;
}

/// Dials the instrument over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn open(&self, endpoint: &Endpoint, config: &SessionConfig) -> OvaResult<TcpTransport> {
        TcpTransport::open(endpoint, config)
    }
}

/// Blocking TCP stream with socket buffers and timeouts applied before connecting.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpTransport {
    /// Resolve, tune and connect a socket to `endpoint`.
    pub fn open(endpoint: &Endpoint, config: &SessionConfig) -> OvaResult<Self> {
        let connect_err = |reason: String| OvaError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };

        let addr = resolve(endpoint).map_err(|e| connect_err(format!("resolve: {e}")))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| connect_err(format!("socket: {e}")))?;
        // Buffer sizes must be set before connect for the window to take effect
        socket
            .set_recv_buffer_size(config.recv_buffer_size)
            .map_err(|e| connect_err(format!("SO_RCVBUF: {e}")))?;
        socket
            .set_send_buffer_size(config.send_buffer_size)
            .map_err(|e| connect_err(format!("SO_SNDBUF: {e}")))?;
        socket
            .connect_timeout(&addr.into(), config.connect_timeout)
            .map_err(|e| connect_err(e.to_string()))?;
        socket
            .set_read_timeout(Some(config.timeout))
            .map_err(|e| connect_err(format!("read timeout: {e}")))?;
        socket
            .set_write_timeout(Some(config.timeout))
            .map_err(|e| connect_err(format!("write timeout: {e}")))?;
        let stream: TcpStream = socket.into();
        stream
            .set_nodelay(true)
            .map_err(|e| connect_err(format!("TCP_NODELAY: {e}")))?;

        debug!(
            peer = %addr,
            recv_buffer = config.recv_buffer_size,
            send_buffer = config.send_buffer_size,
            timeout = ?config.timeout,
            "TCP transport open"
        );

        Ok(Self {
            stream: Some(stream),
            peer: endpoint.to_string(),
        })
    }

    fn stream(&mut self) -> OvaResult<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            OvaError::io(
                "transport access",
                io::Error::new(io::ErrorKind::NotConnected, "transport closed"),
            )
        })
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, bytes: &[u8]) -> OvaResult<()> {
        let peer = self.peer.clone();
        let stream = self.stream()?;
        stream
            .write_all(bytes)
            .and_then(|()| stream.flush())
            .map_err(|e| OvaError::io(format!("write to {peer}"), e))?;
        trace!(bytes = bytes.len(), "wrote");
        Ok(())
    }

    fn read(&mut self, max_bytes: usize) -> OvaResult<Vec<u8>> {
        let peer = self.peer.clone();
        let stream = self.stream()?;
        let mut buf = vec![0u8; max_bytes];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    warn!(%peer, "connection closed by instrument");
                    return Ok(Vec::new());
                }
                Ok(n) => {
                    trace!(bytes = n, "read");
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Unix reports WouldBlock on SO_RCVTIMEO expiry, Windows TimedOut
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(Vec::new());
                }
                Err(e) => return Err(OvaError::io(format!("read from {peer}"), e)),
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The peer may already be gone; closing must not fail
            let _ = stream.shutdown(Shutdown::Both);
            debug!(peer = %self.peer, "TCP transport closed");
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve(endpoint: &Endpoint) -> io::Result<SocketAddr> {
    (endpoint.address.as_str(), endpoint.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    fn local_config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            recv_buffer_size: 4096,
            send_buffer_size: 4096,
        }
    }

    #[test]
    fn read_times_out_to_empty() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port);

        let mut transport = TcpTransport::open(&endpoint, &local_config()).unwrap();
        let (_peer, _) = listener.accept().unwrap();

        let bytes = transport.read(1024).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn write_reaches_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port);

        let mut transport = TcpTransport::open(&endpoint, &local_config()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        transport.write_all(b"*IDN?\n").unwrap();
        let mut buf = [0u8; 6];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"*IDN?\n");
    }

    #[test]
    fn close_is_idempotent_and_blocks_io() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::new("127.0.0.1", port);

        let mut transport = TcpTransport::open(&endpoint, &local_config()).unwrap();
        transport.close();
        transport.close();
        assert!(matches!(
            transport.write_all(b"SCAN\n"),
            Err(OvaError::Io { .. })
        ));
    }

    #[test]
    fn refused_connection_is_connect_failure() {
        // Bind then drop to find a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Endpoint::new("127.0.0.1", port);

        let err = TcpTransport::open(&endpoint, &local_config()).unwrap_err();
        assert!(matches!(err, OvaError::Connect { .. }));
    }
}
