//! Outbound transport to peer nodes.
//!
//! [`send_command`] opens a short-timeout TCP connection, flushes one
//! [`CommandBuffer`], and optionally waits (bounded) for one reply as proof
//! that the peer is alive. It runs on the command-processing thread, so every
//! socket call carries one of the fixed timeouts from [`crate::constants`].
//!
//! # Outcomes
//!
//! ```text
//! connect ──fail──► Unreachable
//!    │
//! write ────fail──► Unreachable
//!    │
//! wait? ──no──────► Ok(stream)            fire-and-forget
//!    │
//! one reply in 100ms? ──no──► Unresponsive
//!    │
//!    └──────────────► Ok(stream)          peer is alive
//! ```
//!
//! The buffer is moved in and dropped before return on every branch; the
//! reply reader and read scratch are locals and go with it. A failed call
//! never hands back a stream.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Instant;

use crate::constants::{CONNECT_TIMEOUT, LIVENESS_TIMEOUT, WRITE_TIMEOUT};
use crate::protocol::{CommandBuffer, ReplyReader};

/// Host and port of a peer node, as given by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteAddr {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl RemoteAddr {
    /// Create an address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to the first socket address.
    ///
    /// IP literals resolve without a lookup; hostnames go through the system
    /// resolver, which is not covered by the connect timeout.
    fn resolve(&self) -> std::io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "no address for host"))
    }
}

impl std::fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Broad class of a transport failure, as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// No connection could be made or the buffer could not be flushed.
    Unreachable,
    /// Connected, but no reply arrived in time or the socket failed.
    Unresponsive,
}

/// Why a [`send_command`] call failed.
#[derive(Debug)]
pub enum TransportError {
    /// Address resolution or TCP connect failed.
    Connect(std::io::Error),
    /// The buffer could not be fully written.
    Write(std::io::Error),
    /// No complete reply within the liveness bound.
    LivenessTimeout,
    /// The socket reported an error or hangup while waiting for the reply.
    LivenessError(String),
}

impl TransportError {
    /// Collapse into the caller-facing class.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Connect(_) | Self::Write(_) => FailureClass::Unreachable,
            Self::LivenessTimeout | Self::LivenessError(_) => FailureClass::Unresponsive,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "Connect failed: {e}"),
            Self::Write(e) => write!(f, "Write failed: {e}"),
            Self::LivenessTimeout => write!(f, "Peer did not reply within {LIVENESS_TIMEOUT:?}"),
            Self::LivenessError(msg) => write!(f, "Peer failed while waiting for reply: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) | Self::Write(e) => Some(e),
            Self::LivenessTimeout | Self::LivenessError(_) => None,
        }
    }
}

/// Deliver `buffer` to `addr`, optionally waiting for one reply.
///
/// With `wait_for_liveness = false` the call returns as soon as the buffer
/// is written; nothing is read. With `true`, exactly one reply must arrive
/// within [`LIVENESS_TIMEOUT`]; its content is discarded.
///
/// On success the open stream is returned so the caller can close it or
/// promote it to a long-lived subscriber.
pub fn send_command(
    addr: &RemoteAddr,
    buffer: CommandBuffer,
    wait_for_liveness: bool,
) -> Result<TcpStream, TransportError> {
    let stream = connect(addr)?;

    stream
        .set_write_timeout(Some(WRITE_TIMEOUT))
        .map_err(TransportError::Write)?;
    // write_all retries partial writes until the buffer is flushed.
    (&stream)
        .write_all(buffer.as_bytes())
        .map_err(TransportError::Write)?;
    log::trace!("[Transport] Wrote {} bytes to {addr}", buffer.len());
    drop(buffer);

    if wait_for_liveness {
        await_one_reply(&stream)?;
        log::debug!("[Transport] Peer {addr} is alive");
    }

    Ok(stream)
}

fn connect(addr: &RemoteAddr) -> Result<TcpStream, TransportError> {
    let socket_addr = addr.resolve().map_err(TransportError::Connect)?;
    let stream =
        TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT).map_err(TransportError::Connect)?;
    // Small command frames; don't let Nagle hold them back.
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Read until one complete reply has arrived or the liveness bound expires.
fn await_one_reply(stream: &TcpStream) -> Result<(), TransportError> {
    let deadline = Instant::now() + LIVENESS_TIMEOUT;
    let mut reader = ReplyReader::new();
    let mut chunk = [0u8; 512];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::LivenessTimeout);
        }
        stream
            .set_read_timeout(Some(remaining))
            .map_err(|e| TransportError::LivenessError(e.to_string()))?;

        match (&*stream).read(&mut chunk) {
            Ok(0) => {
                return Err(TransportError::LivenessError(
                    "connection closed by peer".to_string(),
                ))
            }
            Ok(n) => {
                reader.feed(&chunk[..n]);
                match reader.next_reply() {
                    Ok(Some(_reply)) => break,
                    Ok(None) => {}
                    Err(e) => return Err(TransportError::LivenessError(e.to_string())),
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(TransportError::LivenessTimeout);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(TransportError::LivenessError(e.to_string())),
        }
    }

    // Promoted connections are write-only from here on.
    let _ = stream.set_read_timeout(None);
    Ok(())
}
