//! Remote subscribe: promote a verified peer connection into a subscriber.

use crate::pubsub::{ChannelTable, SubscriberId, SubscriberOutput};
use crate::protocol::CommandBuffer;
use crate::transport::{send_command, FailureClass, RemoteAddr, TransportError};

/// Why a remote subscribe was refused. No channel was registered.
#[derive(Debug)]
pub enum SubscribeError {
    /// The peer could not be connected to or written to.
    PeerUnreachable(TransportError),
    /// The peer accepted the connection but did not answer the probe.
    PeerUnresponsive(TransportError),
}

impl From<TransportError> for SubscribeError {
    fn from(err: TransportError) -> Self {
        match err.class() {
            FailureClass::Unreachable => Self::PeerUnreachable(err),
            FailureClass::Unresponsive => Self::PeerUnresponsive(err),
        }
    }
}

impl std::fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerUnreachable(e) => write!(f, "Peer unreachable: {e}"),
            Self::PeerUnresponsive(e) => write!(f, "Peer unresponsive: {e}"),
        }
    }
}

impl std::error::Error for SubscribeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PeerUnreachable(e) | Self::PeerUnresponsive(e) => Some(e),
        }
    }
}

/// Subscribe the peer at `addr` to `channels`, in the given order.
///
/// The peer must answer a PING within the liveness bound first; on failure
/// nothing is registered. The verified connection becomes a remote
/// subscriber whose origin is the peer's resolved address, so a second
/// subscribe to the same peer replaces the first on each shared channel.
pub fn remote_subscribe<S: AsRef<str>>(
    table: &mut ChannelTable,
    addr: &RemoteAddr,
    channels: &[S],
) -> Result<SubscriberId, SubscribeError> {
    let stream = send_command(addr, CommandBuffer::probe(), true)?;
    let origin = stream
        .peer_addr()
        .map_err(|e| SubscribeError::PeerUnresponsive(TransportError::LivenessError(e.to_string())))?;

    let id = table.insert_subscriber(origin, SubscriberOutput::Remote(stream));
    for channel in channels {
        table.subscribe(id, channel.as_ref());
    }
    if table.channels_of(id).is_empty() {
        table.remove_subscriber(id);
    }

    log::info!(
        "[PubSub] Remote subscriber {id} at {origin} on {} channel(s)",
        channels.len()
    );
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Peer that answers one PING per accepted connection, then reads until
    /// the subscriber side closes. Returns what followed each probe.
    fn answering_peer(listener: TcpListener, connections: usize) -> JoinHandle<Vec<Vec<u8>>> {
        std::thread::spawn(move || {
            let workers: Vec<_> = (0..connections)
                .map(|_| {
                    let (mut conn, _) = listener.accept().unwrap();
                    std::thread::spawn(move || {
                        let mut probe = [0u8; 14];
                        conn.read_exact(&mut probe).unwrap();
                        conn.write_all(b"+PONG\r\n").unwrap();
                        let mut rest = Vec::new();
                        conn.read_to_end(&mut rest).unwrap();
                        rest
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_registers_channels_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let local = listener.local_addr().unwrap();
        let peer = answering_peer(listener, 1);

        let mut table = ChannelTable::new();
        let id = remote_subscribe(&mut table, &RemoteAddr::from(local), &["a", "b", "c"]).unwrap();

        assert_eq!(table.channels_of(id), ["a", "b", "c"]);
        let handle = table.get(id).unwrap();
        assert!(handle.is_remote());
        assert_eq!(handle.origin(), local);

        assert_eq!(table.publish("b", b"frame"), 1);
        drop(table);
        assert_eq!(peer.join().unwrap(), vec![b"frame".to_vec()]);
    }

    #[test]
    fn test_resubscribe_from_same_peer_replaces_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = RemoteAddr::from(listener.local_addr().unwrap());
        let peer = answering_peer(listener, 2);

        let mut table = ChannelTable::new();
        let first = remote_subscribe(&mut table, &addr, &["x"]).unwrap();
        let second = remote_subscribe(&mut table, &addr, &["x"]).unwrap();

        assert_ne!(first, second);
        let ids: Vec<_> = table.subscribers_of("x").map(|h| h.id()).collect();
        assert_eq!(ids, vec![second]);
        assert!(table.get(first).is_none());

        drop(table);
        peer.join().unwrap();
    }

    #[test]
    fn test_unreachable_peer_registers_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = RemoteAddr::from(listener.local_addr().unwrap());
        drop(listener);

        let mut table = ChannelTable::new();
        let err = remote_subscribe(&mut table, &addr, &["x"]).unwrap_err();

        assert!(matches!(err, SubscribeError::PeerUnreachable(_)), "got {err:?}");
        assert_eq!(table.subscriber_count(), 0);
        assert_eq!(table.channel_count(), 0);
    }

    #[test]
    fn test_silent_peer_registers_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = RemoteAddr::from(listener.local_addr().unwrap());

        let mut table = ChannelTable::new();
        let err = remote_subscribe(&mut table, &addr, &["x"]).unwrap_err();

        assert!(matches!(err, SubscribeError::PeerUnresponsive(_)), "got {err:?}");
        assert_eq!(table.subscriber_count(), 0);
        drop(listener);
    }
}
