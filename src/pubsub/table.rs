//! Channel table with a reverse index from subscriber to channels.
//!
//! # Layout
//!
//! ```text
//! channels:    { "news": [3, 7], "jobs": [7] }       delivery order
//! subscribers: { 3: Handle{channels: ["news"]},
//!                7: Handle{channels: ["news", "jobs"]} }
//! ```
//!
//! Both directions are updated together by every mutating method, so a
//! handle is listed under a channel exactly when the channel is in the
//! handle's own list. Channels with no subscribers are removed.

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpStream};

use tokio::sync::mpsc::UnboundedSender;

/// Identifier of a registered subscriber.
pub type SubscriberId = u64;

/// Where frames published to a subscriber go.
#[derive(Debug)]
pub enum SubscriberOutput {
    /// A promoted outbound connection to a peer node. Owned by the table.
    Remote(TcpStream),
    /// The push channel of a locally connected client.
    Local(UnboundedSender<Vec<u8>>),
}

impl SubscriberOutput {
    /// Write one encoded frame.
    ///
    /// Remote writes block for at most the socket's write timeout.
    pub fn send(&mut self, frame: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Remote(stream) => stream.write_all(frame),
            Self::Local(tx) => tx
                .send(frame.to_vec())
                .map_err(|_| std::io::Error::new(ErrorKind::BrokenPipe, "client disconnected")),
        }
    }
}

/// One subscriber: its origin address, output, and channels in
/// subscription order.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    origin: SocketAddr,
    output: SubscriberOutput,
    channels: Vec<String>,
}

impl SubscriberHandle {
    /// Table-assigned id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Address used for deduplication.
    pub fn origin(&self) -> SocketAddr {
        self.origin
    }

    /// Channels this handle is registered under, oldest first.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// True for promoted peer connections.
    pub fn is_remote(&self) -> bool {
        matches!(self.output, SubscriberOutput::Remote(_))
    }
}

/// Channel name to ordered subscribers, plus the reverse mapping.
#[derive(Debug, Default)]
pub struct ChannelTable {
    /// channel -> subscriber ids, in delivery order.
    channels: HashMap<String, Vec<SubscriberId>>,

    /// All known handles. A handle with no channels may stay here while its
    /// owner is connected (local clients).
    subscribers: HashMap<SubscriberId, SubscriberHandle>,

    next_id: SubscriberId,
}

impl ChannelTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle with no channels yet and return its id.
    pub fn insert_subscriber(&mut self, origin: SocketAddr, output: SubscriberOutput) -> SubscriberId {
        self.next_id += 1;
        let id = self.next_id;
        self.subscribers.insert(
            id,
            SubscriberHandle {
                id,
                origin,
                output,
                channels: Vec::new(),
            },
        );
        id
    }

    /// Register `id` under `channel`.
    ///
    /// Any other handle with the same origin address is first removed from
    /// this channel; a remote handle left with no channels is dropped, which
    /// closes its connection. The new entry goes to the tail of the channel.
    ///
    /// Returns false if `id` is unknown or already registered under `channel`.
    pub fn subscribe(&mut self, id: SubscriberId, channel: &str) -> bool {
        let Some(origin) = self.subscribers.get(&id).map(SubscriberHandle::origin) else {
            return false;
        };
        if self.is_subscribed(id, channel) {
            return false;
        }

        let displaced: Vec<SubscriberId> = self
            .channels
            .get(channel)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|other| {
                        *other != id
                            && self
                                .subscribers
                                .get(other)
                                .is_some_and(|h| h.origin == origin)
                    })
                    .collect()
            })
            .unwrap_or_default();

        for stale in displaced {
            log::debug!("[PubSub] {origin} replaces subscriber {stale} on '{channel}'");
            self.detach(stale, channel);
            self.drop_if_orphaned_remote(stale);
        }

        self.channels.entry(channel.to_string()).or_default().push(id);
        if let Some(handle) = self.subscribers.get_mut(&id) {
            handle.channels.push(channel.to_string());
        }
        true
    }

    /// Remove `id` from `channel`. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriberId, channel: &str) -> bool {
        if !self.is_subscribed(id, channel) {
            return false;
        }
        self.detach(id, channel);
        true
    }

    /// Remove `id` from every channel, returning them in subscription order.
    pub fn unsubscribe_all(&mut self, id: SubscriberId) -> Vec<String> {
        let channels = self
            .subscribers
            .get(&id)
            .map(|h| h.channels.clone())
            .unwrap_or_default();
        for channel in &channels {
            self.detach(id, channel);
        }
        channels
    }

    /// Remove a handle entirely, cleaning up every channel it was on.
    pub fn remove_subscriber(&mut self, id: SubscriberId) -> Option<SubscriberHandle> {
        self.unsubscribe_all(id);
        self.subscribers.remove(&id)
    }

    /// True if `id` is registered under `channel`.
    pub fn is_subscribed(&self, id: SubscriberId, channel: &str) -> bool {
        self.subscribers
            .get(&id)
            .is_some_and(|h| h.channels.iter().any(|c| c == channel))
    }

    /// Handles registered under `channel`, in delivery order.
    pub fn subscribers_of(&self, channel: &str) -> impl Iterator<Item = &SubscriberHandle> {
        self.channels
            .get(channel)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.subscribers.get(id))
    }

    /// Channels of `id` in subscription order, empty if unknown.
    pub fn channels_of(&self, id: SubscriberId) -> &[String] {
        self.subscribers
            .get(&id)
            .map(|h| h.channels.as_slice())
            .unwrap_or_default()
    }

    /// Look up a handle.
    pub fn get(&self, id: SubscriberId) -> Option<&SubscriberHandle> {
        self.subscribers.get(&id)
    }

    /// Number of known handles.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Write `frame` to every subscriber of `channel`, in delivery order.
    ///
    /// A subscriber whose write fails is removed from the table. Returns the
    /// number of successful deliveries.
    pub fn publish(&mut self, channel: &str, frame: &[u8]) -> usize {
        let ids = match self.channels.get(channel) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for id in ids {
            let Some(handle) = self.subscribers.get_mut(&id) else {
                continue;
            };
            match handle.output.send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::warn!(
                        "[PubSub] Dropping subscriber {id} ({}) after failed write: {e}",
                        handle.origin
                    );
                    self.remove_subscriber(id);
                }
            }
        }
        delivered
    }

    /// Remove one (id, channel) pair from both mappings.
    fn detach(&mut self, id: SubscriberId, channel: &str) {
        if let Some(ids) = self.channels.get_mut(channel) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.channels.remove(channel);
            }
        }
        if let Some(handle) = self.subscribers.get_mut(&id) {
            handle.channels.retain(|c| c != channel);
        }
    }

    fn drop_if_orphaned_remote(&mut self, id: SubscriberId) {
        let orphaned = self
            .subscribers
            .get(&id)
            .is_some_and(|h| h.is_remote() && h.channels.is_empty());
        if orphaned {
            self.subscribers.remove(&id);
            log::debug!("[PubSub] Closed displaced remote subscriber {id}");
        }
    }
}
