//! Subscription registry.
//!
//! [`ChannelTable`] maps channel names to ordered subscribers and back.
//! Local clients register through `SUBSCRIBE`; peer nodes are added by
//! [`remote_subscribe`], which promotes a liveness-checked outbound
//! connection into a subscriber the table owns from then on.
//!
//! The table is owned by the node and mutated only on its command thread.

mod remote;
mod table;

pub use remote::{remote_subscribe, SubscribeError};
pub use table::{ChannelTable, SubscriberHandle, SubscriberId, SubscriberOutput};

/// Encode the push frame delivered to subscribers of `channel`.
///
/// The frame is the array `["message", channel, payload]`. A peer node
/// reading it over a promoted connection runs it as its `MESSAGE` command.
pub fn message_frame(channel: &str, payload: &[u8]) -> Vec<u8> {
    crate::protocol::encode_command(&[b"message".as_slice(), channel.as_bytes(), payload])
}
