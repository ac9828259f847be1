//! A node: in-memory store, channel table and script runtime behind the
//! command dispatcher.
//!
//! Real connections and virtual clients reach the same [`Node::dispatch`].
//! `MESSAGE channel payload` is the bridge between nodes: a peer that
//! subscribed this node with `RSUBSCRIBE` forwards every `PUBLISH` as a
//! `["message", channel, payload]` frame, and this node runs `payload` as
//! injected commands.

use std::collections::HashMap;

use anyhow::Result;

use crate::constants::{MAX_INJECTION_DEPTH, SUBSCRIBE_PROBE_ERR};
use crate::executor::{
    execute_as_virtual_client, ClientContext, DispatchResult, Discard, Dispatcher,
};
use crate::lua::ScriptRuntime;
use crate::protocol::{CommandBuffer, ParsedCommand, Reply};
use crate::pubsub::{
    message_frame, remote_subscribe, ChannelTable, SubscriberId, SubscriberOutput,
};
use crate::transport::RemoteAddr;

/// Node state owned by the command thread.
#[derive(Debug)]
pub struct Node {
    store: HashMap<Vec<u8>, Vec<u8>>,
    channels: ChannelTable,
    scripts: ScriptRuntime,
    /// Client id -> its local subscriber handle.
    local_subscribers: HashMap<u64, SubscriberId>,
    /// `MESSAGE` payloads currently being injected, innermost included.
    injection_depth: usize,
}

impl Node {
    /// Create a node with an empty store and a fresh script runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the script runtime cannot be created.
    pub fn new() -> Result<Self> {
        Ok(Self::with_scripts(ScriptRuntime::new()?))
    }

    /// Create a node around an existing script runtime.
    pub fn with_scripts(scripts: ScriptRuntime) -> Self {
        Self {
            store: HashMap::new(),
            channels: ChannelTable::new(),
            scripts,
            local_subscribers: HashMap::new(),
            injection_depth: 0,
        }
    }

    /// The subscription table.
    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// The script runtime.
    pub fn scripts(&self) -> &ScriptRuntime {
        &self.scripts
    }

    /// Read a key directly, bypassing the dispatcher.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.store.get(key).map(Vec::as_slice)
    }

    /// Drop everything a closed connection left in the channel table.
    pub fn client_disconnected(&mut self, client: &ClientContext) {
        if let Some(id) = self.local_subscribers.remove(&client.id()) {
            self.channels.remove_subscriber(id);
            log::debug!("[Node] Removed subscriptions of {}", client.origin());
        }
    }

    fn set(&mut self, cmd: ParsedCommand) -> Reply {
        let mut args = cmd.into_args().into_iter().skip(1);
        if let (Some(key), Some(value)) = (args.next(), args.next()) {
            self.store.insert(key, value);
        }
        Reply::ok()
    }

    fn get_cmd(&self, cmd: &ParsedCommand) -> Reply {
        cmd.arg(1)
            .and_then(|key| self.store.get(key))
            .map_or(Reply::Nil, Reply::bulk)
    }

    fn del(&mut self, cmd: &ParsedCommand) -> Reply {
        let removed = cmd.args()[1..]
            .iter()
            .filter(|key| self.store.remove(key.as_slice()).is_some())
            .count();
        Reply::Integer(removed as i64)
    }

    /// `MESSAGE channel payload`: run `payload` as a virtual client of the
    /// sender. Never replies.
    fn message(&mut self, client: &ClientContext, cmd: ParsedCommand) -> DispatchResult {
        let Some(payload) = cmd.into_args().into_iter().nth(2) else {
            return DispatchResult::NoReply;
        };
        let origin = client.origin();
        if self.injection_depth >= MAX_INJECTION_DEPTH {
            log::debug!(
                "[Node] Dropping MESSAGE from {origin}: nested deeper than {MAX_INJECTION_DEPTH}"
            );
            return DispatchResult::NoReply;
        }

        self.injection_depth += 1;
        let report =
            execute_as_virtual_client(CommandBuffer::from_encoded(payload), origin, Discard, self);
        self.injection_depth -= 1;
        log::debug!(
            "[Node] Injected {} command(s) from {origin}",
            report.dispatched
        );
        DispatchResult::NoReply
    }

    /// `RSUBSCRIBE host port channel [channel ...]`
    fn rsubscribe(&mut self, cmd: &ParsedCommand) -> Reply {
        let host = String::from_utf8_lossy(cmd.args()[1].as_slice()).into_owned();
        let Some(port) = std::str::from_utf8(&cmd.args()[2])
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
        else {
            return Reply::error("ERR invalid port");
        };
        let channels: Vec<String> = cmd.args()[3..]
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();

        let addr = RemoteAddr::new(host, port);
        match remote_subscribe(&mut self.channels, &addr, &channels) {
            Ok(_) => Reply::ok(),
            Err(e) => {
                log::warn!("[Node] RSUBSCRIBE {addr} failed: {e}");
                Reply::error(SUBSCRIBE_PROBE_ERR)
            }
        }
    }

    /// `SUBSCRIBE channel [channel ...]` for a connected client.
    fn subscribe(&mut self, client: &ClientContext, cmd: &ParsedCommand) -> DispatchResult {
        let Some(push_tx) = client.push_sender() else {
            return Reply::error("ERR SUBSCRIBE is not available to injected commands").into();
        };
        // Fan-out prunes handles whose writer is gone; a stale mapping gets
        // a fresh handle.
        let live = self
            .local_subscribers
            .get(&client.id())
            .copied()
            .filter(|&id| self.channels.get(id).is_some());
        let id = match live {
            Some(id) => id,
            None => {
                let id = self
                    .channels
                    .insert_subscriber(client.origin(), SubscriberOutput::Local(push_tx.clone()));
                self.local_subscribers.insert(client.id(), id);
                id
            }
        };

        let replies = cmd.args()[1..]
            .iter()
            .map(|raw| {
                let channel = String::from_utf8_lossy(raw).into_owned();
                self.channels.subscribe(id, &channel);
                subscription_reply("subscribe", Some(&channel), self.channels.channels_of(id).len())
            })
            .collect();
        DispatchResult::Replies(replies)
    }

    /// `UNSUBSCRIBE [channel ...]`; no channels means all of them.
    fn unsubscribe(&mut self, client: &ClientContext, cmd: &ParsedCommand) -> DispatchResult {
        let id = self.local_subscribers.get(&client.id()).copied();
        let requested: Vec<String> = cmd.args()[1..]
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        let targets = match (id, requested.is_empty()) {
            (Some(id), true) => self.channels.channels_of(id).to_vec(),
            _ => requested,
        };

        if targets.is_empty() {
            return subscription_reply("unsubscribe", None, 0).into();
        }
        let replies = targets
            .iter()
            .map(|channel| {
                let remaining = match id {
                    Some(id) => {
                        self.channels.unsubscribe(id, channel);
                        self.channels.channels_of(id).len()
                    }
                    None => 0,
                };
                subscription_reply("unsubscribe", Some(channel), remaining)
            })
            .collect();
        DispatchResult::Replies(replies)
    }

    fn publish(&mut self, cmd: &ParsedCommand) -> Reply {
        let channel = String::from_utf8_lossy(&cmd.args()[1]).into_owned();
        let frame = message_frame(&channel, &cmd.args()[2]);
        let receivers = self.channels.publish(&channel, &frame);
        Reply::Integer(receivers as i64)
    }

    fn eval(&self, cmd: &ParsedCommand) -> Reply {
        let source = String::from_utf8_lossy(&cmd.args()[1]);
        match self.scripts.eval(&source) {
            Ok(reply) => reply,
            Err(e) => Reply::error(single_line(&format!("ERR {e}"))),
        }
    }
}

impl Dispatcher for Node {
    fn dispatch(&mut self, client: &mut ClientContext, command: ParsedCommand) -> DispatchResult {
        let name = command.name();
        let argc = command.argc();
        let arity_ok = match name.as_str() {
            "PING" => argc <= 2,
            "ECHO" | "GET" | "EVAL" => argc == 2,
            "SET" | "MESSAGE" | "PUBLISH" => argc == 3,
            "DEL" | "SUBSCRIBE" => argc >= 2,
            "RSUBSCRIBE" => argc >= 4,
            "UNSUBSCRIBE" => true,
            _ => {
                return Reply::error(format!(
                    "ERR unknown command '{}'",
                    name.to_lowercase()
                ))
                .into()
            }
        };
        if !arity_ok {
            return Reply::error(format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_lowercase()
            ))
            .into();
        }

        match name.as_str() {
            "PING" => match command.arg(1) {
                Some(msg) => Reply::bulk(msg).into(),
                None => Reply::Status("PONG".to_string()).into(),
            },
            "ECHO" => Reply::bulk(&command.args()[1]).into(),
            "SET" => self.set(command).into(),
            "GET" => self.get_cmd(&command).into(),
            "DEL" => self.del(&command).into(),
            "MESSAGE" => self.message(client, command),
            "RSUBSCRIBE" => self.rsubscribe(&command).into(),
            "SUBSCRIBE" => self.subscribe(client, &command),
            "UNSUBSCRIBE" => self.unsubscribe(client, &command),
            "PUBLISH" => self.publish(&command).into(),
            _ => self.eval(&command).into(),
        }
    }
}

/// `["subscribe", channel, count]` style confirmation.
fn subscription_reply(kind: &str, channel: Option<&str>, count: usize) -> Reply {
    Reply::Array(vec![
        Reply::bulk(kind),
        channel.map_or(Reply::Nil, Reply::bulk),
        Reply::Integer(count as i64),
    ])
}

/// Error replies are line-framed.
fn single_line(msg: &str) -> String {
    msg.replace(['\r', '\n'], " ")
}
