//! Command execution pipeline.
//!
//! One pipeline serves both real connections and virtual clients:
//!
//! ```text
//! bytes ──► RequestParser ──► Dispatcher::dispatch ──► ReplySink
//!                                                        ├── WireReply  (real socket)
//!                                                        ├── Discard    (inject, fire-and-forget)
//!                                                        └── Collect    (keep results)
//! ```
//!
//! The reply strategy is the only thing that differs between a client typing
//! commands over TCP and a command buffer injected by another node. See
//! [`virtual_client`] for the latter.

pub mod virtual_client;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::{ParsedCommand, ProtocolError, Reply, RequestParser};

pub use virtual_client::{execute_as_virtual_client, ExecutionReport, VirtualClient};

/// Whether a context belongs to a socket or was synthesised for injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// A client attached to a real connection.
    Connection,
    /// An ephemeral context with no socket.
    Virtual,
}

/// Per-client state visible to the dispatcher.
#[derive(Debug)]
pub struct ClientContext {
    id: u64,
    origin: SocketAddr,
    kind: ClientKind,
    /// Outgoing frames for pub/sub pushes. Only real connections have one.
    push_tx: Option<UnboundedSender<Vec<u8>>>,
}

impl ClientContext {
    /// Context for a client on a real connection.
    pub fn connection(origin: SocketAddr, push_tx: UnboundedSender<Vec<u8>>) -> Self {
        Self {
            id: next_client_id(),
            origin,
            kind: ClientKind::Connection,
            push_tx: Some(push_tx),
        }
    }

    /// Context for an injected command buffer. `origin` is the address of
    /// the real client that triggered the injection.
    pub fn virtual_client(origin: SocketAddr) -> Self {
        Self {
            id: next_client_id(),
            origin,
            kind: ClientKind::Virtual,
            push_tx: None,
        }
    }

    /// Process-unique client id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address the client's commands are attributed to.
    pub fn origin(&self) -> SocketAddr {
        self.origin
    }

    /// Connection or virtual.
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// True for injected contexts.
    pub fn is_virtual(&self) -> bool {
        self.kind == ClientKind::Virtual
    }

    /// Sender for pub/sub pushes, if the client can receive them.
    pub fn push_sender(&self) -> Option<&UnboundedSender<Vec<u8>>> {
        self.push_tx.as_ref()
    }
}

fn next_client_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// What a dispatcher produced for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// A single reply.
    Reply(Reply),
    /// Several replies for one command (one per subscribed channel, ...).
    Replies(Vec<Reply>),
    /// The command is defined as never replying.
    NoReply,
}

impl From<Reply> for DispatchResult {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

/// The command table: runs one parsed command for a client.
pub trait Dispatcher {
    /// Execute `command` on behalf of `client`.
    fn dispatch(&mut self, client: &mut ClientContext, command: ParsedCommand) -> DispatchResult;
}

/// Reply strategy: where results of dispatched commands go.
pub trait ReplySink {
    /// Called once per reply value, in dispatch order.
    ///
    /// Raw bytes are available through [`Reply::encode`] and array
    /// cardinality through [`Reply::cardinality`].
    fn deliver(&mut self, client: &ClientContext, reply: &Reply);
}

/// Drops every result. The default for injected commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ReplySink for Discard {
    fn deliver(&mut self, _client: &ClientContext, _reply: &Reply) {}
}

/// Keeps every result in order.
#[derive(Debug, Default)]
pub struct Collect {
    /// Replies received so far.
    pub replies: Vec<Reply>,
}

impl ReplySink for Collect {
    fn deliver(&mut self, _client: &ClientContext, reply: &Reply) {
        self.replies.push(reply.clone());
    }
}

/// Encodes results for a real socket.
///
/// Bytes accumulate until the connection's writer takes them with
/// [`WireReply::take`].
#[derive(Debug, Default)]
pub struct WireReply {
    out: Vec<u8>,
}

impl WireReply {
    /// Take the encoded bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}

impl ReplySink for WireReply {
    fn deliver(&mut self, _client: &ClientContext, reply: &Reply) {
        reply.encode_into(&mut self.out);
    }
}

impl<S: ReplySink + ?Sized> ReplySink for &mut S {
    fn deliver(&mut self, client: &ClientContext, reply: &Reply) {
        (**self).deliver(client, reply);
    }
}

/// Result of draining a parser through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    /// Commands handed to the dispatcher.
    pub dispatched: usize,
    /// Parse error that stopped the run, if any.
    pub error: Option<ProtocolError>,
}

/// Dispatch every complete command in `parser`, in framing order.
///
/// Stops at the first parse error; incomplete trailing input stays in the
/// parser for the next feed.
pub fn run_commands<D, S>(
    parser: &mut RequestParser,
    client: &mut ClientContext,
    dispatcher: &mut D,
    sink: &mut S,
) -> PipelineRun
where
    D: Dispatcher + ?Sized,
    S: ReplySink + ?Sized,
{
    let mut run = PipelineRun {
        dispatched: 0,
        error: None,
    };
    loop {
        let command = match parser.next_command() {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(e) => {
                run.error = Some(e);
                break;
            }
        };
        let result = dispatcher.dispatch(client, command);
        run.dispatched += 1;
        match result {
            DispatchResult::Reply(reply) => sink.deliver(client, &reply),
            DispatchResult::Replies(replies) => {
                for reply in &replies {
                    sink.deliver(client, reply);
                }
            }
            DispatchResult::NoReply => {}
        }
    }
    run
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{encode_command, CommandBuffer};

    /// Dispatcher that echoes the argument count and records every command.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingDispatcher {
        pub(crate) seen: Vec<(String, SocketAddr, ClientKind)>,
    }

    impl Dispatcher for RecordingDispatcher {
        fn dispatch(&mut self, client: &mut ClientContext, command: ParsedCommand) -> DispatchResult {
            let name = command.name();
            self.seen.push((name.clone(), client.origin(), client.kind()));
            match name.as_str() {
                "QUIET" => DispatchResult::NoReply,
                "TWICE" => DispatchResult::Replies(vec![Reply::ok(), Reply::ok()]),
                _ => Reply::Integer(command.argc() as i64).into(),
            }
        }
    }

    pub(crate) fn origin() -> SocketAddr {
        "10.1.2.3:5555".parse().unwrap()
    }

    #[test]
    fn test_wire_reply_encodes_in_order() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut client = ClientContext::connection(origin(), tx);
        let mut parser = RequestParser::new();
        parser.feed(&encode_command(&["A", "x"]));
        parser.feed(&encode_command(&["QUIET"]));
        parser.feed(&encode_command(&["TWICE"]));

        let mut dispatcher = RecordingDispatcher::default();
        let mut sink = WireReply::default();
        let run = run_commands(&mut parser, &mut client, &mut dispatcher, &mut sink);

        assert_eq!(run.dispatched, 3);
        assert_eq!(run.error, None);
        assert_eq!(sink.take(), b":2\r\n+OK\r\n+OK\r\n".to_vec());
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_run_commands_stops_at_parse_error() {
        let mut client = ClientContext::virtual_client(origin());
        let mut bytes = encode_command(&["FIRST"]);
        bytes.extend_from_slice(b"*1\r\n:bad\r\n");
        bytes.extend(encode_command(&["NEVER"]));
        let mut parser = RequestParser::with_buffer(CommandBuffer::from_encoded(bytes));

        let mut dispatcher = RecordingDispatcher::default();
        let mut sink = Collect::default();
        let run = run_commands(&mut parser, &mut client, &mut dispatcher, &mut sink);

        assert!(run.error.is_some());
        assert_eq!(run.dispatched, 1);
        assert_eq!(dispatcher.seen.len(), 1);
        assert_eq!(dispatcher.seen[0].0, "FIRST");
        assert_eq!(sink.replies, vec![Reply::Integer(1)]);
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientContext::virtual_client(origin());
        let b = ClientContext::virtual_client(origin());
        assert_ne!(a.id(), b.id());
        assert!(a.is_virtual());
        assert!(a.push_sender().is_none());
    }
}
