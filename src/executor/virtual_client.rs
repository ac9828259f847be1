//! Virtual clients: running a command buffer with no socket attached.
//!
//! A node injects commands into its own engine by wrapping a
//! [`CommandBuffer`] in a [`VirtualClient`] and running it through the same
//! parse/dispatch pipeline a real connection uses. Results go to the
//! caller's [`ReplySink`] (usually [`Discard`](super::Discard)); nothing is
//! ever written back to the client that triggered the injection.
//!
//! The virtual client is consumed by [`VirtualClient::run`], so its buffer,
//! parser scratch and sink are released when the run returns, whether the
//! buffer parsed cleanly or not.

use std::net::SocketAddr;

use super::{run_commands, ClientContext, Dispatcher, ReplySink};
use crate::protocol::{CommandBuffer, ProtocolError, RequestParser};

/// Outcome of one injected buffer, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Commands handed to the dispatcher.
    pub dispatched: usize,
    /// Parse failure that ended the run early, if any.
    pub parse_error: Option<ProtocolError>,
    /// True if an incomplete trailing command was thrown away.
    pub discarded_partial: bool,
}

/// An ephemeral client context that owns the buffer it parses.
#[derive(Debug)]
pub struct VirtualClient<S: ReplySink> {
    context: ClientContext,
    parser: RequestParser,
    sink: S,
}

impl<S: ReplySink> VirtualClient<S> {
    /// Attach `buffer` (moved, not copied) to a fresh context.
    ///
    /// The parser starts idle with no pending arguments. `origin` is copied
    /// from the triggering client so downstream checks see the real caller.
    pub fn new(buffer: CommandBuffer, origin: SocketAddr, sink: S) -> Self {
        Self {
            context: ClientContext::virtual_client(origin),
            parser: RequestParser::with_buffer(buffer),
            sink,
        }
    }

    /// The context commands run under.
    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Parse and dispatch the whole buffer, then tear the client down.
    pub fn run<D: Dispatcher + ?Sized>(mut self, dispatcher: &mut D) -> ExecutionReport {
        let origin = self.context.origin();
        let run = run_commands(&mut self.parser, &mut self.context, dispatcher, &mut self.sink);

        let discarded_partial = run.error.is_none() && self.parser.has_partial();
        match &run.error {
            Some(e) => log::debug!(
                "[Executor] Injected buffer from {origin} failed to parse after {} commands: {e}",
                run.dispatched
            ),
            None if discarded_partial => {
                log::debug!("[Executor] Dropping incomplete command injected by {origin}");
            }
            None => {}
        }

        ExecutionReport {
            dispatched: run.dispatched,
            parse_error: run.error,
            discarded_partial,
        }
    }
}

/// Run `buffer` as if a client at `origin` had sent it, delivering results
/// to `sink` instead of a socket.
pub fn execute_as_virtual_client<D, S>(
    buffer: CommandBuffer,
    origin: SocketAddr,
    sink: S,
    dispatcher: &mut D,
) -> ExecutionReport
where
    D: Dispatcher + ?Sized,
    S: ReplySink,
{
    VirtualClient::new(buffer, origin, sink).run(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{origin, RecordingDispatcher};
    use crate::executor::{ClientKind, Collect, Discard};
    use crate::protocol::{encode_command, Reply};

    #[test]
    fn test_runs_every_command_in_order_with_inherited_origin() {
        let mut bytes = encode_command(&["SET", "a", "1"]);
        bytes.extend(encode_command(&["SET", "b", "2"]));
        bytes.extend(encode_command(&["GET", "a"]));

        let mut dispatcher = RecordingDispatcher::default();
        let mut sink = Collect::default();
        let report = execute_as_virtual_client(
            CommandBuffer::from_encoded(bytes),
            origin(),
            &mut sink,
            &mut dispatcher,
        );

        assert_eq!(report.dispatched, 3);
        assert_eq!(report.parse_error, None);
        assert!(!report.discarded_partial);

        let names: Vec<&str> = dispatcher.seen.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, vec!["SET", "SET", "GET"]);
        for (_, addr, kind) in &dispatcher.seen {
            assert_eq!(*addr, origin());
            assert_eq!(*kind, ClientKind::Virtual);
        }
        assert_eq!(
            sink.replies,
            vec![Reply::Integer(3), Reply::Integer(3), Reply::Integer(2)]
        );
    }

    #[test]
    fn test_discard_sink_still_applies_side_effects() {
        let mut dispatcher = RecordingDispatcher::default();
        let report = execute_as_virtual_client(
            CommandBuffer::from_args(&["SET", "k", "v"]),
            origin(),
            Discard,
            &mut dispatcher,
        );
        assert_eq!(report.dispatched, 1);
        assert_eq!(dispatcher.seen.len(), 1);
    }

    #[test]
    fn test_parse_failure_is_reported_not_raised() {
        let mut bytes = encode_command(&["OK1"]);
        bytes.extend_from_slice(b"*2\r\n$1\r\nx\r\n#junk\r\n");

        let mut dispatcher = RecordingDispatcher::default();
        let report = execute_as_virtual_client(
            CommandBuffer::from_encoded(bytes),
            origin(),
            Discard,
            &mut dispatcher,
        );

        assert!(report.parse_error.is_some());
        assert_eq!(report.dispatched, 1);
        assert_eq!(dispatcher.seen.len(), 1);
    }

    #[test]
    fn test_incomplete_tail_is_discarded() {
        let mut bytes = encode_command(&["PING"]);
        bytes.extend_from_slice(b"*2\r\n$4\r\nECHO\r\n");

        let mut dispatcher = RecordingDispatcher::default();
        let report = execute_as_virtual_client(
            CommandBuffer::from_encoded(bytes),
            origin(),
            Discard,
            &mut dispatcher,
        );

        assert_eq!(report.dispatched, 1);
        assert!(report.discarded_partial);
    }

    #[test]
    fn test_empty_buffer_dispatches_nothing() {
        let mut dispatcher = RecordingDispatcher::default();
        let report = execute_as_virtual_client(
            CommandBuffer::from_encoded(Vec::new()),
            origin(),
            Discard,
            &mut dispatcher,
        );
        assert_eq!(report.dispatched, 0);
        assert!(dispatcher.seen.is_empty());
    }

    #[test]
    fn test_context_is_virtual() {
        let client = VirtualClient::new(CommandBuffer::probe(), origin(), Discard);
        assert!(client.context().is_virtual());
        assert_eq!(client.context().origin(), origin());
    }
}
