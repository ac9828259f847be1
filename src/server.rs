//! TCP server feeding client connections into a node.
//!
//! Everything runs on one thread: a current-thread tokio runtime with a
//! [`LocalSet`](tokio::task::LocalSet). Each accepted connection gets a read
//! task that parses and dispatches commands against the shared node, and a
//! write task that drains an outgoing frame channel. Replies and pub/sub
//! pushes share that channel, so a client sees them in the order they were
//! produced.
//!
//! Dispatch holds the node borrow without awaiting, so blocking transport
//! calls made by a command (RSUBSCRIBE, `messaging.remote_send`) stall the
//! whole node for at most their fixed timeouts.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::constants::READ_BUFFER_SIZE;
use crate::executor::{run_commands, ClientContext, WireReply};
use crate::node::Node;
use crate::protocol::{Reply, RequestParser};

/// A node shared by every connection task on the command thread.
pub type SharedNode = Rc<RefCell<Node>>;

/// Bound listener plus the node it serves.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    node: SharedNode,
}

impl Server {
    /// Bind `addr` for `node`. Port 0 picks an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, node: Node) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;
        log::info!("[Server] Listening on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
            node: Rc::new(RefCell::new(node)),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the node, for inspection from the same thread.
    pub fn node(&self) -> SharedNode {
        Rc::clone(&self.node)
    }

    /// Accept connections until the task is dropped. Accept errors are
    /// logged and retried.
    ///
    /// Must run inside a `LocalSet`.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    log::debug!("[Server] Client connected: {peer}");
                    let _ = stream.set_nodelay(true);
                    tokio::task::spawn_local(serve_connection(stream, peer, Rc::clone(&self.node)));
                }
                Err(e) => {
                    log::warn!("[Server] Accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Build the single-threaded runtime a node runs on.
///
/// # Errors
///
/// Returns an error if the runtime cannot be created.
pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, node: SharedNode) {
    let (read_half, write_half) = stream.into_split();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::task::spawn_local(write_loop(peer, write_half, frame_rx));

    let mut client = ClientContext::connection(peer, frame_tx.clone());
    read_loop(&mut client, read_half, &frame_tx, &node).await;

    node.borrow_mut().client_disconnected(&client);
    drop(client);
    drop(frame_tx);
    let _ = writer.await;
    log::debug!("[Server] Client disconnected: {peer}");
}

/// Read, parse and dispatch until EOF, a socket error, or a protocol error.
async fn read_loop(
    client: &mut ClientContext,
    mut reader: OwnedReadHalf,
    frame_tx: &UnboundedSender<Vec<u8>>,
    node: &SharedNode,
) {
    let mut parser = RequestParser::new();
    let mut sink = WireReply::default();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                log::debug!("[Server] Read error for {}: {e}", client.origin());
                return;
            }
        };
        parser.feed(&buf[..n]);

        let run = {
            let mut node = node.borrow_mut();
            run_commands(&mut parser, client, &mut *node, &mut sink)
        };

        let mut out = sink.take();
        if let Some(e) = &run.error {
            log::debug!("[Server] Protocol error from {}: {e}", client.origin());
            Reply::error(format!("ERR Protocol error: {e}")).encode_into(&mut out);
        }
        if !out.is_empty() && frame_tx.send(out).is_err() {
            return;
        }
        if run.error.is_some() {
            return;
        }
    }
}

/// Write queued frames until every sender is gone.
async fn write_loop(
    peer: SocketAddr,
    mut writer: OwnedWriteHalf,
    mut frame_rx: UnboundedReceiver<Vec<u8>>,
) {
    while let Some(data) = frame_rx.recv().await {
        if let Err(e) = writer.write_all(&data).await {
            log::debug!("[Server] Write error for {peer}: {e}");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
