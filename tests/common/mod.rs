//! Shared helpers: nodes on their own threads, blocking test clients.

#![allow(dead_code, reason = "each test binary uses a different subset of these helpers")]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use nodewire::protocol::{encode_command, ReplyReader};
use nodewire::server::build_runtime;
use nodewire::{Node, Reply, Server};

/// Start a node on an ephemeral port in its own thread and return its
/// address. The thread lives until the test process exits.
///
/// Each node needs its own thread: a node blocks while probing a peer, so
/// two nodes sharing a thread could never answer each other.
pub fn start_node() -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = build_runtime().unwrap();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async move {
            let node = Node::new().unwrap();
            let server = Server::bind("127.0.0.1:0".parse().unwrap(), node)
                .await
                .unwrap();
            tx.send(server.local_addr()).unwrap();
            server.run().await;
        });
    });
    rx.recv().unwrap()
}

/// A blocking client speaking the wire protocol.
pub struct Client {
    stream: TcpStream,
    reader: ReplyReader,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Self {
            stream,
            reader: ReplyReader::new(),
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    pub fn send<A: AsRef<[u8]>>(&mut self, args: &[A]) {
        self.send_raw(&encode_command(args));
    }

    pub fn read_reply(&mut self) -> Reply {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(reply) = self.reader.next_reply().unwrap() {
                return reply;
            }
            let n = self.stream.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed before a reply arrived");
            self.reader.feed(&buf[..n]);
        }
    }

    pub fn call<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Reply {
        self.send(args);
        self.read_reply()
    }
}

/// Poll `GET key` on `client` until it returns `expected` or a second passes.
pub fn wait_for_value(client: &mut Client, key: &str, expected: &str) -> Reply {
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let reply = client.call(&["GET", key]);
        if reply == Reply::bulk(expected) || Instant::now() >= deadline {
            return reply;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
