//! nodewire - cross-node messaging for a command-driven key/value node.
//!
//! Nodes speak a length-prefixed command protocol. Besides serving clients,
//! a node can run commands on behalf of a peer without any connection
//! attached, subscribe a peer to its channels, and let Lua scripts message
//! other nodes.
//!
//! # Modules
//!
//! - [`protocol`] - Command buffers, request parser, replies
//! - [`transport`] - Short-timeout outbound delivery with liveness probe
//! - [`executor`] - Parse/dispatch pipeline and virtual clients
//! - [`pubsub`] - Channel table and remote subscribe
//! - [`lua`] - Script runtime with `log` and `messaging` primitives
//! - [`node`] - Command dispatcher over the store and channel table
//! - [`server`] - Single-threaded TCP server
//! - [`config`] - Configuration loading

pub mod config;
pub mod constants;
pub mod executor;
pub mod lua;
pub mod node;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod transport;

pub use config::Config;
pub use executor::{execute_as_virtual_client, ClientContext, Dispatcher, ReplySink};
pub use node::Node;
pub use protocol::{CommandBuffer, Reply};
pub use pubsub::{remote_subscribe, ChannelTable};
pub use server::Server;
pub use transport::{send_command, RemoteAddr};
