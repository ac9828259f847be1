//! Lua scripting for nodes.
//!
//! # Architecture
//!
//! ```text
//! Node
//!  └── ScriptRuntime
//!       ├── Lua state (mlua)
//!       └── Primitives
//!            ├── log (info, warn, error, debug)
//!            └── messaging (remote_send, encode, hash)
//! ```
//!
//! Scripts run on the node's command thread. `messaging.remote_send` is the
//! only primitive that touches the network, and it is bounded by the
//! transport timeouts.

pub mod primitives;
pub mod runtime;

pub use primitives::messaging::content_hash;
pub use runtime::ScriptRuntime;
