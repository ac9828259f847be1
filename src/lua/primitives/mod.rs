//! Lua primitive functions exposed to scripts.
//!
//! # Available Primitives
//!
//! - `log` - Logging functions (info, warn, error, debug)
//! - `messaging` - Peer messaging (remote_send, encode, hash)
//!
//! # Adding New Primitives
//!
//! 1. Create a new module (e.g., `foo.rs`)
//! 2. Implement a `register(lua: &Lua) -> Result<()>` function
//! 3. Add `pub mod foo;` here
//! 4. Call `foo::register(lua)?;` in `register_all`

pub mod log;
pub mod messaging;

use anyhow::Result;
use mlua::Lua;

/// Register every primitive table on `lua`.
///
/// # Errors
///
/// Returns an error if any table or function fails to register.
pub fn register_all(lua: &Lua) -> Result<()> {
    log::register(lua)?;
    messaging::register(lua)?;
    Ok(())
}
