//! Logging primitive for Lua scripts.
//!
//! Exposes the `log` crate through a global `log` table:
//!
//! ```lua
//! log.info("subscribed to " .. host)
//! log.debug("payload: " .. messaging.encode("SET", k, v))
//! ```
//!
//! Messages use the `lua` target, so `RUST_LOG=lua=debug` filters them
//! separately from the host's own output.

use anyhow::{anyhow, Result};
use mlua::Lua;

/// Register the `log` table with `info`, `warn`, `error` and `debug`.
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    let levels = [
        ("info", log::Level::Info),
        ("warn", log::Level::Warn),
        ("error", log::Level::Error),
        ("debug", log::Level::Debug),
    ];
    for (name, level) in levels {
        let func = lua
            .create_function(move |_, msg: String| {
                log::log!(target: "lua", level, "{msg}");
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        log_table
            .set(name, func)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::{Function, Table};

    #[test]
    fn test_log_table_created() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");

        let log_table: Table = lua.globals().get("log").expect("log table should exist");
        for name in ["info", "warn", "error", "debug"] {
            let _: Function = log_table.get(name).expect("log function should exist");
        }
    }

    #[test]
    fn test_log_functions_callable() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");

        lua.load(r#"log.info("i") log.warn("w") log.error("e") log.debug("d")"#)
            .exec()
            .expect("log functions should be callable");
    }

    #[test]
    fn test_log_rejects_missing_message() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");
        assert!(lua.load("log.info()").exec().is_err());
    }
}
