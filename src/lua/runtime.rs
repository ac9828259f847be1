//! Lua runtime management.
//!
//! Provides [`ScriptRuntime`], which owns the Lua interpreter state with the
//! primitives registered, and converts script results into protocol replies
//! for the `EVAL` command.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use mlua::{Lua, Table, Value};

use super::primitives;
use crate::protocol::Reply;

/// Nested tables deeper than this convert to nil.
const MAX_REPLY_DEPTH: usize = 32;

/// Lua scripting runtime for a node.
///
/// The Lua state is neither `Send` nor `Sync`; a runtime lives on the
/// thread that created it, like the node that owns it.
pub struct ScriptRuntime {
    /// The Lua interpreter state.
    lua: Lua,
    /// Directory relative script paths resolve against.
    script_dir: Option<PathBuf>,
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("script_dir", &self.script_dir)
            .finish_non_exhaustive()
    }
}

impl ScriptRuntime {
    /// Create a runtime with the `log` and `messaging` tables registered.
    ///
    /// # Errors
    ///
    /// Returns an error if primitive registration fails.
    pub fn new() -> Result<Self> {
        let lua = Lua::new();
        primitives::register_all(&lua)?;
        Ok(Self {
            lua,
            script_dir: None,
        })
    }

    /// Create a runtime that loads scripts and `require`d modules from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be created or `package.path`
    /// cannot be updated.
    pub fn with_script_dir(dir: &Path) -> Result<Self> {
        let mut runtime = Self::new()?;
        runtime.prepend_package_path(dir)?;
        runtime.script_dir = Some(dir.to_path_buf());
        Ok(runtime)
    }

    /// Directory relative script paths resolve against, if any.
    #[must_use]
    pub fn script_dir(&self) -> Option<&Path> {
        self.script_dir.as_deref()
    }

    /// Access the underlying Lua state.
    #[must_use]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    fn prepend_package_path(&self, dir: &Path) -> Result<()> {
        let package: Table = self
            .lua
            .globals()
            .get("package")
            .map_err(|e| anyhow!("Failed to get package table: {e}"))?;
        let current: String = package
            .get("path")
            .map_err(|e| anyhow!("Failed to get package.path: {e}"))?;

        let new_path = format!(
            "{dir}/?.lua;{dir}/?/init.lua;{current}",
            dir = dir.display()
        );
        package
            .set("path", new_path)
            .map_err(|e| anyhow!("Failed to set package.path: {e}"))?;
        Ok(())
    }

    /// Load and execute a Lua file.
    ///
    /// Relative paths resolve against the script directory when one is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the script fails.
    pub fn exec_file(&self, path: &Path) -> Result<()> {
        let full_path = match &self.script_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };
        let source = std::fs::read_to_string(&full_path)
            .with_context(|| format!("Failed to read Lua file: {}", full_path.display()))?;

        self.lua
            .load(&source)
            .set_name(full_path.to_string_lossy())
            .exec()
            .map_err(|e| anyhow!("Failed to execute Lua file {}: {e}", full_path.display()))?;

        log::debug!("Loaded Lua file: {}", full_path.display());
        Ok(())
    }

    /// Run `source` and convert its first return value to a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk fails to compile or raises.
    pub fn eval(&self, source: &str) -> Result<Reply> {
        let value: Value = self
            .lua
            .load(source)
            .set_name("eval")
            .eval()
            .map_err(|e| anyhow!("{e}"))?;
        Ok(value_to_reply(&value, 0))
    }
}

/// Convert a Lua value to a reply.
///
/// Strings become bulk replies and numbers integers (floats truncated).
/// `true` is `:1` and `false` nil. A table with an `err` or `ok` string
/// field becomes an error or status reply; any other table is read as a
/// sequence and becomes an array.
fn value_to_reply(value: &Value, depth: usize) -> Reply {
    match value {
        Value::String(s) => Reply::Bulk(s.as_bytes().to_vec()),
        Value::Integer(n) => Reply::Integer(*n),
        Value::Number(n) => Reply::Integer(n.trunc() as i64),
        Value::Boolean(true) => Reply::Integer(1),
        Value::Table(t) if depth < MAX_REPLY_DEPTH => table_to_reply(t, depth),
        Value::Error(e) => Reply::error(format!("ERR {e}")),
        _ => Reply::Nil,
    }
}

fn table_to_reply(table: &Table, depth: usize) -> Reply {
    if let Ok(Some(msg)) = table.get::<Option<String>>("err") {
        return Reply::Error(msg);
    }
    if let Ok(Some(status)) = table.get::<Option<String>>("ok") {
        return Reply::Status(status);
    }
    let items = table
        .sequence_values::<Value>()
        .map_while(Result::ok)
        .map(|v| value_to_reply(&v, depth + 1))
        .collect();
    Reply::Array(items)
}
