//! Node configuration.
//!
//! Read from a JSON file, then overridden by environment variables, then by
//! command-line flags in the binary. Network timeouts are fixed constants
//! and deliberately absent here.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::{fs, io};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PORT;

/// Configuration for a node.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Address to listen on.
    pub bind: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Directory for Lua scripts; `init.lua` there runs at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            script_dir: None,
        }
    }
}

impl Config {
    /// Load from `path` (defaults if absent) and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file: {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read config file: {}", path.display()))
            }
        }
    }

    /// Apply `NODEWIRE_BIND`, `NODEWIRE_PORT` and `NODEWIRE_SCRIPT_DIR`.
    /// Unparseable values are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = var("NODEWIRE_BIND") {
            self.bind = bind;
        }

        if let Some(port) = var("NODEWIRE_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => log::warn!("Ignoring invalid NODEWIRE_PORT: {port}"),
            }
        }

        if let Some(dir) = var("NODEWIRE_SCRIPT_DIR") {
            self.script_dir = Some(PathBuf::from(dir));
        }
    }

    /// Resolve the listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if `bind` does not resolve.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        (self.bind.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Cannot resolve bind address {}", self.bind))?
            .next()
            .with_context(|| format!("No address for {}", self.bind))
    }

    /// Write the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}
