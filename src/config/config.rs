/// Configuration data structures for rs_ptybridge
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::pty::Geometry;

/// Top-level bridge configuration. Every section is optional in the file.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub terminal: TerminalConfig,
    pub shell: ShellConfig,
    pub logging: LoggingConfig,
}

/// HTTP / WebSocket listener
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Geometry the shell starts with when the client has not reported one yet.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    pub columns: u16,
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            columns: Geometry::DEFAULT.columns(),
            rows: Geometry::DEFAULT.rows(),
        }
    }
}

/// Shell configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Executable to run. Chosen per platform when absent.
    pub command: Option<String>,

    pub args: Vec<String>,

    /// Falls back to the user's home directory, then the bridge's cwd.
    pub working_directory: Option<PathBuf>,

    /// Added on top of the inherited environment. TERM and COLORTERM are
    /// always overridden.
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
    /// Directory for daily-rolling log files. Console only when absent.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

impl BridgeConfig {
    /// Reject values that would only fail later, at bind or spawn time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.parse::<IpAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.host must be an IP address, got {:?}",
                self.server.host
            )));
        }
        if Geometry::new(self.terminal.columns, self.terminal.rows).is_none() {
            return Err(ConfigError::Invalid(format!(
                "terminal size must be at least 1x1, got {}x{}",
                self.terminal.columns, self.terminal.rows
            )));
        }
        if let Some(command) = &self.shell.command {
            if command.trim().is_empty() {
                return Err(ConfigError::Invalid("shell.command must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Geometry used for a spawn when the client never sent a resize.
    pub fn initial_geometry(&self) -> Geometry {
        Geometry::new(self.terminal.columns, self.terminal.rows).unwrap_or_default()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server.host: {}", e)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}
