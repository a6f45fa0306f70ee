/// Configuration file loader for rs_ptybridge
use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{BridgeConfig, ConfigError};

/// Prefix for environment overrides, e.g. `PTY_BRIDGE__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "PTY_BRIDGE";

const ENV_SEPARATOR: &str = "__";

/// `[shell.environment]` as written in the file, keys untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvironmentOnly {
    shell: ShellEnvironment,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShellEnvironment {
    environment: BTreeMap<String, String>,
}

/// Layers the TOML file and environment overrides into a [`BridgeConfig`]
pub struct ConfigLoader {
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::with_env_prefix(ENV_PREFIX)
    }

    pub fn with_env_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: prefix.into(),
        }
    }

    /// Load configuration from `config_path`, or from [`default_config_path`]
    /// when none is given.
    ///
    /// A missing default file is not an error: built-in defaults are used.
    /// A missing file that was asked for explicitly is.
    pub fn load_config(&self, config_path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
        let (path, required) = match config_path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let contents = if path.exists() {
            info!("Loading configuration from file: {:?}", path);
            Some(std::fs::read_to_string(&path)?)
        } else if required {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        } else {
            info!("No configuration file at {:?}, using defaults", path);
            None
        };

        let mut builder = Config::builder();
        if let Some(contents) = &contents {
            builder = builder.add_source(File::from_str(contents, FileFormat::Toml));
        }
        let mut config: BridgeConfig = builder
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        // `config` lowercases every key; variable names are case-sensitive.
        if let Some(contents) = &contents {
            let file: EnvironmentOnly = toml::from_str(contents)?;
            config.shell.environment = file.shell.environment;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from string content, without environment overrides.
    pub fn parse_config(&self, content: &str) -> Result<BridgeConfig, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        info!("Configuration parsed successfully");
        Ok(config)
    }
}

/// `config.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.toml")
}
