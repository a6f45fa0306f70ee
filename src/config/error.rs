/// Error types for configuration module
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Malformed TOML, or an environment override of the wrong type
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// Malformed TOML passed in directly
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration file exists but could not be read
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found at: {0}")]
    FileNotFound(String),

    /// Values that parse but cannot be used
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
