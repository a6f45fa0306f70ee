/// Configuration module for the rs_ptybridge server
mod config;
mod config_loader;
mod error;
mod logging;

pub use self::config::*;
pub use self::config_loader::{ConfigLoader, ENV_PREFIX, default_config_path};
pub use error::ConfigError;
pub use logging::init_logging;
