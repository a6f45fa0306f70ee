use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{ConfigError, LoggingConfig};

const LOG_FILE_PREFIX: &str = "rs_ptybridge.log";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `logging.level`. When `logging.directory` is set a
/// daily-rolling file receives the same events; the returned guard flushes
/// it and must live until the process exits.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::Invalid(format!("logging.level {:?}: {}", config.level, e)))?;

    let (file_writer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let console_text = (!config.json).then(|| {
        fmt::layer()
            .with_thread_names(true)
            .with_target(true)
            .with_line_number(true)
    });
    let console_json = config.json.then(|| fmt::layer().json().with_thread_names(true));
    let file_layer = file_writer.map(|writer| fmt::layer().with_ansi(false).with_writer(writer));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        "Logging initialized (level: {}, json: {}, directory: {:?})",
        config.level,
        config.json,
        config.directory
    );
    Ok(guard)
}
