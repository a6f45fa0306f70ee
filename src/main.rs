/// Main entry point for the rs_ptybridge server
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use rs_ptybridge::app_state::AppState;
use rs_ptybridge::config::{ConfigLoader, init_logging};
use rs_ptybridge::pty::{PortablePtyFactory, PtyFactory};
use rs_ptybridge::server::run_server_with_graceful_shutdown;

/// Sessions get this long to kill their shells after shutdown starts.
const SESSION_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay a local shell to a WebSocket client")]
struct Cli {
    /// Configuration file (default: ./config.toml, optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.host
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides server.port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let mut config = ConfigLoader::new()
        .load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate().context("Invalid command line override")?;

    // Must stay alive until exit so buffered log lines are flushed
    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    let factory = Arc::new(PortablePtyFactory);
    info!("Using {} PTY backend", factory.name());
    let state = AppState::new(config, factory);

    let result = run_server_with_graceful_shutdown(state.clone()).await;

    // Server errors end the process too; sessions still get to kill their shells.
    state.shutdown.cancel();
    state.tasks.close();
    if tokio::time::timeout(SESSION_TEARDOWN_TIMEOUT, state.tasks.wait())
        .await
        .is_err()
    {
        warn!("Timed out waiting for sessions to close");
    }

    result.context("Server error")?;
    info!("Shutdown complete");
    Ok(())
}
