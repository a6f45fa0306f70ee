/// PTY (pseudo terminal) handling for the bridge.
/// A backend-agnostic trait plus the `portable-pty` backend and an in-memory
/// backend for tests.
mod pty_trait;
mod portable_pty_impl;
pub mod mock_pty;
pub mod shell;

pub use portable_pty_impl::{OUTPUT_CHANNEL_CAPACITY, PTY_READ_CHUNK, PortablePty, PortablePtyFactory};
pub use pty_trait::*;
pub use shell::build_pty_config;

use crate::config::ShellConfig;
use tracing::info;

/// Resolve the shell for this host and spawn it through `factory`.
pub async fn spawn_shell(
    factory: &dyn PtyFactory,
    shell: &ShellConfig,
    geometry: Geometry,
) -> Result<SpawnedPty, PtyError> {
    let config = build_pty_config(shell, geometry);
    info!(
        "Spawning {:?} via {} backend at {}",
        config.command,
        factory.name(),
        geometry
    );
    factory.spawn(&config).await
}
