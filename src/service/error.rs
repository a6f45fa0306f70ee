/// Error types for the service layer
use thiserror::Error;

use crate::protocol::ConnectionError;
use crate::pty::PtyError;

/// Service layer error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The shell could not be started. Never retried.
    #[error("Failed to start shell: {0}")]
    Spawn(PtyError),

    /// The PTY could not be killed or released
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
