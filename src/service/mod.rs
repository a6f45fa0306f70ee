/// Service layer: the session bridge and the per-connection loop driving it
mod bridge;
mod error;
mod session_handler;

pub use bridge::{BridgeState, BridgeStatus, EXIT_DRAIN_GRACE, SessionBridge};
pub use error::BridgeError;
pub use session_handler::handle_terminal_session;
