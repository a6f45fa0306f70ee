/// Terminal session handler: drives one client connection through its bridge
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app_state::{AppState, ClientSlot};
use crate::protocol::{ConnectionResult, ServerMessage, TerminalConnection};
use crate::service::{BridgeError, SessionBridge};

/// Messages buffered between the bridge and a slow client.
const OUTBOUND_CAPACITY: usize = 1024;

/// Longest wait for the close frame to go out once the shell is dead.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle a terminal session using the TerminalConnection trait.
///
/// Runs until the client goes away or the host shuts down, then kills the
/// shell, closes the connection and frees the client slot.
pub async fn handle_terminal_session(
    mut connection: impl TerminalConnection,
    state: AppState,
    slot: ClientSlot,
) {
    let conn_id = connection.id().to_string();
    info!(
        "New terminal connection: {} (Type: {:?})",
        conn_id,
        connection.connection_type()
    );

    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let mut bridge = SessionBridge::new(
        conn_id.clone(),
        state.factory.clone(),
        state.config.shell.clone(),
        state.config.initial_geometry(),
        outbound_tx,
    );
    slot.attach(bridge.subscribe());

    loop {
        select! {
            biased;

            _ = state.shutdown.cancelled() => {
                info!("Host shutting down, closing session {}", conn_id);
                break;
            }

            Some(message) = outbound_rx.recv() => {
                // A client that stopped reading must not hold up shutdown.
                let sent = select! {
                    biased;
                    _ = state.shutdown.cancelled() => {
                        info!("Host shutting down, closing session {}", conn_id);
                        break;
                    }
                    sent = forward(&mut connection, message) => sent,
                };
                if let Err(e) = sent {
                    error!("Failed to send to session {}: {}", conn_id, e);
                    break;
                }
            }

            received = connection.receive() => {
                match received {
                    // Input is only queued here, so output keeps flowing
                    // while the shell is slow to read it.
                    Some(Ok(event)) => match bridge.handle_event(event).await {
                        Ok(()) => {}
                        // Already reported to the client; the connection stays up
                        // so the error remains visible.
                        Err(BridgeError::Spawn(e)) => {
                            warn!("Session {} has no shell: {}", conn_id, e);
                        }
                        Err(e) => {
                            warn!("Session {} event failed: {}", conn_id, e);
                        }
                    },
                    Some(Err(e)) if e.is_recoverable() => {
                        warn!("Dropping malformed message from session {}: {}", conn_id, e);
                    }
                    Some(Err(e)) => {
                        error!("Connection error for session {}: {}", conn_id, e);
                        break;
                    }
                    None => {
                        info!("Connection closed by client for session {}", conn_id);
                        break;
                    }
                }
            }
        }
    }

    info!("Cleaning up session {}", conn_id);
    if let Err(e) = bridge.kill().await {
        error!("Failed to kill shell for session {}: {}", conn_id, e);
    }
    match tokio::time::timeout(CLOSE_TIMEOUT, connection.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Closing connection {}: {}", conn_id, e),
        Err(_) => debug!("Closing connection {}: peer not reading, gave up", conn_id),
    }
    drop(slot);

    info!("Terminal session {} closed", conn_id);
}

async fn forward(
    connection: &mut impl TerminalConnection,
    message: ServerMessage,
) -> ConnectionResult<()> {
    match message {
        ServerMessage::Output(data) => connection.send_output(&data).await,
        ServerMessage::Error(text) => connection.send_error(&text).await,
    }
}
