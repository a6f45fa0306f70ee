use axum::{
    extract::State,
    extract::ws::{WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::{
    app_state::{AppState, ClientSlot},
    protocol::WebSocketConnection,
    service::handle_terminal_session,
};

/// Upgrade to a terminal session, or 409 while another client is connected.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }
    let Some(slot) = state.try_claim_client() else {
        return (StatusCode::CONFLICT, "A terminal session is already active").into_response();
    };

    info!("Upgrading client {} to WebSocket", slot.id());
    ws.on_upgrade(move |socket| handle_socket(socket, state, slot))
}

pub async fn handle_socket(socket: WebSocket, state: AppState, slot: ClientSlot) {
    let ws_connection = WebSocketConnection::new(socket, slot.id());
    let tasks = state.tasks.clone();

    // Tracked so shutdown waits for the shell to be killed.
    tasks
        .track_future(handle_terminal_session(ws_connection, state, slot))
        .await;
}
