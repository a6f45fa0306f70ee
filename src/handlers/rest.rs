/// REST API handlers for inspecting the bridge
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;

use crate::{
    api::dto::{ErrorResponse, HealthResponse, SessionResponse},
    app_state::AppState,
};

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse::ok()))
}

/// The connected client and its shell, if any
pub async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.current_client() {
        Some(client) => {
            let fallback = (state.config.terminal.columns, state.config.terminal.rows);
            let response = SessionResponse::from_client(&client, fallback);
            debug!("Session query: {} is {}", response.id, response.state);
            (StatusCode::OK, Json(response)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(404, "No client connected")),
        )
            .into_response(),
    }
}
