/// Data Transfer Objects (DTOs) for REST API endpoints
use serde::{Deserialize, Serialize};

use crate::app_state::ClientContext;
use crate::service::BridgeState;

/// Response DTO for the health check
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Response DTO for the current client session
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Connection ID of the client
    pub id: String,

    /// idle, active or terminated
    pub state: String,

    /// Terminal columns
    pub columns: u16,

    /// Terminal rows
    pub rows: u16,

    /// Shell process ID while one has been spawned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Exit code once the shell has exited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Connection timestamp (UNIX epoch in seconds)
    pub connected_at: u64,
}

impl SessionResponse {
    /// `fallback` supplies the size when the client's bridge is not attached yet.
    pub fn from_client(client: &ClientContext, fallback: (u16, u16)) -> Self {
        match client.bridge_status() {
            Some(status) => Self {
                id: client.id.clone(),
                state: status.state.as_str().to_string(),
                columns: status.geometry.columns(),
                rows: status.geometry.rows(),
                pid: status.pid,
                exit_code: status.exit_code.map(|code| code.code()),
                connected_at: client.connected_at,
            },
            None => Self {
                id: client.id.clone(),
                state: BridgeState::Idle.as_str().to_string(),
                columns: fallback.0,
                rows: fallback.1,
                pid: None,
                exit_code: None,
                connected_at: client.connected_at,
            },
        }
    }
}

/// Generic error response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error flag
    pub error: bool,

    /// Error message
    pub message: String,

    /// Optional error code
    pub code: Option<u16>,
}

impl ErrorResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            code: Some(code),
        }
    }
}
