/// WebSocket connection implementation for TerminalConnection trait
use std::fmt::Debug;
use tracing::{debug, error, trace};

use axum::extract::ws::Message::{Binary, Close, Ping, Pong, Text};
use axum::extract::ws::WebSocket;
use futures_util::StreamExt;

use crate::protocol::{
    ConnectionError, ConnectionResult, ConnectionType, ErrorFrame, InboundEvent, TerminalConnection,
};

/// Client surface over an upgraded axum WebSocket
pub struct WebSocketConnection {
    socket: WebSocket,
    id: String,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, id: impl Into<String>) -> Self {
        Self {
            socket,
            id: id.into(),
        }
    }
}

impl Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.id)
            .finish()
    }
}

#[async_trait::async_trait]
impl TerminalConnection for WebSocketConnection {
    async fn send_output(&mut self, data: &[u8]) -> ConnectionResult<()> {
        trace!("Sending {} output bytes to client {}", data.len(), self.id);
        self.socket.send(Binary(data.to_vec())).await.map_err(|e| {
            error!("Failed to send output to client {}: {}", self.id, e);
            ConnectionError::WebSocket(e.to_string())
        })
    }

    async fn send_error(&mut self, message: &str) -> ConnectionResult<()> {
        let frame = ErrorFrame::new(message).to_json()?;
        self.socket
            .send(Text(frame))
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }

    async fn receive(&mut self) -> Option<ConnectionResult<InboundEvent>> {
        while let Some(msg) = self.socket.next().await {
            match msg {
                Ok(Text(text)) => {
                    debug!("WebSocket received text message: {:?}", text);
                    return Some(InboundEvent::from_text(&text));
                }
                Ok(Binary(bin)) => {
                    trace!("WebSocket received binary message, length: {}", bin.len());
                    return Some(Ok(InboundEvent::from_binary(bin)));
                }
                // axum answers pings itself
                Ok(Ping(_)) | Ok(Pong(_)) => {}
                Ok(Close(frame)) => {
                    debug!("WebSocket {} received close message: {:?}", self.id, frame);
                    return None;
                }
                Err(e) => {
                    error!("WebSocket receive error: {}", e);
                    return Some(Err(ConnectionError::WebSocket(e.to_string())));
                }
            }
        }
        None
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        // Peer may already be gone; closing twice is harmless.
        match self.socket.send(Close(None)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("WebSocket {} close: {}", self.id, e);
                Err(ConnectionError::ConnectionClosed)
            }
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::WebSocket
    }
}
