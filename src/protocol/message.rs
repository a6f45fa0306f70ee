/// Wire messages exchanged with the client surface
use serde::{Deserialize, Serialize};

use crate::protocol::ConnectionError;
use crate::pty::{ExitCode, Geometry};

/// JSON text frames sent by the client, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ready,
    Input { data: String },
    Resize { columns: u16, rows: u16 },
}

/// A validated client message, as consumed by the session bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// The client has finished setting up its display.
    Ready,
    /// Raw bytes destined for the shell's input.
    Keystrokes(Vec<u8>),
    Resize(Geometry),
}

impl TryFrom<ClientMessage> for InboundEvent {
    type Error = ConnectionError;

    fn try_from(message: ClientMessage) -> Result<Self, Self::Error> {
        match message {
            ClientMessage::Ready => Ok(InboundEvent::Ready),
            ClientMessage::Input { data } => Ok(InboundEvent::Keystrokes(data.into_bytes())),
            ClientMessage::Resize { columns, rows } => Geometry::new(columns, rows)
                .map(InboundEvent::Resize)
                .ok_or_else(|| {
                    ConnectionError::Deserialization(format!(
                        "resize with zero dimension: {}x{}",
                        columns, rows
                    ))
                }),
        }
    }
}

impl InboundEvent {
    /// Decode a JSON text frame.
    pub fn from_text(text: &str) -> Result<Self, ConnectionError> {
        let message: ClientMessage = serde_json::from_str(text)
            .map_err(|e| ConnectionError::Deserialization(format!("{}: {:?}", e, text)))?;
        message.try_into()
    }

    /// Binary frames carry keystrokes verbatim.
    pub fn from_binary(data: Vec<u8>) -> Self {
        InboundEvent::Keystrokes(data)
    }
}

/// Messages the bridge emits towards the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Terminal output bytes, forwarded unmodified.
    Output(Vec<u8>),
    /// A failure the client should display, e.g. the shell could not start.
    Error(String),
}

impl ServerMessage {
    /// The synthetic line written after the shell exits.
    pub fn exit_notice(code: ExitCode) -> Self {
        ServerMessage::Output(format!("\r\n[Process exited with code {}]\r\n", code).into_bytes())
    }
}

/// JSON body of an error text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ErrorFrame {
    Error { message: String },
}

impl ErrorFrame {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorFrame::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, ConnectionError> {
        serde_json::to_string(self).map_err(|e| ConnectionError::Serialization(e.to_string()))
    }
}
