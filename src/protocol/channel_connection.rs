/// In-process transport: a pair of channels standing in for a client socket.
/// Used to drive the session handler without a network.
use std::fmt::Debug;
use tokio::sync::mpsc;

use crate::protocol::{
    ConnectionError, ConnectionResult, ConnectionType, InboundEvent, ServerMessage, TerminalConnection,
};

pub struct ChannelConnection {
    id: String,
    inbound: mpsc::Receiver<ConnectionResult<InboundEvent>>,
    outbound: mpsc::Sender<ServerMessage>,
    closed: bool,
}

/// The far end of a [`ChannelConnection`]: what a client would see.
pub struct ChannelClient {
    pub to_bridge: mpsc::Sender<ConnectionResult<InboundEvent>>,
    pub from_bridge: mpsc::Receiver<ServerMessage>,
}

impl ChannelConnection {
    pub fn pair(id: impl Into<String>) -> (Self, ChannelClient) {
        let (to_bridge, inbound) = mpsc::channel(64);
        let (outbound, from_bridge) = mpsc::channel(64);
        let connection = Self {
            id: id.into(),
            inbound,
            outbound,
            closed: false,
        };
        (connection, ChannelClient { to_bridge, from_bridge })
    }

    async fn deliver(&mut self, message: ServerMessage) -> ConnectionResult<()> {
        if self.closed {
            return Err(ConnectionError::ConnectionClosed);
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| ConnectionError::ConnectionClosed)
    }
}

impl Debug for ChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait::async_trait]
impl TerminalConnection for ChannelConnection {
    async fn send_output(&mut self, data: &[u8]) -> ConnectionResult<()> {
        self.deliver(ServerMessage::Output(data.to_vec())).await
    }

    async fn send_error(&mut self, message: &str) -> ConnectionResult<()> {
        self.deliver(ServerMessage::Error(message.to_string())).await
    }

    async fn receive(&mut self) -> Option<ConnectionResult<InboundEvent>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.closed = true;
        self.inbound.close();
        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Channel
    }
}
