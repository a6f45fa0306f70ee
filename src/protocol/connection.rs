/// Terminal connection trait abstracting the client transport
use std::fmt::Debug;

use thiserror::Error;

use crate::protocol::InboundEvent;

/// 连接错误类型
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// WebSocket 错误
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 消息序列化错误
    #[error("Message serialization error: {0}")]
    Serialization(String),

    /// 消息反序列化错误
    #[error("Message deserialization error: {0}")]
    Deserialization(String),
}

impl ConnectionError {
    /// A bad message is dropped; the connection itself stays usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ConnectionError::Deserialization(_))
    }
}

/// 连接结果类型
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// One client surface attached to one session bridge
#[async_trait::async_trait]
pub trait TerminalConnection: Send + Debug {
    /// Send terminal output bytes, unmodified
    async fn send_output(&mut self, data: &[u8]) -> ConnectionResult<()>;

    /// Send an error for the client to display
    async fn send_error(&mut self, message: &str) -> ConnectionResult<()>;

    /// Receive the next client message.
    /// Returns None once the client has gone away.
    async fn receive(&mut self) -> Option<ConnectionResult<InboundEvent>>;

    /// Close the connection
    async fn close(&mut self) -> ConnectionResult<()>;

    /// Get the connection ID
    fn id(&self) -> &str;

    /// Get the connection type
    fn connection_type(&self) -> ConnectionType;
}

/// Connection types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// WebSocket connection
    WebSocket,
    /// In-process channel pair
    Channel,
}
