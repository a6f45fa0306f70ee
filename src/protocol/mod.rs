/// Client transport abstraction and wire messages
mod channel_connection;
mod connection;
mod message;
mod websocket_connection;

pub use channel_connection::{ChannelClient, ChannelConnection};
pub use connection::{ConnectionError, ConnectionResult, ConnectionType, TerminalConnection};
pub use message::{ClientMessage, ErrorFrame, InboundEvent, ServerMessage};
pub use websocket_connection::WebSocketConnection;
