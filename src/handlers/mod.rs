/// HTTP and WebSocket route handlers
pub mod rest;
pub mod websocket;
