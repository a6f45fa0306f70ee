//! Single-session terminal bridge: spawns a shell on a pseudo-terminal once
//! the client reports ready, and relays keystrokes, resizes and output
//! between the two over a WebSocket.

pub mod api;
pub mod app_state;
pub mod config;
pub mod handlers;
pub mod protocol;
pub mod pty;
pub mod server;
pub mod service;
