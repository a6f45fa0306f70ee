/// Application state management for the rs_ptybridge server
mod app_state;
mod client;

pub use app_state::AppState;
pub use client::{ClientContext, ClientSlot};
