/// Server management for the rs_ptybridge backend
mod server;

pub use server::{build_router, run_server_with_graceful_shutdown, serve};
