/// Server implementation for the rs_ptybridge backend
use axum::{Router, http::Method, routing::get};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::{app_state::AppState, handlers};

/// Build the application router with routes
pub fn build_router(state: AppState) -> Router {
    // Browser clients may be served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "rs_ptybridge" }))
        .route("/health", get(handlers::rest::health_check))
        .route("/ws", get(handlers::websocket::websocket_handler))
        .nest("/api", api_routes())
        .layer(cors)
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/session", get(handlers::rest::get_session))
}

/// Bind the configured address and serve until Ctrl+C / SIGTERM.
pub async fn run_server_with_graceful_shutdown(state: AppState) -> Result<(), std::io::Error> {
    let addr = state
        .config
        .socket_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server running on http://{}", listener.local_addr()?);
    info!("WebSocket endpoint available at ws://{}/ws", listener.local_addr()?);

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    serve(listener, state).await
}

/// Serve on an already bound listener until the shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    let shutdown = state.shutdown.clone();
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown..."),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::pty::mock_pty::MockPtyFactory;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn start() -> (AppState, SocketAddr) {
        let state = AppState::new(BridgeConfig::default(), Arc::new(MockPtyFactory::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state.clone()));
        (state, addr)
    }

    /// Minimal HTTP/1.1 exchange; returns the whole response as text.
    async fn request(addr: SocketAddr, path: &str, connection: &str, extra_headers: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let head = format!(
            "GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: {connection}\r\n{extra_headers}\r\n"
        );
        stream.write_all(head.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .expect("response in time")
            .unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, addr) = start().await;

        let response = request(addr, "/health", "close", "").await;

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains(r#""status":"ok""#), "{response}");
        state.shutdown.cancel();
    }

    #[tokio::test]
    async fn session_endpoint_reflects_the_slot() {
        let (state, addr) = start().await;

        let response = request(addr, "/api/session", "close", "").await;
        assert!(response.starts_with("HTTP/1.1 404"), "{response}");

        let slot = state.try_claim_client().unwrap();
        let response = request(addr, "/api/session", "close", "").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains(&format!(r#""id":"{}""#, slot.id())), "{response}");
        assert!(response.contains(r#""state":"idle""#), "{response}");
        assert!(response.contains(r#""connectedAt":"#), "{response}");
        state.shutdown.cancel();
    }

    #[tokio::test]
    async fn second_client_is_refused() {
        let (state, addr) = start().await;
        let _slot = state.try_claim_client().unwrap();

        let response = request(
            addr,
            "/ws",
            "Upgrade, close",
            "Upgrade: websocket\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 409"), "{response}");
        state.shutdown.cancel();
    }

    /// Masked client frame; payloads stay under 126 bytes.
    fn client_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, byte)| byte ^ mask[i % 4]));
        frame
    }

    /// Next unmasked server frame as (opcode, payload).
    async fn server_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let opcode = stream.read_u8().await.unwrap() & 0x0f;
        let len = match stream.read_u8().await.unwrap() & 0x7f {
            126 => stream.read_u16().await.unwrap() as usize,
            127 => stream.read_u64().await.unwrap() as usize,
            len => len as usize,
        };
        let mut payload = vec![0; len];
        stream.read_exact(&mut payload).await.unwrap();
        (opcode, payload)
    }

    #[tokio::test]
    async fn websocket_skips_control_frames_and_relays_input() {
        let factory = Arc::new(MockPtyFactory::new());
        let state = AppState::new(BridgeConfig::default(), factory.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let head = format!(
            "GET /ws HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        );
        stream.write_all(head.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        while !response.ends_with(b"\r\n\r\n") {
            response.push(stream.read_u8().await.unwrap());
        }
        let response = String::from_utf8_lossy(&response).into_owned();
        assert!(response.starts_with("HTTP/1.1 101"), "{response}");

        stream.write_all(&client_frame(0x9, b"heartbeat")).await.unwrap();
        stream.write_all(&client_frame(0x1, br#"{"type":"ready"}"#)).await.unwrap();
        stream.write_all(&client_frame(0x2, b"ls\r")).await.unwrap();

        let echoed = timeout(Duration::from_secs(5), async {
            loop {
                match server_frame(&mut stream).await {
                    (0x2, payload) => break payload,
                    _ => continue,
                }
            }
        })
        .await
        .expect("echo in time");
        assert_eq!(echoed, b"ls\r".to_vec());
        assert_eq!(factory.spawn_count(), 1);

        stream.write_all(&client_frame(0x8, b"")).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while state.has_client() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("slot released after close");
        assert!(!factory.last_control().unwrap().is_alive());
        state.shutdown.cancel();
    }
}
