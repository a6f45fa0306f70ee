/// Application state shared by every handler
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::client::{ClientCell, ClientContext, ClientSlot, lock_client};
use crate::config::BridgeConfig;
use crate::pty::PtyFactory;

/// Application state containing shared data across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<BridgeConfig>,
    /// Backend used to start shells
    pub factory: Arc<dyn PtyFactory>,
    /// Cancelled when the host shuts down; every session kills its shell
    pub shutdown: CancellationToken,
    /// Session tasks the host waits for before exiting
    pub tasks: TaskTracker,
    client: ClientCell,
}

impl AppState {
    /// Create a new instance of AppState with configuration
    pub fn new(config: BridgeConfig, factory: Arc<dyn PtyFactory>) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            client: Arc::new(Mutex::new(None)),
        }
    }

    /// Admit a new client if none is connected.
    pub fn try_claim_client(&self) -> Option<ClientSlot> {
        let mut client = lock_client(&self.client);
        if let Some(existing) = client.as_ref() {
            warn!("Rejecting client: {} is already connected", existing.id);
            return None;
        }

        let id = Uuid::new_v4().to_string();
        *client = Some(ClientContext::new(id.clone()));
        info!("Client {} claimed the session slot", id);
        Some(ClientSlot::new(id, self.client.clone()))
    }

    /// Snapshot of the connected client, if any
    pub fn current_client(&self) -> Option<ClientContext> {
        lock_client(&self.client).clone()
    }

    pub fn has_client(&self) -> bool {
        lock_client(&self.client).is_some()
    }
}
