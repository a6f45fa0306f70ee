/// The single client context admitted by the host
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::info;

use crate::service::BridgeStatus;

/// Registration of the connected client
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Unique connection ID
    pub id: String,

    /// Connection timestamp (UNIX epoch in seconds)
    pub connected_at: u64,

    /// Live view of the client's bridge, once it exists
    pub status: Option<watch::Receiver<BridgeStatus>>,
}

impl ClientContext {
    pub fn new(id: String) -> Self {
        let connected_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self {
            id,
            connected_at,
            status: None,
        }
    }

    /// Current bridge status, if a bridge has been attached.
    pub fn bridge_status(&self) -> Option<BridgeStatus> {
        self.status.as_ref().map(|status| status.borrow().clone())
    }
}

pub(crate) type ClientCell = Arc<Mutex<Option<ClientContext>>>;

pub(crate) fn lock_client(cell: &ClientCell) -> MutexGuard<'_, Option<ClientContext>> {
    cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Proof of holding the client slot. Dropping it frees the slot for the
/// next connection.
#[derive(Debug)]
pub struct ClientSlot {
    id: String,
    cell: ClientCell,
}

impl ClientSlot {
    pub(crate) fn new(id: String, cell: ClientCell) -> Self {
        Self { id, cell }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publish the bridge status of this client for inspection.
    pub fn attach(&self, status: watch::Receiver<BridgeStatus>) {
        if let Some(client) = lock_client(&self.cell).as_mut() {
            if client.id == self.id {
                client.status = Some(status);
            }
        }
    }
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        let mut client = lock_client(&self.cell);
        if client.as_ref().is_some_and(|client| client.id == self.id) {
            client.take();
            info!("Client {} released the session slot", self.id);
        }
    }
}
