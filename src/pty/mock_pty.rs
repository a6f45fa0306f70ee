/// In-memory PTY backend used by the bridge and handler tests.
///
/// A [`MockPty`] echoes everything written to it back on its output channel,
/// the way a shell in cooked mode would. The paired [`MockPtyControl`] lets a
/// test inject output and end the "process" with any exit code.
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::pty::pty_trait::{AsyncPty, ExitCode, Geometry, PtyConfig, PtyError, PtyFactory, SpawnedPty};

const MOCK_PID: u32 = 4242;

struct MockState {
    geometry: Geometry,
    written: Vec<u8>,
    resizes: Vec<Geometry>,
    alive: bool,
    released: bool,
    echo: bool,
    stall_writes: bool,
    output: Option<mpsc::Sender<Vec<u8>>>,
    exit: Option<oneshot::Sender<ExitCode>>,
}

impl MockState {
    /// Mark the process dead, close the output stream and fire exit once.
    fn finish(&mut self, code: ExitCode) {
        self.alive = false;
        self.output.take();
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(code);
        }
    }
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    // A panicking test thread must not hide the state from the others.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MockPty {
    state: SharedState,
}

#[async_trait]
impl AsyncPty for MockPty {
    async fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let (echo_to, stall) = {
            let mut state = lock(&self.state);
            if !state.alive {
                debug!("MockPty: dropping {} bytes written after exit", data.len());
                return Ok(());
            }
            state.written.extend_from_slice(data);
            let echo_to = if state.echo { state.output.clone() } else { None };
            (echo_to, state.stall_writes)
        };

        if stall {
            // Like a tty whose input queue never drains.
            std::future::pending::<()>().await;
        }
        if let Some(output) = echo_to {
            let _ = output.send(data.to_vec()).await;
        }
        Ok(())
    }

    async fn resize(&mut self, geometry: Geometry) -> Result<(), PtyError> {
        let mut state = lock(&self.state);
        state.geometry = geometry;
        state.resizes.push(geometry);
        Ok(())
    }

    fn geometry(&self) -> Geometry {
        lock(&self.state).geometry
    }

    fn pid(&self) -> Option<u32> {
        Some(MOCK_PID)
    }

    fn is_alive(&self) -> bool {
        lock(&self.state).alive
    }

    async fn kill(&mut self) -> Result<(), PtyError> {
        let mut state = lock(&self.state);
        state.released = true;
        if state.alive {
            info!("MockPty: killed");
            state.finish(ExitCode::UNKNOWN);
        }
        Ok(())
    }
}

/// Test-side handle onto a spawned [`MockPty`].
#[derive(Clone)]
pub struct MockPtyControl {
    state: SharedState,
}

impl MockPtyControl {
    /// Push a chunk onto the output stream as if the shell printed it.
    pub async fn emit(&self, data: &[u8]) {
        let output = lock(&self.state).output.clone();
        if let Some(output) = output {
            let _ = output.send(data.to_vec()).await;
        }
    }

    /// Terminate the process with `code`. Later calls have no effect.
    pub fn exit(&self, code: i32) {
        lock(&self.state).finish(ExitCode::new(code));
    }

    /// Every byte accepted by `write`, in order.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn geometry(&self) -> Geometry {
        lock(&self.state).geometry
    }

    pub fn resizes(&self) -> Vec<Geometry> {
        lock(&self.state).resizes.clone()
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.state).alive
    }

    /// True once the owner has let go of the PTY (killed it or cleaned up
    /// after exit).
    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }
}

/// Factory producing [`MockPty`] instances and remembering how it was called.
#[derive(Default)]
pub struct MockPtyFactory {
    spawns: AtomicUsize,
    failure: Option<String>,
    silent: bool,
    stall_writes: bool,
    last_config: Mutex<Option<PtyConfig>>,
    last_control: Mutex<Option<MockPtyControl>>,
}

impl MockPtyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every spawn attempt fails with `message`, like a missing executable.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Spawned PTYs do not echo their input.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Spawned PTYs accept the first write and never complete it.
    pub fn stalled() -> Self {
        Self {
            stall_writes: true,
            ..Self::default()
        }
    }

    /// Number of spawn attempts, successful or not.
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<PtyConfig> {
        self.last_config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last_control(&self) -> Option<MockPtyControl> {
        self.last_control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl PtyFactory for MockPtyFactory {
    async fn spawn(&self, config: &PtyConfig) -> Result<SpawnedPty, PtyError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        *self
            .last_config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(config.clone());

        if let Some(message) = &self.failure {
            return Err(PtyError::SpawnFailed(format!("{}: {}", config.command, message)));
        }

        let (output_tx, output_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(MockState {
            geometry: config.geometry,
            written: Vec::new(),
            resizes: Vec::new(),
            alive: true,
            released: false,
            echo: !self.silent,
            stall_writes: self.stall_writes,
            output: Some(output_tx),
            exit: Some(exit_tx),
        }));

        *self
            .last_control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(MockPtyControl {
            state: state.clone(),
        });

        info!("MockPtyFactory: spawned {:?} at {}", config.command, config.geometry);
        Ok(SpawnedPty {
            handle: Box::new(MockPty { state }),
            output: output_rx,
            exit: exit_rx,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
