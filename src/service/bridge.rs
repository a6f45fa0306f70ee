/// Session bridge: readiness handshake, event dispatch and output relay for
/// the single shell owned by one client context.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ShellConfig;
use crate::protocol::{InboundEvent, ServerMessage};
use crate::pty::{AsyncPty, ExitCode, Geometry, PtyError, PtyFactory, SpawnedPty, spawn_shell};
use crate::service::BridgeError;

/// How long output still in flight is relayed after the shell has exited.
pub const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Waiting for the client's ready signal.
    Idle,
    /// Shell running, bytes flowing both ways.
    Active,
    /// Shell gone (exited, killed, or never started). Final.
    Terminated,
}

impl BridgeState {
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeState::Idle => "idle",
            BridgeState::Active => "active",
            BridgeState::Terminated => "terminated",
        }
    }
}

/// Snapshot published on every state, geometry or exit change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub geometry: Geometry,
    pub pid: Option<u32>,
    pub exit_code: Option<ExitCode>,
}

/// Work for the task that owns the PTY handle, applied in arrival order.
#[derive(Debug)]
enum PtyCommand {
    Write(Vec<u8>),
    Resize(Geometry),
}

/// The running shell as seen from the bridge. The PTY handle itself lives in
/// the input task so a slow write never holds up the caller.
struct Session {
    pid: Option<u32>,
    input: mpsc::UnboundedSender<PtyCommand>,
    /// Makes the input task drop what it is doing and release the PTY.
    release: CancellationToken,
    input_task: JoinHandle<Result<(), PtyError>>,
    relay: JoinHandle<()>,
}

pub struct SessionBridge {
    id: String,
    factory: Arc<dyn PtyFactory>,
    shell: ShellConfig,
    geometry: Geometry,
    handshake_done: bool,
    session: Option<Session>,
    outbound: mpsc::Sender<ServerMessage>,
    status: Arc<watch::Sender<BridgeStatus>>,
}

impl SessionBridge {
    /// Create an Idle bridge. Everything for the client is pushed to `outbound`.
    pub fn new(
        id: impl Into<String>,
        factory: Arc<dyn PtyFactory>,
        shell: ShellConfig,
        geometry: Geometry,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let (status, _) = watch::channel(BridgeStatus {
            state: BridgeState::Idle,
            geometry,
            pid: None,
            exit_code: None,
        });
        Self {
            id: id.into(),
            factory,
            shell,
            geometry,
            handshake_done: false,
            session: None,
            outbound,
            status: Arc::new(status),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> BridgeState {
        self.status.borrow().state
    }

    pub fn status(&self) -> BridgeStatus {
        self.status.borrow().clone()
    }

    /// Most recent geometry reported by the client, or the initial one.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeStatus> {
        self.status.subscribe()
    }

    /// Apply one client message. Messages must be passed in arrival order.
    ///
    /// Only the ready signal waits (for the spawn). Keystrokes and resizes
    /// are queued for the PTY and return at once.
    pub async fn handle_event(&mut self, event: InboundEvent) -> Result<(), BridgeError> {
        match event {
            InboundEvent::Ready => self.on_ready().await,
            InboundEvent::Keystrokes(data) => {
                self.write(data);
                Ok(())
            }
            InboundEvent::Resize(geometry) => {
                self.resize(geometry);
                Ok(())
            }
        }
    }

    async fn on_ready(&mut self) -> Result<(), BridgeError> {
        if self.handshake_done {
            debug!(
                "Bridge {}: ready signal ignored in state {:?}",
                self.id,
                self.state()
            );
            return Ok(());
        }
        // Consumed before spawning so a failed spawn is never retried.
        self.handshake_done = true;

        info!("Bridge {}: client ready, spawning shell at {}", self.id, self.geometry);
        let spawned = match spawn_shell(self.factory.as_ref(), &self.shell, self.geometry).await {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("Bridge {}: shell spawn failed: {}", self.id, e);
                self.status.send_modify(|status| status.state = BridgeState::Terminated);
                let _ = self
                    .outbound
                    .send(ServerMessage::Error(format!("Failed to start shell: {}", e)))
                    .await;
                return Err(BridgeError::Spawn(e));
            }
        };

        let SpawnedPty { handle, output, exit } = spawned;
        let pid = handle.pid();
        let geometry = handle.geometry();
        self.status.send_modify(|status| {
            status.state = BridgeState::Active;
            status.pid = pid;
            status.geometry = geometry;
        });

        let (input, commands) = mpsc::unbounded_channel();
        let release = CancellationToken::new();
        let input_task = tokio::spawn(pump_input(
            self.id.clone(),
            handle,
            commands,
            release.clone(),
        ));
        let relay = tokio::spawn(relay_output(
            self.id.clone(),
            output,
            exit,
            self.outbound.clone(),
            self.status.clone(),
            release.clone(),
        ));
        self.session = Some(Session {
            pid,
            input,
            release,
            input_task,
            relay,
        });

        info!("Bridge {}: session active (pid {:?})", self.id, pid);
        Ok(())
    }

    /// Queue a command for the running shell. False when there is none.
    fn send_command(&self, command: PtyCommand) -> bool {
        if self.state() != BridgeState::Active {
            return false;
        }
        match &self.session {
            Some(session) => session.input.send(command).is_ok(),
            None => false,
        }
    }

    fn write(&mut self, data: Vec<u8>) {
        let len = data.len();
        if self.send_command(PtyCommand::Write(data)) {
            trace!("Bridge {}: queued {} input bytes", self.id, len);
        } else {
            debug!("Bridge {}: dropping {} input bytes, no running session", self.id, len);
        }
    }

    fn resize(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        self.status.send_modify(|status| status.geometry = geometry);

        if self.send_command(PtyCommand::Resize(geometry)) {
            debug!("Bridge {}: resizing to {}", self.id, geometry);
        } else {
            debug!(
                "Bridge {}: recorded size {} without a running session",
                self.id, geometry
            );
        }
    }

    /// Stop relaying and kill the shell immediately, even while a write is
    /// still pending. No exit line is sent. Idempotent.
    pub async fn kill(&mut self) -> Result<(), BridgeError> {
        let result = match self.session.take() {
            Some(session) => {
                info!("Bridge {}: killing session (pid {:?})", self.id, session.pid);
                session.relay.abort();
                session.release.cancel();
                match session.input_task.await {
                    Ok(result) => result,
                    Err(e) => Err(PtyError::BackgroundTask(format!("PTY input task failed: {}", e))),
                }
            }
            None => Ok(()),
        };
        if self.handshake_done {
            self.status.send_modify(|status| status.state = BridgeState::Terminated);
        }
        Ok(result?)
    }
}

impl Drop for SessionBridge {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.relay.abort();
            // The input task kills a still-running shell on its way out.
            session.release.cancel();
        }
    }
}

async fn apply(pty: &mut dyn AsyncPty, command: PtyCommand) -> Result<(), PtyError> {
    match command {
        PtyCommand::Write(data) => pty.write(&data).await,
        PtyCommand::Resize(geometry) => pty.resize(geometry).await,
    }
}

/// Own the PTY handle: apply queued writes and resizes one at a time, then
/// kill and release the PTY once `release` fires or the queue closes.
async fn pump_input(
    id: String,
    mut pty: Box<dyn AsyncPty>,
    mut commands: mpsc::UnboundedReceiver<PtyCommand>,
    release: CancellationToken,
) -> Result<(), PtyError> {
    loop {
        let command = tokio::select! {
            biased;
            _ = release.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        let applied = tokio::select! {
            biased;
            // A write blocked on a full tty must not delay the kill.
            _ = release.cancelled() => break,
            applied = apply(pty.as_mut(), command) => applied,
        };
        if let Err(e) = applied {
            warn!("Bridge {}: PTY rejected input: {}", id, e);
        }
    }

    debug!("Bridge {}: releasing PTY (pid {:?})", id, pty.pid());
    pty.kill().await
}

/// Forward shell output to the client until the shell exits, then append
/// the exit line as the very last message and release the PTY.
async fn relay_output(
    id: String,
    mut output: mpsc::Receiver<Vec<u8>>,
    mut exit: oneshot::Receiver<ExitCode>,
    outbound: mpsc::Sender<ServerMessage>,
    status: Arc<watch::Sender<BridgeStatus>>,
    release: CancellationToken,
) {
    let mut output_open = true;

    let code = loop {
        tokio::select! {
            biased;
            chunk = output.recv(), if output_open => match chunk {
                Some(chunk) => {
                    if outbound.send(ServerMessage::Output(chunk)).await.is_err() {
                        debug!("Bridge {}: client gone, relay stopped", id);
                        return;
                    }
                }
                None => {
                    debug!("Bridge {}: output stream ended", id);
                    output_open = false;
                }
            },
            code = &mut exit => break code.unwrap_or_else(|_| {
                warn!("Bridge {}: exit notification lost, reporting unknown code", id);
                ExitCode::UNKNOWN
            }),
        }
    };

    if output_open {
        let drained = timeout(EXIT_DRAIN_GRACE, async {
            while let Some(chunk) = output.recv().await {
                if outbound.send(ServerMessage::Output(chunk)).await.is_err() {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!("Bridge {}: output still open after exit, stopped draining", id);
        }
    }

    info!("Bridge {}: shell exited with code {}", id, code);
    status.send_modify(|status| {
        status.state = BridgeState::Terminated;
        status.exit_code = Some(code);
    });
    release.cancel();
    let _ = outbound.send(ServerMessage::exit_notice(code)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::mock_pty::MockPtyFactory;
    use tokio::sync::mpsc::error::TryRecvError;

    fn bridge_with(factory: Arc<MockPtyFactory>) -> (SessionBridge, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let bridge = SessionBridge::new("test", factory, ShellConfig::default(), Geometry::DEFAULT, tx);
        (bridge, rx)
    }

    async fn next_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("message expected")
            .expect("channel open")
    }

    /// Input is applied on its own task; poll until it has landed.
    async fn eventually(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition reached");
    }

    async fn wait_for_state(bridge: &SessionBridge, state: BridgeState) {
        let mut status = bridge.subscribe();
        timeout(Duration::from_secs(5), status.wait_for(|s| s.state == state))
            .await
            .expect("state reached")
            .expect("bridge alive");
    }

    #[tokio::test]
    async fn starts_idle_without_spawning() {
        let factory = Arc::new(MockPtyFactory::new());
        let (bridge, _rx) = bridge_with(factory.clone());

        assert_eq!(bridge.state(), BridgeState::Idle);
        assert_eq!(factory.spawn_count(), 0);
    }

    #[tokio::test]
    async fn repeated_ready_spawns_once() {
        let factory = Arc::new(MockPtyFactory::new());
        let (mut bridge, _rx) = bridge_with(factory.clone());

        for _ in 0..3 {
            bridge.handle_event(InboundEvent::Ready).await.unwrap();
        }

        assert_eq!(factory.spawn_count(), 1);
        assert_eq!(bridge.state(), BridgeState::Active);
        assert!(bridge.status().pid.is_some());
    }

    #[tokio::test]
    async fn input_reaches_shell_and_output_reaches_client() {
        let factory = Arc::new(MockPtyFactory::new());
        let (mut bridge, mut rx) = bridge_with(factory.clone());

        bridge.handle_event(InboundEvent::Ready).await.unwrap();
        bridge
            .handle_event(InboundEvent::Keystrokes(b"echo hi\n".to_vec()))
            .await
            .unwrap();

        assert_eq!(next_message(&mut rx).await, ServerMessage::Output(b"echo hi\n".to_vec()));
        assert_eq!(factory.last_control().unwrap().written(), b"echo hi\n".to_vec());
    }

    #[tokio::test]
    async fn output_order_is_preserved() {
        let factory = Arc::new(MockPtyFactory::silent());
        let (mut bridge, mut rx) = bridge_with(factory.clone());
        bridge.handle_event(InboundEvent::Ready).await.unwrap();
        let control = factory.last_control().unwrap();

        let chunks: Vec<Vec<u8>> = (0..20).map(|i| format!("chunk-{i};").into_bytes()).collect();
        for chunk in &chunks {
            control.emit(chunk).await;
        }

        for chunk in chunks {
            assert_eq!(next_message(&mut rx).await, ServerMessage::Output(chunk));
        }
    }

    #[tokio::test]
    async fn input_before_ready_is_dropped() {
        let factory = Arc::new(MockPtyFactory::new());
        let (mut bridge, mut rx) = bridge_with(factory.clone());

        bridge
            .handle_event(InboundEvent::Keystrokes(b"early".to_vec()))
            .await
            .unwrap();
        bridge.handle_event(InboundEvent::Ready).await.unwrap();

        assert!(factory.last_control().unwrap().written().is_empty());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn resize_before_ready_sets_spawn_geometry() {
        let factory = Arc::new(MockPtyFactory::new());
        let (mut bridge, _rx) = bridge_with(factory.clone());
        let geometry = Geometry::new(120, 40).unwrap();

        bridge.handle_event(InboundEvent::Resize(geometry)).await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Idle);
        assert_eq!(bridge.status().geometry, geometry);

        bridge.handle_event(InboundEvent::Ready).await.unwrap();

        assert_eq!(factory.last_config().unwrap().geometry, geometry);
        assert_eq!(factory.last_control().unwrap().geometry(), geometry);
    }

    #[tokio::test]
    async fn resize_after_spawn_reaches_pty() {
        let factory = Arc::new(MockPtyFactory::new());
        let (mut bridge, _rx) = bridge_with(factory.clone());
        bridge.handle_event(InboundEvent::Ready).await.unwrap();

        for (columns, rows) in [(120, 40), (1, 1), (300, 100), (120, 40)] {
            let geometry = Geometry::new(columns, rows).unwrap();
            bridge.handle_event(InboundEvent::Resize(geometry)).await.unwrap();
            assert_eq!(bridge.geometry(), geometry);
        }
        let control = factory.last_control().unwrap();
        eventually(|| control.resizes().len() == 4).await;
        assert_eq!(control.geometry(), Geometry::new(120, 40).unwrap());
    }

    #[tokio::test]
    async fn exit_sends_exactly_one_final_line() {
        let factory = Arc::new(MockPtyFactory::silent());
        let (mut bridge, mut rx) = bridge_with(factory.clone());
        bridge.handle_event(InboundEvent::Ready).await.unwrap();
        let control = factory.last_control().unwrap();

        control.emit(b"last words").await;
        control.exit(0);

        assert_eq!(next_message(&mut rx).await, ServerMessage::Output(b"last words".to_vec()));
        assert_eq!(
            next_message(&mut rx).await,
            ServerMessage::Output(b"\r\n[Process exited with code 0]\r\n".to_vec())
        );

        wait_for_state(&bridge, BridgeState::Terminated).await;
        assert_eq!(bridge.status().exit_code, Some(ExitCode::new(0)));
        eventually(|| control.is_released()).await;

        bridge
            .handle_event(InboundEvent::Keystrokes(b"ignored\n".to_vec()))
            .await
            .unwrap();
        bridge
            .handle_event(InboundEvent::Resize(Geometry::new(90, 20).unwrap()))
            .await
            .unwrap();
        bridge.handle_event(InboundEvent::Ready).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(control.written().is_empty());
        assert_eq!(factory.spawn_count(), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let factory = Arc::new(MockPtyFactory::silent());
        let (mut bridge, mut rx) = bridge_with(factory.clone());
        bridge.handle_event(InboundEvent::Ready).await.unwrap();

        factory.last_control().unwrap().exit(127);

        assert_eq!(
            next_message(&mut rx).await,
            ServerMessage::Output(b"\r\n[Process exited with code 127]\r\n".to_vec())
        );
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_and_never_retried() {
        let factory = Arc::new(MockPtyFactory::failing("No such file or directory"));
        let (mut bridge, mut rx) = bridge_with(factory.clone());

        let err = bridge.handle_event(InboundEvent::Ready).await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn(_)));

        match next_message(&mut rx).await {
            ServerMessage::Error(message) => assert!(message.contains("No such file")),
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(bridge.state(), BridgeState::Terminated);

        bridge.handle_event(InboundEvent::Ready).await.unwrap();
        bridge
            .handle_event(InboundEvent::Keystrokes(b"ls\n".to_vec()))
            .await
            .unwrap();
        assert_eq!(factory.spawn_count(), 1);
    }

    #[tokio::test]
    async fn kill_terminates_without_exit_line() {
        let factory = Arc::new(MockPtyFactory::new());
        let (mut bridge, mut rx) = bridge_with(factory.clone());
        bridge.handle_event(InboundEvent::Ready).await.unwrap();
        let control = factory.last_control().unwrap();

        bridge.kill().await.unwrap();
        bridge.kill().await.unwrap();

        assert!(!control.is_alive());
        assert!(control.is_released());
        assert_eq!(bridge.state(), BridgeState::Terminated);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn pending_write_blocks_neither_output_nor_kill() {
        let factory = Arc::new(MockPtyFactory::stalled());
        let (mut bridge, mut rx) = bridge_with(factory.clone());
        bridge.handle_event(InboundEvent::Ready).await.unwrap();
        let control = factory.last_control().unwrap();

        for keys in [&b"first"[..], b"second", b"third"] {
            timeout(
                Duration::from_secs(1),
                bridge.handle_event(InboundEvent::Keystrokes(keys.to_vec())),
            )
            .await
            .expect("input is queued, not awaited")
            .unwrap();
        }
        eventually(|| control.written() == b"first".to_vec()).await;

        control.emit(b"still flowing").await;
        assert_eq!(next_message(&mut rx).await, ServerMessage::Output(b"still flowing".to_vec()));

        timeout(Duration::from_secs(5), bridge.kill())
            .await
            .expect("kill does not wait for the write")
            .unwrap();
        assert!(!control.is_alive());
        assert!(control.is_released());
        assert_eq!(control.written(), b"first".to_vec());
    }

    #[tokio::test]
    async fn queued_input_keeps_arrival_order() {
        let factory = Arc::new(MockPtyFactory::silent());
        let (mut bridge, _rx) = bridge_with(factory.clone());
        bridge.handle_event(InboundEvent::Ready).await.unwrap();

        let mut expected = Vec::new();
        for i in 0..50 {
            let keys = format!("k{i};").into_bytes();
            expected.extend_from_slice(&keys);
            bridge.handle_event(InboundEvent::Keystrokes(keys)).await.unwrap();
        }

        let control = factory.last_control().unwrap();
        eventually(|| control.written().len() == expected.len()).await;
        assert_eq!(control.written(), expected);
    }

    #[tokio::test]
    async fn kill_before_ready_stays_idle() {
        let factory = Arc::new(MockPtyFactory::new());
        let (mut bridge, _rx) = bridge_with(factory.clone());

        bridge.kill().await.unwrap();

        assert_eq!(bridge.state(), BridgeState::Idle);
        assert_eq!(factory.spawn_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn real_shell_echo_and_exit() {
        let shell = ShellConfig {
            command: Some("/bin/sh".to_string()),
            working_directory: Some(std::env::temp_dir()),
            ..ShellConfig::default()
        };
        let (tx, mut rx) = mpsc::channel(256);
        let mut bridge = SessionBridge::new(
            "real",
            Arc::new(crate::pty::PortablePtyFactory),
            shell,
            Geometry::DEFAULT,
            tx,
        );

        bridge.handle_event(InboundEvent::Ready).await.unwrap();
        bridge
            .handle_event(InboundEvent::Keystrokes(b"echo BRIDGE_$((20 + 22))\n".to_vec()))
            .await
            .unwrap();

        let mut seen = Vec::new();
        while !String::from_utf8_lossy(&seen).contains("BRIDGE_42") {
            match next_message(&mut rx).await {
                ServerMessage::Output(chunk) => seen.extend_from_slice(&chunk),
                other => panic!("unexpected message: {other:?}"),
            }
        }

        bridge
            .handle_event(InboundEvent::Keystrokes(b"exit 0\n".to_vec()))
            .await
            .unwrap();

        let exit_line = ServerMessage::exit_notice(ExitCode::new(0));
        let mut last = None;
        while let Ok(Some(message)) = timeout(Duration::from_secs(10), rx.recv()).await {
            let done = message == exit_line;
            last = Some(message);
            if done {
                break;
            }
        }
        assert_eq!(last, Some(exit_line));
        wait_for_state(&bridge, BridgeState::Terminated).await;
    }
}
