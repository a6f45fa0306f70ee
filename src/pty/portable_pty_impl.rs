use crate::pty::pty_trait::{AsyncPty, ExitCode, Geometry, PtyConfig, PtyError, PtyFactory, SpawnedPty};
use async_trait::async_trait;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, trace, warn};

/// Bytes requested per blocking read on the PTY master.
pub const PTY_READ_CHUNK: usize = 4096;

/// Output chunks buffered before the reader thread applies backpressure.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

type SharedMaster = Arc<Mutex<Option<Box<dyn MasterPty + Send>>>>;
type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;
type SharedKiller = Arc<Mutex<Box<dyn ChildKiller + Send + Sync>>>;

/// Shell attached to a native pseudo-terminal through `portable-pty`.
///
/// Two background threads are started per instance: one drains the master
/// side into the output channel, the other blocks in `wait()` and publishes
/// the exit code. Neither depends on the other.
pub struct PortablePty {
    geometry: Geometry,
    pid: Option<u32>,
    master: SharedMaster,
    writer: SharedWriter,
    killer: SharedKiller,
    exited: Arc<AtomicBool>,
    released: bool,
}

impl PortablePty {
    /// Open a PTY pair and spawn the configured command on its slave side.
    /// Blocking; call through [`PortablePtyFactory`] from async code.
    pub fn spawn(config: &PtyConfig) -> Result<SpawnedPty, PtyError> {
        info!(
            "PortablePty: spawning {:?} with args {:?} at {} (cwd: {:?})",
            config.command, config.args, config.geometry, config.cwd
        );

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(config.geometry))
            .map_err(|e| PtyError::CreateFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("PortablePty: failed to spawn {:?}: {}", config.command, e);
            PtyError::SpawnFailed(format!("{}: {}", config.command, e))
        })?;

        // Only the child keeps the slave open, so EOF on the master follows its exit.
        drop(pair.slave);

        let pid = child.process_id();
        let mut killer = child.clone_killer();

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = killer.kill();
                return Err(PtyError::CreateFailed(format!(
                    "Failed to attach PTY master: {}",
                    e
                )));
            }
        };

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));

        if let Err(e) = start_reader(reader, output_tx) {
            let _ = killer.kill();
            return Err(e);
        }

        let exited_clone = exited.clone();
        let waiter = thread::Builder::new()
            .name("pty-exit-waiter".to_string())
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) if status.signal().is_some() => {
                        debug!("PTY child terminated by signal {:?}", status.signal());
                        ExitCode::UNKNOWN
                    }
                    Ok(status) => {
                        ExitCode::new(i32::try_from(status.exit_code()).unwrap_or(i32::MAX))
                    }
                    Err(e) => {
                        warn!("PTY child wait failed: {}", e);
                        ExitCode::UNKNOWN
                    }
                };
                exited_clone.store(true, Ordering::SeqCst);
                info!("PTY child exited with code {}", code);
                // Receiver may already be gone if the session was torn down.
                let _ = exit_tx.send(code);
            });
        if let Err(e) = waiter {
            let _ = killer.kill();
            return Err(PtyError::BackgroundTask(format!(
                "Failed to start exit waiter: {}",
                e
            )));
        }

        info!("PortablePty: shell spawned, pid {:?}", pid);

        let pty = Self {
            geometry: config.geometry,
            pid,
            master: Arc::new(Mutex::new(Some(pair.master))),
            writer: Arc::new(Mutex::new(Some(writer))),
            killer: Arc::new(Mutex::new(killer)),
            exited,
            released: false,
        };

        Ok(SpawnedPty {
            handle: Box::new(pty),
            output: output_rx,
            exit: exit_rx,
        })
    }
}

fn pty_size(geometry: Geometry) -> PtySize {
    PtySize {
        rows: geometry.rows(),
        cols: geometry.columns(),
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Drain the master side on a dedicated thread. Blocks on the OS read and on
/// a full channel; chunks are never dropped or reordered.
fn start_reader(
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), PtyError> {
    thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let mut buffer = [0u8; PTY_READ_CHUNK];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        debug!("PTY EOF reached, stopping reader");
                        break;
                    }
                    Ok(n) => {
                        trace!("PTY reader: read {} bytes", n);
                        if output_tx.blocking_send(buffer[..n].to_vec()).is_err() {
                            debug!("PTY reader: receiver dropped, stopping");
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Linux reports EIO once the slave side is gone.
                        debug!("PTY reader stopped: {}", e);
                        break;
                    }
                }
            }
        })
        .map(|_| ())
        .map_err(|e| PtyError::BackgroundTask(format!("Failed to start PTY reader: {}", e)))
}

fn lock_error<T>(what: &str, e: std::sync::PoisonError<T>) -> PtyError {
    PtyError::LockAcquisition(format!("{} lock poisoned: {}", what, e))
}

#[async_trait]
impl AsyncPty for PortablePty {
    async fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        if !self.is_alive() {
            debug!("PortablePty: dropping {} bytes written after exit", data.len());
            return Ok(());
        }

        let writer = self.writer.clone();
        let exited = self.exited.clone();
        let data = data.to_vec();

        spawn_blocking(move || {
            let mut guard = writer.lock().map_err(|e| lock_error("writer", e))?;
            let Some(writer) = guard.as_mut() else {
                return Ok(());
            };
            match writer.write_all(&data).and_then(|_| writer.flush()) {
                Ok(()) => {
                    trace!("PortablePty: wrote {} bytes", data.len());
                    Ok(())
                }
                // Lost a race with the child exiting; same as writing after exit.
                Err(e) if exited.load(Ordering::SeqCst) => {
                    debug!("PortablePty: write after exit ignored: {}", e);
                    Ok(())
                }
                Err(e) => Err(PtyError::Io(e)),
            }
        })
        .await
        .map_err(|e| PtyError::BackgroundTask(format!("PTY write task failed: {}", e)))?
    }

    async fn resize(&mut self, geometry: Geometry) -> Result<(), PtyError> {
        debug!("PortablePty: resizing to {}", geometry);

        let master = self.master.clone();
        spawn_blocking(move || {
            let guard = master.lock().map_err(|e| lock_error("master", e))?;
            match guard.as_ref() {
                Some(master) => master
                    .resize(pty_size(geometry))
                    .map_err(|e| PtyError::ResizeFailed(e.to_string())),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| PtyError::BackgroundTask(format!("PTY resize task failed: {}", e)))??;

        self.geometry = geometry;
        Ok(())
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        !self.released && !self.exited.load(Ordering::SeqCst)
    }

    async fn kill(&mut self) -> Result<(), PtyError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        info!("PortablePty: killing child process (pid {:?})", self.pid);

        let killer = self.killer.clone();
        let master = self.master.clone();
        let writer = self.writer.clone();
        let exited = self.exited.clone();

        spawn_blocking(move || release(&killer, &master, &writer, &exited))
            .await
            .map_err(|e| PtyError::BackgroundTask(format!("PTY kill task failed: {}", e)))
    }
}

/// Kill the child if still running, then drop both master handles so the
/// descriptor is closed.
fn release(killer: &SharedKiller, master: &SharedMaster, writer: &SharedWriter, exited: &AtomicBool) {
    if !exited.load(Ordering::SeqCst) {
        match killer.lock() {
            Ok(mut killer) => {
                if let Err(e) = killer.kill() {
                    debug!("PTY kill error (may already be dead): {}", e);
                }
            }
            Err(e) => error!("Failed to acquire killer lock: {}", e),
        }
    }
    match writer.try_lock() {
        Ok(mut writer) => {
            writer.take();
        }
        // A write is still blocked on a full tty; it fails once the slave side closes.
        Err(TryLockError::WouldBlock) => debug!("PTY writer busy, left to the pending write"),
        Err(TryLockError::Poisoned(poisoned)) => {
            poisoned.into_inner().take();
        }
    }
    if let Ok(mut master) = master.lock() {
        master.take();
    }
}

impl Drop for PortablePty {
    fn drop(&mut self) {
        if !self.released {
            debug!("Dropping live PortablePty, killing child (pid {:?})", self.pid);
            self.released = true;
            release(&self.killer, &self.master, &self.writer, &self.exited);
        }
    }
}

// ================ Factory ================

/// Production backend based on `portable-pty`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortablePtyFactory;

#[async_trait]
impl PtyFactory for PortablePtyFactory {
    async fn spawn(&self, config: &PtyConfig) -> Result<SpawnedPty, PtyError> {
        // Opening the PTY and forking are blocking calls.
        let config = config.clone();
        spawn_blocking(move || PortablePty::spawn(&config))
            .await
            .map_err(|e| PtyError::BackgroundTask(format!("Failed to create PTY: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "portable-pty"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sh_config(geometry: Geometry) -> PtyConfig {
        PtyConfig {
            command: "/bin/sh".to_string(),
            args: vec![],
            geometry,
            env: vec![
                ("TERM".to_string(), "xterm-256color".to_string()),
                ("PS1".to_string(), "$ ".to_string()),
            ],
            cwd: Some(std::env::temp_dir()),
        }
    }

    /// Collect output until `needle` shows up or the deadline passes.
    async fn read_until(output: &mut mpsc::Receiver<Vec<u8>>, needle: &str) -> String {
        let mut seen = Vec::new();
        let _ = timeout(Duration::from_secs(10), async {
            while let Some(chunk) = output.recv().await {
                seen.extend_from_slice(&chunk);
                if String::from_utf8_lossy(&seen).contains(needle) {
                    break;
                }
            }
        })
        .await;
        String::from_utf8_lossy(&seen).into_owned()
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let mut spawned = PortablePtyFactory
            .spawn(&sh_config(Geometry::DEFAULT))
            .await
            .expect("spawn should succeed");

        spawned
            .handle
            .write(b"echo PTY_MARKER_$((40 + 2))\n")
            .await
            .expect("write should succeed");

        let seen = read_until(&mut spawned.output, "PTY_MARKER_42").await;
        assert!(seen.contains("PTY_MARKER_42"), "got: {seen:?}");

        spawned.handle.kill().await.expect("kill should succeed");
    }

    #[tokio::test]
    async fn resize_is_visible_to_the_shell() {
        let mut spawned = PortablePtyFactory
            .spawn(&sh_config(Geometry::DEFAULT))
            .await
            .expect("spawn should succeed");

        let geometry = Geometry::new(120, 40).unwrap();
        spawned.handle.resize(geometry).await.expect("resize should succeed");
        assert_eq!(spawned.handle.geometry(), geometry);

        spawned
            .handle
            .write(b"echo SIZE_$(stty size | tr ' ' x)\n")
            .await
            .unwrap();

        let seen = read_until(&mut spawned.output, "SIZE_40x120").await;
        assert!(seen.contains("SIZE_40x120"), "got: {seen:?}");

        spawned.handle.kill().await.unwrap();
    }

    #[tokio::test]
    async fn exit_code_is_reported_and_output_ends() {
        let mut spawned = PortablePtyFactory
            .spawn(&sh_config(Geometry::DEFAULT))
            .await
            .unwrap();

        spawned.handle.write(b"exit 3\n").await.unwrap();

        let code = timeout(Duration::from_secs(10), spawned.exit)
            .await
            .expect("exit should fire")
            .expect("exit sender kept until exit");
        assert_eq!(code, ExitCode::new(3));
        assert!(!spawned.handle.is_alive());

        let drained = timeout(Duration::from_secs(10), async {
            while spawned.output.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "output stream should close after exit");
    }

    #[tokio::test]
    async fn write_after_exit_is_silently_dropped() {
        let mut spawned = PortablePtyFactory
            .spawn(&sh_config(Geometry::DEFAULT))
            .await
            .unwrap();

        spawned.handle.write(b"exit 0\n").await.unwrap();
        let code = timeout(Duration::from_secs(10), spawned.exit).await.unwrap().unwrap();
        assert_eq!(code, ExitCode::new(0));

        for payload in [&b"ls\n"[..], b"", b"\x03\x04"] {
            assert!(spawned.handle.write(payload).await.is_ok());
        }
    }

    #[tokio::test]
    async fn kill_is_idempotent_and_fires_exit() {
        let mut spawned = PortablePtyFactory
            .spawn(&sh_config(Geometry::DEFAULT))
            .await
            .unwrap();
        assert!(spawned.handle.is_alive());
        assert!(spawned.handle.pid().is_some());

        spawned.handle.kill().await.unwrap();
        spawned.handle.kill().await.unwrap();
        assert!(!spawned.handle.is_alive());

        let code = timeout(Duration::from_secs(10), spawned.exit).await.unwrap();
        assert!(code.is_ok());

        // Resizing a released PTY only records the geometry.
        let geometry = Geometry::new(90, 20).unwrap();
        spawned.handle.resize(geometry).await.unwrap();
        assert_eq!(spawned.handle.geometry(), geometry);
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let mut config = sh_config(Geometry::DEFAULT);
        config.command = "/definitely/not/a/shell".to_string();

        let err = PortablePtyFactory.spawn(&config).await.unwrap_err();
        assert!(err.is_spawn_error(), "unexpected error: {err}");
    }
}
