use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// ================ Geometry and exit codes ================

/// Terminal window size in character cells. Both dimensions are always >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    columns: u16,
    rows: u16,
}

impl Geometry {
    /// Size used until the client reports its first real measurement.
    pub const DEFAULT: Geometry = Geometry {
        columns: 80,
        rows: 30,
    };

    /// Returns `None` when either dimension is zero.
    pub fn new(columns: u16, rows: u16) -> Option<Self> {
        if columns == 0 || rows == 0 {
            return None;
        }
        Some(Self { columns, rows })
    }

    pub fn columns(&self) -> u16 {
        self.columns
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// Exit code reported by the exit notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Sentinel for a child killed by a signal or whose status could not be read.
    pub const UNKNOWN: ExitCode = ExitCode(-1);

    pub fn new(code: i32) -> Self {
        Self(code)
    }

    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ================ Config and errors ================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub geometry: Geometry,
    /// Applied on top of the inherited host environment, in order.
    pub env: Vec<(String, String)>,
    pub cwd: Option<std::path::PathBuf>,
}

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("Failed to create PTY: {0}")]
    CreateFailed(String),
    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Resize failed: {0}")]
    ResizeFailed(String),
    #[error("Lock acquisition error: {0}")]
    LockAcquisition(String),
    #[error("Background task error: {0}")]
    BackgroundTask(String),
}

impl PtyError {
    /// True for the failures that abort a spawn attempt (missing executable,
    /// PTY allocation refused).
    pub fn is_spawn_error(&self) -> bool {
        matches!(self, PtyError::CreateFailed(_) | PtyError::SpawnFailed(_))
    }
}

// ================ Core traits ================

/// Control side of a running shell attached to a pseudo-terminal.
///
/// Output and exit are not part of this trait: they are delivered through the
/// independent channels of [`SpawnedPty`] so a reader blocked on output never
/// holds up writes, resizes or the exit notification.
#[async_trait]
pub trait AsyncPty: Send + Sync {
    /// Forward raw bytes to the shell's input. Bytes written after the child
    /// has exited are dropped silently.
    async fn write(&mut self, data: &[u8]) -> Result<(), PtyError>;

    /// Update the window size metadata of the pseudo-terminal.
    async fn resize(&mut self, geometry: Geometry) -> Result<(), PtyError>;

    /// Geometry most recently applied.
    fn geometry(&self) -> Geometry;

    /// Child process id, if the platform reports one.
    fn pid(&self) -> Option<u32>;

    /// False once the child has exited or been killed.
    fn is_alive(&self) -> bool;

    /// Terminate the child immediately and release the PTY. Idempotent.
    async fn kill(&mut self) -> Result<(), PtyError>;
}

/// A freshly spawned shell: its control handle plus the two notification
/// channels.
pub struct SpawnedPty {
    pub handle: Box<dyn AsyncPty>,
    /// Output chunks in production order. Closes when the PTY reaches EOF.
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Fires exactly once when the child terminates.
    pub exit: oneshot::Receiver<ExitCode>,
}

impl fmt::Debug for SpawnedPty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedPty")
            .field("pid", &self.handle.pid())
            .field("geometry", &self.handle.geometry())
            .finish()
    }
}

/// PTY backend factory
#[async_trait]
pub trait PtyFactory: Send + Sync {
    /// Spawn a shell on a new pseudo-terminal.
    async fn spawn(&self, config: &PtyConfig) -> Result<SpawnedPty, PtyError>;

    /// Backend name, for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rejects_zero_dimensions() {
        assert_eq!(Geometry::new(0, 24), None);
        assert_eq!(Geometry::new(80, 0), None);
        assert_eq!(Geometry::new(0, 0), None);
    }

    #[test]
    fn geometry_accepts_positive_dimensions() {
        for (columns, rows) in [(1, 1), (80, 24), (120, 40), (u16::MAX, u16::MAX)] {
            let geometry = Geometry::new(columns, rows).expect("valid geometry");
            assert_eq!(geometry.columns(), columns);
            assert_eq!(geometry.rows(), rows);
        }
    }

    #[test]
    fn default_geometry_is_80_by_30() {
        assert_eq!(Geometry::default(), Geometry::new(80, 30).unwrap());
        assert_eq!(Geometry::default().to_string(), "80x30");
    }

    #[test]
    fn unknown_exit_code_is_negative_sentinel() {
        assert_eq!(ExitCode::UNKNOWN.code(), -1);
        assert_eq!(ExitCode::new(0).to_string(), "0");
        assert_eq!(ExitCode::new(130).to_string(), "130");
    }

    #[test]
    fn spawn_errors_are_classified() {
        assert!(PtyError::CreateFailed("no pty".into()).is_spawn_error());
        assert!(PtyError::SpawnFailed("no shell".into()).is_spawn_error());
        assert!(!PtyError::ResizeFailed("bad fd".into()).is_spawn_error());
    }
}
