//! Shell selection and spawn-time environment resolution.
//!
//! Everything here is a pure function of its inputs except
//! [`build_pty_config`], which reads the host environment once per spawn.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ShellConfig;
use crate::pty::{Geometry, PtyConfig};

/// Terminal type advertised to the child.
pub const TERM_NAME: &str = "xterm-256color";

/// Color capability advertised to the child.
pub const COLOR_SUPPORT: &str = "truecolor";

/// Variable consulted for the user's preferred shell on Unix-like systems.
pub const SHELL_VAR: &str = "SHELL";

/// OS family, used only to pick the default shell and home variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Unix
        }
    }

    /// Environment variable naming the user's home directory.
    pub fn home_var(self) -> &'static str {
        match self {
            Platform::Windows => "USERPROFILE",
            Platform::MacOs | Platform::Unix => "HOME",
        }
    }
}

/// Pick the shell executable when none is configured.
///
/// Windows always gets PowerShell. Elsewhere a non-empty `$SHELL` wins,
/// falling back to zsh on macOS and bash on other Unix systems.
pub fn choose_shell(platform: Platform, env_shell: Option<&str>) -> String {
    if platform == Platform::Windows {
        return "powershell.exe".to_string();
    }

    match env_shell.map(str::trim).filter(|shell| !shell.is_empty()) {
        Some(shell) => shell.to_string(),
        None if platform == Platform::MacOs => "/bin/zsh".to_string(),
        None => "/bin/bash".to_string(),
    }
}

/// Working directory priority: configured > home > the bridge's own cwd.
pub fn resolve_working_directory(
    configured: Option<&Path>,
    home: Option<&str>,
    current: Option<PathBuf>,
) -> Option<PathBuf> {
    configured
        .map(Path::to_path_buf)
        .or_else(|| home.filter(|home| !home.is_empty()).map(PathBuf::from))
        .or(current)
}

/// Environment overrides for the child, applied on top of the inherited
/// host environment. The terminal capability variables always come last so
/// configuration cannot weaken them.
pub fn build_environment(extra: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = extra
        .iter()
        .filter(|(key, _)| key.as_str() != "TERM" && key.as_str() != "COLORTERM")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    env.push(("TERM".to_string(), TERM_NAME.to_string()));
    env.push(("COLORTERM".to_string(), COLOR_SUPPORT.to_string()));
    env
}

/// Resolve the full spawn configuration from the shell section of the
/// bridge configuration and the current host environment.
pub fn build_pty_config(shell: &ShellConfig, geometry: Geometry) -> PtyConfig {
    let platform = Platform::current();

    let command = match &shell.command {
        Some(command) => command.clone(),
        None => choose_shell(platform, std::env::var(SHELL_VAR).ok().as_deref()),
    };

    let home = std::env::var(platform.home_var()).ok();
    let cwd = resolve_working_directory(
        shell.working_directory.as_deref(),
        home.as_deref(),
        std::env::current_dir().ok(),
    );

    debug!(
        "Resolved shell {:?} (platform: {:?}, cwd: {:?}, geometry: {})",
        command, platform, cwd, geometry
    );

    PtyConfig {
        command,
        args: shell.args.clone(),
        geometry,
        env: build_environment(&shell.environment),
        cwd,
    }
}
