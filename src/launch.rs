//! Spawning programs from slots.
//!
//! Menu commands and hotkeys run through `/bin/sh -c` in a new session, with
//! a per-slot environment so shells keep separate histories.  The session
//! id is what later ties a freshly mapped window back to the slot that
//! launched it: the window's `_NET_WM_PID` is resolved to its session
//! leader with [`Launcher::session_of`] and matched against the pid stored
//! in the slot.
//!
//! Named commands (media keys) are executables looked up in a `commands/`
//! directory and run directly with an optional argument.

use log::{debug, info, warn};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use crate::display::Time;

/// Directory searched for named commands when the user has none.
pub const SYSTEM_COMMAND_DIR: &str = "/usr/share/slotwm/commands";

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchKind {
    /// A shell command line, run with `/bin/sh -c` in a new session.
    Shell(String),
    /// An executable run directly, with at most one argument.
    Program { path: PathBuf, arg: Option<String> },
}

/// Per-slot environment handed to shell launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEnv {
    /// Timestamp of the event that caused the launch.
    pub startup_id: Time,
    pub slot: usize,
    /// Configuration directory holding histories and session files.
    pub state_dir: PathBuf,
}

impl SlotEnv {
    /// `DESKTOP_STARTUP_ID`, `HISTFILE` and `SESSION_PATH`.
    pub fn vars(&self) -> Vec<(String, String)> {
        let in_state_dir = |name: String| self.state_dir.join(name).to_string_lossy().into_owned();
        vec![
            ("DESKTOP_STARTUP_ID".into(), self.startup_id.to_string()),
            (
                "HISTFILE".into(),
                in_state_dir(format!("bash-history-{:02}", self.slot)),
            ),
            (
                "SESSION_PATH".into(),
                in_state_dir(format!("session-{:02}", self.slot)),
            ),
        ]
    }
}

/// A request to start a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub kind: LaunchKind,
    /// Set for launches attributed to a slot.
    pub env: Option<SlotEnv>,
}

impl LaunchRequest {
    pub fn shell(command: impl Into<String>, env: SlotEnv) -> Self {
        Self {
            kind: LaunchKind::Shell(command.into()),
            env: Some(env),
        }
    }

    pub fn program(path: PathBuf, arg: Option<String>) -> Self {
        Self {
            kind: LaunchKind::Program { path, arg },
            env: None,
        }
    }
}

/// A child that has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub pid: u32,
    /// Exit code, or `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Errors produced when starting a process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Process management used by the session.
pub trait Launcher {
    /// Start a process and return its pid.
    fn launch(&mut self, request: &LaunchRequest) -> Result<u32, LaunchError>;

    /// Collect every child that has exited since the last call.  Never
    /// blocks.
    fn reap(&mut self) -> Vec<Exit>;

    /// Session id of `pid`, if the process still exists.
    fn session_of(&self, pid: u32) -> Option<u32>;
}

/// [`Launcher`] backed by real processes.
#[derive(Debug, Default)]
pub struct ProcessLauncher {
    children: Vec<Child>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of children not reaped yet.
    pub fn running(&self) -> usize {
        self.children.len()
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, request: &LaunchRequest) -> Result<u32, LaunchError> {
        let (mut cmd, label) = match &request.kind {
            LaunchKind::Shell(line) => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c").arg(line);
                (cmd, line.clone())
            }
            LaunchKind::Program { path, arg } => {
                let mut cmd = Command::new(path);
                cmd.args(arg.iter());
                (cmd, path.display().to_string())
            }
        };

        if let Some(env) = &request.env {
            cmd.envs(env.vars());
            // SAFETY: setsid is async-signal-safe and touches no parent state.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            command: label.clone(),
            source,
        })?;
        let pid = child.id();
        info!("launched {:?} as pid {}", label, pid);
        self.children.push(child);
        Ok(pid)
    }

    fn reap(&mut self) -> Vec<Exit> {
        let mut exited = Vec::new();
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!("pid {} exited with {}", child.id(), status);
                exited.push(Exit {
                    pid: child.id(),
                    code: status.code(),
                    signal: status.signal(),
                });
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("waiting for pid {} failed: {}", child.id(), e);
                false
            }
        });
        exited
    }

    fn session_of(&self, pid: u32) -> Option<u32> {
        let pid = libc::pid_t::try_from(pid).ok()?;
        // SAFETY: getsid only reads kernel state for the given pid.
        let sid = unsafe { libc::getsid(pid) };
        u32::try_from(sid).ok()
    }
}

/// Find an executable named `name` in the first of `dirs` that has one.
///
/// Names containing a path separator are rejected.
pub fn resolve_named_command(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    if name.is_empty() || name.contains('/') {
        return None;
    }
    dirs.iter()
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
