// src/server/process.rs
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use async_process::{Child, Command, Stdio};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// Status of a supervised server.
///
/// Allowed transitions are encoded in [`ServerStatus::can_transition_to`];
/// the registry refuses anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Known from a previous run but not spawned by this supervisor
    NotStarted,
    /// Launch requested
    Starting,
    /// Process launched, not yet proven stable
    Running,
    /// Alive for at least the healthy threshold of consecutive sweeps
    Healthy,
    /// Liveness probe failed
    Unhealthy,
    /// Stopped on request or exited on its own
    Stopped,
    /// The process could not be launched
    Error,
}

impl ServerStatus {
    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: ServerStatus) -> bool {
        use ServerStatus as S;
        matches!(
            (self, to),
            (_, S::Starting)
                | (_, S::Stopped)
                | (S::Starting, S::Running)
                | (S::Starting, S::Error)
                | (S::Running, S::Healthy)
                | (S::Running | S::Healthy | S::Stopped | S::Error, S::Unhealthy)
        )
    }

    /// Whether a process launched for this status is expected to be alive
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ServerStatus::Starting | ServerStatus::Running | ServerStatus::Healthy
        )
    }

    /// Wire name of the status
    pub fn as_str(self) -> &'static str {
        match self {
            ServerStatus::NotStarted => "not_started",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Healthy => "healthy",
            ServerStatus::Unhealthy => "unhealthy",
            ServerStatus::Stopped => "stopped",
            ServerStatus::Error => "error",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to one launched instance of a server.
///
/// The child itself is owned by the exit observer task; the handle only
/// carries the PID, the instance generation and a flag flipped once the
/// observer has reaped the process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    generation: u64,
    exited: watch::Receiver<bool>,
}

impl ProcessHandle {
    pub(crate) fn new(pid: u32, generation: u64, exited: watch::Receiver<bool>) -> Self {
        Self {
            pid,
            generation,
            exited,
        }
    }

    /// OS process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Spawn counter value of the instance this handle belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the exit observer has seen the process terminate
    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }
}

/// OS-level liveness check for a process id.
#[cfg_attr(test, mockall::automock)]
pub trait LivenessProbe: Send + Sync {
    /// Whether a process with this id currently exists
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe that sends signal 0 to the PID.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidProbe;

impl LivenessProbe for PidProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(pid) = to_pid(pid) else {
            return false;
        };
        match kill(pid, None) {
            Ok(()) => true,
            // Exists but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    // 0 and negative values address process groups
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

/// Launch a server process with piped stdio.
///
/// Configured environment overrides are merged onto the inherited
/// environment.
pub(crate) fn launch(config: &ServerConfig) -> Result<Child> {
    let mut command = Command::new(&config.command);
    command
        .args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    command
        .spawn()
        .map_err(|e| Error::Spawn(format!("{}: {}", config.command, e)))
}

/// Send `signal` to a single process.
pub(crate) fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let target = to_pid(pid).ok_or_else(|| Error::Process(format!("Invalid pid {}", pid)))?;
    kill(target, signal)
        .map_err(|e| Error::Process(format!("Failed to send {:?} to {}: {}", signal, pid, e)))
}

/// Ask a process to terminate, escalating to SIGKILL after `grace`.
///
/// Returns immediately; the escalation runs on a timer task and is skipped
/// as soon as the exit observer reports the process gone.
pub(crate) fn terminate(name: &str, handle: ProcessHandle, grace: Duration) {
    if handle.has_exited() {
        return;
    }

    let pid = handle.pid();
    match send_signal(pid, Signal::SIGTERM) {
        Ok(()) => tracing::debug!(server = %name, pid, "Sent SIGTERM"),
        Err(e) => tracing::warn!(server = %name, pid, error = %e, "Failed to send SIGTERM"),
    }

    let name = name.to_string();
    let mut exited = handle.exited;
    tokio::spawn(async move {
        let timed_out = tokio::time::timeout(grace, exited.wait_for(|done| *done))
            .await
            .is_err();
        if timed_out {
            tracing::warn!(
                server = %name,
                pid,
                grace_secs = grace.as_secs_f64(),
                "Process ignored SIGTERM, sending SIGKILL"
            );
            if let Err(e) = send_signal(pid, Signal::SIGKILL) {
                tracing::warn!(server = %name, pid, error = %e, "Failed to send SIGKILL");
            }
        }
    });
}
