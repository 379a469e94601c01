use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::log_sink::{LogSink, LogTag};
use crate::server::process::{self, ProcessHandle};
use crate::server::registry::{Registry, ServerRecord};
use crate::server::state::StateStore;
use crate::server::ServerStatus;
use chrono::Utc;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

/// Server lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLifecycleEvent {
    /// Server started
    Started,
    /// Server stopped on request
    Stopped,
    /// Server process exited
    Exited,
    /// Server failed to launch
    Failed,
    /// Server restarted
    Restarted,
}

impl fmt::Display for ServerLifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerLifecycleEvent::Started => "started",
            ServerLifecycleEvent::Stopped => "stopped",
            ServerLifecycleEvent::Exited => "exited",
            ServerLifecycleEvent::Failed => "failed",
            ServerLifecycleEvent::Restarted => "restarted",
        };
        f.write_str(name)
    }
}

/// Spawns, stops and restarts server processes.
///
/// The controller is cheap to clone; clones share the same registry and
/// state store. Every mutation it performs is followed by a write of the
/// state file.
#[derive(Debug, Clone)]
pub struct LifecycleController {
    registry: Registry,
    store: StateStore,
    logs_dir: PathBuf,
    grace_period: Duration,
}

impl LifecycleController {
    /// Create a controller over `registry`
    pub fn new(
        registry: Registry,
        store: StateStore,
        logs_dir: impl Into<PathBuf>,
        grace_period: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            logs_dir: logs_dir.into(),
            grace_period,
        }
    }

    /// The registry this controller mutates
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Directory holding the per-server log files
    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Delay between SIGTERM and SIGKILL
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Launch `name` with `spec`, tearing down any running instance first.
    ///
    /// On success the record is `running` and the new PID is returned. If
    /// the OS refuses to launch the process the record is set to `error`
    /// and the launch error is returned; nothing else is affected.
    #[tracing::instrument(skip(self, spec), fields(server = %name, command = %spec.command))]
    pub async fn spawn(&self, name: &str, spec: ServerConfig) -> Result<u32> {
        self.launch_instance(name, Some(spec), None)
            .await?
            .ok_or_else(|| Error::Other(format!("Spawn of '{}' was superseded", name)))
    }

    /// Restart `name` only while it is still on instance `generation` and
    /// has not been stopped explicitly since.
    ///
    /// Returns `Ok(None)` without touching the record otherwise.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn restart_instance(&self, name: &str, generation: u64) -> Result<Option<u32>> {
        let pid = self.launch_instance(name, None, Some(generation)).await?;
        if let Some(pid) = pid {
            tracing::info!(pid, "Server {}", ServerLifecycleEvent::Restarted);
        }
        Ok(pid)
    }

    /// Shared body of [`spawn`](Self::spawn) and
    /// [`restart_instance`](Self::restart_instance).
    ///
    /// `spec: None` reuses the stored specification. With `expected` set
    /// the launch is abandoned when the record has moved on.
    async fn launch_instance(
        &self,
        name: &str,
        spec: Option<ServerConfig>,
        expected: Option<u64>,
    ) -> Result<Option<u32>> {
        let sink = LogSink::open_or_discard(&self.logs_dir, name);

        // begin_spawn, launch and attach happen under one registry lock so
        // that no reader sees a new generation without its handle. The lock
        // is held for the fork/exec itself.
        let apply = |record: &mut ServerRecord| -> Result<Launched> {
            if let Some(expected) = expected {
                if record.stop_requested() || record.generation() != expected {
                    return Ok(Launched::Superseded);
                }
            }
            let spec = match spec {
                Some(spec) => spec,
                None => record.spec().cloned().ok_or_else(|| {
                    Error::Process(format!("No launch specification recorded for '{}'", name))
                })?,
            };

            let (previous, generation) = record.begin_spawn(spec.clone())?;
            if let Some(previous) = previous {
                tracing::info!(pid = previous.pid(), "Terminating previous instance");
                process::terminate(name, previous, self.grace_period);
            }

            match process::launch(&spec) {
                Ok(mut child) => {
                    let (exit_tx, exit_rx) = watch::channel(false);
                    let pid = child.id();
                    record.attach(ProcessHandle::new(pid, generation, exit_rx), Utc::now())?;

                    if let Some(stdout) = child.stdout.take() {
                        sink.forward(stdout, LogTag::Stdout);
                    }
                    if let Some(stderr) = child.stderr.take() {
                        sink.forward(stderr, LogTag::Stderr);
                    }
                    Ok(Launched::Running {
                        child,
                        exit_tx,
                        pid,
                        generation,
                    })
                }
                Err(e) => {
                    record.launch_failed()?;
                    Ok(Launched::Failed(e))
                }
            }
        };

        let outcome = match expected {
            Some(_) => self.registry.update(name, apply)??,
            None => self.registry.upsert(name, apply)??,
        };

        match outcome {
            Launched::Running {
                child,
                exit_tx,
                pid,
                generation,
            } => {
                self.observe_exit(name, child, exit_tx, generation, sink.clone());
                sink.write_line(
                    LogTag::Info,
                    &format!("Server {} with PID {}", ServerLifecycleEvent::Started, pid),
                );
                tracing::info!(pid, generation, "Server started");
                self.persist();
                Ok(Some(pid))
            }
            Launched::Failed(e) => {
                sink.write_line(LogTag::Error, &format!("Failed to start: {}", e));
                tracing::error!(error = %e, "Server {}", ServerLifecycleEvent::Failed);
                self.persist();
                Err(e)
            }
            Launched::Superseded => Ok(None),
        }
    }

    /// Stop `name`: SIGTERM now, SIGKILL after the grace period.
    ///
    /// The record reads `stopped` as soon as this returns, whether or not
    /// the process has exited yet.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub fn stop(&self, name: &str) -> Result<()> {
        let handle = self.registry.update(name, |record| record.request_stop())??;

        match handle {
            Some(handle) => {
                let pid = handle.pid();
                process::terminate(name, handle, self.grace_period);
                LogSink::open_or_discard(&self.logs_dir, name).write_line(
                    LogTag::Info,
                    &format!("Server {} (PID {})", ServerLifecycleEvent::Stopped, pid),
                );
                tracing::info!(pid, "Stop requested");
            }
            None => tracing::debug!("No live process to stop"),
        }

        self.persist();
        Ok(())
    }

    /// Spawn `name` again with its last launch specification.
    #[tracing::instrument(skip(self), fields(server = %name))]
    pub async fn restart(&self, name: &str) -> Result<u32> {
        let spec = self
            .registry
            .inspect(name, |record| record.spec().cloned())?
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))?
            .ok_or_else(|| {
                Error::Process(format!("No launch specification recorded for '{}'", name))
            })?;

        let pid = self.spawn(name, spec).await?;
        tracing::info!(pid, "Server {}", ServerLifecycleEvent::Restarted);
        Ok(pid)
    }

    /// Stop every registered server.
    ///
    /// Records restored from a previous run and never spawned keep their
    /// `not_started` status.
    #[tracing::instrument(skip(self))]
    pub fn stop_all(&self) -> Result<()> {
        for name in self.registry.names()? {
            let status = self.registry.inspect(&name, |record| record.status())?;
            if status == Some(ServerStatus::NotStarted) {
                continue;
            }
            if let Err(e) = self.stop(&name) {
                tracing::warn!(server = %name, error = %e, "Failed to stop server");
            }
        }
        Ok(())
    }

    /// Write the registry to the state file, logging failures
    pub fn persist(&self) {
        if let Err(e) = self.store.save_with(|| self.registry.to_persisted()) {
            tracing::warn!(path = %self.store.path().display(), error = %e, "Failed to persist supervisor state");
        }
    }

    fn observe_exit(
        &self,
        name: &str,
        mut child: async_process::Child,
        exit_tx: watch::Sender<bool>,
        generation: u64,
        sink: LogSink,
    ) {
        let controller = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            // stdio servers exit on EOF, so stdin stays open for the
            // lifetime of the process
            let _stdin = child.stdin.take();
            let status = child.status().await;
            let _ = exit_tx.send(true);

            let description = match &status {
                Ok(status) => match (status.code(), status.signal()) {
                    (Some(code), _) => format!("code {}", code),
                    (None, Some(signal)) => format!("signal {}", signal),
                    (None, None) => "unknown status".to_string(),
                },
                Err(e) => format!("wait error: {}", e),
            };
            let tag = match &status {
                Ok(status) if status.success() => LogTag::Info,
                _ => LogTag::Error,
            };
            sink.write_line(
                tag,
                &format!("Server {} with {}", ServerLifecycleEvent::Exited, description),
            );

            match controller
                .registry
                .update(&name, |record| record.process_exited(generation))
            {
                Ok(Ok(true)) => {
                    tracing::info!(server = %name, generation, exit = %description, "Server process exited");
                    controller.persist();
                }
                Ok(Ok(false)) => {
                    tracing::debug!(server = %name, generation, exit = %description, "Superseded instance exited");
                }
                Ok(Err(e)) | Err(e) => {
                    tracing::warn!(server = %name, error = %e, "Failed to record process exit");
                }
            }
        });
    }
}

enum Launched {
    Running {
        child: async_process::Child,
        exit_tx: watch::Sender<bool>,
        pid: u32,
        generation: u64,
    },
    Failed(Error),
    Superseded,
}
