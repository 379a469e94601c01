/*!
 # MCP Supervisor

 A Rust library and daemon that keeps locally configured Model Context
 Protocol (MCP) servers running.

 ## Overview

 MCP Supervisor provides functionality to:
 - Read the `mcpServers` section of a configuration document
 - Decide which servers it owns and which are started on demand elsewhere
 - Spawn the owned servers, redirecting their output to per-server log files
 - Probe their liveness periodically, promote stable servers to `healthy`
   and restart dead ones
 - Persist a status snapshot after every change and report status on demand

 ## Basic Usage

 ```no_run
 use mcp_supervisor::{Result, Supervisor, config::SupervisorConfig};

 #[tokio::main]
 async fn main() -> Result<()> {
     let mut supervisor = Supervisor::new("config.json", SupervisorConfig::default());

     // Spawn every supervised server and start the health sweep
     let started = supervisor.start().await?;
     println!("Started: {:?}", started);

     // Point-in-time status
     let report = supervisor.status()?;
     println!("{}", serde_json::to_string_pretty(&report).unwrap());

     // Stop everything
     supervisor.shutdown().await?;
     Ok(())
 }
 ```

 ## Status model

 Servers move through `starting → running → healthy`. A failed liveness
 probe makes a server `unhealthy` and triggers an immediate restart. An
 explicit stop or the process's own exit makes it `stopped`; a process that
 cannot be launched at all is `error`.
*/

pub mod config;
pub mod control;
pub mod error;
pub mod server;
pub mod status;

pub use config::{Config, ConfigSource, SupervisorConfig};
pub use error::{Error, Result};
pub use server::{LifecycleController, Registry, ServerMonitor, ServerStatus};
pub use status::{StatusReport, StatusReporter};

use server::{PidProbe, LivenessProbe, ServerMonitorConfig, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Supervises the servers declared in one configuration file.
///
/// This struct wires the configuration source, registry, lifecycle
/// controller, health monitor and status reporter together.
/// All public methods are instrumented with `tracing` spans.
pub struct Supervisor {
    source: ConfigSource,
    settings: SupervisorConfig,
    registry: Registry,
    store: StateStore,
    lifecycle: LifecycleController,
    monitor: ServerMonitor,
    probe: Arc<dyn LivenessProbe>,
}

impl Supervisor {
    /// Create a supervisor for the configuration file at `config_path`
    #[tracing::instrument(skip(config_path, settings), fields(config_path = ?config_path.as_ref()))]
    pub fn new(config_path: impl AsRef<std::path::Path>, settings: SupervisorConfig) -> Self {
        Self::with_probe(config_path, settings, Arc::new(PidProbe))
    }

    /// Create a supervisor with a custom liveness probe
    pub fn with_probe(
        config_path: impl AsRef<std::path::Path>,
        settings: SupervisorConfig,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        let source = ConfigSource::new(config_path.as_ref());
        let registry = Registry::new();
        let store = StateStore::new(settings.state_file.clone());
        let lifecycle = LifecycleController::new(
            registry.clone(),
            store.clone(),
            settings.logs_dir.clone(),
            settings.grace_period,
        );
        let monitor = ServerMonitor::with_probe(
            lifecycle.clone(),
            ServerMonitorConfig {
                check_interval: settings.check_interval,
                healthy_threshold: settings.healthy_threshold,
                max_restarts: settings.max_restarts,
            },
            Arc::clone(&probe),
        )
        .restrict_to(source.clone(), settings.eligibility.clone());

        Self {
            source,
            settings,
            registry,
            store,
            lifecycle,
            monitor,
            probe,
        }
    }

    /// The shared registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The lifecycle controller, for stopping or restarting single servers
    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// The health monitor
    pub fn monitor(&self) -> &ServerMonitor {
        &self.monitor
    }

    /// Runtime settings
    pub fn settings(&self) -> &SupervisorConfig {
        &self.settings
    }

    /// Spawn every supervised server and start the health sweep.
    ///
    /// Returns the names that were launched successfully. Launch failures
    /// are recorded as `error` and do not stop the remaining servers. The
    /// only fatal condition is an unusable logs directory.
    #[tracing::instrument(skip(self))]
    pub async fn start(&mut self) -> Result<Vec<String>> {
        std::fs::create_dir_all(&self.settings.logs_dir).map_err(|e| {
            Error::LogSink(format!(
                "Failed to create logs directory {}: {}",
                self.settings.logs_dir.display(),
                e
            ))
        })?;

        if let Some(previous) = self.store.load() {
            let restored = self.registry.rehydrate(&previous)?;
            tracing::debug!(restored, "Rehydrated previous status");
        }

        let config = self.source.load();
        let split = config::partition(&config.mcp_servers, &self.settings.eligibility);
        tracing::info!(
            supervised = split.supervised.len(),
            excluded = split.excluded.len(),
            "Starting supervised servers"
        );

        let mut started = Vec::new();
        for (name, spec) in split.supervised {
            match self.lifecycle.spawn(&name, spec).await {
                Ok(_) => started.push(name),
                Err(e) => tracing::error!(server = %name, error = %e, "Failed to start server"),
            }
        }

        self.lifecycle.persist();
        self.monitor.start()?;
        tracing::info!(num_started = started.len(), "Supervisor started");
        Ok(started)
    }

    /// Halt the health sweep and stop every server.
    ///
    /// Returns once the stop requests are issued; records read `stopped`
    /// immediately.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        self.monitor.stop().await?;
        self.lifecycle.stop_all()?;
        tracing::info!("Supervisor stopped");
        Ok(())
    }

    /// [`Supervisor::stop`], then wait up to the grace period (plus a short
    /// margin for the forced kill) for the processes to go away.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop().await?;

        let deadline = tokio::time::Instant::now() + self.settings.grace_period + Duration::from_secs(1);
        loop {
            let lingering = self.registry.lingering_pids()?;
            if lingering.iter().all(|pid| !self.probe.is_alive(*pid)) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(pids = ?lingering, "Some server processes are still exiting");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.lifecycle.persist();
        Ok(())
    }

    /// Stop, then start again with a fresh read of the configuration
    #[tracing::instrument(skip(self))]
    pub async fn restart(&mut self) -> Result<Vec<String>> {
        self.shutdown().await?;
        self.start().await
    }

    /// Point-in-time status report
    pub fn status(&self) -> Result<StatusReport> {
        StatusReporter::new(
            self.source.clone(),
            self.settings.eligibility.clone(),
            self.registry.clone(),
        )
        .report()
    }

    /// Location of the state file
    pub fn state_file(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }
}
