use crate::config::{ConfigSource, EligibilityRules, classify};
use crate::error::{Error, Result};
use crate::server::lifecycle::LifecycleController;
use crate::server::process::{self, LivenessProbe, PidProbe};
use crate::server::registry::ServerRecord;
use crate::server::ServerStatus;
use chrono::Utc;
use nix::sys::signal::Signal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Server monitor configuration
#[derive(Debug, Clone)]
pub struct ServerMonitorConfig {
    /// Check interval
    pub check_interval: Duration,
    /// Consecutive successful probes before a running server is healthy
    pub healthy_threshold: u32,
    /// Consecutive automatic restarts allowed without reaching `healthy`;
    /// `None` means unlimited
    pub max_restarts: Option<u32>,
}

impl Default for ServerMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            healthy_threshold: 3,
            max_restarts: None,
        }
    }
}

/// What a single sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Records probed
    pub checked: usize,
    /// Records promoted to `healthy` by this sweep
    pub promoted: Vec<String>,
    /// Records found dead
    pub unhealthy: Vec<String>,
    /// Records restarted by this sweep
    pub restarted: Vec<String>,
}

enum Verdict {
    Skip,
    Alive { promoted: bool },
    /// `restart` carries the instance generation the restart replaces
    Dead { restart: Option<u64> },
}

/// Periodic liveness sweep with automatic restart.
pub struct ServerMonitor {
    lifecycle: LifecycleController,
    probe: Arc<dyn LivenessProbe>,
    config_source: Option<(ConfigSource, EligibilityRules)>,
    config: ServerMonitorConfig,
    shutdown: Option<watch::Sender<bool>>,
    monitor_task: Option<JoinHandle<()>>,
}

impl ServerMonitor {
    /// Create a monitor using the PID existence probe
    pub fn new(lifecycle: LifecycleController, config: ServerMonitorConfig) -> Self {
        Self::with_probe(lifecycle, config, Arc::new(PidProbe))
    }

    /// Create a monitor with a custom liveness probe
    pub fn with_probe(
        lifecycle: LifecycleController,
        config: ServerMonitorConfig,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        Self {
            lifecycle,
            probe,
            config_source: None,
            config,
            shutdown: None,
            monitor_task: None,
        }
    }

    /// Only restart servers that are still configured and supervised
    /// according to a fresh read of `source`.
    pub fn restrict_to(mut self, source: ConfigSource, rules: EligibilityRules) -> Self {
        self.config_source = Some((source, rules));
        self
    }

    /// Whether the periodic task is running
    pub fn is_running(&self) -> bool {
        self.monitor_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start the periodic sweep. The first sweep runs one interval from now.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let sweeper = self.sweeper();
        let period = self.config.check_interval;

        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                // A sweep that has begun always runs to completion
                if let Err(e) = sweeper.sweep().await {
                    tracing::error!(error = %e, "Health sweep failed");
                }
            }
            tracing::debug!("Health monitor stopped");
        });

        tracing::info!(interval_secs = period.as_secs_f64(), "Health monitor started");
        self.shutdown = Some(shutdown_tx);
        self.monitor_task = Some(task);
        Ok(())
    }

    /// Stop the periodic sweep, waiting for an in-flight sweep to finish
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.monitor_task.take() {
            task.await
                .map_err(|e| Error::Other(format!("Health monitor task failed: {}", e)))?;
        }
        Ok(())
    }

    /// Run one sweep now
    pub async fn sweep(&self) -> Result<SweepSummary> {
        self.sweeper().sweep().await
    }

    fn sweeper(&self) -> Sweeper {
        Sweeper {
            lifecycle: self.lifecycle.clone(),
            probe: Arc::clone(&self.probe),
            config_source: self.config_source.clone(),
            config: self.config.clone(),
        }
    }
}

impl Drop for ServerMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.monitor_task.take() {
            task.abort();
        }
    }
}

struct Sweeper {
    lifecycle: LifecycleController,
    probe: Arc<dyn LivenessProbe>,
    config_source: Option<(ConfigSource, EligibilityRules)>,
    config: ServerMonitorConfig,
}

impl Sweeper {
    /// Names that may be restarted; `None` means every registered name
    fn wanted(&self) -> Option<HashSet<String>> {
        let (source, rules) = self.config_source.as_ref()?;
        let config = source.load();
        Some(
            config
                .mcp_servers
                .iter()
                .filter(|(name, spec)| classify(name, spec, rules).is_supervised())
                .map(|(name, _)| name.clone())
                .collect(),
        )
    }

    #[tracing::instrument(skip(self))]
    async fn sweep(&self) -> Result<SweepSummary> {
        let registry = self.lifecycle.registry().clone();
        let wanted = self.wanted();
        let mut summary = SweepSummary::default();

        for name in registry.names()? {
            let is_wanted = wanted.as_ref().is_none_or(|w| w.contains(&name));
            let verdict = registry.update(&name, |record| self.evaluate(record, is_wanted))??;

            match verdict {
                Verdict::Skip => continue,
                Verdict::Alive { promoted } => {
                    summary.checked += 1;
                    if promoted {
                        summary.promoted.push(name);
                    }
                }
                Verdict::Dead { restart } => {
                    summary.checked += 1;
                    summary.unhealthy.push(name.clone());
                    if let Some(generation) = restart {
                        match self.lifecycle.restart_instance(&name, generation).await {
                            Ok(Some(pid)) => {
                                tracing::info!(server = %name, pid, "Restarted unhealthy server");
                                summary.restarted.push(name);
                            }
                            Ok(None) => {
                                tracing::info!(server = %name, "Server was stopped or replaced before its restart");
                            }
                            Err(e) => {
                                tracing::error!(server = %name, error = %e, "Failed to restart unhealthy server");
                                summary.restarted.push(name);
                            }
                        }
                    }
                }
            }
        }

        registry.mark_swept(Utc::now())?;
        self.lifecycle.persist();
        tracing::debug!(
            checked = summary.checked,
            unhealthy = summary.unhealthy.len(),
            restarted = summary.restarted.len(),
            "Health sweep complete"
        );
        Ok(summary)
    }

    fn evaluate(&self, record: &mut ServerRecord, is_wanted: bool) -> Result<Verdict> {
        let name = record.name().to_string();

        if record.status() == ServerStatus::NotStarted {
            return Ok(Verdict::Skip);
        }

        if let Some(requested_at) = record.stop_requested_at() {
            // Within the grace period the termination timer owns the process
            let overdue = requested_at.elapsed() >= self.lifecycle.grace_period();
            if let Some(lingering) = record.lingering().filter(|_| overdue) {
                if self.probe.is_alive(lingering.pid()) {
                    tracing::warn!(server = %name, pid = lingering.pid(), "Stopped server still running, sending SIGKILL");
                    if let Err(e) = process::send_signal(lingering.pid(), Signal::SIGKILL) {
                        tracing::warn!(server = %name, error = %e, "Failed to kill lingering process");
                    }
                }
            }
            return Ok(Verdict::Skip);
        }

        let alive = record
            .handle()
            .is_some_and(|h| !h.has_exited() && self.probe.is_alive(h.pid()));

        if alive {
            let promoted = record.probe_succeeded(self.config.healthy_threshold)?;
            if promoted {
                tracing::info!(server = %name, checks = record.consecutive_healthy_checks(), "Server is healthy");
            }
            return Ok(Verdict::Alive { promoted });
        }

        record.probe_failed()?;
        tracing::warn!(server = %name, pid = ?record.pid(), "Liveness probe failed");

        if !is_wanted {
            tracing::info!(server = %name, "Server is no longer configured for supervision, not restarting");
            return Ok(Verdict::Dead { restart: None });
        }
        if record.spec().is_none() {
            return Ok(Verdict::Dead { restart: None });
        }
        if let Some(max) = self.config.max_restarts {
            if record.restart_count() >= max {
                tracing::error!(server = %name, restarts = record.restart_count(), "Restart limit reached, leaving server unhealthy");
                return Ok(Verdict::Dead { restart: None });
            }
        }

        record.note_automatic_restart();
        Ok(Verdict::Dead {
            restart: Some(record.generation()),
        })
    }
}
