//! Point-in-time status report.
//!
//! The report merges a fresh read of the configuration with a registry
//! snapshot. The snapshot may come from the live registry or from the state
//! file written by another supervisor process; both use [`ServerSnapshot`].
use crate::config::{Config, ConfigSource, EligibilityRules, classify};
use crate::error::Result;
use crate::server::{Registry, ServerSnapshot, ServerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status as shown in a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    /// Configured and supervised but never spawned
    NotStarted,
    /// See [`ServerStatus::Starting`]
    Starting,
    /// See [`ServerStatus::Running`]
    Running,
    /// See [`ServerStatus::Healthy`]
    Healthy,
    /// See [`ServerStatus::Unhealthy`]
    Unhealthy,
    /// See [`ServerStatus::Stopped`]
    Stopped,
    /// See [`ServerStatus::Error`]
    Error,
    /// Started on demand by the host application, not by the supervisor
    OpenclawManaged,
}

impl From<ServerStatus> for ReportedStatus {
    fn from(status: ServerStatus) -> Self {
        match status {
            ServerStatus::NotStarted => ReportedStatus::NotStarted,
            ServerStatus::Starting => ReportedStatus::Starting,
            ServerStatus::Running => ReportedStatus::Running,
            ServerStatus::Healthy => ReportedStatus::Healthy,
            ServerStatus::Unhealthy => ReportedStatus::Unhealthy,
            ServerStatus::Stopped => ReportedStatus::Stopped,
            ServerStatus::Error => ReportedStatus::Error,
        }
    }
}

/// One server's line in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerReport {
    /// Present in the current configuration
    pub configured: bool,
    /// Supervised (as opposed to started on demand)
    pub managed: bool,
    /// Current status
    pub status: ReportedStatus,
    /// Last known PID
    pub pid: Option<u32>,
    /// Seconds since the running instance was launched
    pub uptime_secs: Option<i64>,
    /// Consecutive successful liveness probes
    pub consecutive_healthy_checks: u32,
}

/// Full status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// When the report was built
    pub timestamp: DateTime<Utc>,
    /// End of the most recent health sweep
    pub last_health_check: Option<DateTime<Utc>>,
    /// Per-server entries, ordered by name
    pub servers: BTreeMap<String, ServerReport>,
}

fn from_snapshot(configured: bool, snapshot: &ServerSnapshot, now: DateTime<Utc>) -> ServerReport {
    // Measured from the last launch, whatever the current status
    let uptime_secs = snapshot
        .last_start
        .map(|started| (now - started).num_seconds().max(0));

    ServerReport {
        configured,
        managed: true,
        status: snapshot.status.into(),
        pid: snapshot.pid,
        uptime_secs,
        consecutive_healthy_checks: snapshot.consecutive_healthy_checks,
    }
}

/// Build a report from a configuration and a registry snapshot.
pub fn build_report(
    config: &Config,
    rules: &EligibilityRules,
    snapshot: &BTreeMap<String, ServerSnapshot>,
    last_health_check: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StatusReport {
    let mut servers = BTreeMap::new();

    for (name, spec) in &config.mcp_servers {
        let report = if !classify(name, spec, rules).is_supervised() {
            ServerReport {
                configured: true,
                managed: false,
                status: ReportedStatus::OpenclawManaged,
                pid: None,
                uptime_secs: None,
                consecutive_healthy_checks: 0,
            }
        } else {
            match snapshot.get(name) {
                Some(record) => from_snapshot(true, record, now),
                None => ServerReport {
                    configured: true,
                    managed: true,
                    status: ReportedStatus::NotStarted,
                    pid: None,
                    uptime_secs: None,
                    consecutive_healthy_checks: 0,
                },
            }
        };
        servers.insert(name.clone(), report);
    }

    // Records for names that were removed from the configuration
    for (name, record) in snapshot {
        if !servers.contains_key(name) {
            servers.insert(name.clone(), from_snapshot(false, record, now));
        }
    }

    StatusReport {
        timestamp: now,
        last_health_check,
        servers,
    }
}

/// Produces status reports for a live registry.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    source: ConfigSource,
    rules: EligibilityRules,
    registry: Registry,
}

impl StatusReporter {
    /// Create a reporter
    pub fn new(source: ConfigSource, rules: EligibilityRules, registry: Registry) -> Self {
        Self {
            source,
            rules,
            registry,
        }
    }

    /// Build a report from a fresh configuration read and the registry
    #[tracing::instrument(skip(self))]
    pub fn report(&self) -> Result<StatusReport> {
        let config = self.source.load();
        let snapshot = self.registry.snapshot()?;
        Ok(build_report(
            &config,
            &self.rules,
            &snapshot,
            self.registry.last_sweep()?,
            Utc::now(),
        ))
    }
}
