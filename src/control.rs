//! Stopping a supervisor from another process.
//!
//! The `stop` command runs in a fresh process with an empty registry, so it
//! works from the state file: it asks the supervisor that wrote the file to
//! shut down, and terminates any recorded server processes that outlive it.
use crate::error::Result;
use crate::server::{LivenessProbe, PidProbe, ServerStatus, StateStore, send_signal};
use nix::sys::signal::Signal;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What [`stop_from_state`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachedStop {
    /// The supervisor process was signalled
    pub supervisor_signalled: bool,
    /// Server processes that had to be terminated directly
    pub terminated: Vec<String>,
}

async fn wait_for_exit(probe: &dyn LivenessProbe, pids: &[u32], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if pids.iter().all(|pid| !probe.is_alive(*pid)) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Stop the supervisor recorded in `store` and every server it left behind.
///
/// Each process gets SIGTERM, then SIGKILL if still alive after `grace`.
/// Records are marked `stopped` in the state file afterwards.
#[tracing::instrument(skip(store), fields(state_file = %store.path().display()))]
pub async fn stop_from_state(store: &StateStore, grace: Duration) -> Result<DetachedStop> {
    let Some(mut state) = store.load() else {
        tracing::info!("No supervisor state found, nothing to stop");
        return Ok(DetachedStop::default());
    };

    let probe = PidProbe;
    let mut outcome = DetachedStop::default();

    if let Some(pid) = state.supervisor_pid.filter(|pid| *pid != std::process::id()) {
        if probe.is_alive(pid) {
            tracing::info!(pid, "Signalling supervisor");
            send_signal(pid, Signal::SIGTERM)?;
            outcome.supervisor_signalled = true;
            // The supervisor needs the grace period itself to stop its servers
            if !wait_for_exit(&probe, &[pid], grace + Duration::from_secs(1)).await {
                tracing::warn!(pid, "Supervisor did not exit in time");
            }
        }
    }

    // A supervisor that shut down cleanly has rewritten the file
    if outcome.supervisor_signalled {
        if let Some(fresh) = store.load() {
            state = fresh;
        }
    }

    // Only records that claim a live process; a stopped record's pid may
    // already belong to something else
    let survivors: Vec<(String, u32)> = state
        .servers
        .iter()
        .filter(|(_, snap)| snap.status.is_live() || snap.status == ServerStatus::Unhealthy)
        .filter_map(|(name, snap)| snap.pid.map(|pid| (name.clone(), pid)))
        .filter(|(_, pid)| probe.is_alive(*pid))
        .collect();

    for (name, pid) in &survivors {
        tracing::info!(server = %name, pid, "Terminating server process");
        if let Err(e) = send_signal(*pid, Signal::SIGTERM) {
            tracing::warn!(server = %name, error = %e, "Failed to send SIGTERM");
        }
    }

    let pids: Vec<u32> = survivors.iter().map(|(_, pid)| *pid).collect();
    if !wait_for_exit(&probe, &pids, grace).await {
        for (name, pid) in survivors.iter().filter(|(_, pid)| probe.is_alive(*pid)) {
            tracing::warn!(server = %name, pid, "Process ignored SIGTERM, sending SIGKILL");
            if let Err(e) = send_signal(*pid, Signal::SIGKILL) {
                tracing::warn!(server = %name, error = %e, "Failed to send SIGKILL");
            }
        }
    }
    outcome.terminated = survivors.into_iter().map(|(name, _)| name).collect();

    for snapshot in state.servers.values_mut() {
        if snapshot.status != ServerStatus::NotStarted {
            snapshot.status = ServerStatus::Stopped;
        }
        snapshot.consecutive_healthy_checks = 0;
    }
    state.supervisor_pid = None;
    if let Err(e) = store.save(&state) {
        tracing::warn!(error = %e, "Failed to update state file");
    }

    Ok(outcome)
}
