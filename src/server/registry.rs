use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::state::{PersistedState, ServerSnapshot};
use crate::server::{ProcessHandle, ServerStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Runtime record of one server.
///
/// Records are only ever mutated through [`Registry::update`] and friends,
/// i.e. while the registry lock is held.
#[derive(Debug)]
pub struct ServerRecord {
    name: String,
    spec: Option<ServerConfig>,
    handle: Option<ProcessHandle>,
    /// Instance that was asked to stop and has not been reaped yet
    stopping: Option<ProcessHandle>,
    pid: Option<u32>,
    status: ServerStatus,
    consecutive_healthy_checks: u32,
    last_start: Option<DateTime<Utc>>,
    generation: u64,
    restart_count: u32,
    /// Set by an explicit stop, cleared by the next spawn
    stop_requested_at: Option<Instant>,
}

impl ServerRecord {
    /// A record created by the first spawn attempt
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            spec: None,
            handle: None,
            stopping: None,
            pid: None,
            status: ServerStatus::Starting,
            consecutive_healthy_checks: 0,
            last_start: None,
            generation: 0,
            restart_count: 0,
            stop_requested_at: None,
        }
    }

    /// A record restored from a previous supervisor run
    pub(crate) fn rehydrated(name: &str, snapshot: &ServerSnapshot) -> Self {
        Self {
            pid: snapshot.pid,
            status: ServerStatus::NotStarted,
            last_start: snapshot.last_start,
            ..Self::new(name)
        }
    }

    /// Server name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launch specification of the last spawn
    pub fn spec(&self) -> Option<&ServerConfig> {
        self.spec.as_ref()
    }

    /// Handle of the live instance
    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// Last known PID
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current status
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Consecutive successful liveness probes
    pub fn consecutive_healthy_checks(&self) -> u32 {
        self.consecutive_healthy_checks
    }

    /// Launch time of the current or last instance
    pub fn last_start(&self) -> Option<DateTime<Utc>> {
        self.last_start
    }

    /// Number of spawns performed for this record
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Automatic restarts since the record was last healthy
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Whether the server was stopped on request
    pub fn stop_requested(&self) -> bool {
        self.stop_requested_at.is_some()
    }

    /// When the pending explicit stop was issued
    pub(crate) fn stop_requested_at(&self) -> Option<Instant> {
        self.stop_requested_at
    }

    /// Move to `to` if the state machine allows it.
    pub(crate) fn transition(&mut self, to: ServerStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                name: self.name.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        if self.status != to {
            tracing::debug!(server = %self.name, from = %self.status, to = %to, "Status transition");
        }
        self.status = to;
        Ok(())
    }

    /// Begin a new instance: detach the old handle and enter `starting`.
    ///
    /// Returns the previous live handle (to be terminated by the caller)
    /// and the generation of the new instance.
    pub(crate) fn begin_spawn(&mut self, spec: ServerConfig) -> Result<(Option<ProcessHandle>, u64)> {
        self.transition(ServerStatus::Starting)?;
        let previous = self.handle.take();
        self.generation += 1;
        self.spec = Some(spec);
        self.consecutive_healthy_checks = 0;
        self.stop_requested_at = None;
        Ok((previous, self.generation))
    }

    /// The launch for the current generation returned a process.
    pub(crate) fn attach(&mut self, handle: ProcessHandle, started_at: DateTime<Utc>) -> Result<()> {
        self.pid = Some(handle.pid());
        self.handle = Some(handle);
        self.last_start = Some(started_at);
        self.transition(ServerStatus::Running)
    }

    /// The launch for the current generation failed.
    pub(crate) fn launch_failed(&mut self) -> Result<()> {
        self.handle = None;
        self.transition(ServerStatus::Error)
    }

    /// Record an explicit stop request, returning the handle to terminate.
    pub(crate) fn request_stop(&mut self) -> Result<Option<ProcessHandle>> {
        // A repeated stop keeps the first request time and lingering instance
        self.stop_requested_at.get_or_insert_with(Instant::now);
        self.consecutive_healthy_checks = 0;
        let handle = self.handle.take();
        if handle.is_some() {
            self.stopping = handle.clone();
        }
        self.transition(ServerStatus::Stopped)?;
        Ok(handle)
    }

    /// The exit observer of instance `generation` fired.
    ///
    /// Returns `false` when the record has already moved on to a newer
    /// instance, in which case nothing is changed.
    pub(crate) fn process_exited(&mut self, generation: u64) -> Result<bool> {
        if self
            .stopping
            .as_ref()
            .is_some_and(|h| h.generation() == generation)
        {
            self.stopping = None;
        }
        if generation != self.generation {
            return Ok(false);
        }
        self.handle = None;
        self.consecutive_healthy_checks = 0;
        self.transition(ServerStatus::Stopped)?;
        Ok(true)
    }

    /// Instance that was asked to stop and is still being waited on
    pub(crate) fn lingering(&self) -> Option<&ProcessHandle> {
        self.stopping.as_ref().filter(|h| !h.has_exited())
    }

    /// A liveness probe succeeded. Returns `true` if this promoted the
    /// record to `healthy`.
    pub(crate) fn probe_succeeded(&mut self, healthy_threshold: u32) -> Result<bool> {
        self.consecutive_healthy_checks = self.consecutive_healthy_checks.saturating_add(1);
        if self.status == ServerStatus::Running
            && self.consecutive_healthy_checks >= healthy_threshold
        {
            self.transition(ServerStatus::Healthy)?;
            self.restart_count = 0;
            return Ok(true);
        }
        Ok(false)
    }

    /// A liveness probe failed.
    pub(crate) fn probe_failed(&mut self) -> Result<()> {
        self.consecutive_healthy_checks = 0;
        if self.status != ServerStatus::Unhealthy {
            self.transition(ServerStatus::Unhealthy)?;
        }
        Ok(())
    }

    pub(crate) fn note_automatic_restart(&mut self) {
        self.restart_count = self.restart_count.saturating_add(1);
    }

    /// Serializable view of the record
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            status: self.status,
            pid: self.pid,
            consecutive_healthy_checks: self.consecutive_healthy_checks,
            last_start: self.last_start,
            restart_count: self.restart_count,
        }
    }
}

/// Shared map from server name to its [`ServerRecord`].
///
/// Cloning the registry clones the `Arc`, not the records. Every read and
/// write goes through one mutex, which makes each closure passed to
/// [`Registry::update`] atomic with respect to the health sweep, exit
/// observers and status readers.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    records: Arc<Mutex<HashMap<String, ServerRecord>>>,
    last_sweep: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ServerRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::Other("Failed to lock server registry".to_string()))
    }

    /// Run `f` on the record for `name`.
    pub fn update<F, R>(&self, name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut ServerRecord) -> R,
    {
        let mut records = self.lock()?;
        let record = records
            .get_mut(name)
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;
        Ok(f(record))
    }

    /// Run `f` on the record for `name`, creating it first if needed.
    pub(crate) fn upsert<F, R>(&self, name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut ServerRecord) -> R,
    {
        let mut records = self.lock()?;
        let record = records
            .entry(name.to_string())
            .or_insert_with(|| ServerRecord::new(name));
        Ok(f(record))
    }

    /// Read the record for `name`, if any
    pub fn get(&self, name: &str) -> Result<Option<ServerSnapshot>> {
        Ok(self.lock()?.get(name).map(ServerRecord::snapshot))
    }

    /// Run a read-only closure on the record for `name`
    pub fn inspect<F, R>(&self, name: &str, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&ServerRecord) -> R,
    {
        Ok(self.lock()?.get(name).map(f))
    }

    /// Whether `name` has a record
    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(name))
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Snapshot of every record
    pub fn snapshot(&self) -> Result<BTreeMap<String, ServerSnapshot>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(name, record)| (name.clone(), record.snapshot()))
            .collect())
    }

    /// PIDs of stopped instances that have not been reaped yet
    pub(crate) fn lingering_pids(&self) -> Result<Vec<u32>> {
        Ok(self
            .lock()?
            .values()
            .filter_map(|record| record.lingering().map(ProcessHandle::pid))
            .collect())
    }

    /// End time of the most recent health sweep
    pub fn last_sweep(&self) -> Result<Option<DateTime<Utc>>> {
        self.last_sweep
            .lock()
            .map(|guard| *guard)
            .map_err(|_| Error::Other("Failed to lock last sweep time".to_string()))
    }

    pub(crate) fn mark_swept(&self, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self
            .last_sweep
            .lock()
            .map_err(|_| Error::Other("Failed to lock last sweep time".to_string()))?;
        *guard = Some(at);
        Ok(())
    }

    /// Restore records from a previous run.
    ///
    /// Restored records carry their last PID and start time for reporting
    /// but no process handle, and are `not_started`. Names that already
    /// have a live record are left alone.
    pub fn rehydrate(&self, state: &PersistedState) -> Result<usize> {
        let mut records = self.lock()?;
        let mut restored = 0;
        for (name, snapshot) in &state.servers {
            if records.contains_key(name) {
                continue;
            }
            records.insert(name.clone(), ServerRecord::rehydrated(name, snapshot));
            restored += 1;
        }
        drop(records);

        if let Some(at) = state.last_health_check {
            let mut guard = self
                .last_sweep
                .lock()
                .map_err(|_| Error::Other("Failed to lock last sweep time".to_string()))?;
            if guard.is_none() {
                *guard = Some(at);
            }
        }
        Ok(restored)
    }

    /// Build the document written to the state file
    pub fn to_persisted(&self) -> Result<PersistedState> {
        Ok(PersistedState {
            supervisor_pid: Some(std::process::id()),
            last_health_check: self.last_sweep()?,
            servers: self.snapshot()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;

    fn spec() -> ServerConfig {
        ServerConfig {
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            env: HashMap::new(),
        }
    }

    fn handle(pid: u32, generation: u64) -> ProcessHandle {
        let (_tx, rx) = watch::channel(false);
        ProcessHandle::new(pid, generation, rx)
    }

    #[test]
    fn test_spawn_bookkeeping() {
        let registry = Registry::new();

        let generation = registry
            .upsert("echo", |r| {
                let (previous, generation) = r.begin_spawn(spec())?;
                assert!(previous.is_none());
                r.attach(handle(100, generation), Utc::now())?;
                Ok::<_, Error>(generation)
            })
            .unwrap()
            .unwrap();
        assert_eq!(generation, 1);

        let snap = registry.get("echo").unwrap().unwrap();
        assert_eq!(snap.status, ServerStatus::Running);
        assert_eq!(snap.pid, Some(100));

        // A second spawn hands back the first handle for teardown
        let previous = registry
            .update("echo", |r| {
                let (previous, generation) = r.begin_spawn(spec()).unwrap();
                r.attach(handle(200, generation), Utc::now()).unwrap();
                previous
            })
            .unwrap();
        assert_eq!(previous.map(|h| h.pid()), Some(100));
        assert_eq!(registry.get("echo").unwrap().unwrap().pid, Some(200));
    }

    #[test]
    fn test_stale_exit_is_ignored() {
        let registry = Registry::new();
        registry
            .upsert("echo", |r| {
                let (_, g) = r.begin_spawn(spec()).unwrap();
                r.attach(handle(1, g), Utc::now()).unwrap();
                let (_, g) = r.begin_spawn(spec()).unwrap();
                r.attach(handle(2, g), Utc::now()).unwrap();
            })
            .unwrap();

        let applied = registry.update("echo", |r| r.process_exited(1)).unwrap().unwrap();
        assert!(!applied);
        assert_eq!(
            registry.get("echo").unwrap().unwrap().status,
            ServerStatus::Running
        );

        let applied = registry.update("echo", |r| r.process_exited(2)).unwrap().unwrap();
        assert!(applied);
        let snap = registry.get("echo").unwrap().unwrap();
        assert_eq!(snap.status, ServerStatus::Stopped);
        assert_eq!(snap.pid, Some(2));
    }

    #[test]
    fn test_promotion_and_reset() {
        let mut record = ServerRecord::new("echo");
        let (_, g) = record.begin_spawn(spec()).unwrap();
        record.attach(handle(5, g), Utc::now()).unwrap();

        assert!(!record.probe_succeeded(3).unwrap());
        assert!(!record.probe_succeeded(3).unwrap());
        record.probe_failed().unwrap();
        assert_eq!(record.consecutive_healthy_checks(), 0);
        assert_eq!(record.status(), ServerStatus::Unhealthy);

        let (_, g) = record.begin_spawn(spec()).unwrap();
        record.attach(handle(6, g), Utc::now()).unwrap();
        assert!(!record.probe_succeeded(3).unwrap());
        assert!(!record.probe_succeeded(3).unwrap());
        assert!(record.probe_succeeded(3).unwrap());
        assert_eq!(record.status(), ServerStatus::Healthy);
        // Further successes keep it healthy without another promotion
        assert!(!record.probe_succeeded(3).unwrap());
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut record = ServerRecord::new("echo");
        let (_, _) = record.begin_spawn(spec()).unwrap();
        record.launch_failed().unwrap();
        assert_eq!(record.status(), ServerStatus::Error);
        assert!(matches!(
            record.transition(ServerStatus::Healthy),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_rehydrate_marks_not_started() {
        let registry = Registry::new();
        let mut state = PersistedState::default();
        state.servers.insert(
            "echo".to_string(),
            ServerSnapshot {
                status: ServerStatus::Healthy,
                pid: Some(4242),
                consecutive_healthy_checks: 9,
                last_start: Some(Utc::now()),
                restart_count: 0,
            },
        );

        assert_eq!(registry.rehydrate(&state).unwrap(), 1);
        let restored = registry.inspect("echo", |r| (r.status(), r.pid(), r.handle().is_none())).unwrap();
        assert_eq!(restored, Some((ServerStatus::NotStarted, Some(4242), true)));
        assert_eq!(
            registry.get("echo").unwrap().unwrap().consecutive_healthy_checks,
            0
        );
    }
}
