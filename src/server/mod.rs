/// Server management module for MCP Supervisor.
///
/// This module owns the process lifecycle of supervised servers: launching
/// and terminating processes, the shared registry of runtime records, the
/// periodic health sweep, per-server log files and the persisted state file.
/// All public entry points are instrumented with `tracing` spans.
///
/// # Components
///
/// * `process` - Status state machine, process handles and the liveness probe
/// * `registry` - Shared, lock-guarded map of server records
/// * `lifecycle` - Spawn, stop and restart with exit observers
/// * `monitor` - Periodic health sweep and automatic restart
/// * `log_sink` - Append-only per-server log files
/// * `state` - Best-effort JSON snapshot of the registry
///
/// # Examples
///
/// ```no_run
/// use mcp_supervisor::config::ServerConfig;
/// use mcp_supervisor::server::{
///     LifecycleController, Registry, ServerMonitor, ServerMonitorConfig, StateStore,
/// };
/// use std::collections::HashMap;
/// use std::time::Duration;
///
/// # async fn run() -> mcp_supervisor::Result<()> {
/// let registry = Registry::new();
/// let lifecycle = LifecycleController::new(
///     registry.clone(),
///     StateStore::new("state.json"),
///     "logs",
///     Duration::from_secs(5),
/// );
///
/// let spec = ServerConfig {
///     command: "node".to_string(),
///     args: vec!["echo.js".to_string()],
///     env: HashMap::new(),
/// };
/// let pid = lifecycle.spawn("echo-server", spec).await?;
/// println!("echo-server running as {}", pid);
///
/// let mut monitor = ServerMonitor::new(lifecycle.clone(), ServerMonitorConfig::default());
/// monitor.start()?;
/// # Ok(())
/// # }
/// ```
pub mod lifecycle;
pub mod log_sink;
pub mod monitor;
mod process;
pub mod registry;
pub mod state;

pub use lifecycle::{LifecycleController, ServerLifecycleEvent};
pub use log_sink::{LogSink, LogTag};
pub use monitor::{ServerMonitor, ServerMonitorConfig, SweepSummary};
pub use process::{LivenessProbe, PidProbe, ProcessHandle, ServerStatus};
pub(crate) use process::send_signal;
pub use registry::{Registry, ServerRecord};
pub use state::{PersistedState, ServerSnapshot, StateStore};
