use std::path::PathBuf;
use std::time::Duration;

/// Executables that launch an on-demand package runner. Servers started
/// through them are spawned by the host application per request.
pub const DEFAULT_MANAGED_COMMANDS: [&str; 2] = ["uvx", "npx"];

/// Rules deciding which configured servers are left to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityRules {
    /// Command file names reserved for the on-demand transport
    pub managed_commands: Vec<String>,
    /// Server names that must only ever run on demand
    pub on_demand_servers: Vec<String>,
}

impl Default for EligibilityRules {
    fn default() -> Self {
        Self {
            managed_commands: DEFAULT_MANAGED_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            on_demand_servers: Vec::new(),
        }
    }
}

/// Runtime settings for the supervisor.
///
/// # Examples
///
/// ```
/// use mcp_supervisor::config::SupervisorConfig;
/// use std::time::Duration;
///
/// let config = SupervisorConfig {
///     check_interval: Duration::from_secs(10),
///     ..SupervisorConfig::default()
/// };
/// assert_eq!(config.healthy_threshold, 3);
/// ```
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory receiving one `<name>.log` file per server
    pub logs_dir: PathBuf,
    /// Where the registry snapshot is written
    pub state_file: PathBuf,
    /// Health sweep period
    pub check_interval: Duration,
    /// Consecutive live probes needed before `running` becomes `healthy`
    pub healthy_threshold: u32,
    /// Delay between SIGTERM and SIGKILL when stopping a server
    pub grace_period: Duration,
    /// Consecutive automatic restarts allowed without reaching `healthy`.
    /// `None` restarts forever.
    pub max_restarts: Option<u32>,
    /// Eligibility filter rules
    pub eligibility: EligibilityRules,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            state_file: PathBuf::from("mcp-supervisor-state.json"),
            check_interval: Duration::from_secs(30),
            healthy_threshold: 3,
            grace_period: Duration::from_secs(5),
            max_restarts: None,
            eligibility: EligibilityRules::default(),
        }
    }
}
