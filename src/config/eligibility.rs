use crate::config::{EligibilityRules, ServerConfig};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Why a server is left out of supervision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Launched through one of the reserved on-demand commands
    ManagedCommand(String),
    /// Listed as an on-demand-only server
    OnDemandOnly,
}

/// Outcome of the eligibility filter for one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// The supervisor spawns and keeps this server running
    Supervised,
    /// The host application starts this server itself when needed
    Excluded(ExclusionReason),
}

impl Eligibility {
    /// Whether the supervisor owns this server's process
    pub fn is_supervised(&self) -> bool {
        matches!(self, Eligibility::Supervised)
    }
}

/// Configured servers split into the two eligibility classes.
///
/// Both maps are ordered by name so that startup order and skip notices are
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Servers the supervisor manages
    pub supervised: BTreeMap<String, ServerConfig>,
    /// Servers left to the host application, with the reason
    pub excluded: BTreeMap<String, ExclusionReason>,
}

/// Classify a single server.
pub fn classify(name: &str, config: &ServerConfig, rules: &EligibilityRules) -> Eligibility {
    let program = Path::new(config.command.trim())
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(config.command.as_str());

    if let Some(cmd) = rules.managed_commands.iter().find(|c| c.as_str() == program) {
        return Eligibility::Excluded(ExclusionReason::ManagedCommand(cmd.clone()));
    }

    if rules.on_demand_servers.iter().any(|n| n == name) {
        return Eligibility::Excluded(ExclusionReason::OnDemandOnly);
    }

    Eligibility::Supervised
}

/// Split the configured servers into supervised and excluded sets.
///
/// Every name lands in exactly one of the two maps. A skip notice is logged
/// for each excluded server.
pub fn partition(servers: &HashMap<String, ServerConfig>, rules: &EligibilityRules) -> Partition {
    let mut result = Partition::default();

    let ordered: BTreeMap<&String, &ServerConfig> = servers.iter().collect();
    for (name, config) in ordered {
        match classify(name, config, rules) {
            Eligibility::Supervised => {
                result.supervised.insert(name.clone(), config.clone());
            }
            Eligibility::Excluded(reason) => {
                match &reason {
                    ExclusionReason::ManagedCommand(cmd) => tracing::info!(
                        server = %name,
                        command = %cmd,
                        "Skipping server: launched on demand by the host application"
                    ),
                    ExclusionReason::OnDemandOnly => tracing::info!(
                        server = %name,
                        "Skipping server: configured as on-demand only"
                    ),
                }
                result.excluded.insert(name.clone(), reason);
            }
        }
    }

    result
}
