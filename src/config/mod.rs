//! Configuration module for MCP Supervisor.
//!
//! This module handles reading the server configuration document, deciding
//! which servers the supervisor owns, and the supervisor's own runtime
//! settings.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use mcp_supervisor::config::Config;
//!
//! let config = Config::from_file("config.json").unwrap();
//! println!("Loaded configuration with {} servers", config.mcp_servers.len());
//! ```
//!
//! Splitting servers into supervised and externally managed:
//!
//! ```
//! use mcp_supervisor::config::{partition, EligibilityRules, ServerConfig};
//! use std::collections::HashMap;
//!
//! let mut servers = HashMap::new();
//! servers.insert("fetch".to_string(), ServerConfig {
//!     command: "uvx".to_string(),
//!     args: vec!["mcp-server-fetch".to_string()],
//!     env: HashMap::new(),
//! });
//! servers.insert("echo-server".to_string(), ServerConfig {
//!     command: "node".to_string(),
//!     args: vec!["echo.js".to_string()],
//!     env: HashMap::new(),
//! });
//!
//! let split = partition(&servers, &EligibilityRules::default());
//! assert!(split.supervised.contains_key("echo-server"));
//! assert!(split.excluded.contains_key("fetch"));
//! ```
mod eligibility;
mod parser;
mod settings;
mod source;
pub mod validator;

pub use eligibility::{Eligibility, ExclusionReason, Partition, classify, partition};
pub use parser::{Config, ServerConfig};
pub use settings::{DEFAULT_MANAGED_COMMANDS, EligibilityRules, SupervisorConfig};
pub use source::ConfigSource;
pub use validator::validate_config;
