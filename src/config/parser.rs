use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Launch specification for a single MCP server.
///
/// This structure defines how to start a specific MCP server process: the
/// command to execute, the arguments to pass, and environment overrides that
/// are merged onto the supervisor's own environment.
///
/// # Examples
///
/// ```
/// use mcp_supervisor::config::ServerConfig;
/// use std::collections::HashMap;
///
/// let mut env = HashMap::new();
/// env.insert("PORT".to_string(), "3000".to_string());
///
/// let server_config = ServerConfig {
///     command: "node".to_string(),
///     args: vec!["server.js".to_string()],
///     env,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Command to execute when starting the MCP server.
    /// This can be an absolute path or a command available in the PATH.
    pub command: String,

    /// Command-line arguments to pass to the server.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set when launching the server.
    /// These will be combined with the current environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// The server section of the configuration document.
///
/// # JSON Schema
///
/// ```json
/// {
///   "mcpServers": {
///     "echo-server": {
///       "command": "node",
///       "args": ["echo.js"],
///       "env": { "DEBUG": "true" }
///     },
///     "fetch": {
///       "command": "uvx",
///       "args": ["mcp-server-fetch"]
///     }
///   }
/// }
/// ```
///
/// Unknown top-level keys are ignored, so the supervisor can read a larger
/// application configuration that merely contains an `mcpServers` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Map of server names to their launch specifications.
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, ServerConfig>,
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else
    /// as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if the file cannot be read or its
    /// contents do not match the expected schema.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        if is_yaml {
            Self::parse_from_yaml_str(&content)
        } else {
            Self::parse_from_str(&content)
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Parses a configuration from a YAML string.
    pub fn parse_from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_unrelated_keys() {
        let config_str = r#"{
            "gateway": { "port": 8080 },
            "mcpServers": {
                "echo-server": {
                    "command": "node",
                    "args": ["echo.js"]
                }
            }
        }"#;

        let config = Config::parse_from_str(config_str).unwrap();

        assert_eq!(config.mcp_servers.len(), 1);
        let echo = &config.mcp_servers["echo-server"];
        assert_eq!(echo.command, "node");
        assert_eq!(echo.args, vec!["echo.js"]);
        assert!(echo.env.is_empty());
    }

    #[test]
    fn test_missing_servers_section_is_empty() {
        let config = Config::parse_from_str("{}").unwrap();
        assert!(config.mcp_servers.is_empty());
    }

    #[test]
    fn test_parse_yaml() {
        let config_str = r#"
mcpServers:
  fetch:
    command: uvx
    args: ["mcp-server-fetch"]
    env:
      LOG_LEVEL: debug
"#;
        let config = Config::parse_from_yaml_str(config_str).unwrap();
        let fetch = &config.mcp_servers["fetch"];
        assert_eq!(fetch.command, "uvx");
        assert_eq!(fetch.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
    }
}
