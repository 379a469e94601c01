use crate::config::ServerConfig;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Validates a server configuration
pub fn validate_server_config(name: &str, config: &ServerConfig) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::ConfigInvalid("Server with empty name".to_string()));
    }

    if config.command.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' has empty command",
            name
        )));
    }

    // Names become log file names
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::ConfigInvalid(format!(
            "Server name '{}' is not a valid file name",
            name
        )));
    }

    Ok(())
}

/// Validates a map of server configurations.
///
/// An empty map is valid: a supervisor with nothing to supervise simply idles.
pub fn validate_config(configs: &HashMap<String, ServerConfig>) -> Result<()> {
    for (name, config) in configs {
        validate_server_config(name, config)?;
    }

    Ok(())
}
