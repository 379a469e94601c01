use crate::config::{Config, validate_config};
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Read-only provider of the configured server set.
///
/// Every call to [`ConfigSource::load`] reads the document fresh from disk,
/// so edits are picked up by the next health sweep or status query without
/// restarting the supervisor. The source never fails: a missing or malformed
/// document is logged and yields an empty configuration.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
}

impl ConfigSource {
    /// Create a source reading the given configuration file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the configuration document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the document, propagating any error.
    pub fn try_load(&self) -> Result<Config> {
        let config = Config::from_file(&self.path)?;
        validate_config(&config.mcp_servers)?;
        Ok(config)
    }

    /// Read the document, treating any error as "no servers configured".
    #[tracing::instrument(skip(self), fields(config_path = ?self.path))]
    pub fn load(&self) -> Config {
        match self.try_load() {
            Ok(config) => {
                tracing::debug!(num_servers = config.mcp_servers.len(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration, treating as empty");
                Config::default()
            }
        }
    }
}
