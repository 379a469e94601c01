/// Error handling module for MCP Supervisor.
///
/// This module defines the error types used throughout the library.
/// Most of these never escape the supervisor itself: spawn failures become
/// an `error` record status, persistence failures are logged, and an
/// unreadable configuration is treated as an empty one. They are still
/// returned as `Result`s so callers of the lower-level APIs can decide.
///
/// # Example
///
/// ```
/// use mcp_supervisor::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::ServerNotFound(name)) => println!("Server '{}' is not registered", name),
///         Err(Error::Spawn(msg)) => println!("Launch failed: {}", msg),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use thiserror::Error;

/// Errors that can occur in the mcp-supervisor library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to read or parse the configuration document.
    ///
    /// This error occurs when:
    /// - The configuration file is missing or unreadable
    /// - The document is malformed JSON or YAML
    /// - Required fields are missing or have the wrong type
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parses but contains invalid values.
    ///
    /// This error occurs when:
    /// - A server declares an empty command
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The operating system refused to launch a server process.
    ///
    /// This error occurs when:
    /// - The executable does not exist
    /// - Permission to execute it is denied
    #[error("Failed to spawn server process: {0}")]
    Spawn(String),

    /// Error while signalling or observing a running server process.
    #[error("Server process error: {0}")]
    Process(String),

    /// The named server has no record in the registry.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// A status transition that the lifecycle state machine does not allow.
    #[error("Invalid status transition for '{name}': {from} -> {to}")]
    InvalidTransition {
        /// Server name
        name: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// The persisted state file could not be read or written.
    #[error("State persistence error: {0}")]
    Persistence(String),

    /// A per-server log file could not be opened or written.
    #[error("Log sink error: {0}")]
    LogSink(String),

    /// Error in serializing or deserializing data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for mcp-supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;
