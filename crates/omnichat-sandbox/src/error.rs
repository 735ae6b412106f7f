//! Error types for sandbox operations.

use thiserror::Error;

/// Errors that can occur while evaluating a plugin script.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The interpreter binary could not be found
    #[error("script interpreter '{0}' is not available on this system")]
    InterpreterNotFound(String),

    /// The interpreter cannot run scripts without host access
    #[error("script interpreter '{0}' does not support the permission model")]
    PermissionModelUnavailable(String),

    /// The interpreter process could not be started
    #[error("failed to start script interpreter: {0}")]
    SpawnFailed(String),

    /// The script threw or exited non-zero
    #[error("script failed with exit code {exit_code}: {stderr}")]
    ScriptFailed { exit_code: i32, stderr: String },

    /// Script timed out
    #[error("script timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The script wrote more output than allowed
    #[error("script output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
