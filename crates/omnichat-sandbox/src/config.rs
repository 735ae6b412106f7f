//! Configuration types for script sandbox settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{SandboxError, SandboxResult};

/// Script sandbox configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// JavaScript interpreter to launch (default: node)
    pub interpreter: String,

    /// Hard wall-clock limit for a single script, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum bytes of stdout accepted from a script
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,

    /// Host environment variables passed through to the script.
    /// Everything else is cleared.
    pub allowed_env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "node".to_string(),
            timeout_secs: default_timeout(),
            max_output_bytes: default_max_output(),
            allowed_env: Vec::new(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject settings that would make every evaluation fail.
    pub fn validate(&self) -> SandboxResult<()> {
        if self.interpreter.trim().is_empty() {
            return Err(SandboxError::ConfigError(
                "interpreter must not be empty".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(SandboxError::ConfigError(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_output() -> usize {
    1024 * 1024
}
