//! Script runtime implementations.
//!
//! - `subprocess`: a fresh interpreter process per evaluation

pub mod subprocess;

use crate::{SandboxConfig, SandboxResult, ScriptRuntime};
use std::sync::Arc;
use tracing::{debug, info};

pub use subprocess::SubprocessRuntime;

/// Front door for plugin script evaluation.
///
/// Wraps a [`ScriptRuntime`] and turns failed runs into errors so callers only
/// see the script's result string.
#[derive(Clone)]
pub struct ScriptSandbox {
    config: SandboxConfig,
    runtime: Arc<dyn ScriptRuntime>,
}

impl ScriptSandbox {
    /// Create a sandbox backed by the subprocess runtime.
    pub fn new(config: SandboxConfig) -> Self {
        let runtime = Arc::new(SubprocessRuntime::new(config.clone()));
        Self { config, runtime }
    }

    /// Create a sandbox with a custom runtime.
    pub fn with_runtime(config: SandboxConfig, runtime: Arc<dyn ScriptRuntime>) -> Self {
        Self { config, runtime }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub async fn is_available(&self) -> bool {
        self.runtime.is_available().await
    }

    /// Evaluate `code` with `params` bound and return its result string.
    pub async fn evaluate(&self, code: &str, params: &serde_json::Value) -> SandboxResult<String> {
        self.config.validate()?;
        debug!(runtime = %self.runtime.id(), "Dispatching script evaluation");
        let result = self.runtime.run(code, params).await?.into_result();
        if let Err(ref e) = result {
            info!(runtime = %self.runtime.id(), error = %e, "Script evaluation failed");
        }
        result
    }
}
