//! Isolated script execution for omnichat tool calls.
//!
//! Chat plugins carry a snippet of JavaScript. When a model selects a plugin,
//! the snippet runs here, inside a fresh `vm` context of a separate Node
//! process. The context has no `require` or `process` and cannot compile code
//! from strings. The process runs under the permission model with no file or
//! child-process grants, a scrubbed environment and a hard time limit. The
//! arguments chosen by the model are bound as the global `params`, and the
//! value of the snippet's final expression (awaited if it is a promise) comes
//! back as a string.
//!
//! # Example
//!
//! ```rust,no_run
//! use omnichat_sandbox::{SandboxConfig, ScriptSandbox};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sandbox = ScriptSandbox::new(SandboxConfig::default());
//!     let result = sandbox
//!         .evaluate("params.a + params.b", &serde_json::json!({"a": 1, "b": 2}))
//!         .await?;
//!     assert_eq!(result, "3");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod runtime;

pub use config::SandboxConfig;
pub use error::{SandboxError, SandboxResult};
pub use runtime::{ScriptSandbox, SubprocessRuntime};

use async_trait::async_trait;

/// Result of one script run.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Standard output (the script's result)
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code
    pub exit_code: i32,
    /// Whether the script succeeded (exit code 0)
    pub success: bool,
}

impl ScriptOutput {
    /// Create a new successful output.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            success: true,
        }
    }

    /// Create a new failed output.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            success: false,
        }
    }

    pub fn from_output(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
        }
    }

    /// Convert into the script's result, turning a failed run into an error.
    pub fn into_result(self) -> SandboxResult<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(SandboxError::ScriptFailed {
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// A backend able to evaluate plugin scripts.
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    /// Unique identifier for this runtime instance.
    fn id(&self) -> &str;

    /// Whether the backing interpreter can be launched on this host.
    async fn is_available(&self) -> bool;

    /// Evaluate `code` with `params` bound as a local variable.
    async fn run(&self, code: &str, params: &serde_json::Value) -> SandboxResult<ScriptOutput>;
}
