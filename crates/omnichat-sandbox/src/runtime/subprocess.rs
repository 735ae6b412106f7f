//! Subprocess runtime.
//!
//! Each evaluation launches a fresh interpreter process under Node's
//! permission model with no grants, so the process itself can neither touch
//! the filesystem nor spawn children. It starts with an empty environment
//! (plus PATH and any explicitly allowed variables), runs in the system temp
//! directory, receives its arguments as JSON on stdin and is killed when the
//! time limit expires or its output outgrows the configured cap.
//!
//! Inside that process the plugin code runs in a fresh `vm` context that has
//! no `require`, no `process` and no string code generation. Only strings
//! cross the context boundary: the arguments go in as JSON text and the
//! result comes out as text produced by the context's own intrinsics.

use crate::{
    error::{SandboxError, SandboxResult},
    SandboxConfig, ScriptOutput, ScriptRuntime,
};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Permission model switches, newest name first.
const PERMISSION_FLAGS: [&str; 2] = ["--permission", "--experimental-permission"];

/// Bootstrap evaluated by the interpreter. `__CODE__` is replaced by the
/// plugin source encoded as a JSON string literal and `__TIMEOUT_MS__` by the
/// synchronous evaluation limit.
///
/// The prelude runs first and captures the context's intrinsics, so later
/// tampering by the plugin cannot redirect how results are settled. Host
/// functions are never handed to plugin values.
const BOOTSTRAP: &str = r#"
const vm = require('vm');

const PRELUDE = `(function (input) {
  'use strict';
  const parse = JSON.parse;
  const stringify = JSON.stringify;
  const toText = String;
  const apply = Reflect.apply;
  const PromiseCtor = Promise;
  const then = Promise.prototype.then;
  const resolve = (v) => new PromiseCtor((ok) => ok(v));
  const state = { done: false, ok: false, text: '' };
  const describe = (e) => {
    try { return toText((e && e.stack) || e); } catch (_) { return 'script failed'; }
  };
  const fail = (e) => { if (!state.done) { state.text = describe(e); state.done = true; } };
  const succeed = (v) => {
    if (state.done) return;
    try {
      state.text = toText(typeof v === 'string' ? v : stringify(v === undefined ? null : v));
      state.ok = true;
    } catch (e) {
      state.text = describe(e);
    }
    state.done = true;
  };
  globalThis.params = parse(input);
  return {
    settle: (v) => { try { apply(then, resolve(v), [succeed, fail]); } catch (e) { fail(e); } },
    fail: fail,
    poll: () => (state.done ? (state.ok ? 'ok:' : 'err:') + state.text : ''),
  };
})`;

let input = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => { input += chunk; });
process.stdin.on('end', () => {
  const context = vm.createContext(Object.create(null), {
    codeGeneration: { strings: false, wasm: false },
  });
  const bridge = vm.runInContext(PRELUDE, context)(input || 'null');
  const settle = bridge.settle;
  const fail = bridge.fail;
  const poll = bridge.poll;

  try {
    settle(vm.runInContext(__CODE__, context, { timeout: __TIMEOUT_MS__ }));
  } catch (err) {
    fail(err);
  }

  const finish = () => {
    const status = poll();
    if (typeof status !== 'string' || status === '') {
      setTimeout(finish, 1);
      return;
    }
    if (status.startsWith('ok:')) {
      process.stdout.write(status.slice(3));
    } else {
      process.stderr.write(status.slice(4));
      process.exitCode = 1;
    }
  };
  finish();
});
"#;

/// Runtime that evaluates scripts in a short-lived interpreter process.
pub struct SubprocessRuntime {
    id: String,
    config: SandboxConfig,
    permission_flag: OnceCell<&'static str>,
}

impl SubprocessRuntime {
    pub fn new(config: SandboxConfig) -> Self {
        let id = format!("subprocess-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        debug!(id = %id, interpreter = %config.interpreter, "Subprocess runtime created");
        Self {
            id,
            config,
            permission_flag: OnceCell::new(),
        }
    }

    /// Base command with a scrubbed environment.
    fn interpreter(&self) -> Command {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.current_dir(std::env::temp_dir()).env_clear();

        // Interpreter lookup needs PATH even with a cleared environment.
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        for key in &self.config.allowed_env {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd
    }

    /// The permission model switch this interpreter understands.
    async fn permission_flag(&self) -> SandboxResult<&'static str> {
        self.permission_flag
            .get_or_try_init(|| async {
                for flag in PERMISSION_FLAGS {
                    let status = self
                        .interpreter()
                        .arg(flag)
                        .arg("-e")
                        .arg("")
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await
                        .map_err(|e| self.spawn_error(e))?;
                    if status.success() {
                        debug!(runtime = %self.id, flag, "Permission model available");
                        return Ok(flag);
                    }
                }
                Err(SandboxError::PermissionModelUnavailable(
                    self.config.interpreter.clone(),
                ))
            })
            .await
            .copied()
    }

    fn command(&self, code: &str, permission_flag: &str) -> SandboxResult<Command> {
        let literal = serde_json::to_string(code)?;
        let timeout_ms = self.config.timeout().as_millis().to_string();
        let program = BOOTSTRAP
            .replace("__TIMEOUT_MS__", &timeout_ms)
            .replace("__CODE__", &literal);

        let mut cmd = self.interpreter();
        cmd.arg(permission_flag)
            .arg("-e")
            .arg(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    fn spawn_error(&self, err: std::io::Error) -> SandboxError {
        if err.kind() == std::io::ErrorKind::NotFound {
            SandboxError::InterpreterNotFound(self.config.interpreter.clone())
        } else {
            SandboxError::SpawnFailed(err.to_string())
        }
    }
}

/// Read at most `cap + 1` bytes, enough to tell that `cap` was exceeded.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(reader) = reader {
        let limit = u64::try_from(cap).unwrap_or(u64::MAX).saturating_add(1);
        reader.take(limit).read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[async_trait]
impl ScriptRuntime for SubprocessRuntime {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_available(&self) -> bool {
        self.permission_flag().await.is_ok()
    }

    async fn run(&self, code: &str, params: &serde_json::Value) -> SandboxResult<ScriptOutput> {
        let timeout = self.config.timeout();
        let limit = self.config.max_output_bytes;
        let input = serde_json::to_vec(params)?;
        let flag = self.permission_flag().await?;
        debug!(runtime = %self.id, code_len = code.len(), "Evaluating script");

        let mut child = self
            .command(code, flag)?
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = tokio::spawn(read_capped(child.stderr.take(), limit));

        let result = tokio::time::timeout(timeout, async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input).await?;
                // Dropping stdin closes the pipe so the script sees EOF.
            }

            let stdout = read_capped(stdout, limit).await?;
            if stdout.len() > limit {
                child.start_kill()?;
                return Ok(Err(SandboxError::OutputTooLarge { limit }));
            }

            let status = child.wait().await?;
            Ok::<_, std::io::Error>(Ok((stdout, status)))
        })
        .await;

        let (stdout, status) = match result {
            Ok(finished) => match finished? {
                Ok(done) => done,
                Err(err) => {
                    stderr.abort();
                    warn!(runtime = %self.id, limit, "Script output exceeded the limit");
                    return Err(err);
                }
            },
            Err(_) => {
                stderr.abort();
                warn!(runtime = %self.id, ?timeout, "Script timed out");
                return Err(SandboxError::Timeout(timeout));
            }
        };
        let stderr = stderr
            .await
            .map_err(|e| SandboxError::SpawnFailed(e.to_string()))??;

        Ok(ScriptOutput::from_output(
            String::from_utf8_lossy(&stdout).to_string(),
            String::from_utf8_lossy(&stderr).to_string(),
            status.code().unwrap_or(-1),
        ))
    }
}
