use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{InterpreterError, InterpreterResult, ScriptExecutor, captured_output};

/// Exposes WebCrypto and a `window` alias before the harness runs.
const PRELUDE: &str = r#"const __webcrypto = require('crypto').webcrypto;
try { globalThis.crypto = __webcrypto; } catch (e) {}
if (typeof window === 'undefined') { globalThis.window = globalThis; }
try { window.crypto = __webcrypto; } catch (e) {}
"#;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs programs in a `node` subprocess, feeding the source through stdin.
#[derive(Debug, Clone)]
pub struct NodeScriptExecutor {
    binary: PathBuf,
    timeout: Duration,
}

impl NodeScriptExecutor {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("node"),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, program: &str) -> InterpreterResult<String> {
        let mut child = Command::new(&self.binary)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| InterpreterError::Spawn(format!("{}: {err}", self.binary.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(PRELUDE.as_bytes())
                .await
                .map_err(|err| InterpreterError::Spawn(err.to_string()))?;
            stdin
                .write_all(program.as_bytes())
                .await
                .map_err(|err| InterpreterError::Spawn(err.to_string()))?;
            // Closing stdin lets node start evaluating.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| InterpreterError::Spawn(err.to_string()))?;

        if !output.status.success() {
            return Err(InterpreterError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        captured_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for NodeScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptExecutor for NodeScriptExecutor {
    async fn execute(&self, program: &str) -> InterpreterResult<String> {
        tokio::time::timeout(self.timeout, self.run(program))
            .await
            .map_err(|_| InterpreterError::Timeout(self.timeout))?
    }
}
