use std::time::Duration;

use async_trait::async_trait;
use boa_engine::{Context, JsResult, Source};

use super::{InterpreterError, InterpreterResult, ScriptExecutor, captured_output};

/// Browser-ish globals for the embedded engine. Boa ships without `console`
/// or WebCrypto, so output is collected into `__stdout` and randomness comes
/// from `Math.random`.
const PRELUDE: &str = r#"
var __stdout = [];
var console = {
    log: function() {
        __stdout.push(Array.prototype.map.call(arguments, function(v) { return String(v); }).join(" "));
    },
    info: function() {},
    warn: function() {},
    error: function() {},
    debug: function() {}
};
var crypto = {
    getRandomValues: function(array) {
        for (var i = 0; i < array.length; i++) {
            array[i] = Math.floor(Math.random() * 256);
        }
        return array;
    },
    randomUUID: function() {
        return "xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx".replace(/[xy]/g, function(c) {
            var r = Math.floor(Math.random() * 16);
            var v = c === "x" ? r : (r & 0x3) | 0x8;
            return v.toString(16);
        });
    }
};
globalThis.crypto = crypto;
globalThis.console = console;
var window = globalThis;
var self = globalThis;
function setTimeout(cb) { cb(); return 0; }
function clearTimeout() {}
"#;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_LOOP_LIMIT: u64 = 50_000_000;

/// Executor backed by the embedded Boa JavaScript engine.
///
/// Needs no external runtime, at the cost of a thinner browser surface than
/// [`super::NodeScriptExecutor`]. The caller stops waiting after `timeout`;
/// the loop limit is what eventually frees the engine thread.
#[derive(Debug, Clone)]
pub struct BoaScriptExecutor {
    timeout: Duration,
    loop_limit: u64,
}

impl Default for BoaScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BoaScriptExecutor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            loop_limit: DEFAULT_LOOP_LIMIT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Iterations any single loop may run before the script is aborted.
    pub fn with_loop_limit(mut self, limit: u64) -> Self {
        self.loop_limit = limit;
        self
    }

    fn run(program: &str, loop_limit: u64) -> InterpreterResult<String> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(loop_limit);

        context
            .eval(Source::from_bytes(PRELUDE))
            .map_err(|err| InterpreterError::Other(err.to_string()))?;

        context
            .eval(Source::from_bytes(program))
            .map_err(|err| InterpreterError::Execution(err.to_string()))?;

        // Drain promise callbacks so async harness code gets to print.
        job_outcome(context.run_jobs())?;

        let output = context
            .eval(Source::from_bytes("__stdout.join('\\n');"))
            .map_err(|err| InterpreterError::Execution(err.to_string()))?;

        let text = output
            .to_string(&mut context)
            .map_err(|err| InterpreterError::Execution(err.to_string()))?
            .to_std_string()
            .map_err(|_| InterpreterError::Other("unable to convert interpreter output".into()))?;

        captured_output(&text)
    }
}

fn job_outcome(result: JsResult<()>) -> InterpreterResult<()> {
    result.map_err(|err| InterpreterError::Execution(err.to_string()))
}

#[async_trait]
impl ScriptExecutor for BoaScriptExecutor {
    async fn execute(&self, program: &str) -> InterpreterResult<String> {
        let program = program.to_owned();
        let loop_limit = self.loop_limit;
        let task = tokio::task::spawn_blocking(move || Self::run(&program, loop_limit));

        tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| InterpreterError::Timeout(self.timeout))?
            .map_err(|err| InterpreterError::Other(err.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_console_output() {
        let executor = BoaScriptExecutor::new();
        let token = executor
            .execute("var a = 40; var b = 2; console.log('token-' + (a + b));")
            .await
            .unwrap();
        assert_eq!(token, "token-42");
    }

    #[tokio::test]
    async fn crypto_shim_fills_buffers() {
        let executor = BoaScriptExecutor::new();
        let out = executor
            .execute("var buf = crypto.getRandomValues(new Uint8Array(8)); console.log(buf.length);")
            .await
            .unwrap();
        assert_eq!(out, "8");
    }

    #[tokio::test]
    async fn silent_program_is_an_error() {
        let executor = BoaScriptExecutor::new();
        let err = executor.execute("var x = 1;").await.unwrap_err();
        assert!(matches!(err, InterpreterError::EmptyOutput));
    }

    #[tokio::test]
    async fn promise_jobs_run_before_output_is_read() {
        let executor = BoaScriptExecutor::new();
        let out = executor
            .execute("Promise.resolve('async-token').then(function(v) { console.log(v); });")
            .await
            .unwrap();
        assert_eq!(out, "async-token");
    }

    #[test]
    fn failed_job_queue_is_an_execution_error() {
        use boa_engine::{JsError, JsValue, js_string};

        let failed: JsResult<()> = Err(JsError::from_opaque(JsValue::from(js_string!("job exploded"))));
        let err = job_outcome(failed).unwrap_err();
        assert!(matches!(err, InterpreterError::Execution(ref msg) if msg.contains("job exploded")));
        assert!(job_outcome(Ok(())).is_ok());
    }

    #[tokio::test]
    async fn runaway_loop_hits_the_iteration_limit() {
        let executor = BoaScriptExecutor::new().with_loop_limit(10_000);
        let err = executor
            .execute("while (true) {} console.log('unreachable');")
            .await
            .unwrap_err();
        assert!(matches!(err, InterpreterError::Execution(_)));
    }

    #[tokio::test]
    async fn slow_script_times_out() {
        let executor = BoaScriptExecutor::new()
            .with_timeout(Duration::from_millis(200))
            .with_loop_limit(u64::MAX);
        let started = std::time::Instant::now();
        let err = executor
            .execute("var end = Date.now() + 2000; while (Date.now() < end) {} console.log('late');")
            .await
            .unwrap_err();
        assert!(matches!(err, InterpreterError::Timeout(d) if d == Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn thrown_exception_is_an_execution_error() {
        let executor = BoaScriptExecutor::new();
        let err = executor
            .execute("throw new Error('challenge broke');")
            .await
            .unwrap_err();
        assert!(matches!(err, InterpreterError::Execution(_)));
    }
}
