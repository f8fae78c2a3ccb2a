//! JavaScript interpreter infrastructure.
//!
//! The challenge harness is handed to a [`ScriptExecutor`] which runs it in an
//! isolated environment and returns whatever the program printed. Two runtimes
//! ship with the crate: a Node.js subprocess and the embedded Boa engine.

mod boa;
mod node;

pub use boa::BoaScriptExecutor;
pub use node::NodeScriptExecutor;

use async_trait::async_trait;
use thiserror::Error;

/// Abstraction over JavaScript runtimes capable of producing challenge tokens.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run `program` and return its captured standard output, trimmed.
    ///
    /// Empty output must be reported as [`InterpreterError::EmptyOutput`].
    async fn execute(&self, program: &str) -> InterpreterResult<String>;
}

/// Failures produced by JavaScript runtimes.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("failed to launch javascript runtime: {0}")]
    Spawn(String),
    #[error("javascript execution failed (exit code {code:?}): {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("javascript execution failed: {0}")]
    Execution(String),
    #[error("javascript execution timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("javascript program produced no output")]
    EmptyOutput,
    #[error("javascript engine error: {0}")]
    Other(String),
}

/// Convenience alias for runtime results.
pub type InterpreterResult<T> = Result<T, InterpreterError>;

/// Trims runtime output and rejects empty results.
pub(crate) fn captured_output(raw: &str) -> InterpreterResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InterpreterError::EmptyOutput);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_trimmed() {
        assert_eq!(captured_output("  abc\n").unwrap(), "abc");
    }

    #[test]
    fn blank_output_is_rejected() {
        assert!(matches!(
            captured_output(" \n\t"),
            Err(InterpreterError::EmptyOutput)
        ));
    }
}
