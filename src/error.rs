//! Error types for toolrunner.

use std::time::Duration;

use thiserror::Error;

/// Main error type for toolrunner operations.
///
/// The first three variants are only produced in strict mode
/// (`ExecutionOptions::check`). Without strict mode every execution outcome
/// is reported through [`crate::ExecutionResult`] instead.
#[derive(Error, Debug)]
pub enum ToolRunnerError {
    /// Child ran to completion with a non-zero exit code.
    #[error("command {command:?} returned non-zero exit status {return_code}")]
    NonZeroExit {
        command: Vec<String>,
        return_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Child exceeded its timeout and was terminated.
    #[error("command {command:?} timed out after {timeout:?}")]
    Timeout {
        command: Vec<String>,
        timeout: Duration,
    },

    /// Child could not be started at all.
    #[error("command {command:?} could not be started: {message}")]
    SpawnFailed {
        command: Vec<String>,
        message: String,
    },

    /// No program was given.
    #[error("empty command")]
    EmptyCommand,

    /// Background execution task failed to complete.
    #[error("execution task failed: {0}")]
    TaskJoin(String),
}

impl ToolRunnerError {
    /// Exit code carried by the error, if any.
    pub fn return_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { return_code, .. } => Some(*return_code),
            Self::SpawnFailed { .. } => Some(1),
            _ => None,
        }
    }
}

/// Convenience Result type for toolrunner operations.
pub type Result<T> = std::result::Result<T, ToolRunnerError>;
