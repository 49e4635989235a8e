//! Execution result types.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Capture strategy that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// In-memory pipes.
    Pipe,
    /// Output redirected to private temporary files.
    Isolated,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => f.write_str("pipe"),
            Self::Isolated => f.write_str("isolated"),
        }
    }
}

/// Terminal classification of an execution. Exactly one applies per result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Process ran to completion (any exit code).
    Completed,
    /// Process exceeded its timeout and was terminated.
    TimedOut,
    /// Process could not be started.
    SpawnFailed,
}

/// Result of command execution.
///
/// Produced once by the executor and never modified afterwards. `stdout` and
/// `stderr` are always present; they are empty on the timeout and spawn
/// failure paths.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    return_code: i32,
    stdout: String,
    stderr: String,
    #[serde(skip)]
    stdout_raw: Vec<u8>,
    #[serde(skip)]
    stderr_raw: Vec<u8>,
    timed_out: bool,
    execution_error: Option<String>,
    command: Vec<String>,
    runner: RunnerKind,
    duration_ms: u64,
}

impl ExecutionResult {
    /// Result for a process that ran to completion.
    pub(crate) fn completed(
        command: Vec<String>,
        runner: RunnerKind,
        return_code: i32,
        stdout_raw: Vec<u8>,
        stderr_raw: Vec<u8>,
        text: bool,
        duration: Duration,
    ) -> Self {
        Self {
            return_code,
            stdout: decode_output(&stdout_raw, text),
            stderr: decode_output(&stderr_raw, text),
            stdout_raw,
            stderr_raw,
            timed_out: false,
            execution_error: None,
            command,
            runner,
            duration_ms: millis(duration),
        }
    }

    /// Result for a timed-out process. Partial output is discarded.
    pub(crate) fn timeout(
        command: Vec<String>,
        runner: RunnerKind,
        timeout: Duration,
        duration: Duration,
    ) -> Self {
        Self {
            return_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            stdout_raw: Vec::new(),
            stderr_raw: Vec::new(),
            timed_out: true,
            execution_error: Some(timeout_message(timeout)),
            command,
            runner,
            duration_ms: millis(duration),
        }
    }

    /// Result for a process that could not be started.
    pub(crate) fn spawn_failed(
        command: Vec<String>,
        runner: RunnerKind,
        message: String,
        duration: Duration,
    ) -> Self {
        Self {
            return_code: 1,
            stdout: String::new(),
            stderr: String::new(),
            stdout_raw: Vec::new(),
            stderr_raw: Vec::new(),
            timed_out: false,
            execution_error: Some(message),
            command,
            runner,
            duration_ms: millis(duration),
        }
    }

    /// Exit code. Only meaningful when the outcome is [`Outcome::Completed`].
    pub fn return_code(&self) -> i32 {
        self.return_code
    }

    /// Captured stdout.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured stderr.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Captured stdout bytes, before decoding.
    pub fn stdout_bytes(&self) -> &[u8] {
        &self.stdout_raw
    }

    /// Captured stderr bytes, before decoding.
    pub fn stderr_bytes(&self) -> &[u8] {
        &self.stderr_raw
    }

    /// Whether execution timed out.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Description of why the process did not complete normally.
    pub fn execution_error(&self) -> Option<&str> {
        self.execution_error.as_deref()
    }

    /// The command as it was requested.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Capture strategy used.
    pub fn runner(&self) -> RunnerKind {
        self.runner
    }

    /// Wall-clock time in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Terminal classification.
    pub fn outcome(&self) -> Outcome {
        if self.timed_out {
            Outcome::TimedOut
        } else if self.execution_error.is_some() {
            Outcome::SpawnFailed
        } else {
            Outcome::Completed
        }
    }

    /// Check if command succeeded (completed with exit code 0).
    pub fn success(&self) -> bool {
        self.outcome() == Outcome::Completed && self.return_code == 0
    }

    /// Check if command failed for any reason.
    pub fn failed(&self) -> bool {
        !self.success()
    }

    /// Get stdout trimmed.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Parse stdout as newline-delimited JSON, skipping lines that are not JSON.
    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

pub(crate) fn timeout_message(timeout: Duration) -> String {
    format!("Command timed out after {} seconds", timeout.as_secs_f64())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Decode captured bytes. Text mode also normalizes `\r\n` to `\n`.
fn decode_output(raw: &[u8], text: bool) -> String {
    let decoded = String::from_utf8_lossy(raw);
    if text && decoded.contains('\r') {
        decoded.replace("\r\n", "\n")
    } else {
        decoded.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_completed_result() {
        let result = ExecutionResult::completed(
            argv(&["echo", "hello"]),
            RunnerKind::Pipe,
            0,
            b"hello\n".to_vec(),
            Vec::new(),
            true,
            Duration::from_millis(100),
        );

        assert_eq!(result.stdout(), "hello\n");
        assert_eq!(result.stdout_trimmed(), "hello");
        assert_eq!(result.duration_ms(), 100);
        assert_eq!(result.outcome(), Outcome::Completed);
        assert!(result.execution_error().is_none());
        assert!(result.success());
    }

    #[test]
    fn test_completed_non_zero_is_not_success() {
        let result = ExecutionResult::completed(
            argv(&["false"]),
            RunnerKind::Pipe,
            1,
            Vec::new(),
            Vec::new(),
            true,
            Duration::ZERO,
        );
        assert_eq!(result.outcome(), Outcome::Completed);
        assert!(result.failed());
    }

    #[test]
    fn test_timed_out_discards_output() {
        let result = ExecutionResult::timeout(
            argv(&["sleep", "5"]),
            RunnerKind::Isolated,
            Duration::from_secs(1),
            Duration::from_millis(1200),
        );
        assert!(result.timed_out());
        assert_eq!(result.stdout(), "");
        assert_eq!(result.stderr(), "");
        assert!(result.stdout_bytes().is_empty());
        assert_eq!(result.outcome(), Outcome::TimedOut);
        assert!(result.execution_error().unwrap().contains("timed out"));
        assert!(result.failed());
    }

    #[test]
    fn test_spawn_failed_result() {
        let result = ExecutionResult::spawn_failed(
            argv(&["nonexistent-binary-xyz"]),
            RunnerKind::Pipe,
            "NotFound: No such file or directory (os error 2)".into(),
            Duration::ZERO,
        );
        assert_eq!(result.return_code(), 1);
        assert!(!result.timed_out());
        assert_eq!(result.outcome(), Outcome::SpawnFailed);
        assert_eq!(result.stdout(), "");
    }

    #[test]
    fn test_text_mode_normalizes_newlines() {
        assert_eq!(decode_output(b"a\r\nb\r\n", true), "a\nb\n");
        assert_eq!(decode_output(b"a\r\nb\r\n", false), "a\r\nb\r\n");
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let decoded = decode_output(&[0x66, 0xff, 0x6f], true);
        assert!(decoded.starts_with('f'));
        assert!(decoded.ends_with('o'));
    }

    #[test]
    fn test_json_lines_skips_noise() {
        let stdout = b"warming up\n{\"code\":\"E501\"}\n\n[1,2]\nnot json {\n".to_vec();
        let result = ExecutionResult::completed(
            argv(&["lint"]),
            RunnerKind::Pipe,
            1,
            stdout,
            Vec::new(),
            true,
            Duration::ZERO,
        );
        let values = result.json_lines();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["code"], "E501");
    }

    #[test]
    fn test_serialize_result() {
        let result = ExecutionResult::spawn_failed(
            argv(&["x"]),
            RunnerKind::Pipe,
            "NotFound: missing".into(),
            Duration::from_millis(3),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["return_code"], 1);
        assert_eq!(json["runner"], "pipe");
        assert_eq!(json["timed_out"], false);
        assert_eq!(json["execution_error"], "NotFound: missing");
        assert!(json.get("stdout_raw").is_none());
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            timeout_message(Duration::from_millis(1500)),
            "Command timed out after 1.5 seconds"
        );
    }
}
