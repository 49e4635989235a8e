//! Command execution façade.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::command::{CommandSpec, ExecutionOptions};
use super::isolation::{
    default_policy, isolation_disabled, needs_isolation, AnyOf, InterpreterNames,
    IsolationPolicy, SelfExecutable,
};
use super::result::{ExecutionResult, Outcome, RunnerKind};
use super::runner::{ProcessRunner, RunOutcome};
use super::terminate::{platform_terminator, TreeTerminator, DEFAULT_GRACE};
use crate::config::Config;
use crate::error::ToolRunnerError;
use crate::Result;

/// Default execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on waiting for a child after its tree was terminated.
pub const DEFAULT_EXIT_WAIT: Duration = Duration::from_secs(2);

/// Runs commands with timeouts, tree termination and stdio isolation.
///
/// Holds no per-call state; one executor can be shared across threads.
#[derive(Clone)]
pub struct CommandExecutor {
    policy: Arc<dyn IsolationPolicy>,
    terminator: Arc<dyn TreeTerminator>,
    exit_wait: Duration,
}

impl CommandExecutor {
    /// Executor with the default isolation policy and platform terminator.
    pub fn new() -> Self {
        Self {
            policy: Arc::new(default_policy()),
            terminator: Arc::from(platform_terminator(DEFAULT_GRACE)),
            exit_wait: DEFAULT_EXIT_WAIT,
        }
    }

    /// Executor configured from the `execution` section of a config.
    pub fn from_config(config: &Config) -> Self {
        let exec = &config.execution;
        let names = exec
            .extra_interpreters
            .iter()
            .fold(InterpreterNames::default(), |names, extra| names.with(extra));
        let policy = AnyOf::new().with(names).with(SelfExecutable::current());

        Self {
            policy: Arc::new(policy),
            terminator: Arc::from(platform_terminator(exec.termination_grace())),
            exit_wait: exec.exit_wait(),
        }
    }

    /// Replace the isolation policy.
    pub fn with_policy(mut self, policy: impl IsolationPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Replace the process tree terminator.
    pub fn with_terminator(mut self, terminator: impl TreeTerminator + 'static) -> Self {
        self.terminator = Arc::new(terminator);
        self
    }

    /// Set how long to wait for exit after termination.
    pub fn with_exit_wait(mut self, exit_wait: Duration) -> Self {
        self.exit_wait = exit_wait;
        self
    }

    /// Whether `command` would run in isolation mode with `options`.
    pub fn uses_isolation(&self, command: &CommandSpec, options: &ExecutionOptions) -> bool {
        needs_isolation(
            self.policy.as_ref(),
            command.argv(),
            isolation_disabled(&options.env),
        )
    }

    /// Execute a command synchronously (blocking).
    ///
    /// Returns `Ok` for every outcome unless `options.check` is set, in which
    /// case non-zero exits, timeouts and spawn failures become errors.
    pub fn execute(
        &self,
        command: &CommandSpec,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        if command.is_empty() && options.check {
            return Err(ToolRunnerError::EmptyCommand);
        }
        let result = self.run(command, options);
        if options.check {
            check(result, options.timeout)
        } else {
            Ok(result)
        }
    }

    /// Execute a command on the blocking thread pool.
    pub async fn execute_async(
        &self,
        command: CommandSpec,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult> {
        let executor = self.clone();
        tokio::task::spawn_blocking(move || executor.execute(&command, &options))
            .await
            .map_err(|e| ToolRunnerError::TaskJoin(e.to_string()))?
    }

    /// Run and always produce a populated result.
    fn run(&self, command: &CommandSpec, options: &ExecutionOptions) -> ExecutionResult {
        let start = Instant::now();
        let argv = command.argv().to_vec();

        let isolated = self.uses_isolation(command, options);
        let file_capture = isolated && options.capture_output;
        let runner_kind = if file_capture {
            RunnerKind::Isolated
        } else {
            RunnerKind::Pipe
        };
        debug!(?argv, isolated, runner = %runner_kind, timeout = ?options.timeout, "executing command");

        let scratch = if file_capture {
            match tempfile::Builder::new().prefix("toolrunner-").tempdir() {
                Ok(dir) => Some(dir),
                Err(e) => {
                    let message = format!("{:?}: {}", e.kind(), e);
                    return ExecutionResult::spawn_failed(argv, runner_kind, message, start.elapsed());
                }
            }
        } else {
            None
        };

        let outcome = ProcessRunner::new(self.terminator.as_ref(), self.exit_wait).run(
            &argv,
            options,
            isolated,
            scratch.as_ref().map(|dir| dir.path()),
        );

        // Dropping also removes the directory, so every path cleans up; an
        // explicit close only adds logging.
        if let Some(dir) = scratch {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
            }
        }

        let elapsed = start.elapsed();
        match outcome {
            RunOutcome::Completed {
                return_code,
                stdout,
                stderr,
            } => ExecutionResult::completed(
                argv,
                runner_kind,
                return_code,
                stdout,
                stderr,
                options.text,
                elapsed,
            ),
            RunOutcome::TimedOut => {
                ExecutionResult::timeout(argv, runner_kind, options.timeout, elapsed)
            }
            RunOutcome::SpawnFailed { message } => {
                ExecutionResult::spawn_failed(argv, runner_kind, message, elapsed)
            }
        }
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("exit_wait", &self.exit_wait)
            .finish_non_exhaustive()
    }
}

/// Strict mode: turn unsuccessful outcomes into errors.
fn check(result: ExecutionResult, timeout: Duration) -> Result<ExecutionResult> {
    match result.outcome() {
        Outcome::Completed if result.return_code() == 0 => Ok(result),
        Outcome::Completed => Err(ToolRunnerError::NonZeroExit {
            command: result.command().to_vec(),
            return_code: result.return_code(),
            stdout: result.stdout().to_string(),
            stderr: result.stderr().to_string(),
        }),
        Outcome::TimedOut => Err(ToolRunnerError::Timeout {
            command: result.command().to_vec(),
            timeout,
        }),
        Outcome::SpawnFailed => Err(ToolRunnerError::SpawnFailed {
            command: result.command().to_vec(),
            message: result.execution_error().unwrap_or_default().to_string(),
        }),
    }
}

fn shared_executor() -> &'static CommandExecutor {
    static EXECUTOR: OnceLock<CommandExecutor> = OnceLock::new();
    EXECUTOR.get_or_init(CommandExecutor::new)
}

/// Execute with the shared default executor.
///
/// Errors only in strict mode (`options.check`).
pub fn execute_command(
    command: &CommandSpec,
    options: &ExecutionOptions,
) -> Result<ExecutionResult> {
    shared_executor().execute(command, options)
}

/// Execute an argv with all defaults. Never fails; inspect the result.
pub fn execute_subprocess<I, S>(argv: I) -> ExecutionResult
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    shared_executor().run(&CommandSpec::from_argv(argv), &ExecutionOptions::default())
}

/// Execute an argv with a timeout and otherwise default options.
pub fn execute_with_timeout<I, S>(argv: I, timeout: Duration) -> ExecutionResult
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let options = ExecutionOptions::default().timeout(timeout);
    shared_executor().run(&CommandSpec::from_argv(argv), &options)
}

/// Async wrapper around [`execute_command`] that runs off the event loop.
pub async fn execute_command_async(
    command: CommandSpec,
    options: ExecutionOptions,
) -> Result<ExecutionResult> {
    shared_executor().execute_async(command, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::isolation::DISABLE_ISOLATION_ENV;

    #[test]
    fn test_default_timeout() {
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(120));
        assert_eq!(DEFAULT_EXIT_WAIT, Duration::from_secs(2));
    }

    #[test]
    fn test_executor_new() {
        let executor = CommandExecutor::new();
        assert!(format!("{executor:?}").contains("CommandExecutor"));
    }

    #[test]
    fn test_uses_isolation() {
        let executor = CommandExecutor::new();
        let python = CommandSpec::from_argv(["python3", "-c", "pass"]);
        let ruff = CommandSpec::from_argv(["ruff", "check"]);

        assert!(executor.uses_isolation(&python, &ExecutionOptions::default()));
        assert!(!executor.uses_isolation(&ruff, &ExecutionOptions::default()));

        let disabled = ExecutionOptions::default().env(DISABLE_ISOLATION_ENV, "1");
        assert!(!executor.uses_isolation(&python, &disabled));
    }

    #[test]
    fn test_from_config_extra_interpreters() {
        let mut config = Config::default();
        config.execution.extra_interpreters = vec!["node".to_string()];
        let executor = CommandExecutor::from_config(&config);
        let node = CommandSpec::from_argv(["node", "-e", "1"]);
        assert!(executor.uses_isolation(&node, &ExecutionOptions::default()));
    }

    #[test]
    fn test_empty_command() {
        let result = execute_subprocess(Vec::<String>::new());
        assert_eq!(result.return_code(), 1);
        assert_eq!(result.outcome(), Outcome::SpawnFailed);

        let err = execute_command(
            &CommandSpec::default(),
            &ExecutionOptions::default().check(true),
        )
        .unwrap_err();
        assert!(matches!(err, ToolRunnerError::EmptyCommand));
    }

    #[test]
    fn test_missing_binary_no_raise() {
        let result = execute_subprocess(["nonexistent-binary-xyz"]);
        assert_eq!(result.return_code(), 1);
        assert!(!result.timed_out());
        assert!(!result.execution_error().unwrap_or_default().is_empty());
        assert_eq!(result.stdout(), "");
    }

    #[test]
    fn test_missing_binary_strict() {
        let err = execute_command(
            &CommandSpec::new("nonexistent-binary-xyz"),
            &ExecutionOptions::default().check(true),
        )
        .unwrap_err();
        assert!(matches!(err, ToolRunnerError::SpawnFailed { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn test_check_non_zero_carries_output() {
        let err = execute_command(
            &CommandSpec::from_argv(["sh", "-c", "echo partial; exit 4"]),
            &ExecutionOptions::default().check(true),
        )
        .unwrap_err();
        match err {
            ToolRunnerError::NonZeroExit {
                return_code,
                stdout,
                ..
            } => {
                assert_eq!(return_code, 4);
                assert_eq!(stdout, "partial\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_check_success_passes() {
        let result = execute_command(
            &CommandSpec::from_argv(["true"]),
            &ExecutionOptions::default().check(true),
        )
        .unwrap();
        assert!(result.success());
    }

    #[test]
    #[cfg(unix)]
    fn test_execute_with_timeout_times_out() {
        let result = execute_with_timeout(["sleep", "5"], Duration::from_millis(300));
        assert!(result.timed_out());
        assert_eq!(result.outcome(), Outcome::TimedOut);
        assert!(result.duration_ms() < 5000);
    }

    #[test]
    #[cfg(unix)]
    fn test_execute_async() {
        let result = tokio_test::block_on(execute_command_async(
            CommandSpec::from_argv(["echo", "async"]),
            ExecutionOptions::default(),
        ))
        .unwrap();
        assert_eq!(result.stdout_trimmed(), "async");
    }
}
