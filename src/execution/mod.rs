//! Command execution engine.
//!
//! This module runs one foreground child per call:
//! - Timeout handling with process-tree termination
//! - Pipe or temp-file output capture
//! - Stdio isolation for interpreter children
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use toolrunner::execution::{execute_command, CommandSpec, ExecutionOptions};
//!
//! let cmd = CommandSpec::new("python").args(["-c", "print('hi')"]);
//! let opts = ExecutionOptions::default().timeout(Duration::from_secs(10));
//! let result = execute_command(&cmd, &opts).unwrap();
//! assert_eq!(result.stdout_trimmed(), "hi");
//! ```

mod command;
mod executor;
mod isolation;
mod result;
mod runner;
mod terminate;

pub use command::{CommandSpec, ExecutionOptions};
pub use executor::{
    execute_command, execute_command_async, execute_subprocess, execute_with_timeout,
    CommandExecutor, DEFAULT_EXIT_WAIT, DEFAULT_TIMEOUT,
};
pub use isolation::{
    build_isolation_env, child_env, default_policy, isolation_disabled, isolation_env,
    needs_isolation,
    AnyOf, InterpreterNames, IsolationEnv, IsolationPolicy, SelfExecutable,
    DISABLE_ISOLATION_ENV,
};
pub use result::{ExecutionResult, Outcome, RunnerKind};
pub use runner::{ProcessRunner, RunOutcome, RunState};
pub use terminate::{
    platform_terminator, SingleProcessTerminator, Termination, TreeTerminator, DEFAULT_GRACE,
};
#[cfg(unix)]
pub use terminate::ProcessGroupTerminator;
#[cfg(windows)]
pub use terminate::TaskkillTerminator;
