//! # toolrunner
//!
//! Subprocess execution engine for tools that wrap linters, test runners and
//! other external programs.
//!
//! Every call runs exactly one foreground child and returns a fully
//! populated [`ExecutionResult`]. Timeouts kill the whole process tree, and
//! interpreter children are captured through private temporary files so they
//! cannot collide with a host that uses its own stdio as a control channel.
//!
//! ## Quick Start
//!
//! ```no_run
//! use toolrunner::{execute_subprocess, Outcome};
//!
//! toolrunner::logging::try_init().ok();
//!
//! let result = execute_subprocess(["ruff", "check", "--output-format", "json", "."]);
//! match result.outcome() {
//!     Outcome::Completed => println!("exit {}: {}", result.return_code(), result.stdout()),
//!     Outcome::TimedOut | Outcome::SpawnFailed => {
//!         eprintln!("{}", result.execution_error().unwrap_or_default())
//!     }
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, ToolRunnerError};
pub use execution::{
    execute_command, execute_command_async, execute_subprocess, CommandExecutor, CommandSpec,
    ExecutionOptions, ExecutionResult, Outcome, RunnerKind,
};
