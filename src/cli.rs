//! Command-line interface for toolrunner.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::execution::{ExecutionOptions, ExecutionResult, Outcome};

/// Exit status used when the child timed out.
pub const TIMEOUT_EXIT_STATUS: u8 = 124;

/// Exit status for usage and configuration errors.
pub const USAGE_EXIT_STATUS: u8 = 2;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Timeout in seconds (overrides config).
    pub timeout: Option<u64>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Text written to the child's stdin.
    pub input: Option<String>,
    /// Fail on non-zero exit, timeout or spawn failure.
    pub check: bool,
    /// Run through the platform shell.
    pub shell: bool,
    /// Discard child output instead of capturing it.
    pub no_capture: bool,
    /// Keep line endings untouched.
    pub binary: bool,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
    /// Program and arguments to run.
    pub command: Vec<String>,
}

impl Args {
    /// Build execution options, using `default_timeout` when `--timeout` is absent.
    pub fn execution_options(&self, default_timeout: Duration) -> ExecutionOptions {
        let mut options = ExecutionOptions::new()
            .timeout(self.timeout.map_or(default_timeout, Duration::from_secs))
            .envs(self.env.iter().cloned())
            .capture_output(!self.no_capture)
            .text(!self.binary)
            .check(self.check)
            .shell(self.shell);

        if let Some(ref dir) = self.cwd {
            options = options.working_dir(dir);
        }
        if let Some(ref input) = self.input {
            options = options.input(input.as_bytes());
        }
        options
    }
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
///
/// The first positional argument starts the command; everything after it is
/// passed through untouched.
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                result.timeout = match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => Some(secs),
                    _ => return Err(ArgsError::InvalidValue("timeout", value)),
                };
            }
            Short('C') | Long("cwd") => {
                result.cwd = Some(parser.value()?.parse()?);
            }
            Short('e') | Long("env") => {
                let value: String = parser.value()?.parse()?;
                let (key, val) = value
                    .split_once('=')
                    .filter(|(key, _)| !key.is_empty())
                    .ok_or_else(|| ArgsError::InvalidValue("env", value.clone()))?;
                result.env.push((key.to_string(), val.to_string()));
            }
            Short('i') | Long("input") => {
                result.input = Some(parser.value()?.parse()?);
            }
            Long("check") => {
                result.check = true;
            }
            Long("shell") => {
                result.shell = true;
            }
            Long("no-capture") => {
                result.no_capture = true;
            }
            Long("binary") => {
                result.binary = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                result.command.push(val.string()?);
                for raw in parser.raw_args()? {
                    result.command.push(raw.to_string_lossy().into_owned());
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Process exit status for a finished run.
pub fn exit_status_for(result: &ExecutionResult) -> u8 {
    match result.outcome() {
        Outcome::TimedOut => TIMEOUT_EXIT_STATUS,
        Outcome::SpawnFailed => 1,
        Outcome::Completed => match result.return_code() {
            code @ 0..=255 => u8::try_from(code).unwrap_or(1),
            // Killed by a signal: shell convention 128 + signal.
            code if code < 0 => u8::try_from(128 - code).unwrap_or(1),
            _ => 1,
        },
    }
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"toolrunner {version}
Run one command with a timeout and report the result as JSON

USAGE:
    toolrunner [OPTIONS] [--] <PROGRAM> [ARGS...]

OPTIONS:
    -t, --timeout <SECS>    Timeout in seconds [default: 120]
    -C, --cwd <DIR>         Working directory for the command
    -e, --env <KEY=VAL>     Extra environment variable (repeatable)
    -i, --input <TEXT>      Text written to the command's stdin
        --check             Exit with an error on failure or timeout
        --shell             Run through /bin/sh -c (cmd /C on Windows)
        --no-capture        Discard the command's output
        --binary            Do not normalize line endings
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    TOOLRUNNER_TIMEOUT_SECS Default timeout (overrides config)
    TOOLRUNNER_LOG_LEVEL    Log level (overrides config)
    RUST_LOG                Alternative log level setting

EXIT STATUS:
    The command's exit code, 124 on timeout, 1 if it could not be
    started, 2 on usage errors.

EXAMPLES:
    # Run a linter with a 60 second limit
    toolrunner -t 60 -- ruff check --output-format json .

    # Run a script through the shell
    toolrunner --shell 'pytest -q | tail -n 5'
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("toolrunner {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
