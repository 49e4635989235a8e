//! Command and option representation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::executor::DEFAULT_TIMEOUT;

/// An argv-style command: the program followed by its arguments.
///
/// Built once per call and not modified afterwards; the builder methods
/// consume `self`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    argv: Vec<String>,
}

impl CommandSpec {
    /// Create a command for the given program with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
        }
    }

    /// Create a command from a complete argv.
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Append multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// The executable, if any.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Arguments after the executable.
    pub fn arguments(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    /// The full argv.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Whether the command has no program.
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CommandSpec {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_argv(iter)
    }
}

/// Options controlling a single execution.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Working directory override (if any).
    pub working_dir: Option<PathBuf>,
    /// Maximum execution time.
    pub timeout: Duration,
    /// Environment variables merged over the inherited environment.
    pub env: HashMap<String, String>,
    /// Whether to capture stdout/stderr.
    pub capture_output: bool,
    /// Decode output as text with universal newlines.
    pub text: bool,
    /// Return an error for non-zero exits, timeouts and spawn failures.
    pub check: bool,
    /// Run the command through the platform shell.
    pub shell: bool,
    /// Payload written to the child's stdin.
    pub input: Option<Vec<u8>>,
}

impl ExecutionOptions {
    /// Options with all defaults filled in.
    pub fn new() -> Self {
        Self {
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
            env: HashMap::new(),
            capture_output: true,
            text: true,
            check: false,
            shell: false,
            input: None,
        }
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Set whether to capture output.
    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Set text decoding.
    pub fn text(mut self, text: bool) -> Self {
        self.text = text;
        self
    }

    /// Enable or disable strict mode.
    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    /// Run through the platform shell.
    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// Provide a stdin payload.
    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_new() {
        let cmd = CommandSpec::new("ruff").arg("check").args(["--fix", "."]);
        assert_eq!(cmd.program(), Some("ruff"));
        assert_eq!(cmd.arguments(), ["check", "--fix", "."]);
        assert_eq!(cmd.argv().len(), 4);
        assert!(!cmd.is_empty());
    }

    #[test]
    fn test_command_spec_empty() {
        let cmd = CommandSpec::default();
        assert!(cmd.is_empty());
        assert!(cmd.program().is_none());
        assert!(cmd.arguments().is_empty());
    }

    #[test]
    fn test_command_spec_collect() {
        let cmd: CommandSpec = ["python", "-c", "print('hi')"].into_iter().collect();
        assert_eq!(cmd, CommandSpec::from_argv(["python", "-c", "print('hi')"]));
    }

    #[test]
    fn test_options_defaults() {
        let opts = ExecutionOptions::default();
        assert_eq!(opts.timeout, Duration::from_secs(120));
        assert!(opts.capture_output);
        assert!(opts.text);
        assert!(!opts.check);
        assert!(!opts.shell);
        assert!(opts.input.is_none());
        assert!(opts.working_dir.is_none());
        assert!(opts.env.is_empty());
    }

    #[test]
    fn test_options_builder_chain() {
        let opts = ExecutionOptions::new()
            .working_dir("/project")
            .env("RUST_LOG", "debug")
            .envs([("A", "1"), ("B", "2")])
            .timeout(Duration::from_secs(60))
            .check(true)
            .input("payload");

        assert_eq!(opts.working_dir, Some(PathBuf::from("/project")));
        assert_eq!(opts.env.len(), 3);
        assert_eq!(opts.env.get("RUST_LOG"), Some(&"debug".to_string()));
        assert_eq!(opts.timeout, Duration::from_secs(60));
        assert!(opts.check);
        assert_eq!(opts.input.as_deref(), Some(&b"payload"[..]));
    }
}
