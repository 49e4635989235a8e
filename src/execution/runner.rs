//! Spawn/wait/timeout state machine for a single child process.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::command::ExecutionOptions;
use super::isolation::child_env;
use super::terminate::{detach_process_group, wait_for_exit, TreeTerminator};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time allowed for the OS to release redirected file handles after exit.
#[cfg(windows)]
const FILE_RELEASE_DELAY: Duration = Duration::from_millis(100);
#[cfg(not(windows))]
const FILE_RELEASE_DELAY: Duration = Duration::from_millis(5);

const STDOUT_FILE: &str = "stdout.log";
const STDERR_FILE: &str = "stderr.log";

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Nothing spawned yet.
    #[default]
    NotStarted,
    /// Child is running.
    Running,
    /// Timeout hit; the process tree is being killed.
    Terminating,
    /// Child exited on its own.
    Completed,
    /// Child was killed after its timeout.
    TimedOut,
    /// Child never started.
    SpawnFailed,
}

impl RunState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - NotStarted -> Running
    /// - NotStarted -> SpawnFailed
    /// - Running -> Completed
    /// - Running -> Terminating
    /// - Terminating -> TimedOut
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::*;
        matches!(
            (*self, target),
            (NotStarted, Running)
                | (NotStarted, SpawnFailed)
                | (Running, Completed)
                | (Running, Terminating)
                | (Terminating, TimedOut)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::TimedOut | RunState::SpawnFailed
        )
    }
}

/// Raw outcome of a run, before it is turned into an
/// [`ExecutionResult`](super::ExecutionResult).
#[derive(Debug)]
pub enum RunOutcome {
    /// Child exited on its own.
    Completed {
        return_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// Child exceeded the timeout. Partial output is not kept.
    TimedOut,
    /// Child could not be started; message is `"<kind>: <description>"`.
    SpawnFailed { message: String },
}

/// Where the child's output goes while it runs.
enum Capture {
    None,
    Pipes {
        stdout: Option<JoinHandle<Vec<u8>>>,
        stderr: Option<JoinHandle<Vec<u8>>>,
    },
    Files {
        stdout: std::path::PathBuf,
        stderr: std::path::PathBuf,
    },
}

/// Runs one child process to completion or timeout.
pub struct ProcessRunner<'a> {
    terminator: &'a dyn TreeTerminator,
    exit_wait: Duration,
    state: RunState,
}

impl<'a> ProcessRunner<'a> {
    /// `exit_wait` bounds how long to wait for the child after termination.
    pub fn new(terminator: &'a dyn TreeTerminator, exit_wait: Duration) -> Self {
        Self {
            terminator,
            exit_wait,
            state: RunState::NotStarted,
        }
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, target: RunState) {
        debug_assert!(
            self.state.can_transition_to(target),
            "invalid run state transition {:?} -> {:?}",
            self.state,
            target
        );
        trace!(from = ?self.state, to = ?target, "run state");
        self.state = target;
    }

    /// Spawn `argv` and wait for it.
    ///
    /// With `scratch` set, stdout and stderr are redirected to files inside
    /// that directory instead of pipes. `isolated` applies the isolation
    /// environment. A runner can be reused; each call starts from
    /// [`RunState::NotStarted`].
    pub fn run(
        &mut self,
        argv: &[String],
        options: &ExecutionOptions,
        isolated: bool,
        scratch: Option<&Path>,
    ) -> RunOutcome {
        self.state = RunState::NotStarted;
        let (mut command, capture_paths) = match build_command(argv, options, isolated, scratch) {
            Ok(built) => built,
            Err(e) => return self.spawn_failed(&e),
        };

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return self.spawn_failed(&e),
        };
        self.advance(RunState::Running);
        debug!(pid = child.id(), program = ?argv.first(), isolated, "spawned child");

        if let Some(input) = options.input.clone() {
            feed_stdin(&mut child, input);
        }

        let capture = match capture_paths {
            Some((stdout, stderr)) => Capture::Files { stdout, stderr },
            None if options.capture_output => Capture::Pipes {
                stdout: child.stdout.take().map(drain),
                stderr: child.stderr.take().map(drain),
            },
            None => Capture::None,
        };

        let deadline = Instant::now() + options.timeout;
        match wait_until(&mut child, deadline) {
            Ok(Some(status)) => {
                // Descendants may still hold the pipes open; the deadline
                // covers them too.
                if !capture.drained_by(deadline) {
                    debug!(pid = child.id(), "output pipes still open at deadline");
                    return self.time_out(&mut child, options.timeout);
                }
                self.advance(RunState::Completed);
                let (stdout, stderr) = collect(capture);
                RunOutcome::Completed {
                    return_code: exit_code(status),
                    stdout,
                    stderr,
                }
            }
            Ok(None) => self.time_out(&mut child, options.timeout),
            Err(e) => {
                // Waiting itself broke; treat like a timeout so the tree is
                // still torn down.
                warn!(pid = child.id(), error = %e, "waiting on child failed");
                self.time_out(&mut child, options.timeout)
            }
        }
    }

    fn spawn_failed(&mut self, error: &std::io::Error) -> RunOutcome {
        self.advance(RunState::SpawnFailed);
        let message = format!("{:?}: {}", error.kind(), error);
        debug!(%message, "spawn failed");
        RunOutcome::SpawnFailed { message }
    }

    fn time_out(&mut self, child: &mut Child, timeout: Duration) -> RunOutcome {
        self.advance(RunState::Terminating);
        warn!(pid = child.id(), ?timeout, "command timed out, terminating process tree");

        let termination = self.terminator.terminate(child);
        debug!(pid = child.id(), ?termination, "termination finished");
        if !wait_for_exit(child, self.exit_wait) {
            warn!(pid = child.id(), "child still running after termination");
        }

        // Readers of still-open pipes are left detached; their output is
        // discarded.
        self.advance(RunState::TimedOut);
        RunOutcome::TimedOut
    }
}

impl Capture {
    /// Wait for pipe readers to hit end of file, up to `deadline`.
    fn drained_by(&self, deadline: Instant) -> bool {
        let Capture::Pipes { stdout, stderr } = self else {
            return true;
        };
        let finished =
            |reader: &Option<JoinHandle<Vec<u8>>>| reader.as_ref().map_or(true, JoinHandle::is_finished);
        loop {
            if finished(stdout) && finished(stderr) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

type CapturePaths = (std::path::PathBuf, std::path::PathBuf);

fn build_command(
    argv: &[String],
    options: &ExecutionOptions,
    isolated: bool,
    scratch: Option<&Path>,
) -> std::io::Result<(Command, Option<CapturePaths>)> {
    let mut command = if options.shell {
        shell_command(argv)?
    } else {
        let (program, args) = argv.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command")
        })?;
        let mut command = Command::new(program);
        command.args(args);
        command
    };

    if let Some(dir) = &options.working_dir {
        command.current_dir(dir);
    }
    apply_env(&mut command, &options.env, isolated);

    // The host may own its stdin for another protocol; never let the child
    // inherit it.
    command.stdin(if options.input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut capture_paths = None;
    match (options.capture_output, scratch) {
        (true, Some(dir)) => {
            let stdout = dir.join(STDOUT_FILE);
            let stderr = dir.join(STDERR_FILE);
            command.stdout(File::create(&stdout)?);
            command.stderr(File::create(&stderr)?);
            capture_paths = Some((stdout, stderr));
        }
        (true, None) => {
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
        }
        (false, _) => {
            command.stdout(Stdio::null());
            command.stderr(Stdio::null());
        }
    }

    detach_process_group(&mut command);
    Ok((command, capture_paths))
}

/// Give the child exactly the environment [`child_env`] computes. Host
/// variables that are not valid UTF-8 are left inherited as they are.
fn apply_env(command: &mut Command, overrides: &HashMap<String, String>, isolated: bool) {
    let host: Vec<(String, String)> = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();
    let env = child_env(host.iter().cloned(), overrides, isolated);
    for (key, _) in &host {
        if !env.contains_key(key) {
            command.env_remove(key);
        }
    }
    command.envs(&env);
}

/// Wrap argv for the platform shell. A single element is the script itself.
fn shell_command(argv: &[String]) -> std::io::Result<Command> {
    let script = match argv {
        [] => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ))
        }
        [script] => script.clone(),
        _ => shlex::try_join(argv.iter().map(String::as_str))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?,
    };

    #[cfg(windows)]
    let command = {
        let mut c = Command::new("cmd.exe");
        c.arg("/C").arg(script);
        c
    };
    #[cfg(not(windows))]
    let command = {
        let mut c = Command::new("/bin/sh");
        c.arg("-c").arg(script);
        c
    };
    Ok(command)
}

/// Write the payload on a background thread, then close the pipe.
fn feed_stdin(child: &mut Child, input: Vec<u8>) {
    let Some(mut stdin) = child.stdin.take() else {
        return;
    };
    std::thread::spawn(move || {
        if let Err(e) = stdin.write_all(&input) {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                debug!(error = %e, "failed to write child stdin");
            }
        }
        // Dropping stdin closes the pipe.
    });
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!(error = %e, "failed to read child pipe");
        }
        buf
    })
}

fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn collect(capture: Capture) -> (Vec<u8>, Vec<u8>) {
    match capture {
        Capture::None => (Vec::new(), Vec::new()),
        Capture::Pipes { stdout, stderr } => (join_reader(stdout), join_reader(stderr)),
        Capture::Files { stdout, stderr } => {
            std::thread::sleep(FILE_RELEASE_DELAY);
            (read_capture(&stdout), read_capture(&stderr))
        }
    }
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn read_capture(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "failed to read captured output");
        Vec::new()
    })
}

/// Exit code, or the negated signal number for signalled children.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
