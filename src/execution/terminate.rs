//! Best-effort termination of a child and everything it spawned.
//!
//! Children are spawned as leaders of their own process group (unix) or
//! console process group (windows), so the whole tree can be targeted as one
//! unit. Termination never fails from the caller's point of view; problems
//! are logged and the caller carries on reporting the timeout.

use std::process::Child;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Default grace window between the graceful and the forceful signal.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a termination attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The tree exited within the grace window.
    Graceful,
    /// The tree had to be force-killed.
    Forced,
    /// Tree-wide termination was unavailable; only the direct child was
    /// targeted. Descendants may survive.
    Fallback,
    /// Nothing could be signalled.
    Failed,
}

/// Platform capability for killing a process tree.
pub trait TreeTerminator: Send + Sync {
    /// Terminate `child` and its descendants. Must not panic or block for
    /// longer than its own bounded timeouts.
    fn terminate(&self, child: &mut Child) -> Termination;
}

/// Terminator for the current platform.
pub fn platform_terminator(grace: Duration) -> Box<dyn TreeTerminator> {
    #[cfg(unix)]
    {
        Box::new(ProcessGroupTerminator::new(grace))
    }
    #[cfg(windows)]
    {
        let _ = grace;
        Box::new(TaskkillTerminator::default())
    }
    #[cfg(not(any(unix, windows)))]
    {
        Box::new(SingleProcessTerminator::new(grace))
    }
}

/// Put the child in its own process group before it starts.
pub(crate) fn detach_process_group(command: &mut std::process::Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = command;
    }
}

/// Poll `child` until it exits or `limit` elapses.
pub(crate) fn wait_for_exit(child: &mut Child, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(e) => {
                debug!(pid = child.id(), error = %e, "try_wait failed");
                return false;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Targets only the direct child. Used when tree-wide primitives are missing.
#[derive(Debug, Clone)]
pub struct SingleProcessTerminator {
    grace: Duration,
}

impl SingleProcessTerminator {
    /// Create with the given grace window.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

impl TreeTerminator for SingleProcessTerminator {
    fn terminate(&self, child: &mut Child) -> Termination {
        terminate_single(child, self.grace)
    }
}

/// Terminate-then-kill on the single process handle.
fn terminate_single(child: &mut Child, grace: Duration) -> Termination {
    // Once reaped, the pid may belong to an unrelated process.
    if matches!(child.try_wait(), Ok(Some(_))) {
        debug!(pid = child.id(), "child already exited");
        return Termination::Fallback;
    }

    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain signal delivery to a pid we own.
            let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
            if rc == 0 && wait_for_exit(child, grace) {
                return Termination::Fallback;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    match child.kill() {
        Ok(()) => Termination::Fallback,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
            // Already exited and reaped.
            Termination::Fallback
        }
        Err(e) => {
            warn!(pid = child.id(), error = %e, "failed to kill child process");
            Termination::Failed
        }
    }
}

/// SIGTERM to the group, grace window, then SIGKILL to the group.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct ProcessGroupTerminator {
    grace: Duration,
}

#[cfg(unix)]
impl ProcessGroupTerminator {
    /// Create with the given grace window.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> std::io::Result<()> {
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(pgid, signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    fn group_alive(pgid: libc::pid_t) -> bool {
        Self::signal_group(pgid, 0).is_ok()
    }

    /// Wait for the leader to be reaped and the group to empty.
    fn wait_for_group(child: &mut Child, pgid: libc::pid_t, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            let leader_done = matches!(child.try_wait(), Ok(Some(_)));
            if leader_done && !Self::group_alive(pgid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(unix)]
impl Default for ProcessGroupTerminator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

#[cfg(unix)]
impl TreeTerminator for ProcessGroupTerminator {
    fn terminate(&self, child: &mut Child) -> Termination {
        let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
            return terminate_single(child, self.grace);
        };

        match Self::signal_group(pgid, libc::SIGTERM) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                debug!(pgid, "process group already gone");
                let _ = child.try_wait();
                return Termination::Graceful;
            }
            Err(e) => {
                warn!(pgid, error = %e, "group signal failed, falling back to single process");
                return terminate_single(child, self.grace);
            }
        }

        if Self::wait_for_group(child, pgid, self.grace) {
            debug!(pgid, "process group exited after SIGTERM");
            return Termination::Graceful;
        }

        match Self::signal_group(pgid, libc::SIGKILL) {
            Ok(()) => {
                debug!(pgid, "process group killed");
                Termination::Forced
            }
            // Emptied between the last poll and the kill.
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Termination::Graceful,
            Err(e) => {
                warn!(pgid, error = %e, "SIGKILL to process group failed");
                match child.kill() {
                    Ok(()) => Termination::Fallback,
                    Err(_) => Termination::Failed,
                }
            }
        }
    }
}

/// `taskkill /F /T` on the process id, bounded by a timeout.
///
/// If `taskkill` itself fails, only the direct child is killed. Grandchildren
/// may then be orphaned and keep running; this is a known limitation.
#[cfg(windows)]
#[derive(Debug, Clone)]
pub struct TaskkillTerminator {
    timeout: Duration,
}

#[cfg(windows)]
impl TaskkillTerminator {
    /// Create with the given bound on the `taskkill` invocation.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn taskkill(&self, pid: u32) -> std::io::Result<bool> {
        use std::process::{Command, Stdio};

        let mut killer = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        if !wait_for_exit(&mut killer, self.timeout) {
            let _ = killer.kill();
            let _ = killer.wait();
            return Ok(false);
        }
        Ok(killer.wait()?.success())
    }
}

#[cfg(windows)]
impl Default for TaskkillTerminator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(windows)]
impl TreeTerminator for TaskkillTerminator {
    fn terminate(&self, child: &mut Child) -> Termination {
        let pid = child.id();
        match self.taskkill(pid) {
            Ok(true) => return Termination::Forced,
            Ok(false) => warn!(pid, "taskkill did not succeed, killing child only"),
            Err(e) => warn!(pid, error = %e, "taskkill unavailable, killing child only"),
        }
        terminate_single(child, Duration::ZERO)
    }
}
