//! Stdio isolation decisions for interpreter subprocesses.
//!
//! Interpreter children are the ones most likely to fill a pipe before the
//! parent drains it, or to treat inherited streams as their own control
//! channel. Those runs capture into private temporary files instead of pipes
//! and get a scrubbed environment.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Environment key that disables isolation for a single call.
///
/// Test-only: it exists so tests can compare isolated and piped runs of the
/// same command. Production configurations must never set it. It is
/// recognised in [`ExecutionOptions::env`](super::ExecutionOptions) and
/// stripped before the child starts.
pub const DISABLE_ISOLATION_ENV: &str = "TOOLRUNNER_DISABLE_ISOLATION";

/// Interpreter executables isolated by default.
const DEFAULT_INTERPRETERS: &[&str] = &["python", "python3", "pythonw", "py", "pypy", "pypy3"];

/// Variables set for isolated children.
const ISOLATION_VARS: &[(&str, &str)] = &[
    ("PYTHONUNBUFFERED", "1"),
    ("PYTHONDONTWRITEBYTECODE", "1"),
    ("PYTHONNOUSERSITE", "1"),
    ("PYTHONHASHSEED", "0"),
];

/// Variables identifying the host's own transport or session.
const HOST_SESSION_VARS: &[&str] = &[
    "MCP_TRANSPORT",
    "MCP_SERVER_NAME",
    "MCP_SESSION_ID",
    "TOOLRUNNER_SESSION_ID",
];

/// Decides whether a program needs isolated stdio.
pub trait IsolationPolicy: Send + Sync {
    /// `program` is the first argv element exactly as given.
    fn requires_isolation(&self, program: &str) -> bool;
}

impl<F> IsolationPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn requires_isolation(&self, program: &str) -> bool {
        self(program)
    }
}

/// Matches programs by executable name, ignoring directory, case and a
/// trailing `.exe`. Versioned names such as `python3.12` match `python`.
#[derive(Debug, Clone)]
pub struct InterpreterNames {
    names: HashSet<String>,
}

impl InterpreterNames {
    /// Match exactly the given names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Add another interpreter name.
    pub fn with(mut self, name: impl AsRef<str>) -> Self {
        self.names.insert(name.as_ref().to_ascii_lowercase());
        self
    }

    fn matches(&self, name: &str) -> bool {
        if self.names.contains(name) {
            return true;
        }
        // python3.12 -> python3 / python
        let unversioned = name.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
        unversioned != name
            && (self.names.contains(unversioned)
                || name
                    .strip_prefix(unversioned)
                    .and_then(|v| v.split('.').next())
                    .is_some_and(|major| self.names.contains(&format!("{unversioned}{major}"))))
    }
}

impl Default for InterpreterNames {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETERS)
    }
}

impl IsolationPolicy for InterpreterNames {
    fn requires_isolation(&self, program: &str) -> bool {
        self.matches(&program_name(program))
    }
}

/// Matches the absolute path of the running executable.
#[derive(Debug, Clone)]
pub struct SelfExecutable {
    path: Option<PathBuf>,
}

impl SelfExecutable {
    /// Use the current process's executable.
    pub fn current() -> Self {
        Self {
            path: std::env::current_exe().ok(),
        }
    }

    /// Use an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl IsolationPolicy for SelfExecutable {
    fn requires_isolation(&self, program: &str) -> bool {
        let Some(own) = &self.path else {
            return false;
        };
        let candidate = Path::new(program);
        if !candidate.is_absolute() {
            return false;
        }
        if candidate == own {
            return true;
        }
        match (candidate.canonicalize(), own.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// Isolates when any inner policy does.
#[derive(Default)]
pub struct AnyOf {
    policies: Vec<Box<dyn IsolationPolicy>>,
}

impl AnyOf {
    /// Empty policy set; isolates nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a policy.
    pub fn with(mut self, policy: impl IsolationPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }
}

impl IsolationPolicy for AnyOf {
    fn requires_isolation(&self, program: &str) -> bool {
        self.policies.iter().any(|p| p.requires_isolation(program))
    }
}

impl std::fmt::Debug for AnyOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyOf")
            .field("policies", &self.policies.len())
            .finish()
    }
}

/// Known interpreter names plus the running executable.
pub fn default_policy() -> AnyOf {
    AnyOf::new()
        .with(InterpreterNames::default())
        .with(SelfExecutable::current())
}

/// Decide whether `argv` should run with isolated stdio.
///
/// `override_disable` is the test-only escape hatch described on
/// [`DISABLE_ISOLATION_ENV`].
pub fn needs_isolation(
    policy: &dyn IsolationPolicy,
    argv: &[String],
    override_disable: bool,
) -> bool {
    if override_disable {
        return false;
    }
    argv.first()
        .is_some_and(|program| policy.requires_isolation(program))
}

/// Whether the per-call overrides carry the test-only disable flag.
pub fn isolation_disabled(env: &HashMap<String, String>) -> bool {
    env.get(DISABLE_ISOLATION_ENV).is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        )
    })
}

/// Environment changes applied to isolated children.
#[derive(Debug, Clone)]
pub struct IsolationEnv {
    set: Vec<(String, String)>,
    remove: Vec<String>,
}

impl IsolationEnv {
    fn build() -> Self {
        Self {
            set: ISOLATION_VARS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            remove: HOST_SESSION_VARS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Variables added or overwritten.
    pub fn vars(&self) -> &[(String, String)] {
        &self.set
    }

    /// Variables removed.
    pub fn removed(&self) -> &[String] {
        &self.remove
    }
}

/// Shared read-only template; callers copy out of it.
pub fn isolation_env() -> &'static IsolationEnv {
    static TEMPLATE: OnceLock<IsolationEnv> = OnceLock::new();
    TEMPLATE.get_or_init(IsolationEnv::build)
}

/// `base` plus the isolation settings, minus host session keys.
pub fn build_isolation_env(base: &HashMap<String, String>) -> HashMap<String, String> {
    let template = isolation_env();
    let mut env = base.clone();
    for (key, value) in template.vars() {
        env.insert(key.clone(), value.clone());
    }
    for key in template.removed() {
        env.remove(key);
    }
    env
}

/// Complete environment for a child: `host` overlaid with the per-call
/// `overrides`, without the disable flag, and passed through
/// [`build_isolation_env`] when `isolated`.
pub fn child_env<I>(
    host: I,
    overrides: &HashMap<String, String>,
    isolated: bool,
) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: HashMap<String, String> = host.into_iter().collect();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.remove(DISABLE_ISOLATION_ENV);
    if isolated {
        build_isolation_env(&env)
    } else {
        env
    }
}

/// Last path segment, lowercased, without a trailing `.exe`.
fn program_name(program: &str) -> String {
    let name = program
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(program)
        .to_ascii_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}
