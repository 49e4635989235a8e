//! CLI integration tests.
//!
//! These tests verify argument parsing, configuration loading and the
//! behaviour of the compiled binary.

use std::ffi::OsString;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

use toolrunner::cli::{parse_args_from, Args};
use toolrunner::config::Config;
use toolrunner::{execute_command, CommandSpec, ExecutionOptions};

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("toolrunner")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn run_binary(cli_args: &[&str]) -> toolrunner::ExecutionResult {
    let argv = std::iter::once(env!("CARGO_BIN_EXE_toolrunner"))
        .chain(cli_args.iter().copied())
        .map(String::from);
    execute_command(
        &CommandSpec::from_argv(argv),
        &ExecutionOptions::default().timeout(Duration::from_secs(30)),
    )
    .unwrap()
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_defaults() {
    let result = parse_args_from(args(&[])).unwrap();

    assert!(result.timeout.is_none());
    assert!(result.config.is_none());
    assert!(result.command.is_empty());
    assert!(!result.check);
    assert!(!result.shell);
}

#[test]
fn test_cli_full_options() {
    let result = parse_args_from(args(&[
        "-t",
        "30",
        "-C",
        "/work",
        "-e",
        "CI=1",
        "--check",
        "-l",
        "debug",
        "--",
        "ruff",
        "check",
        "-q",
    ]))
    .unwrap();

    assert_eq!(result.timeout, Some(30));
    assert_eq!(result.cwd.unwrap().to_str().unwrap(), "/work");
    assert_eq!(result.env, vec![("CI".to_string(), "1".to_string())]);
    assert!(result.check);
    assert_eq!(result.log_level, Some("debug".to_string()));
    assert_eq!(result.command, vec!["ruff", "check", "-q"]);
}

#[test]
fn test_cli_child_flags_not_parsed() {
    let result = parse_args_from(args(&["pytest", "-c", "setup.cfg", "--timeout", "5"])).unwrap();

    assert!(result.config.is_none());
    assert!(result.timeout.is_none());
    assert_eq!(result.command, vec!["pytest", "-c", "setup.cfg", "--timeout", "5"]);
}

#[test]
fn test_cli_invalid_timeout() {
    assert!(parse_args_from(args(&["-t", "not-a-number"])).is_err());
}

// ============================================================================
// Configuration Loading Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let json = r#"{
        "execution": {
            "timeout_secs": 45,
            "termination_grace_ms": 250,
            "exit_wait_secs": 1,
            "extra_interpreters": ["node"]
        },
        "logging": {
            "level": "debug"
        }
    }"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.execution.timeout(), Duration::from_secs(45));
    assert_eq!(config.execution.termination_grace(), Duration::from_millis(250));
    assert_eq!(config.execution.exit_wait(), Duration::from_secs(1));
    assert_eq!(config.execution.extra_interpreters, vec!["node"]);
    assert_eq!(config.log_filter(), "debug");
}

#[test]
fn test_config_load_args_override_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(br#"{ "execution": { "timeout_secs": 45 } }"#)
        .unwrap();

    let args = Args {
        config: Some(file.path().to_path_buf()),
        timeout: Some(5),
        ..Args::default()
    };

    let mut config = Config::from_file(file.path()).unwrap();
    config.apply_args(&args);
    assert_eq!(config.execution.timeout_secs, 5);
}

#[test]
fn test_config_missing_file() {
    let result = Config::from_file(std::path::Path::new("/nonexistent/toolrunner.json"));
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("failed to read config file"));
}

// ============================================================================
// Binary Tests
// ============================================================================

#[test]
fn test_binary_version() {
    let result = run_binary(&["--version"]);
    assert_eq!(result.return_code(), 0);
    assert!(result.stdout().starts_with("toolrunner "));
}

#[test]
fn test_binary_usage_error() {
    let result = run_binary(&[]);
    assert_eq!(result.return_code(), 2);
    assert!(result.stderr().contains("no command given"));
}

#[test]
#[cfg(unix)]
fn test_binary_prints_json_result() {
    let result = run_binary(&["--", "sh", "-c", "echo hello; exit 3"]);
    assert_eq!(result.return_code(), 3);

    let report: serde_json::Value = serde_json::from_str(result.stdout()).unwrap();
    assert_eq!(report["return_code"], 3);
    assert_eq!(report["stdout"], "hello\n");
    assert_eq!(report["timed_out"], false);
    assert_eq!(report["runner"], "pipe");
}

#[test]
#[cfg(unix)]
fn test_binary_timeout_exit_status() {
    let result = run_binary(&["-t", "1", "sleep", "5"]);
    assert_eq!(result.return_code(), 124);

    let report: serde_json::Value = serde_json::from_str(result.stdout()).unwrap();
    assert_eq!(report["timed_out"], true);
    assert_eq!(report["stdout"], "");
}

#[test]
fn test_binary_missing_program() {
    let result = run_binary(&["nonexistent-binary-xyz"]);
    assert_eq!(result.return_code(), 1);

    let report: serde_json::Value = serde_json::from_str(result.stdout()).unwrap();
    assert!(report["execution_error"]
        .as_str()
        .unwrap()
        .starts_with("NotFound"));
}
