//! toolrunner binary entry point.

use std::process::ExitCode;

use toolrunner::cli::{self, USAGE_EXIT_STATUS};
use toolrunner::config::Config;
use toolrunner::{logging, CommandExecutor, CommandSpec, ToolRunnerError};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'toolrunner --help' for more information.");
            return ExitCode::from(USAGE_EXIT_STATUS);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(USAGE_EXIT_STATUS);
        }
    };

    logging::try_init_with(config.log_filter()).ok();
    debug!(?config, "configuration loaded");

    if args.command.is_empty() {
        eprintln!("error: no command given");
        eprintln!("Try 'toolrunner --help' for more information.");
        return ExitCode::from(USAGE_EXIT_STATUS);
    }

    let executor = CommandExecutor::from_config(&config);
    let command = CommandSpec::from_argv(args.command.iter().cloned());
    let options = args.execution_options(config.execution.timeout());
    info!(argv = ?command.argv(), timeout = ?options.timeout, "running command");

    match executor.execute_async(command, options).await {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("error: failed to serialize result: {}", e),
            }
            info!(
                return_code = result.return_code(),
                timed_out = result.timed_out(),
                duration_ms = result.duration_ms(),
                "command finished"
            );
            ExitCode::from(cli::exit_status_for(&result))
        }
        Err(e) => {
            eprintln!("error: {}", e);
            let status = match e {
                ToolRunnerError::Timeout { .. } => cli::TIMEOUT_EXIT_STATUS,
                ToolRunnerError::NonZeroExit { ref stderr, .. } => {
                    eprint!("{}", stderr);
                    e.return_code()
                        .and_then(|code| u8::try_from(code).ok())
                        .unwrap_or(1)
                }
                _ => 1,
            };
            ExitCode::from(status)
        }
    }
}
