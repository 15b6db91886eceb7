//! CLI entry point and dispatch logic
//!
//! `run()` parses arguments, discovers configuration, installs the Ctrl-C
//! handler, dispatches to a command handler, and reports every error itself.

use clap::Parser;
use tracing::warn;

use storyloom_config::Config;
use storyloom_engine::CancelFlag;
use storyloom_utils::logging::init_tracing;
use storyloom_utils::{ConfigError, ExitCode, StoryloomError, UserFriendlyError};

use super::args::{Cli, Commands};
use super::commands;

/// Exit code for an error coming out of a command handler.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(e) = err.downcast_ref::<StoryloomError>() {
        e.to_exit_code()
    } else if err.downcast_ref::<ConfigError>().is_some() {
        ExitCode::CLI_ARGS
    } else if err.downcast_ref::<std::io::Error>().is_some() {
        ExitCode::IO_FAILURE
    } else {
        ExitCode::INTERNAL
    }
}

fn report(err: &anyhow::Error) {
    if let Some(e) = err.downcast_ref::<StoryloomError>() {
        eprintln!("{}", e.display_for_user());
    } else if let Some(e) = err.downcast_ref::<ConfigError>() {
        eprintln!("Error: {}", e.user_message());
        for suggestion in e.suggestions() {
            eprintln!("  • {suggestion}");
        }
    } else {
        eprintln!("Error: {err:#}");
    }
}

/// Main CLI execution function.
///
/// Handles all output, including errors. `main` only maps the returned code
/// to the process exit status.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }

    let config = match Config::discover(&cli.config_args()) {
        Ok(config) => config,
        Err(err) => {
            report(&err);
            return Err(match exit_code_for(&err) {
                ExitCode::INTERNAL => ExitCode::CLI_ARGS,
                code => code,
            });
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let cancel = CancelFlag::new();
    let result = rt.block_on(async {
        let flag = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping at the next generation boundary");
                flag.cancel();
            }
        });

        match &cli.command {
            Commands::Write(args) => {
                commands::execute_write_command(args, cli.verbose, &config, &cancel).await
            }
            Commands::Status { title } => commands::execute_status_command(title, &config),
            Commands::Clean { title } => commands::execute_clean_command(title, &config),
        }
    });

    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            report(&err);
            Err(exit_code_for(&err))
        }
    }
}
