use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use goconnect_daemon::daemon::{self, Environment, RunOptions};
use goconnect_daemon::error::GoConnectError;

/// GoConnect client daemon — installs/runs the background process that owns
/// the overlay connection (spec §4.1, §6).
#[derive(Parser)]
#[command(author, version, about, long_about = None, name = "goconnectd")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Registers the daemon as a platform service (systemd/launchd/SCM).
    Install,
    /// Removes the platform service registration.
    Uninstall,
    /// Starts the previously installed service.
    Start,
    /// Stops the running service.
    Stop,
    /// Runs the daemon synchronously in the current process.
    Run {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        log_path: Option<PathBuf>,
        #[arg(long, value_name = "development|production", default_value = "development")]
        env: Environment,
    },
}

impl clap::ValueEnum for Environment {
    fn value_variants<'a>() -> &'a [Self] {
        &[Environment::Development, Environment::Production]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Environment::Development => clap::builder::PossibleValue::new("development"),
            Environment::Production => clap::builder::PossibleValue::new("production"),
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Install => daemon::install().await,
        Command::Uninstall => daemon::uninstall().await,
        Command::Start => daemon::start().await,
        Command::Stop => daemon::stop().await,
        Command::Run { config, log_path, env } => {
            daemon::run(RunOptions {
                root: None,
                config_path: config,
                log_path,
                env,
                cancel: None,
            })
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let is_config_error = err
                .downcast_ref::<GoConnectError>()
                .is_some_and(|e| matches!(e, GoConnectError::Config(_)));
            if is_config_error {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
