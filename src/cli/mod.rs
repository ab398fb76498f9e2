// CLI module - User-facing command-line interface

mod output;

use crate::config::Ecosystem;
use crate::error::Result;
use crate::process::Supervisor;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Warden - a single-host process supervisor
#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log filter to use when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the processes of a config file in the foreground
    Run {
        /// Path to the configuration file (.toml or .json)
        config: PathBuf,
    },

    /// Validate a config file and show the processes it defines
    Check {
        /// Path to the configuration file (.toml or .json)
        config: PathBuf,
    },
}

impl Cli {
    /// Run the CLI application
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.init_logging();
        cli.execute().await
    }

    fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Run { config } => {
                let ecosystem = match Ecosystem::from_file(config) {
                    Ok(ecosystem) => ecosystem,
                    Err(e) => {
                        if e.is_fatal_config() {
                            output::print_info("Configuration rejected, no process was started");
                        }
                        return Err(e);
                    }
                };
                let mut supervisor = Supervisor::from_ecosystem(ecosystem)?;

                let report = supervisor.run(shutdown_signal()).await?;

                output::print_process_table(&supervisor.handles());
                if !supervisor.fatal_failures().is_empty() {
                    output::print_error(&format!(
                        "Gave up restarting: {}",
                        supervisor.fatal_failures().join(", ")
                    ));
                }
                output::print_info(&format!(
                    "{} process(es) stopped, {} killed",
                    report.stopped.len(),
                    report.stragglers.len()
                ));

                report.into_result().map(|_| ())
            }

            Commands::Check { config } => {
                let ecosystem = Ecosystem::from_file(config)?;
                output::print_success_msg(&format!("{} is valid", config.display()));
                output::print_spec_table(&ecosystem.specs);
                Ok(())
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => warn!("Failed to set up signal handlers: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
