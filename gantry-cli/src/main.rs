//! Gantry CLI
//!
//! Command-line interface for building and smoke-testing container pipelines.

mod commands;
mod config;
mod target_resolver;

use clap::Parser;
use clap::error::ErrorKind;
use colored::*;
use commands::{Commands, Outcome, handle_command};
use config::Config;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Build, wire and smoke-test service containers", long_about = None)]
struct Cli {
    /// Directory searched for pipelines given by name
    #[arg(long, env = "GANTRY_PIPELINE_DIR", default_value = "pipelines")]
    pipeline_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout stays clean for reports and --json
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // clap's own exit status for usage errors collides with build failures
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let outcome = parse_error_outcome(&e);
            if let Err(io) = e.print() {
                eprintln!("Failed to print usage: {}", io);
            }
            return outcome.exit_code();
        }
    };

    let config = Config {
        pipeline_dir: cli.pipeline_dir.into(),
    };

    match handle_command(cli.command, &config).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Help requests succeed; every other parse error is a usage error
fn parse_error_outcome(error: &clap::Error) -> Outcome {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Outcome::Success,
        _ => Outcome::UsageError,
    }
}
