//! Commands module
//!
//! Defines all CLI commands, their handlers and the exit codes they map to.

mod check;
mod init;
mod list;
mod run;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use gantry_lua::PipelineDefinition;
use std::process::ExitCode;

use crate::config::Config;
use crate::target_resolver::load_pipeline;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build and smoke-test a pipeline
    Run {
        /// Pipeline file or name
        target: String,

        /// Only run these components (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Maximum components processed at once (0 = unbounded)
        #[arg(long, env = "GANTRY_MAX_PARALLEL")]
        max_parallel: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the components of a pipeline
    List {
        /// Pipeline file or name
        target: String,

        /// Print the components as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse and validate a pipeline without running it
    Check {
        /// Pipeline file or name
        target: String,
    },
    /// Generate a starter pipeline and Lua editor files
    Init {
        /// Output directory for generated files
        #[arg(short, long, default_value = ".")]
        output: String,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

/// How a command finished, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    TestFailure,
    BuildFailure,
    EnvironmentUnavailable,
    InvalidPipeline,
    /// The command line could not be parsed
    UsageError,
    Cancelled,
}

impl Outcome {
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::TestFailure => 1,
            Outcome::BuildFailure => 2,
            Outcome::EnvironmentUnavailable => 3,
            Outcome::InvalidPipeline => 4,
            Outcome::UsageError => 64,
            Outcome::Cancelled => 130,
        }
    }

    pub fn exit_code(self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<Outcome> {
    match command {
        Commands::Run {
            target,
            only,
            max_parallel,
            json,
        } => run::handle_run_command(&target, &only, max_parallel, json, config).await,
        Commands::List { target, json } => list::handle_list_command(&target, json, config),
        Commands::Check { target } => check::handle_check_command(&target, config),
        Commands::Init { output, force } => init::handle_init_command(&output, force),
    }
}

/// Loads a pipeline, printing why it is invalid when it cannot be used
fn load_or_report(target: &str, only: &[String], config: &Config) -> Option<PipelineDefinition> {
    match load_pipeline(target, &config.pipeline_dir, only) {
        Ok(definition) => Some(definition),
        Err(e) => {
            eprintln!("{} {:#}", "Invalid pipeline:".red().bold(), e);
            None
        }
    }
}
