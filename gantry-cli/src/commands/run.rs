//! Run command handler
//!
//! Loads a pipeline, runs it through the orchestrator against podman and
//! prints the report.

use anyhow::{Context, Result};
use colored::*;
use gantry_core::{FailureKind, PipelineReport};
use gantry_runner::{
    CancelToken, ContainerRuntime, Orchestrator, PipelineError, PodmanRuntime, RunnerConfig,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Outcome, load_or_report};
use crate::config::Config;

/// Run a pipeline and map its report to an outcome
pub async fn handle_run_command(
    target: &str,
    only: &[String],
    max_parallel: Option<usize>,
    json: bool,
    config: &Config,
) -> Result<Outcome> {
    let Some(definition) = load_or_report(target, only, config) else {
        return Ok(Outcome::InvalidPipeline);
    };

    let mut runner_config = RunnerConfig::from_env().context("Failed to load runner configuration")?;
    if let Some(max_parallel) = max_parallel {
        runner_config = runner_config.with_max_parallel(max_parallel);
    }
    runner_config
        .validate()
        .context("Invalid runner configuration")?;

    info!(
        "Loaded configuration: runtime={}, max_parallel={}",
        runner_config.runtime, runner_config.max_parallel
    );

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(PodmanRuntime::new(&runner_config));
    let orchestrator = Orchestrator::new(runtime, &runner_config)
        .context("Failed to initialize readiness probe")?;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pipeline");
            trigger.cancel();
        }
    });

    let report = match orchestrator
        .run_pipeline(&definition.name, definition.components, &cancel)
        .await
    {
        Ok(report) => report,
        Err(PipelineError::EnvironmentUnavailable(e)) => {
            eprintln!("{} {}", "Container environment unavailable:".red().bold(), e);
            return Ok(Outcome::EnvironmentUnavailable);
        }
        Err(PipelineError::Invalid(e)) => {
            eprintln!("{} {}", "Invalid pipeline:".red().bold(), e);
            return Ok(Outcome::InvalidPipeline);
        }
        Err(PipelineError::Cancelled) => {
            eprintln!("{}", "Pipeline cancelled".yellow().bold());
            return Ok(Outcome::Cancelled);
        }
    };

    if json {
        println!("{}", report.to_json().context("Failed to serialize report")?);
    } else {
        print_report(&report);
    }

    Ok(report_outcome(&report))
}

/// Build failures take precedence over test failures
fn report_outcome(report: &PipelineReport) -> Outcome {
    if report.success() {
        Outcome::Success
    } else if report.has_build_failures() {
        Outcome::BuildFailure
    } else {
        Outcome::TestFailure
    }
}

fn print_report(report: &PipelineReport) {
    println!(
        "{} {} {}",
        "Pipeline".bold(),
        report.pipeline().cyan().bold(),
        format!("(run {})", report.run_id()).dimmed()
    );
    println!();

    let width = report
        .results()
        .iter()
        .map(|r| r.component().len())
        .max()
        .unwrap_or(0);

    for result in report.results() {
        let duration = format_duration(result.duration_ms());
        let name = format!("{:<width$}", result.component(), width = width);
        match result.error() {
            None => println!("  {} {}  {}", "✓".green(), name.bold(), duration.dimmed()),
            Some(failure) => {
                let label = match failure.kind {
                    FailureKind::Build => "build failed".red(),
                    FailureKind::Test => "test failed".yellow(),
                };
                println!(
                    "  {} {}  {}: {}  {}",
                    "✗".red(),
                    name.bold(),
                    label,
                    failure.message,
                    duration.dimmed()
                );
            }
        }
    }

    // Captured output is printed verbatim, never summarized
    for result in report.failures() {
        println!();
        let kind = result
            .failure_kind()
            .map(|k| k.to_string())
            .unwrap_or_default();
        println!(
            "{}",
            format!("── {} ({}) ──", result.component(), kind).red().bold()
        );
        if result.output().is_empty() {
            println!("{}", "(no output captured)".dimmed());
        } else {
            print!("{}", result.output());
            if !result.output().ends_with('\n') {
                println!();
            }
        }
    }

    println!();
    let summary = format!(
        "{} passed, {} failed in {}",
        report.passed_count(),
        report.failed_count(),
        format_duration(report.duration_ms())
    );
    if report.success() {
        println!("{} {}", "✓".green().bold(), summary.green().bold());
    } else {
        println!("{} {}", "✗".red().bold(), summary.red().bold());
    }
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}
