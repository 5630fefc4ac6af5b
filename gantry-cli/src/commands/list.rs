//! List command handler

use anyhow::{Context, Result};
use colored::*;
use gantry_core::{BuildDescriptor, SmokeTest};

use super::{Outcome, load_or_report};
use crate::config::Config;

/// Print the components of a pipeline in declaration order
pub fn handle_list_command(target: &str, json: bool, config: &Config) -> Result<Outcome> {
    let Some(definition) = load_or_report(target, &[], config) else {
        return Ok(Outcome::InvalidPipeline);
    };

    if json {
        let rendered = serde_json::to_string_pretty(&definition.components)
            .context("Failed to serialize components")?;
        println!("{}", rendered);
        return Ok(Outcome::Success);
    }

    println!("{} {}", "Pipeline".bold(), definition.name.cyan().bold());
    if let Some(description) = &definition.description {
        println!("  {}", description.dimmed());
    }
    println!();

    for component in &definition.components {
        println!("  {} {}", component.name().bold(), component.image().dimmed());
        println!("    steps: {}", component.steps().len());
        if !component.caches().is_empty() {
            let caches: Vec<&str> = component.caches().iter().map(|c| c.key.as_str()).collect();
            println!("    caches: {}", caches.join(", "));
        }
        for mount in component.mounts() {
            println!("    mount: {} -> {}", mount.source, mount.target);
        }
        if !component.ports().is_empty() {
            let ports: Vec<String> = component.ports().iter().map(u16::to_string).collect();
            println!("    ports: {}", ports.join(", "));
        }
        println!("    smoke: {}", describe_smoke(component).cyan());
    }

    Ok(Outcome::Success)
}

fn describe_smoke(component: &BuildDescriptor) -> String {
    match component.smoke() {
        SmokeTest::Command {
            command: Some(command),
            timeout_secs,
        } => format!("run `{}` ({}s)", command.join(" "), timeout_secs),
        SmokeTest::Command {
            command: None,
            timeout_secs,
        } => format!("run entrypoint ({}s)", timeout_secs),
        SmokeTest::Readiness(check) => format!(
            "GET :{}{} until healthy ({}s)",
            check.port, check.path, check.timeout_secs
        ),
    }
}
