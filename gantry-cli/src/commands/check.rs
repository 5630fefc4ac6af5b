//! Check command handler

use anyhow::Result;
use colored::*;

use super::{Outcome, load_or_report};
use crate::config::Config;

/// Parse and validate a pipeline without contacting the container engine
pub fn handle_check_command(target: &str, config: &Config) -> Result<Outcome> {
    let Some(definition) = load_or_report(target, &[], config) else {
        return Ok(Outcome::InvalidPipeline);
    };

    let services = definition
        .components
        .iter()
        .filter(|c| c.smoke().is_service())
        .count();

    println!(
        "{} {} is valid: {} component(s), {} service(s)",
        "✓".green().bold(),
        definition.name.cyan().bold(),
        definition.components.len(),
        services
    );

    Ok(Outcome::Success)
}
