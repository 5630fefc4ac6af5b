//! Pipeline target resolution
//!
//! A target is either a path to a `.lua` file or the name of a pipeline in
//! the pipeline directory (`<dir>/<name>.lua`).

use anyhow::{Context, Result};
use gantry_core::{filter_components, validate_components};
use gantry_lua::{PipelineDefinition, parse_pipeline_definition};
use std::path::{Path, PathBuf};

/// Resolve a target to the pipeline file it designates
///
/// # Arguments
/// * `target` - File path or pipeline name
/// * `pipeline_dir` - Directory searched for names
pub fn resolve_target(target: &str, pipeline_dir: &Path) -> Result<PathBuf> {
    let direct = Path::new(target);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }
    if target.ends_with(".lua") {
        anyhow::bail!("Pipeline file not found: {}", target);
    }

    let named = pipeline_dir.join(format!("{}.lua", target));
    if named.is_file() {
        return Ok(named);
    }

    anyhow::bail!(
        "No pipeline named '{}' (looked for {})",
        target,
        named.display()
    )
}

/// Resolve, parse, filter and validate a pipeline
///
/// `only` restricts the pipeline to the named components, keeping
/// declaration order; unknown names are an error.
pub fn load_pipeline(target: &str, pipeline_dir: &Path, only: &[String]) -> Result<PipelineDefinition> {
    let path = resolve_target(target, pipeline_dir)?;

    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

    let mut definition = parse_pipeline_definition(&source)
        .with_context(|| format!("Failed to parse pipeline definition {}", path.display()))?;

    definition.components = filter_components(definition.components, only)?;
    validate_components(&definition.components)
        .with_context(|| format!("Invalid pipeline {}", definition.name))?;

    Ok(definition)
}
