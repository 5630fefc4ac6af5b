//! Pipeline definition parser
//!
//! Evaluates a Lua pipeline script in the sandbox and converts the returned
//! table into validated build descriptors, in declaration order.

use anyhow::{Context, Result};
use gantry_core::{BuildDescriptor, HealthCheck, SetupStep, SmokeTest};
use mlua::{Table, Value};

use crate::sandbox::create_sandbox;

/// A parsed pipeline: its name and ordered components
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    pub description: Option<String>,
    pub components: Vec<BuildDescriptor>,
}

/// Parse a pipeline definition from Lua source code
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid or does not return a table
/// - Required fields are missing (name, components, component name/image)
/// - Field types are incorrect
/// - A component fails descriptor validation
///
/// Duplicate component names are left to `gantry_core::validate_components`,
/// which runs after any component filter is applied.
///
/// # Example
/// ```
/// use gantry_lua::parser::parse_pipeline_definition;
///
/// let source = r#"
///     return pipeline.define {
///         name = "quick-start",
///         components = {
///             { name = "hello", image = "alpine:latest", entrypoint = { "echo", "ready" } },
///         },
///     }
/// "#;
///
/// let definition = parse_pipeline_definition(source)?;
/// assert_eq!(definition.name, "quick-start");
/// assert_eq!(definition.components[0].name(), "hello");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_pipeline_definition(source: &str) -> Result<PipelineDefinition> {
    let lua = create_sandbox().context("Failed to create pipeline sandbox")?;

    let pipeline: Table = lua
        .load(source)
        .set_name("pipeline")
        .eval()
        .context("Failed to evaluate pipeline definition")?;

    let name: String = pipeline
        .get("name")
        .context("Pipeline must have a 'name' field")?;

    let description: Option<String> = pipeline.get("description").ok();

    let components = parse_components(&pipeline)?;

    Ok(PipelineDefinition {
        name,
        description,
        components,
    })
}

/// Parse the 'components' field from pipeline table
fn parse_components(pipeline: &Table) -> Result<Vec<BuildDescriptor>> {
    let components_table: Table = pipeline
        .get("components")
        .context("Pipeline must have a 'components' field")?;

    let mut components = Vec::new();

    for (idx, pair) in components_table.sequence_values::<Table>().enumerate() {
        let table = pair.with_context(|| format!("Component #{} must be a table", idx + 1))?;
        components.push(parse_component(&table, idx)?);
    }

    if components.is_empty() {
        return Err(anyhow::anyhow!("Pipeline must have at least one component"));
    }

    Ok(components)
}

fn parse_component(table: &Table, idx: usize) -> Result<BuildDescriptor> {
    let name: String = table
        .get("name")
        .with_context(|| format!("Component #{} must have a 'name' field", idx + 1))?;

    let image: String = table
        .get("image")
        .with_context(|| format!("Component '{}' must have an 'image' field", name))?;

    let mut builder = BuildDescriptor::builder(name.clone(), image);

    let workdir: Option<String> = table
        .get("workdir")
        .with_context(|| format!("Component '{}': 'workdir' must be a string", name))?;
    if let Some(workdir) = workdir {
        builder = builder.workdir(workdir);
    }

    if let Some(env) = optional_table(table, "env", &name)? {
        for pair in env.pairs::<String, String>() {
            let (key, value) = pair.with_context(|| {
                format!("Component '{}': 'env' must map strings to strings", name)
            })?;
            builder = builder.env(key, value);
        }
    }

    if let Some(steps) = optional_table(table, "steps", &name)? {
        for (step_idx, value) in steps.sequence_values::<Value>().enumerate() {
            let value = value
                .with_context(|| format!("Component '{}': failed to read step entry", name))?;
            builder = builder.step(parse_step(value, &name, step_idx)?);
        }
    }

    if let Some(caches) = optional_table(table, "caches", &name)? {
        for pair in caches.sequence_values::<Table>() {
            let cache = pair
                .with_context(|| format!("Component '{}': cache entries must be tables", name))?;
            let key: String = cache
                .get("key")
                .with_context(|| format!("Component '{}': cache must have a 'key' field", name))?;
            let path: String = cache
                .get("path")
                .with_context(|| format!("Component '{}': cache must have a 'path' field", name))?;
            builder = builder.cache(key, path);
        }
    }

    if let Some(mounts) = optional_table(table, "mounts", &name)? {
        for pair in mounts.sequence_values::<Table>() {
            let mount = pair
                .with_context(|| format!("Component '{}': mount entries must be tables", name))?;
            let source: String = mount.get("source").with_context(|| {
                format!("Component '{}': mount must have a 'source' field", name)
            })?;
            let target: String = mount.get("target").with_context(|| {
                format!("Component '{}': mount must have a 'target' field", name)
            })?;
            builder = builder.mount(source, target);
        }
    }

    let ports: Option<Vec<u16>> = table
        .get("ports")
        .with_context(|| format!("Component '{}': 'ports' must be an array of ports", name))?;
    let ports = ports.unwrap_or_default();
    for port in &ports {
        builder = builder.port(*port);
    }

    let entrypoint: Value = table.get("entrypoint").unwrap_or(Value::Nil);
    if !matches!(entrypoint, Value::Nil) {
        builder = builder.entrypoint(parse_command(entrypoint, &name, "entrypoint")?);
    }

    let smoke = optional_table(table, "smoke", &name)?;
    let health = optional_table(table, "health", &name)?;

    match (smoke, health) {
        (Some(_), Some(_)) => {
            return Err(anyhow::anyhow!(
                "Component '{}' cannot declare both 'smoke' and 'health'",
                name
            ));
        }
        (Some(smoke), None) => builder = builder.smoke(parse_smoke(&smoke, &name)?),
        (None, Some(health)) => {
            builder = builder.smoke(SmokeTest::Readiness(parse_health(&health, &name, &ports)?))
        }
        (None, None) => {}
    }

    builder
        .build()
        .with_context(|| format!("Invalid component '{}'", name))
}

/// Reads an optional table field, rejecting non-table values
fn optional_table(table: &Table, field: &str, component: &str) -> Result<Option<Table>> {
    match table.get::<Value>(field).unwrap_or(Value::Nil) {
        Value::Nil => Ok(None),
        Value::Table(t) => Ok(Some(t)),
        _ => Err(anyhow::anyhow!(
            "Component '{}': field '{}' must be a table",
            component,
            field
        )),
    }
}

/// A command is either an argv array or a shell string run through `sh -c`
fn parse_command(value: Value, component: &str, field: &str) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec!["sh".to_string(), "-c".to_string(), s.to_string_lossy()]),
        Value::Table(t) => {
            let mut command = Vec::new();
            for part in t.sequence_values::<String>() {
                command.push(part.with_context(|| {
                    format!(
                        "Component '{}': '{}' must contain only strings",
                        component, field
                    )
                })?);
            }
            Ok(command)
        }
        _ => Err(anyhow::anyhow!(
            "Component '{}': '{}' must be a string or an array of strings",
            component,
            field
        )),
    }
}

fn parse_step(value: Value, component: &str, step_idx: usize) -> Result<SetupStep> {
    let step = match value {
        Value::String(_) => {
            return Ok(SetupStep::Install {
                command: parse_command(value, component, "steps")?,
            });
        }
        Value::Table(t) => t,
        _ => {
            return Err(anyhow::anyhow!(
                "Component '{}': step #{} must be a table or a shell string",
                component,
                step_idx + 1
            ));
        }
    };

    let kind: String = step.get("type").with_context(|| {
        format!(
            "Component '{}': step #{} must have a 'type' field",
            component,
            step_idx + 1
        )
    })?;

    match kind.as_str() {
        "install" => {
            let command = step.get::<Value>("command").unwrap_or(Value::Nil);
            Ok(SetupStep::Install {
                command: parse_command(command, component, "command")?,
            })
        }
        "file" => {
            let path: String = step.get("path").with_context(|| {
                format!("Component '{}': file step must have a 'path'", component)
            })?;
            let contents: String = step.get("contents").with_context(|| {
                format!("Component '{}': file step must have 'contents'", component)
            })?;
            Ok(SetupStep::WriteFile { path, contents })
        }
        other => Err(anyhow::anyhow!(
            "Component '{}': unknown step type '{}'",
            component,
            other
        )),
    }
}

fn parse_smoke(smoke: &Table, component: &str) -> Result<SmokeTest> {
    let command = match smoke.get::<Value>("command").unwrap_or(Value::Nil) {
        Value::Nil => None,
        value => Some(parse_command(value, component, "smoke.command")?),
    };

    let timeout: Option<u64> = smoke
        .get("timeout")
        .with_context(|| format!("Component '{}': smoke 'timeout' must be seconds", component))?;

    let mut test = match command {
        Some(command) => SmokeTest::command(command),
        None => SmokeTest::entrypoint(),
    };

    if let (Some(secs), SmokeTest::Command { timeout_secs, .. }) = (timeout, &mut test) {
        *timeout_secs = secs;
    }

    Ok(test)
}

fn parse_health(health: &Table, component: &str, ports: &[u16]) -> Result<HealthCheck> {
    let port: Option<u16> = health
        .get("port")
        .with_context(|| format!("Component '{}': health 'port' must be a port", component))?;

    // A single exposed port is the obvious default
    let port = match (port, ports) {
        (Some(port), _) => port,
        (None, [only]) => *only,
        (None, _) => {
            return Err(anyhow::anyhow!(
                "Component '{}': health check must name a 'port'",
                component
            ));
        }
    };

    let mut check = HealthCheck::new(port);

    if let Some(path) = health.get::<Option<String>>("path")? {
        check = check.with_path(path);
    }
    if let Some(timeout) = health.get::<Option<u64>>("timeout")? {
        check = check.with_timeout_secs(timeout);
    }
    if let Some(interval) = health.get::<Option<u64>>("interval_ms")? {
        check = check.with_interval_ms(interval);
    }

    Ok(check)
}
