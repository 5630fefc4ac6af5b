//! Init command handler
//!
//! Generates a starter pipeline plus the files a Lua language server needs
//! (.luarc.json and stubs for the `pipeline` module).

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::Path;

use super::Outcome;

const STARTER_PIPELINE: &str = r#"-- Starter pipeline generated by `gantry init`
--
-- Run it with: gantry run example

return pipeline.define({
  name = "example",
  description = "A one-shot tool and a long-running service",
  components = {
    pipeline.component({
      name = "hello",
      image = "docker.io/library/alpine:3.20",
      steps = {
        pipeline.sh("apk add --no-cache curl"),
      },
      entrypoint = { "curl", "--version" },
    }),

    pipeline.component({
      name = "static-site",
      image = "docker.io/library/python:3.12-alpine",
      workdir = "/srv",
      steps = {
        pipeline.file("/srv/health", "ok\n"),
        pipeline.file("/srv/index.html", "<h1>It works</h1>\n"),
      },
      ports = { 8000 },
      entrypoint = { "python", "-m", "http.server", "8000" },
      health = pipeline.health({ port = 8000, path = "/health", timeout = 30 }),
    }),
  },
})
"#;

const LUARC: &str = r#"{
  "$schema": "https://raw.githubusercontent.com/sumneko/vscode-lua/master/setting/schema.json",
  "runtime": {
    "version": "Lua 5.4"
  },
  "diagnostics": {
    "globals": ["pipeline"]
  },
  "workspace": {
    "library": [".gantry/stubs"],
    "checkThirdParty": false
  },
  "completion": {
    "callSnippet": "Both"
  }
}
"#;

/// Handle the init command
pub fn handle_init_command(output_dir: &str, force: bool) -> Result<Outcome> {
    let output_path = Path::new(output_dir);

    write_file(&output_path.join(".luarc.json"), LUARC, force)?;
    write_file(
        &output_path.join(".gantry").join("stubs").join("pipeline.lua"),
        gantry_lua::pipeline_stubs(),
        force,
    )?;
    write_file(
        &output_path.join("pipelines").join("example.lua"),
        STARTER_PIPELINE,
        force,
    )?;

    println!("{}", "✓ Gantry project initialized!".green().bold());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Install Lua Language Server in your editor");
    println!("  2. Edit {} to describe your components", "pipelines/example.lua".cyan());
    println!("  3. Use {} to build and test them", "gantry run example".cyan());

    Ok(Outcome::Success)
}

/// Writes `contents` to `path`, keeping existing files unless `force` is set
fn write_file(path: &Path, contents: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("  {} {} (use --force to overwrite)", "Skipped".yellow(), path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    println!("  {} {}", "Created".green(), path.display());

    Ok(())
}
