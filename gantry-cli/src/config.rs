//! Configuration module
//!
//! Handles CLI configuration. Runner settings (engine, timeouts,
//! parallelism) come from `gantry_runner::RunnerConfig`.

use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory searched for pipelines given by name
    pub pipeline_dir: PathBuf,
}
