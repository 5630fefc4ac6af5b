//! Gantry Lua Pipeline Definitions
//!
//! Pipelines are written as Lua scripts that return a table describing the
//! components to build and test. This crate provides:
//! - A restricted sandbox with the `pipeline` helper module
//! - A parser turning the returned table into validated `BuildDescriptor`s
//! - Editor stubs for the helper module

pub mod parser;
pub mod sandbox;

pub use parser::{PipelineDefinition, parse_pipeline_definition};
pub use sandbox::{create_sandbox, pipeline_stubs};
