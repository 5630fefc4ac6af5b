//! Core domain types
//!
//! The lifecycle of a component through a pipeline run is strictly one-directional:
//! `BuildDescriptor` -> `BuiltArtifact` -> `TestResult` -> `PipelineReport`.
//! No stage holds a reference back to an earlier one.

pub mod artifact;
pub mod descriptor;
pub mod report;
