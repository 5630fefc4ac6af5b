//! Gantry Core
//!
//! Core types and abstractions for the Gantry container pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: build descriptors, built artifacts, test results and reports
//! - Validation: fail-fast checks run before any build begins
//! - Error types shared by the runner and the CLI

pub mod domain;
pub mod error;
pub mod validate;

pub use domain::artifact::BuiltArtifact;
pub use domain::descriptor::{
    BuildDescriptor, BuildDescriptorBuilder, CacheMount, HealthCheck, HostMount, SetupStep,
    SmokeTest,
};
pub use domain::report::{FailureDetail, FailureKind, PipelineReport, TestResult};
pub use error::ValidationError;
pub use validate::{filter_components, validate_components};
