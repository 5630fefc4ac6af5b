//! Gantry Runner
//!
//! Builds and smoke-tests pipeline components through a container engine.
//!
//! Architecture:
//! - Runtime: engine-neutral traits (`ContainerRuntime`, `ServiceInstance`)
//! - Podman: the podman CLI backend
//! - Cache: shared dependency cache volumes, created once per key
//! - Orchestrator: concurrent build/test with ordered results
//! - Cancel: cooperative cancellation of a running pipeline
//! - Config: engine selection, parallelism and timeouts

pub mod cache;
pub mod cancel;
pub mod config;
pub mod orchestrator;
pub mod podman;
pub mod runtime;

pub use cache::{CacheEntry, DependencyCache};
pub use cancel::CancelToken;
pub use config::RunnerConfig;
pub use orchestrator::{Orchestrator, PipelineError};
pub use podman::PodmanRuntime;
pub use runtime::{
    ContainerRuntime, Endpoint, ExecOutput, RuntimeError, RuntimeResult, ServiceInstance,
};
