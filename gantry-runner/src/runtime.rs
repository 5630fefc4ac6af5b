//! Container runtime abstraction
//!
//! The orchestrator only talks to a container engine through these traits,
//! so the podman backend can be swapped for another engine or for an
//! in-memory fake in tests.

use async_trait::async_trait;
use gantry_core::{BuildDescriptor, BuiltArtifact};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for runtime operations
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by a container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The engine cannot be reached at all
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// An engine command ran but exited non-zero
    #[error("{action} failed with exit code {exit_code}")]
    CommandFailed {
        action: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// An engine command exceeded its timeout and was killed
    #[error("{action} timed out after {}s", .after.as_secs())]
    TimedOut {
        action: String,
        after: Duration,
        output: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Output captured before the error happened, verbatim
    pub fn output(&self) -> String {
        match self {
            RuntimeError::CommandFailed { stdout, stderr, .. } => join_output(stdout, stderr),
            RuntimeError::TimedOut { output, .. } => output.clone(),
            RuntimeError::Unavailable(_) | RuntimeError::Io(_) => String::new(),
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        join_output(&self.stdout, &self.stderr)
    }
}

fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) if stdout.ends_with('\n') => format!("{}{}", stdout, stderr),
        (false, false) => format!("{}\n{}", stdout, stderr),
    }
}

/// Host address a container port is reachable on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// A running, detached component container
#[async_trait]
pub trait ServiceInstance: Send + Sync {
    /// Host endpoint published for a container port
    fn endpoint(&self, port: u16) -> Option<Endpoint>;

    /// Whether the container process is still alive
    async fn is_running(&self) -> RuntimeResult<bool>;

    /// Everything the container wrote so far
    async fn logs(&self) -> RuntimeResult<String>;

    /// Stop and remove the container
    async fn stop(&mut self) -> RuntimeResult<()>;
}

/// Operations the orchestrator needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the engine is reachable
    async fn ping(&self) -> RuntimeResult<()>;

    /// Realize a descriptor into an image within `timeout`
    ///
    /// On a failed or timed out setup step the error carries the build log
    /// captured so far together with the failing step's output.
    async fn build(
        &self,
        run_id: Uuid,
        descriptor: &BuildDescriptor,
        timeout: Duration,
    ) -> RuntimeResult<BuiltArtifact>;

    /// Run `command` to completion in a fresh container of the artifact
    ///
    /// A non-zero exit is returned as `Ok`; only engine problems and the
    /// timeout are errors.
    async fn exec(
        &self,
        artifact: &BuiltArtifact,
        command: &[String],
        timeout: Duration,
    ) -> RuntimeResult<ExecOutput>;

    /// Start the artifact's entrypoint detached, publishing its ports
    async fn start(&self, artifact: &BuiltArtifact) -> RuntimeResult<Box<dyn ServiceInstance>>;

    /// Remove the artifact's image
    async fn discard(&self, artifact: &BuiltArtifact) -> RuntimeResult<()>;

    /// Remove every image left behind by `run_id`
    async fn discard_run(&self, run_id: Uuid) -> RuntimeResult<()>;
}
