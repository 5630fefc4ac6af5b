//! Build descriptor domain types
//!
//! A `BuildDescriptor` names one component of a pipeline and says how to
//! realize it: base image, ordered setup steps, exposed ports, entrypoint and
//! the smoke test that proves the built image works.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::ValidationError;

/// Default timeout for a command smoke test
pub const DEFAULT_SMOKE_TIMEOUT_SECS: u64 = 60;

/// Default timeout for a readiness probe to succeed
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 60;

/// Default delay between readiness probe attempts
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 500;

/// A single setup step executed inside the build environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SetupStep {
    /// Run a command (typically a package-manager install)
    Install { command: Vec<String> },

    /// Write opaque file contents to a path
    WriteFile { path: String, contents: String },
}

impl SetupStep {
    /// Short human-readable label used in logs and error messages
    pub fn label(&self) -> String {
        match self {
            SetupStep::Install { command } => format!("install: {}", command.join(" ")),
            SetupStep::WriteFile { path, contents } => {
                format!("write file: {} ({} bytes)", path, contents.len())
            }
        }
    }
}

/// A dependency cache shared between builds, mounted at `path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheMount {
    pub key: String,
    pub path: String,
}

/// A host directory bind-mounted into every container of a component
///
/// Relative sources are resolved against the directory gantry runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostMount {
    pub source: String,
    pub target: String,
}

/// HTTP readiness probe for long-running services
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// Container port the health endpoint listens on
    pub port: u16,
    /// Request path, e.g. `/health`
    pub path: String,
    /// How long the service gets to become ready
    pub timeout_secs: u64,
    /// Delay between probe attempts
    pub interval_ms: u64,
}

impl HealthCheck {
    /// Creates a health check on `port` with the default path and timings
    pub fn new(port: u16) -> Self {
        Self {
            port,
            path: "/health".to_string(),
            timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
            interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// How a built component is smoke-tested
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmokeTest {
    /// Run a bounded command to completion; passes on exit status 0.
    /// With no command, the entrypoint is run.
    Command {
        command: Option<Vec<String>>,
        timeout_secs: u64,
    },

    /// Start the entrypoint as a service and wait for its health endpoint
    Readiness(HealthCheck),
}

impl SmokeTest {
    /// Runs the entrypoint with the default timeout
    pub fn entrypoint() -> Self {
        SmokeTest::Command {
            command: None,
            timeout_secs: DEFAULT_SMOKE_TIMEOUT_SECS,
        }
    }

    /// Runs a diagnostic command with the default timeout
    pub fn command<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SmokeTest::Command {
            command: Some(command.into_iter().map(Into::into).collect()),
            timeout_secs: DEFAULT_SMOKE_TIMEOUT_SECS,
        }
    }

    /// Whether this test treats the component as a long-running service
    pub fn is_service(&self) -> bool {
        matches!(self, SmokeTest::Readiness(_))
    }
}

impl Default for SmokeTest {
    fn default() -> Self {
        SmokeTest::entrypoint()
    }
}

/// Immutable description of one pipeline component
///
/// Constructed only through [`BuildDescriptor::builder`], which rejects empty
/// names and images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildDescriptor {
    name: String,
    image: String,
    workdir: Option<String>,
    env: BTreeMap<String, String>,
    steps: Vec<SetupStep>,
    caches: Vec<CacheMount>,
    mounts: Vec<HostMount>,
    ports: BTreeSet<u16>,
    entrypoint: Vec<String>,
    smoke: SmokeTest,
}

impl BuildDescriptor {
    /// Starts building a descriptor for component `name` on base `image`
    pub fn builder(name: impl Into<String>, image: impl Into<String>) -> BuildDescriptorBuilder {
        BuildDescriptorBuilder {
            inner: BuildDescriptor {
                name: name.into(),
                image: image.into(),
                workdir: None,
                env: BTreeMap::new(),
                steps: Vec::new(),
                caches: Vec::new(),
                mounts: Vec::new(),
                ports: BTreeSet::new(),
                entrypoint: Vec::new(),
                smoke: SmokeTest::default(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn workdir(&self) -> Option<&str> {
        self.workdir.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn steps(&self) -> &[SetupStep] {
        &self.steps
    }

    pub fn caches(&self) -> &[CacheMount] {
        &self.caches
    }

    pub fn mounts(&self) -> &[HostMount] {
        &self.mounts
    }

    pub fn ports(&self) -> &BTreeSet<u16> {
        &self.ports
    }

    pub fn entrypoint(&self) -> &[String] {
        &self.entrypoint
    }

    pub fn smoke(&self) -> &SmokeTest {
        &self.smoke
    }
}

/// Builder for [`BuildDescriptor`]
#[derive(Debug, Clone)]
pub struct BuildDescriptorBuilder {
    inner: BuildDescriptor,
}

impl BuildDescriptorBuilder {
    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.inner.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.env.insert(key.into(), value.into());
        self
    }

    pub fn step(mut self, step: SetupStep) -> Self {
        self.inner.steps.push(step);
        self
    }

    pub fn install<I, S>(self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step(SetupStep::Install {
            command: command.into_iter().map(Into::into).collect(),
        })
    }

    pub fn write_file(self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.step(SetupStep::WriteFile {
            path: path.into(),
            contents: contents.into(),
        })
    }

    pub fn cache(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.inner.caches.push(CacheMount {
            key: key.into(),
            path: path.into(),
        });
        self
    }

    pub fn mount(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.inner.mounts.push(HostMount {
            source: source.into(),
            target: target.into(),
        });
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.inner.ports.insert(port);
        self
    }

    pub fn entrypoint<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.entrypoint = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn smoke(mut self, smoke: SmokeTest) -> Self {
        self.inner.smoke = smoke;
        self
    }

    /// Validates and freezes the descriptor
    pub fn build(self) -> Result<BuildDescriptor, ValidationError> {
        let d = self.inner;

        if d.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if d.image.trim().is_empty() {
            return Err(ValidationError::EmptyImage(d.name));
        }

        for step in &d.steps {
            match step {
                SetupStep::Install { command } if command.is_empty() => {
                    return Err(ValidationError::EmptyInstallCommand(d.name));
                }
                SetupStep::WriteFile { path, .. } if path.trim().is_empty() => {
                    return Err(ValidationError::EmptyFilePath(d.name));
                }
                _ => {}
            }
        }

        for mount in &d.mounts {
            if mount.source.trim().is_empty() || !mount.target.starts_with('/') {
                return Err(ValidationError::InvalidMount {
                    component: d.name,
                    target: mount.target.clone(),
                });
            }
        }

        if let SmokeTest::Readiness(check) = &d.smoke {
            if !d.ports.contains(&check.port) {
                return Err(ValidationError::HealthPortNotExposed {
                    component: d.name,
                    port: check.port,
                });
            }
        }

        Ok(d)
    }
}
