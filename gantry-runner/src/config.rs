//! Runner configuration
//!
//! Controls which container engine is used, how many components are
//! processed at once and how long every external operation may take.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Host services of a local engine are reached on
const LOOPBACK: &str = "127.0.0.1";

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Container engine binary (e.g. "podman")
    pub runtime: String,

    /// Remote engine endpoint, passed as `--url`
    pub runtime_url: Option<String>,

    /// SSH identity for the remote engine, passed as `--identity`
    pub runtime_identity: Option<String>,

    /// Host the readiness probe connects to for published service ports.
    /// Defaults to the remote engine's host, or loopback for a local engine.
    pub service_host: Option<String>,

    /// Maximum components processed concurrently (0 = unbounded)
    pub max_parallel: usize,

    /// Upper bound for building one component
    pub build_timeout: Duration,

    /// Upper bound for a single setup step
    pub step_timeout: Duration,

    /// Upper bound for smoke-testing one component
    pub test_timeout: Duration,

    /// Timeout of one health probe request
    pub probe_timeout: Duration,

    /// Timeout of short engine commands (info, commit, port, rm...)
    pub command_timeout: Duration,

    /// Fixed host ports per component: component -> container port -> host port
    pub port_bindings: HashMap<String, BTreeMap<u16, u16>>,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            runtime: "podman".to_string(),
            runtime_url: None,
            runtime_identity: None,
            service_host: None,
            max_parallel: 0,
            build_timeout: Duration::from_secs(1800), // 30 minutes
            step_timeout: Duration::from_secs(900),
            test_timeout: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(60),
            port_bindings: HashMap::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - GANTRY_RUNTIME (default: podman)
    /// - GANTRY_RUNTIME_URL
    /// - GANTRY_RUNTIME_IDENTITY
    /// - GANTRY_SERVICE_HOST
    /// - GANTRY_MAX_PARALLEL (default: 0, unbounded)
    /// - GANTRY_BUILD_TIMEOUT (seconds, default: 1800)
    /// - GANTRY_STEP_TIMEOUT (seconds, default: 900)
    /// - GANTRY_TEST_TIMEOUT (seconds, default: 600)
    /// - GANTRY_PROBE_TIMEOUT (seconds, default: 2)
    /// - GANTRY_COMMAND_TIMEOUT (seconds, default: 60)
    /// - GANTRY_PORTS (e.g. "api:4000=8080,web:3000=3000")
    ///
    /// A variable that is set but cannot be parsed is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();

        let runtime = std::env::var("GANTRY_RUNTIME").unwrap_or(defaults.runtime);
        let runtime_url = std::env::var("GANTRY_RUNTIME_URL").ok();
        let runtime_identity = std::env::var("GANTRY_RUNTIME_IDENTITY").ok();
        let service_host = std::env::var("GANTRY_SERVICE_HOST").ok();

        let max_parallel = value_from_env("GANTRY_MAX_PARALLEL", defaults.max_parallel)?;

        let port_bindings = match std::env::var("GANTRY_PORTS") {
            Ok(spec) => parse_port_bindings(&spec)?,
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            runtime,
            runtime_url,
            runtime_identity,
            service_host,
            max_parallel,
            build_timeout: secs_from_env("GANTRY_BUILD_TIMEOUT", defaults.build_timeout)?,
            step_timeout: secs_from_env("GANTRY_STEP_TIMEOUT", defaults.step_timeout)?,
            test_timeout: secs_from_env("GANTRY_TEST_TIMEOUT", defaults.test_timeout)?,
            probe_timeout: secs_from_env("GANTRY_PROBE_TIMEOUT", defaults.probe_timeout)?,
            command_timeout: secs_from_env("GANTRY_COMMAND_TIMEOUT", defaults.command_timeout)?,
            port_bindings,
        })
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Publishes `container_port` of `component` on a fixed host port
    pub fn with_port_binding(
        mut self,
        component: impl Into<String>,
        container_port: u16,
        host_port: u16,
    ) -> Self {
        self.port_bindings
            .entry(component.into())
            .or_default()
            .insert(container_port, host_port);
        self
    }

    /// Global engine arguments selecting the connection
    pub fn connection_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(url) = &self.runtime_url {
            args.push("--url".to_string());
            args.push(url.clone());
        }
        if let Some(identity) = &self.runtime_identity {
            args.push("--identity".to_string());
            args.push(identity.clone());
        }
        args
    }

    /// Host of a remote engine, if `runtime_url` points at one
    ///
    /// `unix://` sockets are local.
    pub fn remote_host(&self) -> Option<String> {
        let url = Url::parse(self.runtime_url.as_deref()?).ok()?;
        if url.scheme() == "unix" {
            return None;
        }
        url.host_str()
            .filter(|host| !host.is_empty())
            .map(str::to_string)
    }

    /// Host the readiness probe uses to reach published ports
    pub fn service_host(&self) -> String {
        self.service_host
            .clone()
            .or_else(|| self.remote_host())
            .unwrap_or_else(|| LOOPBACK.to_string())
    }

    /// Address service ports are published on, on the engine's machine
    ///
    /// Local engines only publish on loopback. Remote engines publish on
    /// all interfaces so the probe can reach them.
    pub fn publish_address(&self) -> &'static str {
        if self.service_host.is_some() || self.remote_host().is_some() {
            "0.0.0.0"
        } else {
            LOOPBACK
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runtime.trim().is_empty() {
            anyhow::bail!("runtime cannot be empty");
        }

        if let Some(url) = &self.runtime_url {
            if url.trim().is_empty() {
                anyhow::bail!("runtime_url cannot be empty when set");
            }
            if let Err(e) = Url::parse(url) {
                anyhow::bail!("runtime_url '{}' is not a valid URL: {}", url, e);
            }
        }

        if matches!(&self.service_host, Some(host) if host.trim().is_empty()) {
            anyhow::bail!("service_host cannot be empty when set");
        }

        if self.runtime_identity.is_some() && self.runtime_url.is_none() {
            anyhow::bail!("runtime_identity requires runtime_url");
        }

        for (name, timeout) in [
            ("build_timeout", self.build_timeout),
            ("step_timeout", self.step_timeout),
            ("test_timeout", self.test_timeout),
            ("probe_timeout", self.probe_timeout),
            ("command_timeout", self.command_timeout),
        ] {
            if timeout.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn value_from_env<T: FromStr>(var: &str, default: T) -> anyhow::Result<T> {
    parse_value(var, std::env::var(var).ok().as_deref(), default)
}

fn secs_from_env(var: &str, default: Duration) -> anyhow::Result<Duration> {
    value_from_env(var, default.as_secs()).map(Duration::from_secs)
}

/// Parses `value` of variable `var`, falling back to `default` when unset
fn parse_value<T: FromStr>(var: &str, value: Option<&str>, default: T) -> anyhow::Result<T> {
    match value.map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value '{}' for {}", raw, var)),
    }
}

/// Parses `component:container=host` bindings separated by commas
pub fn parse_port_bindings(spec: &str) -> anyhow::Result<HashMap<String, BTreeMap<u16, u16>>> {
    let mut bindings: HashMap<String, BTreeMap<u16, u16>> = HashMap::new();

    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (component, ports) = entry
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid port binding '{}': expected component:container=host", entry))?;
        let (container, host) = ports
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid port binding '{}': expected component:container=host", entry))?;

        let component = component.trim();
        if component.is_empty() {
            anyhow::bail!("invalid port binding '{}': component name is empty", entry);
        }

        let container: u16 = container
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid container port in '{}'", entry))?;
        let host: u16 = host
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid host port in '{}'", entry))?;

        bindings
            .entry(component.to_string())
            .or_default()
            .insert(container, host);
    }

    Ok(bindings)
}
