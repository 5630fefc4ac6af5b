//! Podman container runtime
//!
//! Builds component images and runs smoke tests through the podman CLI:
//! - Checking podman availability (local or remote via `--url`)
//! - Building images by running setup steps in a throwaway container and
//!   committing it
//! - Running bounded commands and detached services from built images
//! - Cleaning up every container it creates, including on drop

use crate::cache::{CacheEntry, DependencyCache};
use crate::config::RunnerConfig;
use crate::runtime::{
    ContainerRuntime, Endpoint, ExecOutput, RuntimeError, RuntimeResult, ServiceInstance,
};
use async_trait::async_trait;
use gantry_core::{BuildDescriptor, BuiltArtifact, SetupStep};
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shell snippet writing stdin to the path given as `$1`
const WRITE_FILE_SCRIPT: &str = r#"mkdir -p "$(dirname "$1")" && cat > "$1""#;

/// How a podman invocation is made: binary plus connection arguments
#[derive(Debug, Clone)]
struct PodmanCli {
    binary: String,
    connection: Vec<String>,
}

impl PodmanCli {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(&self.connection).kill_on_drop(true);
        command
    }

    /// Runs podman with `args`, killing it after `timeout`
    async fn run(
        &self,
        action: &str,
        args: &[String],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> RuntimeResult<ExecOutput> {
        let mut command = self.command();
        command.args(args);
        debug!("Running {}: {} {:?}", action, self.binary, args);
        run_process(command, action, stdin, timeout).await
    }

    /// Like `run`, but a non-zero exit is an error
    async fn run_checked(
        &self,
        action: &str,
        args: &[String],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> RuntimeResult<ExecOutput> {
        let output = self.run(action, args, stdin, timeout).await?;
        if !output.success() {
            debug!(
                "{} failed: exit_code={} stdout='{}' stderr='{}'",
                action,
                output.exit_code,
                output.stdout.trim(),
                output.stderr.trim()
            );
            return Err(RuntimeError::CommandFailed {
                action: action.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

/// Spawns `command`, feeding `stdin` and collecting output until it exits
///
/// On timeout the process is killed and whatever it printed so far is
/// returned in the error.
async fn run_process(
    mut command: Command,
    action: &str,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> RuntimeResult<ExecOutput> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let mut child_stdin = child.stdin.take();
    let mut child_stdout = child.stdout.take();
    let mut child_stderr = child.stderr.take();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let completed = tokio::time::timeout(timeout, async {
        let feed = async {
            if let (Some(pipe), Some(input)) = (child_stdin.as_mut(), stdin) {
                pipe.write_all(input).await?;
                pipe.shutdown().await?;
            }
            // Close stdin so the process sees EOF
            drop(child_stdin.take());
            Ok::<_, std::io::Error>(())
        };
        let read_out = async {
            if let Some(pipe) = child_stdout.as_mut() {
                pipe.read_to_end(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_err = async {
            if let Some(pipe) = child_stderr.as_mut() {
                pipe.read_to_end(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let (fed, out, err) = tokio::join!(feed, read_out, read_err);
        fed?;
        out?;
        err?;
        child.wait().await
    })
    .await;

    match completed {
        Ok(status) => {
            let status = status?;
            Ok(ExecOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
            })
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill timed out {}: {}", action, e);
            }
            let partial = ExecOutput {
                exit_code: -1,
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
            };
            Err(RuntimeError::TimedOut {
                action: action.to_string(),
                after: timeout,
                output: partial.combined(),
            })
        }
    }
}

/// Force-removes a container when dropped unless already removed
struct ContainerGuard {
    cli: PodmanCli,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(cli: PodmanCli, name: String) -> Self {
        Self {
            cli,
            name,
            armed: true,
        }
    }

    async fn remove(mut self, timeout: Duration) {
        self.armed = false;
        let args = vec!["rm".to_string(), "-f".to_string(), self.name.clone()];
        match self.cli.run_checked("remove container", &args, None, timeout).await {
            Ok(_) => debug!("Container {} removed", self.name),
            Err(e) => warn!("Failed to remove container {}: {}", self.name, e),
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        // Not waited on: drop may run on a runtime worker
        debug!("Removing container {} on drop", self.name);
        let result = std::process::Command::new(&self.cli.binary)
            .args(&self.cli.connection)
            .arg("rm")
            .arg("-f")
            .arg(&self.name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        if let Err(e) = result {
            warn!("Failed to remove container {} on drop: {}", self.name, e);
        }
    }
}

/// Podman implementation of [`ContainerRuntime`]
pub struct PodmanRuntime {
    cli: PodmanCli,
    step_timeout: Duration,
    command_timeout: Duration,
    publish_address: &'static str,
    service_host: String,
    port_bindings: HashMap<String, BTreeMap<u16, u16>>,
    cache: Arc<DependencyCache>,
}

impl PodmanRuntime {
    /// Creates a runtime from the runner configuration
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            cli: PodmanCli {
                binary: config.runtime.clone(),
                connection: config.connection_args(),
            },
            step_timeout: config.step_timeout,
            command_timeout: config.command_timeout,
            publish_address: config.publish_address(),
            service_host: config.service_host(),
            port_bindings: config.port_bindings.clone(),
            cache: Arc::new(DependencyCache::new()),
        }
    }

    /// Returns the volume backing cache `key`, creating it once per run
    async fn ensure_cache_volume(&self, key: &str) -> RuntimeResult<CacheEntry> {
        let volume = cache_volume_name(key);
        self.cache
            .get_or_init(key, || async {
                let args = vec![
                    "volume".to_string(),
                    "create".to_string(),
                    "--ignore".to_string(),
                    volume.clone(),
                ];
                self.cli
                    .run_checked("create cache volume", &args, None, self.command_timeout)
                    .await?;
                info!("Cache volume {} ready for key {}", volume, key);
                Ok::<_, RuntimeError>(volume.clone())
            })
            .await
    }

    /// Runs one setup step inside the build container
    async fn run_step(
        &self,
        container: &str,
        workdir: Option<&str>,
        step: &SetupStep,
        timeout: Duration,
    ) -> RuntimeResult<ExecOutput> {
        let mut args = vec!["exec".to_string()];

        match step {
            SetupStep::Install { command } => {
                if let Some(dir) = workdir {
                    args.push("-w".to_string());
                    args.push(dir.to_string());
                }
                args.push(container.to_string());
                args.extend(command.iter().cloned());
                self.cli.run("setup step", &args, None, timeout).await
            }
            SetupStep::WriteFile { path, contents } => {
                args.push("-i".to_string());
                args.push(container.to_string());
                args.extend(
                    ["/bin/sh", "-c", WRITE_FILE_SCRIPT, "sh", path.as_str()]
                        .into_iter()
                        .map(String::from),
                );
                self.cli
                    .run("setup step", &args, Some(contents.as_bytes()), timeout)
                    .await
            }
        }
    }

    /// Commit arguments turning the build container into the component image
    fn commit_args(descriptor: &BuildDescriptor, container: &str, image: &str) -> Vec<String> {
        let mut args = vec!["commit".to_string(), "--quiet".to_string()];

        let mut change = |instruction: String| {
            args.push("--change".to_string());
            args.push(instruction);
        };

        change("ENTRYPOINT []".to_string());
        let cmd = serde_json::to_string(descriptor.entrypoint()).unwrap_or_else(|_| "[]".into());
        change(format!("CMD {}", cmd));
        if let Some(dir) = descriptor.workdir() {
            change(format!("WORKDIR {}", dir));
        }
        for (key, value) in descriptor.env() {
            let quoted = serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value));
            change(format!("ENV {}={}", key, quoted));
        }
        for port in descriptor.ports() {
            change(format!("EXPOSE {}", port));
        }

        args.push(container.to_string());
        args.push(image.to_string());
        args
    }

    /// Resolves the endpoint the probe reaches published `port` on
    async fn published_endpoint(&self, container: &str, port: u16) -> RuntimeResult<Endpoint> {
        let args = vec![
            "port".to_string(),
            container.to_string(),
            format!("{}/tcp", port),
        ];
        let output = self
            .cli
            .run_checked("resolve published port", &args, None, self.command_timeout)
            .await?;

        let host_port =
            parse_port_output(&output.stdout).ok_or_else(|| RuntimeError::CommandFailed {
                action: format!("resolve published port {}", port),
                exit_code: 0,
                stdout: output.stdout.clone(),
                stderr: "unrecognised podman port output".to_string(),
            })?;

        Ok(Endpoint::new(self.service_host.clone(), host_port))
    }

    /// `-p` arguments publishing every port of `artifact`
    fn publish_args(&self, artifact: &BuiltArtifact) -> Vec<String> {
        let bindings = self.port_bindings.get(artifact.name());
        let mut args = Vec::new();
        for port in artifact.descriptor().ports() {
            let host = bindings
                .and_then(|b| b.get(port))
                .map(|h| h.to_string())
                .unwrap_or_default();
            args.push("-p".to_string());
            args.push(format!("{}:{}:{}", self.publish_address, host, port));
        }
        args
    }
}

/// `-v` arguments bind-mounting the descriptor's host directories
fn mount_args(descriptor: &BuildDescriptor) -> RuntimeResult<Vec<String>> {
    let mut args = Vec::new();
    for mount in descriptor.mounts() {
        let source = std::path::absolute(Path::new(&mount.source))?;
        args.push("-v".to_string());
        args.push(format!("{}:{}", source.display(), mount.target));
    }
    Ok(args)
}

/// Time left before `deadline`, or the timeout error carrying `log`
fn remaining(deadline: Instant, budget: Duration, log: &str) -> RuntimeResult<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(RuntimeError::TimedOut {
            action: "build".to_string(),
            after: budget,
            output: log.to_string(),
        });
    }
    Ok(left)
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    async fn ping(&self) -> RuntimeResult<()> {
        let mut command = Command::new(&self.cli.binary);
        command.arg("--version").kill_on_drop(true);

        let version = run_process(command, "runtime version", None, self.command_timeout)
            .await
            .map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "failed to execute '{} --version' ({}). Is {} installed?",
                    self.cli.binary, e, self.cli.binary
                ))
            })?;

        if !version.success() {
            return Err(RuntimeError::Unavailable(format!(
                "{} is not working correctly",
                self.cli.binary
            )));
        }
        info!("Container runtime available: {}", version.stdout.trim());

        let args = vec!["info".to_string()];
        self.cli
            .run_checked("runtime info", &args, None, self.command_timeout)
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("{}: {}", e, e.output().trim())))?;

        Ok(())
    }

    async fn build(
        &self,
        run_id: Uuid,
        descriptor: &BuildDescriptor,
        timeout: Duration,
    ) -> RuntimeResult<BuiltArtifact> {
        let deadline = Instant::now() + timeout;
        let name = descriptor.name();
        let container = format!("gantry-build-{}-{}", run_id.simple(), container_suffix(name));
        let image = image_reference(run_id, name);

        info!("Building {} from {} ({})", name, descriptor.image(), container);

        let mut mounts = Vec::new();
        for cache in descriptor.caches() {
            let entry = self.ensure_cache_volume(&cache.key).await?;
            mounts.push(format!("{}:{}", entry.volume, cache.path));
        }

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container.clone(),
            "--entrypoint".to_string(),
            "/bin/sh".to_string(),
        ];
        for mount in mounts {
            args.push("-v".to_string());
            args.push(mount);
        }
        args.extend(mount_args(descriptor)?);
        if let Some(dir) = descriptor.workdir() {
            args.push("-w".to_string());
            args.push(dir.to_string());
        }
        for (key, value) in descriptor.env() {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(descriptor.image().to_string());
        args.push("-c".to_string());
        args.push("sleep infinity".to_string());

        let guard = ContainerGuard::new(self.cli.clone(), container.clone());
        let budget = remaining(deadline, timeout, "")?.min(self.step_timeout);
        self.cli
            .run_checked("start build container", &args, None, budget)
            .await?;

        let mut log = String::new();
        let total = descriptor.steps().len();
        for (index, step) in descriptor.steps().iter().enumerate() {
            let label = step.label();
            log.push_str(&format!("==> [{}/{}] {}\n", index + 1, total, label));
            debug!("{}: step {}/{} {}", name, index + 1, total, label);

            let action = format!("setup step {} ({})", index + 1, label);
            let budget = remaining(deadline, timeout, &log)?.min(self.step_timeout);
            let output = match self
                .run_step(&container, descriptor.workdir(), step, budget)
                .await
            {
                Ok(output) => output,
                Err(RuntimeError::TimedOut { after, output, .. }) => {
                    log.push_str(&output);
                    return Err(RuntimeError::TimedOut {
                        action,
                        after,
                        output: log,
                    });
                }
                Err(e) => return Err(e),
            };

            if !output.success() {
                log.push_str(&output.stdout);
                return Err(RuntimeError::CommandFailed {
                    action,
                    exit_code: output.exit_code,
                    stdout: log,
                    stderr: output.stderr,
                });
            }
            log.push_str(&output.combined());
            if !log.ends_with('\n') {
                log.push('\n');
            }
        }

        let commit = Self::commit_args(descriptor, &container, &image);
        let budget = remaining(deadline, timeout, &log)?.min(self.command_timeout);
        self.cli
            .run_checked("commit image", &commit, None, budget)
            .await?;
        guard.remove(self.command_timeout).await;

        info!("Built {} as {}", name, image);
        Ok(BuiltArtifact::new(descriptor.clone(), image, log))
    }

    async fn exec(
        &self,
        artifact: &BuiltArtifact,
        command: &[String],
        timeout: Duration,
    ) -> RuntimeResult<ExecOutput> {
        let container = format!("gantry-exec-{}", Uuid::new_v4().simple());
        let guard = ContainerGuard::new(self.cli.clone(), container.clone());

        let mut args = vec!["run".to_string(), "--name".to_string(), container];
        args.extend(mount_args(artifact.descriptor())?);
        args.push(artifact.image().to_string());
        args.extend(command.iter().cloned());

        let result = self.cli.run("smoke command", &args, None, timeout).await;
        guard.remove(self.command_timeout).await;
        result
    }

    async fn start(&self, artifact: &BuiltArtifact) -> RuntimeResult<Box<dyn ServiceInstance>> {
        let container = format!("gantry-svc-{}", Uuid::new_v4().simple());

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container.clone(),
        ];
        args.extend(self.publish_args(artifact));
        args.extend(mount_args(artifact.descriptor())?);
        args.push(artifact.image().to_string());

        let guard = ContainerGuard::new(self.cli.clone(), container.clone());
        self.cli
            .run_checked("start service", &args, None, self.command_timeout)
            .await?;

        let mut endpoints = HashMap::new();
        for port in artifact.descriptor().ports() {
            let endpoint = self.published_endpoint(&container, *port).await?;
            debug!(
                "{} port {} published on {}:{}",
                artifact.name(),
                port,
                endpoint.host,
                endpoint.port
            );
            endpoints.insert(*port, endpoint);
        }

        info!("Started service {} ({})", artifact.name(), container);
        Ok(Box::new(PodmanService {
            cli: self.cli.clone(),
            container,
            endpoints,
            command_timeout: self.command_timeout,
            guard: Some(guard),
        }))
    }

    async fn discard(&self, artifact: &BuiltArtifact) -> RuntimeResult<()> {
        let args = vec![
            "rmi".to_string(),
            "-f".to_string(),
            artifact.image().to_string(),
        ];
        self.cli
            .run_checked("remove image", &args, None, self.command_timeout)
            .await?;
        debug!("Image {} removed", artifact.image());
        Ok(())
    }

    async fn discard_run(&self, run_id: Uuid) -> RuntimeResult<()> {
        let args = vec![
            "images".to_string(),
            "--format".to_string(),
            "{{.Repository}}:{{.Tag}}".to_string(),
        ];
        let output = self
            .cli
            .run_checked("list images", &args, None, self.command_timeout)
            .await?;

        let images = run_images(&output.stdout, run_id);
        if images.is_empty() {
            return Ok(());
        }

        let mut args = vec!["rmi".to_string(), "-f".to_string()];
        args.extend(images.iter().cloned());
        self.cli
            .run_checked("remove run images", &args, None, self.command_timeout)
            .await?;
        info!("Removed {} image(s) left by run {}", images.len(), run_id);
        Ok(())
    }
}

/// A detached service container started by [`PodmanRuntime::start`]
struct PodmanService {
    cli: PodmanCli,
    container: String,
    endpoints: HashMap<u16, Endpoint>,
    command_timeout: Duration,
    guard: Option<ContainerGuard>,
}

#[async_trait]
impl ServiceInstance for PodmanService {
    fn endpoint(&self, port: u16) -> Option<Endpoint> {
        self.endpoints.get(&port).cloned()
    }

    async fn is_running(&self) -> RuntimeResult<bool> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            self.container.clone(),
        ];
        let output = self
            .cli
            .run_checked("inspect service", &args, None, self.command_timeout)
            .await?;
        Ok(output.stdout.trim() == "true")
    }

    async fn logs(&self) -> RuntimeResult<String> {
        let args = vec!["logs".to_string(), self.container.clone()];
        let output = self
            .cli
            .run_checked("service logs", &args, None, self.command_timeout)
            .await?;
        Ok(output.combined())
    }

    async fn stop(&mut self) -> RuntimeResult<()> {
        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            "5".to_string(),
            self.container.clone(),
        ];
        // Ignore errors if already stopped; removal below is what matters
        if let Err(e) = self
            .cli
            .run_checked("stop service", &args, None, self.command_timeout)
            .await
        {
            debug!("Stopping {} reported: {}", self.container, e);
        }

        if let Some(guard) = self.guard.take() {
            guard.remove(self.command_timeout).await;
        }
        Ok(())
    }
}

/// Image reference for a component built in `run_id`
fn image_reference(run_id: Uuid, component: &str) -> String {
    format!(
        "localhost/gantry/{}/{}:latest",
        run_id.simple(),
        container_suffix(component)
    )
}

/// Lowercased component name restricted to characters podman accepts
fn container_suffix(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn cache_volume_name(key: &str) -> String {
    format!("gantry-cache-{}", container_suffix(key))
}

/// Images of `run_id` in `podman images` output
fn run_images(output: &str, run_id: Uuid) -> Vec<String> {
    let prefix = format!("localhost/gantry/{}/", run_id.simple());
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(&prefix))
        .map(str::to_string)
        .collect()
}

/// Host port from `podman port` output such as `0.0.0.0:43121` or `[::]:43121`
///
/// The address half names the engine's machine, so only the port is kept.
fn parse_port_output(output: &str) -> Option<u16> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (_, port) = line.rsplit_once(':')?;
    port.parse().ok()
}
