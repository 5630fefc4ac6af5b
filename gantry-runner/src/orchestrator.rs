//! Pipeline orchestration
//!
//! Drives every component of a pipeline through build and smoke test:
//! - Validates the pipeline before touching the engine
//! - Checks the engine is reachable
//! - Processes components concurrently under a semaphore bound
//! - Collects results into slots indexed by declaration order
//! - Aborts everything on cancellation

use crate::cancel::CancelToken;
use crate::config::RunnerConfig;
use crate::runtime::{ContainerRuntime, RuntimeError, ServiceInstance};
use chrono::Utc;
use gantry_core::{
    BuildDescriptor, BuiltArtifact, HealthCheck, PipelineReport, SmokeTest, TestResult,
    ValidationError, validate_components,
};
use gantry_probe::{HealthProbe, ProbeError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcomes that end a pipeline run without a report
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("container environment unavailable: {0}")]
    EnvironmentUnavailable(#[source] RuntimeError),

    #[error("invalid pipeline: {0}")]
    Invalid(#[from] ValidationError),

    #[error("pipeline run cancelled")]
    Cancelled,
}

/// Why a smoke test failed, with everything the component printed
#[derive(Debug)]
struct SmokeFailure {
    message: String,
    output: String,
}

impl SmokeFailure {
    fn new(message: impl Into<String>, output: String) -> Self {
        Self {
            message: message.into(),
            output,
        }
    }
}

/// Runs pipelines against a container runtime
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    probe: HealthProbe,
    max_parallel: usize,
    build_timeout: Duration,
    test_timeout: Duration,
}

impl Orchestrator {
    /// Creates an orchestrator using the limits in `config`
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &RunnerConfig) -> Result<Self, ProbeError> {
        Ok(Self {
            runtime,
            probe: HealthProbe::new(config.probe_timeout)?,
            max_parallel: config.max_parallel,
            build_timeout: config.build_timeout,
            test_timeout: config.test_timeout,
        })
    }

    /// Builds and smoke-tests every component
    ///
    /// Build and test failures are recorded in the report. Only an invalid
    /// pipeline, an unreachable engine or cancellation return `Err`.
    pub async fn run_pipeline(
        &self,
        pipeline: &str,
        components: Vec<BuildDescriptor>,
        cancel: &CancelToken,
    ) -> Result<PipelineReport, PipelineError> {
        validate_components(&components)?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            ping = self.runtime.ping() => ping.map_err(PipelineError::EnvironmentUnavailable)?,
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let total = components.len();

        info!(
            "Running pipeline {} ({} component(s), run {})",
            pipeline, total, run_id
        );

        let permits = if self.max_parallel == 0 {
            total
        } else {
            self.max_parallel
        };
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut tasks = JoinSet::new();
        let mut task_slots = HashMap::new();

        for (index, descriptor) in components.into_iter().enumerate() {
            let orchestrator = self.clone();
            let semaphore = semaphore.clone();
            let name = descriptor.name().to_string();

            let handle = tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                orchestrator.process_component(run_id, descriptor).await
            });
            task_slots.insert(handle.id(), (index, name));
        }

        let mut slots: Vec<Option<TestResult>> = (0..total).map(|_| None).collect();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = tasks.join_next_with_id() => Some(joined),
            };

            let Some(joined) = next else {
                warn!("Pipeline {} cancelled, aborting {} task(s)", pipeline, tasks.len());
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                // Aborted tasks may have committed images they never discarded
                if let Err(e) = self.runtime.discard_run(run_id).await {
                    warn!("Failed to remove images of run {}: {}", run_id, e);
                }
                return Err(PipelineError::Cancelled);
            };

            match joined {
                None => break,
                Some(Ok((id, result))) => {
                    if let Some((index, _)) = task_slots.get(&id) {
                        slots[*index] = Some(result);
                    }
                }
                Some(Err(e)) => {
                    if let Some((index, name)) = task_slots.get(&e.id()) {
                        error!("Task for {} failed: {}", name, e);
                        slots[*index] = Some(TestResult::test_failure(
                            name.as_str(),
                            format!("component task failed: {}", e),
                            String::new(),
                            0,
                        ));
                    }
                }
            }
        }

        let results: Vec<TestResult> = slots.into_iter().flatten().collect();
        let report = PipelineReport::new(
            run_id,
            pipeline,
            started_at,
            clock.elapsed().as_millis() as u64,
            results,
        );

        info!(
            "Pipeline {} finished: {} passed, {} failed",
            pipeline,
            report.passed_count(),
            report.failed_count()
        );

        Ok(report)
    }

    /// Build then test one component; never returns an error
    ///
    /// The runtime enforces `build_timeout` and every smoke timeout is capped
    /// at `test_timeout`, so timeouts still report what was captured.
    async fn process_component(&self, run_id: Uuid, descriptor: BuildDescriptor) -> TestResult {
        let clock = Instant::now();
        let name = descriptor.name().to_string();

        let artifact = match self
            .runtime
            .build(run_id, &descriptor, self.build_timeout)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("Build of {} failed: {}", name, e);
                return TestResult::build_failure(&name, e.to_string(), e.output(), elapsed_ms(clock));
            }
        };
        debug!("{} build log:\n{}", name, artifact.build_log());

        info!("Testing {}", name);
        let outcome = self.smoke_test(&artifact).await;

        if let Err(e) = self.runtime.discard(&artifact).await {
            warn!("Failed to discard image {}: {}", artifact.image(), e);
        }

        match outcome {
            Ok(output) => {
                info!("{} passed", name);
                TestResult::pass(&name, output, elapsed_ms(clock))
            }
            Err(failure) => {
                warn!("{} failed: {}", name, failure.message);
                TestResult::test_failure(&name, failure.message, failure.output, elapsed_ms(clock))
            }
        }
    }

    async fn smoke_test(&self, artifact: &BuiltArtifact) -> Result<String, SmokeFailure> {
        match artifact.descriptor().smoke() {
            SmokeTest::Command {
                command,
                timeout_secs,
            } => {
                let command = command
                    .clone()
                    .unwrap_or_else(|| artifact.descriptor().entrypoint().to_vec());
                let timeout = Duration::from_secs(*timeout_secs).min(self.test_timeout);
                self.command_test(artifact, &command, timeout).await
            }
            SmokeTest::Readiness(check) => self.readiness_test(artifact, check).await,
        }
    }

    /// Passes iff the command exits with status 0 within `timeout`
    async fn command_test(
        &self,
        artifact: &BuiltArtifact,
        command: &[String],
        timeout: Duration,
    ) -> Result<String, SmokeFailure> {
        if command.is_empty() {
            return Err(SmokeFailure::new(
                "no smoke command and no entrypoint to run",
                String::new(),
            ));
        }

        debug!("{}: running smoke command {:?}", artifact.name(), command);
        match self.runtime.exec(artifact, command, timeout).await {
            Ok(output) if output.success() => Ok(output.combined()),
            Ok(output) => Err(SmokeFailure::new(
                format!("smoke command exited with status {}", output.exit_code),
                output.combined(),
            )),
            Err(e) => Err(SmokeFailure::new(e.to_string(), e.output())),
        }
    }

    /// Starts the service and waits for its health endpoint
    ///
    /// The service is always stopped afterwards and its logs are the
    /// captured output.
    async fn readiness_test(
        &self,
        artifact: &BuiltArtifact,
        check: &HealthCheck,
    ) -> Result<String, SmokeFailure> {
        let mut service = self
            .runtime
            .start(artifact)
            .await
            .map_err(|e| SmokeFailure::new(format!("failed to start service: {}", e), e.output()))?;

        let limit = check.timeout().min(self.test_timeout);
        let ready = self
            .await_ready(artifact.name(), service.as_ref(), check, limit)
            .await;

        let logs = match service.logs().await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Failed to collect logs of {}: {}", artifact.name(), e);
                String::new()
            }
        };
        if let Err(e) = service.stop().await {
            warn!("Failed to stop service {}: {}", artifact.name(), e);
        }

        match ready {
            Ok(()) => Ok(logs),
            Err(message) => Err(SmokeFailure::new(message, logs)),
        }
    }

    /// Polls the health endpoint until it answers 2xx, the container exits
    /// or `limit` elapses
    async fn await_ready(
        &self,
        component: &str,
        service: &dyn ServiceInstance,
        check: &HealthCheck,
        limit: Duration,
    ) -> Result<(), String> {
        let endpoint = service
            .endpoint(check.port)
            .ok_or_else(|| format!("port {} is not published", check.port))?;
        let url = HealthProbe::endpoint_url(&endpoint.host, endpoint.port, &check.path);
        let deadline = Instant::now() + limit;
        let mut last_seen = String::from("no answer");

        debug!("{}: waiting for {}", component, url);

        loop {
            match self.probe.check(&url).await {
                Ok(status) if status.healthy => {
                    info!("{} is ready ({} answered {})", component, url, status.status_code);
                    return Ok(());
                }
                Ok(status) => last_seen = format!("status {}", status.status_code),
                Err(e) if e.is_timeout() => last_seen = "request timed out".to_string(),
                Err(e) => last_seen = e.to_string(),
            }

            match service.is_running().await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(format!(
                        "container exited before becoming ready (last probe: {})",
                        last_seen
                    ));
                }
                Err(e) => debug!("{}: could not inspect container: {}", component, e),
            }

            if Instant::now() >= deadline {
                return Err(format!(
                    "not ready after {}s (last probe: {})",
                    limit.as_secs(),
                    last_seen
                ));
            }

            tokio::time::sleep(check.interval()).await;
        }
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    clock.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Endpoint, ExecOutput, RuntimeResult};
    use async_trait::async_trait;
    use axum::{Router, http::StatusCode, routing::get};
    use gantry_core::FailureKind;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// How a fake service behaves once started
    #[derive(Clone)]
    enum FakeService {
        /// Serves the given local port and stays up
        Healthy(u16),
        /// Exits immediately with these logs
        Crashes(String),
        /// Stays up but never answers
        Hangs,
    }

    #[derive(Default)]
    struct FakeRuntime {
        unavailable: bool,
        failing_builds: HashSet<String>,
        build_delays: HashMap<String, Duration>,
        exec_results: HashMap<String, ExecOutput>,
        exec_delay: Option<Duration>,
        service: Option<FakeService>,

        builds: Mutex<Vec<String>>,
        execs: Mutex<Vec<(String, Vec<String>)>>,
        discarded: Mutex<Vec<String>>,
        discarded_runs: Mutex<Vec<Uuid>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        stopped: Arc<AtomicBool>,
    }

    struct FakeInstance {
        behaviour: FakeService,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ServiceInstance for FakeInstance {
        fn endpoint(&self, _port: u16) -> Option<Endpoint> {
            match &self.behaviour {
                FakeService::Healthy(port) => Some(Endpoint::new("127.0.0.1", *port)),
                // Port 9 (discard) is not listening locally
                _ => Some(Endpoint::new("127.0.0.1", 9)),
            }
        }

        async fn is_running(&self) -> RuntimeResult<bool> {
            Ok(!matches!(self.behaviour, FakeService::Crashes(_)))
        }

        async fn logs(&self) -> RuntimeResult<String> {
            Ok(match &self.behaviour {
                FakeService::Crashes(logs) => logs.clone(),
                FakeService::Healthy(_) => "listening\n".to_string(),
                FakeService::Hangs => "booting\n".to_string(),
            })
        }

        async fn stop(&mut self) -> RuntimeResult<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn ping(&self) -> RuntimeResult<()> {
            if self.unavailable {
                return Err(RuntimeError::Unavailable("no engine".to_string()));
            }
            Ok(())
        }

        async fn build(
            &self,
            _run_id: Uuid,
            descriptor: &BuildDescriptor,
            timeout: Duration,
        ) -> RuntimeResult<BuiltArtifact> {
            let name = descriptor.name().to_string();
            self.builds.lock().unwrap().push(name.clone());

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self
                .build_delays
                .get(&name)
                .copied()
                .unwrap_or(Duration::from_millis(10));
            tokio::time::sleep(delay.min(timeout)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if delay > timeout {
                return Err(RuntimeError::TimedOut {
                    action: "setup step 2 (install: npm ci)".to_string(),
                    after: timeout,
                    output: "==> [1/2] write file: /app/package.json (2 bytes)\n==> [2/2] install: npm ci\nnpm http fetch GET 200\n".to_string(),
                });
            }

            if self.failing_builds.contains(&name) {
                return Err(RuntimeError::CommandFailed {
                    action: "setup step 1 (install: make)".to_string(),
                    exit_code: 2,
                    stdout: "==> [1/1] install: make\n".to_string(),
                    stderr: "make: *** No targets.  Stop.".to_string(),
                });
            }

            Ok(BuiltArtifact::new(
                descriptor.clone(),
                format!("fake/{}", name),
                String::new(),
            ))
        }

        async fn exec(
            &self,
            artifact: &BuiltArtifact,
            command: &[String],
            timeout: Duration,
        ) -> RuntimeResult<ExecOutput> {
            self.execs
                .lock()
                .unwrap()
                .push((artifact.name().to_string(), command.to_vec()));

            if let Some(delay) = self.exec_delay {
                if delay > timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(RuntimeError::TimedOut {
                        action: "smoke command".to_string(),
                        after: timeout,
                        output: "still working".to_string(),
                    });
                }
                tokio::time::sleep(delay).await;
            }

            Ok(self
                .exec_results
                .get(artifact.name())
                .cloned()
                .unwrap_or(ExecOutput {
                    exit_code: 0,
                    stdout: format!("{} ok\n", artifact.name()),
                    stderr: String::new(),
                }))
        }

        async fn start(&self, _artifact: &BuiltArtifact) -> RuntimeResult<Box<dyn ServiceInstance>> {
            let behaviour = self
                .service
                .clone()
                .ok_or_else(|| RuntimeError::Unavailable("no service configured".to_string()))?;
            Ok(Box::new(FakeInstance {
                behaviour,
                stopped: self.stopped.clone(),
            }))
        }

        async fn discard(&self, artifact: &BuiltArtifact) -> RuntimeResult<()> {
            self.discarded
                .lock()
                .unwrap()
                .push(artifact.name().to_string());
            Ok(())
        }

        async fn discard_run(&self, run_id: Uuid) -> RuntimeResult<()> {
            self.discarded_runs.lock().unwrap().push(run_id);
            Ok(())
        }
    }

    fn component(name: &str) -> BuildDescriptor {
        BuildDescriptor::builder(name, "alpine:3.20")
            .entrypoint(["echo", name])
            .build()
            .unwrap()
    }

    fn service(name: &str, timeout_secs: u64) -> BuildDescriptor {
        BuildDescriptor::builder(name, "node:20-alpine")
            .port(4000)
            .entrypoint(["node", "server.js"])
            .smoke(SmokeTest::Readiness(
                HealthCheck::new(4000)
                    .with_timeout_secs(timeout_secs)
                    .with_interval_ms(20),
            ))
            .build()
            .unwrap()
    }

    fn orchestrator(runtime: Arc<FakeRuntime>, max_parallel: usize) -> Orchestrator {
        let config = RunnerConfig::default().with_max_parallel(max_parallel);
        Orchestrator::new(runtime, &config).unwrap()
    }

    fn orchestrator_with(runtime: Arc<FakeRuntime>, config: RunnerConfig) -> Orchestrator {
        Orchestrator::new(runtime, &config).unwrap()
    }

    async fn serve_health() -> u16 {
        let app = Router::new().route("/health", get(|| async { (StatusCode::OK, "OK") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_all_components_pass() {
        let runtime = Arc::new(FakeRuntime::default());
        let report = orchestrator(runtime.clone(), 0)
            .run_pipeline("demo", vec![component("a"), component("b")], &CancelToken::new())
            .await
            .unwrap();

        assert!(report.success());
        assert_eq!(report.pipeline(), "demo");
        assert_eq!(report.passed_count(), 2);
        assert_eq!(report.results()[0].output(), "a ok\n");
        assert_eq!(runtime.discarded.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_results_keep_declaration_order() {
        let runtime = Arc::new(FakeRuntime {
            build_delays: HashMap::from([
                ("slow".to_string(), Duration::from_millis(150)),
                ("fast".to_string(), Duration::from_millis(1)),
            ]),
            ..Default::default()
        });

        let report = orchestrator(runtime, 0)
            .run_pipeline(
                "order",
                vec![component("slow"), component("fast"), component("mid")],
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let names: Vec<&str> = report.results().iter().map(|r| r.component()).collect();
        assert_eq!(names, vec!["slow", "fast", "mid"]);
    }

    #[tokio::test]
    async fn test_build_failure_is_recorded_and_not_tested() {
        let runtime = Arc::new(FakeRuntime {
            failing_builds: HashSet::from(["b".to_string()]),
            ..Default::default()
        });

        let report = orchestrator(runtime.clone(), 0)
            .run_pipeline(
                "mixed",
                vec![component("a"), component("b"), component("c")],
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert!(!report.success());
        let results = report.results();
        assert!(results[0].passed());
        assert!(!results[1].passed());
        assert_eq!(results[1].failure_kind(), Some(FailureKind::Build));
        assert_eq!(
            results[1].output(),
            "==> [1/1] install: make\nmake: *** No targets.  Stop."
        );
        assert!(results[2].passed());
        assert!(report.has_build_failures());

        let tested: Vec<String> = runtime
            .execs
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        assert!(!tested.contains(&"b".to_string()));
        assert_eq!(tested.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_command_output_is_verbatim() {
        let runtime = Arc::new(FakeRuntime {
            exec_results: HashMap::from([(
                "a".to_string(),
                ExecOutput {
                    exit_code: 1,
                    stdout: "Error: Cannot find module 'express'\n".to_string(),
                    stderr: String::new(),
                },
            )]),
            ..Default::default()
        });

        let report = orchestrator(runtime, 0)
            .run_pipeline("fail", vec![component("a")], &CancelToken::new())
            .await
            .unwrap();

        let result = &report.results()[0];
        assert!(!result.passed());
        assert_eq!(result.failure_kind(), Some(FailureKind::Test));
        assert_eq!(result.output(), "Error: Cannot find module 'express'\n");
        assert_eq!(
            result.error().unwrap().message,
            "smoke command exited with status 1"
        );
    }

    #[tokio::test]
    async fn test_explicit_smoke_command_is_used() {
        let runtime = Arc::new(FakeRuntime::default());
        let descriptor = BuildDescriptor::builder("cli", "alpine:3.20")
            .entrypoint(["my-cli", "serve"])
            .smoke(SmokeTest::command(["my-cli", "--version"]))
            .build()
            .unwrap();

        orchestrator(runtime.clone(), 0)
            .run_pipeline("cmd", vec![descriptor], &CancelToken::new())
            .await
            .unwrap();

        let execs = runtime.execs.lock().unwrap();
        assert_eq!(execs[0].1, vec!["my-cli", "--version"]);
    }

    #[tokio::test]
    async fn test_command_timeout_fails() {
        let runtime = Arc::new(FakeRuntime {
            exec_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let descriptor = BuildDescriptor::builder("slow", "alpine:3.20")
            .smoke(SmokeTest::Command {
                command: Some(vec!["sleep".to_string(), "5".to_string()]),
                timeout_secs: 1,
            })
            .build()
            .unwrap();

        let report = orchestrator(runtime, 0)
            .run_pipeline("timeout", vec![descriptor], &CancelToken::new())
            .await
            .unwrap();

        let result = &report.results()[0];
        assert!(!result.passed());
        assert_eq!(result.failure_kind(), Some(FailureKind::Test));
        assert_eq!(result.output(), "still working");
    }

    #[tokio::test]
    async fn test_missing_entrypoint_fails_test() {
        let runtime = Arc::new(FakeRuntime::default());
        let descriptor = BuildDescriptor::builder("bare", "alpine:3.20").build().unwrap();

        let report = orchestrator(runtime, 0)
            .run_pipeline("bare", vec![descriptor], &CancelToken::new())
            .await
            .unwrap();
        assert!(!report.results()[0].passed());
        assert_eq!(report.results()[0].failure_kind(), Some(FailureKind::Test));
    }

    #[tokio::test]
    async fn test_service_passes_when_healthy() {
        let port = serve_health().await;
        let runtime = Arc::new(FakeRuntime {
            service: Some(FakeService::Healthy(port)),
            ..Default::default()
        });

        let report = orchestrator(runtime.clone(), 0)
            .run_pipeline("svc", vec![service("api", 5)], &CancelToken::new())
            .await
            .unwrap();

        assert!(report.success());
        assert_eq!(report.results()[0].output(), "listening\n");
        assert!(runtime.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_service_exiting_before_ready_fails_with_logs() {
        let runtime = Arc::new(FakeRuntime {
            service: Some(FakeService::Crashes(
                "Error: listen EADDRINUSE: address already in use :::4000\n".to_string(),
            )),
            ..Default::default()
        });

        let report = orchestrator(runtime.clone(), 0)
            .run_pipeline("svc", vec![service("api", 5)], &CancelToken::new())
            .await
            .unwrap();

        let result = &report.results()[0];
        assert!(!result.passed());
        assert!(result.output().contains("EADDRINUSE"));
        assert!(
            result
                .error()
                .unwrap()
                .message
                .starts_with("container exited before becoming ready")
        );
        assert!(runtime.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_service_timeout_is_not_success() {
        let runtime = Arc::new(FakeRuntime {
            service: Some(FakeService::Hangs),
            ..Default::default()
        });

        let report = orchestrator(runtime.clone(), 0)
            .run_pipeline("svc", vec![service("api", 1)], &CancelToken::new())
            .await
            .unwrap();

        let result = &report.results()[0];
        assert!(!result.passed());
        assert!(result.error().unwrap().message.starts_with("not ready after 1s"));
        assert_eq!(result.output(), "booting\n");
        assert!(runtime.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_build_timeout_keeps_partial_log() {
        let runtime = Arc::new(FakeRuntime {
            build_delays: HashMap::from([("api".to_string(), Duration::from_secs(30))]),
            ..Default::default()
        });
        let mut config = RunnerConfig::default();
        config.build_timeout = Duration::from_millis(200);

        let started = Instant::now();
        let report = orchestrator_with(runtime.clone(), config)
            .run_pipeline("slow-build", vec![component("api"), component("web")], &CancelToken::new())
            .await
            .unwrap();

        let result = &report.results()[0];
        assert!(!result.passed());
        assert_eq!(result.failure_kind(), Some(FailureKind::Build));
        assert!(result.error().unwrap().message.contains("timed out"));
        assert_eq!(
            result.output(),
            "==> [1/2] write file: /app/package.json (2 bytes)\n==> [2/2] install: npm ci\nnpm http fetch GET 200\n"
        );
        assert!(report.results()[1].passed());
        assert!(started.elapsed() < Duration::from_secs(5));

        let tested: Vec<String> = runtime.execs.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(tested, vec!["web".to_string()]);
        assert_eq!(*runtime.discarded.lock().unwrap(), vec!["web".to_string()]);
    }

    #[tokio::test]
    async fn test_test_timeout_caps_readiness_and_keeps_logs() {
        let runtime = Arc::new(FakeRuntime {
            service: Some(FakeService::Hangs),
            ..Default::default()
        });
        let mut config = RunnerConfig::default();
        config.test_timeout = Duration::from_secs(1);

        let started = Instant::now();
        let report = orchestrator_with(runtime.clone(), config)
            .run_pipeline("svc", vec![service("api", 5)], &CancelToken::new())
            .await
            .unwrap();

        let result = &report.results()[0];
        assert!(!result.passed());
        assert_eq!(result.failure_kind(), Some(FailureKind::Test));
        assert!(result.error().unwrap().message.starts_with("not ready after 1s"));
        assert_eq!(result.output(), "booting\n");
        assert!(runtime.stopped.load(Ordering::SeqCst));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_test_timeout_caps_smoke_command() {
        let runtime = Arc::new(FakeRuntime {
            exec_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let mut config = RunnerConfig::default();
        config.test_timeout = Duration::from_secs(1);

        let report = orchestrator_with(runtime.clone(), config)
            .run_pipeline("cmd", vec![component("a")], &CancelToken::new())
            .await
            .unwrap();

        let result = &report.results()[0];
        assert!(!result.passed());
        assert_eq!(result.failure_kind(), Some(FailureKind::Test));
        assert_eq!(
            result.error().unwrap().message,
            "smoke command timed out after 1s"
        );
        assert_eq!(result.output(), "still working");
        assert_eq!(runtime.discarded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected_before_build() {
        let runtime = Arc::new(FakeRuntime::default());
        let err = orchestrator(runtime.clone(), 0)
            .run_pipeline("dup", vec![component("a"), component("a")], &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Invalid(ValidationError::DuplicateName(ref name)) if name == "a"
        ));
        assert!(runtime.builds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pipeline_rejected() {
        let runtime = Arc::new(FakeRuntime::default());
        let err = orchestrator(runtime, 0)
            .run_pipeline("empty", Vec::new(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Invalid(ValidationError::NoComponents)));
    }

    #[tokio::test]
    async fn test_unavailable_runtime() {
        let runtime = Arc::new(FakeRuntime {
            unavailable: true,
            ..Default::default()
        });
        let err = orchestrator(runtime.clone(), 0)
            .run_pipeline("down", vec![component("a")], &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::EnvironmentUnavailable(_)));
        assert!(runtime.builds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_discards_results() {
        let runtime = Arc::new(FakeRuntime {
            build_delays: HashMap::from([("slow".to_string(), Duration::from_secs(30))]),
            ..Default::default()
        });
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = orchestrator(runtime.clone(), 0)
            .run_pipeline("cancel", vec![component("fast"), component("slow")], &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(runtime.discarded_runs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_runtime() {
        let runtime = Arc::new(FakeRuntime::default());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = orchestrator(runtime.clone(), 0)
            .run_pipeline("cancel", vec![component("a")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(runtime.builds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let delays: HashMap<String, Duration> = (0..6)
            .map(|i| (format!("c{}", i), Duration::from_millis(40)))
            .collect();
        let runtime = Arc::new(FakeRuntime {
            build_delays: delays,
            ..Default::default()
        });

        let components = (0..6).map(|i| component(&format!("c{}", i))).collect();
        let report = orchestrator(runtime.clone(), 2)
            .run_pipeline("bounded", components, &CancelToken::new())
            .await
            .unwrap();

        assert!(report.success());
        assert_eq!(runtime.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unbounded_runs_everything_at_once() {
        let delays: HashMap<String, Duration> = (0..4)
            .map(|i| (format!("c{}", i), Duration::from_millis(100)))
            .collect();
        let runtime = Arc::new(FakeRuntime {
            build_delays: delays,
            ..Default::default()
        });

        let components = (0..4).map(|i| component(&format!("c{}", i))).collect();
        orchestrator(runtime.clone(), 0)
            .run_pipeline("unbounded", components, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(runtime.peak.load(Ordering::SeqCst), 4);
    }
}
