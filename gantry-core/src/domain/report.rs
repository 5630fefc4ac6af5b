//! Test results and pipeline reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which phase of a component's pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Setup steps or image realization failed; the test never ran
    Build,
    /// The smoke test exited non-zero, timed out, or never became ready
    Test,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Build => write!(f, "build"),
            FailureKind::Test => write!(f, "test"),
        }
    }
}

/// Error detail attached to a failed [`TestResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one component's build and smoke test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    component: String,
    passed: bool,
    output: String,
    error: Option<FailureDetail>,
    duration_ms: u64,
}

impl TestResult {
    /// A component whose smoke test passed
    pub fn pass(component: impl Into<String>, output: String, duration_ms: u64) -> Self {
        Self {
            component: component.into(),
            passed: true,
            output,
            error: None,
            duration_ms,
        }
    }

    /// A component whose build failed; `output` is whatever the build captured
    pub fn build_failure(
        component: impl Into<String>,
        message: impl Into<String>,
        output: String,
        duration_ms: u64,
    ) -> Self {
        Self::failure(component, FailureKind::Build, message, output, duration_ms)
    }

    /// A component whose smoke test failed
    pub fn test_failure(
        component: impl Into<String>,
        message: impl Into<String>,
        output: String,
        duration_ms: u64,
    ) -> Self {
        Self::failure(component, FailureKind::Test, message, output, duration_ms)
    }

    fn failure(
        component: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
        output: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            component: component.into(),
            passed: false,
            output,
            error: Some(FailureDetail {
                kind,
                message: message.into(),
            }),
            duration_ms,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Captured stdout/stderr, verbatim
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&FailureDetail> {
        self.error.as_ref()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

/// Terminal result of a pipeline run
///
/// Results are kept in component declaration order. `success` is the logical
/// AND of every result and is derived at construction.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    run_id: Uuid,
    pipeline: String,
    started_at: DateTime<Utc>,
    duration_ms: u64,
    success: bool,
    results: Vec<TestResult>,
}

impl PipelineReport {
    pub fn new(
        run_id: Uuid,
        pipeline: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        results: Vec<TestResult>,
    ) -> Self {
        let success = results.iter().all(TestResult::passed);
        Self {
            run_id,
            pipeline: pipeline.into(),
            started_at,
            duration_ms,
            success,
            results,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed()).count()
    }

    /// Failed results in declaration order
    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(|r| !r.passed())
    }

    pub fn has_build_failures(&self) -> bool {
        self.failures()
            .any(|r| r.failure_kind() == Some(FailureKind::Build))
    }

    /// Serializes the report as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
