//! Test orchestrator.
//!
//! Runs named test cases serially against one [`TestRun`], capturing every
//! outcome as a [`TestCaseRecord`]:
//!
//! ```text
//! idle -> running -> { per case: pending -> pass | fail | error } -> aggregating -> done
//! ```
//!
//! A case that returns a failing verdict, returns an error or panics is
//! recorded and the run continues. Only setup (authentication) and teardown
//! (driver shutdown) failures abort the run.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{future::Future, panic::AssertUnwindSafe, path::PathBuf, pin::Pin};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    artifacts::ArtifactSink,
    config::ProbeConfig,
    lifecycle::{LifecycleState, RunState},
    run::TestRun,
    Error, Result,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ═══════════════════════════════════════════════════════════════════════════
// CASE STATUS
// ═══════════════════════════════════════════════════════════════════════════

/// Status of one test case: `pending -> pass | fail | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CaseStatus {
    Pending,
    Pass,
    /// The check ran and found a defect
    Fail,
    /// The check could not run to a conclusion
    Error,
}

impl LifecycleState for CaseStatus {
    fn valid_next_states(self) -> Vec<Self> {
        match self {
            Self::Pending => vec![Self::Pass, Self::Fail, Self::Error],
            Self::Pass | Self::Fail | Self::Error => Vec::new(),
        }
    }

    fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    fn all_states() -> &'static [Self] {
        &[Self::Pending, Self::Pass, Self::Fail, Self::Error]
    }
}

/// Category of a failing verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// A plain check returned false
    Assertion,
    /// Response shape mismatch
    Validation,
    /// Cross-tenant visibility; never retried
    IsolationViolation,
    /// Orphaned or otherwise inconsistent children; never retried
    CascadeViolation,
    /// Stress success rate below threshold
    ConcurrencyDegradation,
    /// A driver operation failed
    Operation,
}

impl FailureKind {
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::ConcurrencyDegradation | Self::Operation)
    }
}

/// What a test case concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Pass that must be reported distinctly (e.g. a restricted delete)
    PassWithNote(String),
    Fail { kind: FailureKind, message: String },
}

impl Verdict {
    pub fn fail(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Fail {
            kind,
            message: message.into(),
        }
    }
}

impl From<bool> for Verdict {
    fn from(passed: bool) -> Self {
        if passed {
            Self::Pass
        } else {
            Self::fail(FailureKind::Assertion, "check returned false")
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCaseRecord {
    pub name: String,
    pub status: CaseStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub passed: Vec<String>,
    /// Failed and errored cases
    pub failed: Vec<String>,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub records: Vec<TestCaseRecord>,
}

impl RunSummary {
    fn from_records(
        records: Vec<TestCaseRecord>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let (passed, failed): (Vec<_>, Vec<_>) = records
            .iter()
            .partition(|record| record.status == CaseStatus::Pass);
        Self {
            passed: passed.into_iter().map(|r| r.name.clone()).collect(),
            failed: failed.into_iter().map(|r| r.name.clone()).collect(),
            total: records.len(),
            started_at,
            ended_at,
            records,
        }
    }

    /// Passed fraction; an empty run counts as fully successful.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.passed.len() as f64 / self.total as f64
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn errored(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == CaseStatus::Error)
            .count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TEST CASES
// ═══════════════════════════════════════════════════════════════════════════

/// A named, re-runnable check.
#[async_trait]
pub trait TestCase: Send + Sync {
    fn name(&self) -> String;

    /// Whether a retryable failure may be re-run. Isolation and cascade
    /// checks return false.
    fn retryable(&self) -> bool {
        true
    }

    async fn run(&self, run: &mut TestRun) -> Result<Verdict>;
}

struct Outcome {
    status: CaseStatus,
    message: Option<String>,
    kind: Option<FailureKind>,
    note: Option<String>,
}

impl Outcome {
    const fn retryable(&self) -> bool {
        match (self.status, self.kind) {
            (CaseStatus::Fail | CaseStatus::Error, Some(kind)) => kind.is_retryable(),
            _ => false,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn attempt(future: BoxFuture<'_, Result<Verdict>>) -> Outcome {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(Verdict::Pass)) => Outcome {
            status: CaseStatus::Pass,
            message: None,
            kind: None,
            note: None,
        },
        Ok(Ok(Verdict::PassWithNote(note))) => Outcome {
            status: CaseStatus::Pass,
            message: None,
            kind: None,
            note: Some(note),
        },
        Ok(Ok(Verdict::Fail { kind, message })) => Outcome {
            status: CaseStatus::Fail,
            message: Some(message),
            kind: Some(kind),
            note: None,
        },
        Ok(Err(err)) => Outcome {
            status: CaseStatus::Error,
            kind: matches!(err, Error::Operation(_) | Error::Precondition(_))
                .then_some(FailureKind::Operation),
            message: Some(err.to_string()),
            note: None,
        },
        Err(payload) => Outcome {
            status: CaseStatus::Error,
            message: Some(format!("panicked: {}", panic_message(payload.as_ref()))),
            kind: None,
            note: None,
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Orchestrator {
    state: RunState,
    records: Vec<TestCaseRecord>,
    artifacts: ArtifactSink,
    retries: u32,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl Orchestrator {
    #[must_use]
    pub const fn new(artifacts: ArtifactSink, retries: u32) -> Self {
        Self {
            state: RunState::Idle,
            records: Vec::new(),
            artifacts,
            retries,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        let artifacts = if config.artifacts_dir.is_empty() {
            ArtifactSink::disabled()
        } else {
            ArtifactSink::new(&config.artifacts_dir)
        };
        Self::new(artifacts, config.retries)
    }

    pub const fn state(&self) -> RunState {
        self.state
    }

    pub fn records(&self) -> &[TestCaseRecord] {
        &self.records
    }

    fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = RunState::Aborted;
        }
        self.ended_at = Some(Utc::now());
    }

    /// Start the run: authenticate and select the primary tenant.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` (and aborts the run) when either step fails.
    pub async fn setup(&mut self, run: &TestRun) -> Result<()> {
        self.transition(RunState::Running)?;
        self.started_at = Some(Utc::now());
        info!(run = %run.id(), "run started");
        if let Err(err) = run.driver().authenticate().await {
            self.abort();
            error!(error = %err, "authentication failed");
            return Err(Error::Setup(format!("authentication failed: {err}")));
        }
        let tenant = run.config().tenant_a();
        if let Err(err) = run.driver().switch_tenant(Some(&tenant)).await {
            self.abort();
            return Err(Error::Setup(format!("could not select tenant {tenant}: {err}")));
        }
        Ok(())
    }

    /// Run a single-attempt case built from a closure.
    ///
    /// # Errors
    ///
    /// Only fails when the orchestrator is not running.
    pub async fn run_test<F>(
        &mut self,
        run: &mut TestRun,
        name: &str,
        case: F,
    ) -> Result<TestCaseRecord>
    where
        F: for<'r> FnOnce(&'r mut TestRun) -> BoxFuture<'r, Result<Verdict>> + Send,
    {
        self.ensure_running()?;
        info!(case = %name, "case started");
        let started = Instant::now();
        let outcome = attempt(case(run)).await;
        Ok(self.finish(run, name, outcome, 1, started).await)
    }

    /// Run a [`TestCase`], re-running retryable failures up to the
    /// configured retry count.
    ///
    /// # Errors
    ///
    /// Only fails when the orchestrator is not running.
    pub async fn run_case(
        &mut self,
        run: &mut TestRun,
        case: &dyn TestCase,
    ) -> Result<TestCaseRecord> {
        self.ensure_running()?;
        let name = case.name();
        info!(case = %name, "case started");
        let started = Instant::now();
        let mut attempts = 1;
        let mut outcome = attempt(case.run(run)).await;
        while case.retryable() && outcome.retryable() && attempts <= self.retries {
            warn!(case = %name, attempt = attempts, error = ?outcome.message, "retrying case");
            attempts += 1;
            outcome = attempt(case.run(run)).await;
        }
        Ok(self.finish(run, &name, outcome, attempts, started).await)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state == RunState::Running {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: "case".to_string(),
            })
        }
    }

    async fn finish(
        &mut self,
        run: &TestRun,
        name: &str,
        outcome: Outcome,
        attempts: u32,
        started: Instant,
    ) -> TestCaseRecord {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let artifact = if outcome.status == CaseStatus::Pass {
            None
        } else {
            self.capture(run, name).await
        };
        let record = TestCaseRecord {
            name: name.to_string(),
            status: outcome.status,
            duration_ms,
            error_message: outcome.message,
            failure_kind: outcome.kind,
            note: outcome.note,
            attempts,
            artifact,
        };
        match record.status {
            CaseStatus::Pass => {
                info!(case = %name, duration_ms, note = ?record.note, "case passed");
            }
            CaseStatus::Fail => warn!(
                case = %name,
                duration_ms,
                kind = ?record.failure_kind,
                error = ?record.error_message,
                "case failed"
            ),
            CaseStatus::Error | CaseStatus::Pending => warn!(
                case = %name,
                duration_ms,
                error = ?record.error_message,
                "case errored"
            ),
        }
        self.records.push(record.clone());
        record
    }

    async fn capture(&self, run: &TestRun, name: &str) -> Option<PathBuf> {
        let artifact = match run.driver().snapshot().await {
            Ok(artifact) => artifact,
            Err(err) => {
                warn!(case = %name, error = %err, "artifact capture failed");
                return None;
            }
        };
        match self.artifacts.write(name, &artifact).await {
            Ok(path) => path,
            Err(err) => {
                warn!(case = %name, error = %err, "artifact write failed");
                None
            }
        }
    }

    /// Clean up, close the driver session and aggregate the summary.
    ///
    /// # Errors
    ///
    /// Returns `Error::Teardown` (and aborts the run) when the driver cannot
    /// be shut down. Entity cleanup failures are logged, never raised.
    pub async fn teardown(&mut self, run: &mut TestRun) -> Result<RunSummary> {
        self.transition(RunState::Aggregating)?;
        let cleaned = run.teardown().await;
        if let Err(err) = run.driver().shutdown().await {
            self.abort();
            error!(error = %err, "driver shutdown failed");
            return Err(Error::Teardown(format!("driver shutdown failed: {err}")));
        }
        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);
        self.transition(RunState::Done)?;
        let summary = self.summary();
        info!(
            cleaned,
            passed = summary.passed.len(),
            failed = summary.failed.len(),
            "run complete"
        );
        Ok(summary)
    }

    /// Summary of the records so far.
    pub fn summary(&self) -> RunSummary {
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        let ended_at = self.ended_at.unwrap_or_else(Utc::now);
        RunSummary::from_records(self.records.clone(), started_at, ended_at)
    }

    /// Setup, every case in order, teardown.
    ///
    /// # Errors
    ///
    /// Only fatal setup/teardown failures are returned.
    pub async fn execute(
        &mut self,
        run: &mut TestRun,
        cases: &[Box<dyn TestCase>],
    ) -> Result<RunSummary> {
        self.setup(run).await?;
        for case in cases {
            self.run_case(run, case.as_ref()).await?;
        }
        self.teardown(run).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use tempfile::TempDir;

    use super::*;
    use crate::{
        driver::twin::TwinDriver, lifecycle::conformance_tests, registry::EntityRegistry,
    };

    fn twin_run() -> Result<TestRun> {
        Ok(TestRun::new(
            Arc::new(TwinDriver::api()),
            EntityRegistry::builtin()?,
            ProbeConfig::default(),
        ))
    }

    struct Flaky {
        calls: AtomicU32,
        fail_times: u32,
        kind: FailureKind,
        retryable: bool,
    }

    #[async_trait]
    impl TestCase for Flaky {
        fn name(&self) -> String {
            format!("flaky:{}", self.kind)
        }

        fn retryable(&self) -> bool {
            self.retryable
        }

        async fn run(&self, _run: &mut TestRun) -> Result<Verdict> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Ok(Verdict::fail(self.kind, "flaked"))
            } else {
                Ok(Verdict::Pass)
            }
        }
    }

    fn flaky(kind: FailureKind, fail_times: u32, retryable: bool) -> Flaky {
        Flaky {
            calls: AtomicU32::new(0),
            fail_times,
            kind,
            retryable,
        }
    }

    #[test]
    fn test_case_status_conformance() {
        conformance_tests::run_all_tests::<CaseStatus>();
    }

    #[test]
    fn test_verdict_from_bool() {
        assert_eq!(Verdict::from(true), Verdict::Pass);
        assert!(matches!(
            Verdict::from(false),
            Verdict::Fail {
                kind: FailureKind::Assertion,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_run() -> Result<()> {
        let mut run = twin_run()?;
        let mut orchestrator = Orchestrator::new(ArtifactSink::disabled(), 0);
        orchestrator.setup(&run).await?;

        orchestrator
            .run_test(&mut run, "passes", |_| Box::pin(async { Ok(Verdict::Pass) }))
            .await?;
        orchestrator
            .run_test(&mut run, "returns false", |_| Box::pin(async { Ok(false.into()) }))
            .await?;
        orchestrator
            .run_test(&mut run, "errors", |_| {
                Box::pin(async { Err(Error::Precondition("no parent".to_string())) })
            })
            .await?;
        orchestrator
            .run_test(&mut run, "panics", |_| {
                Box::pin(async {
                    let items: Vec<Verdict> = Vec::new();
                    Ok(items[1].clone())
                })
            })
            .await?;

        let summary = orchestrator.teardown(&mut run).await?;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, vec!["passes"]);
        assert_eq!(summary.failed.len(), 3);
        assert_eq!(summary.errored(), 2);
        assert!(!summary.is_success());
        assert!((summary.success_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(orchestrator.state(), RunState::Done);

        let panicked = &summary.records[3];
        assert_eq!(panicked.status, CaseStatus::Error);
        assert!(panicked
            .error_message
            .as_deref()
            .unwrap_or_default()
            .starts_with("panicked"));
        Ok(())
    }

    #[tokio::test]
    async fn test_retries_apply_to_retryable_failures_only() -> Result<()> {
        let mut run = twin_run()?;
        let mut orchestrator = Orchestrator::new(ArtifactSink::disabled(), 2);
        orchestrator.setup(&run).await?;

        let degraded = flaky(FailureKind::ConcurrencyDegradation, 2, true);
        let record = orchestrator.run_case(&mut run, &degraded).await?;
        assert_eq!(record.status, CaseStatus::Pass);
        assert_eq!(record.attempts, 3);

        let isolation = flaky(FailureKind::IsolationViolation, 1, true);
        let record = orchestrator.run_case(&mut run, &isolation).await?;
        assert_eq!(record.status, CaseStatus::Fail);
        assert_eq!(record.attempts, 1);

        let pinned = flaky(FailureKind::Operation, 1, false);
        let record = orchestrator.run_case(&mut run, &pinned).await?;
        assert_eq!(record.attempts, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_artifact_captured_on_failure() -> Result<()> {
        let temp = TempDir::new()?;
        let mut run = twin_run()?;
        let mut orchestrator = Orchestrator::new(ArtifactSink::new(temp.path()), 0);
        orchestrator.setup(&run).await?;
        let record = orchestrator
            .run_test(&mut run, "crud:crop", |_| Box::pin(async { Ok(false.into()) }))
            .await?;
        let artifact = record.artifact.unwrap_or_default();
        assert!(artifact.starts_with(temp.path()));
        assert!(tokio::fs::try_exists(&artifact).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_cases_require_running_state() -> Result<()> {
        let mut run = twin_run()?;
        let mut orchestrator = Orchestrator::new(ArtifactSink::disabled(), 0);
        let result = orchestrator
            .run_test(&mut run, "early", |_| Box::pin(async { Ok(Verdict::Pass) }))
            .await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_teardown_cleans_tracked_entities() -> Result<()> {
        let mut run = twin_run()?;
        let mut orchestrator = Orchestrator::new(ArtifactSink::disabled(), 0);
        orchestrator.setup(&run).await?;
        orchestrator
            .run_test(&mut run, "leaves data", |run| {
                Box::pin(async move {
                    let descriptor = run.describe("inventoryTransaction")?;
                    let record = run.generate(&descriptor, serde_json::Map::new());
                    let driver = run.driver_handle();
                    let created = crate::ops::EntityOps::new(driver.as_ref(), run.timeouts())
                        .create(&descriptor, &record)
                        .await;
                    let id = created.entity_id.unwrap_or_default();
                    run.track("inventoryTransaction", &id, &record.display_value());
                    Ok(created.success.into())
                })
            })
            .await?;
        assert_eq!(run.tracker().len(), 1);
        let summary = orchestrator.teardown(&mut run).await?;
        assert!(summary.is_success());
        assert!(run.tracker().is_empty());
        Ok(())
    }
}
