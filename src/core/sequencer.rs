//! Test sequencing
//!
//! Runs named test cases one after another against a shared context,
//! records a pass/fail/skip result per case and aggregates them into a
//! report and an exit status.

use super::services::ServiceError;
use super::session::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a test case did not pass
#[derive(Error, Debug)]
pub enum CaseError {
    /// Session operation failed (timeout, closed stream)
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An explicit check failed
    #[error("{0}")]
    Failed(String),

    /// The case decided not to run
    #[error("{0}")]
    Skipped(String),

    /// Test infrastructure broke; aborts the run
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Outcome of one case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "PASS"),
            Self::Failed => write!(f, "FAIL"),
            Self::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Recorded result of one case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    /// Case name
    pub name: String,
    /// Outcome
    pub status: TestStatus,
    /// Failure cause or skip reason
    pub message: Option<String>,
    /// Time spent in the case (ms)
    pub duration_ms: u64,
}

impl CaseResult {
    fn skipped(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Skipped,
            message: Some(reason.to_string()),
            duration_ms: 0,
        }
    }

    /// One report line
    pub fn to_line(&self) -> String {
        match (&self.status, &self.message) {
            (TestStatus::Passed, _) => {
                format!("[{}] {} ({:.1}s)", self.status, self.name, self.duration_ms as f64 / 1000.0)
            }
            (_, Some(message)) => format!("[{}] {}: {}", self.status, self.name, message),
            (_, None) => format!("[{}] {}", self.status, self.name),
        }
    }
}

/// Highest failure count reported as an exit status; 127 and up are
/// reserved for harness errors
pub const MAX_REPORTED_FAILURES: u8 = 126;

type CaseFn<C> = Box<dyn FnMut(&mut C) -> Result<(), CaseError> + Send>;

/// A named unit of verification acting on a context `C`
pub struct TestCase<C> {
    name: String,
    description: String,
    run: CaseFn<C>,
}

impl<C> TestCase<C> {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnMut(&mut C) -> Result<(), CaseError> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            run: Box::new(run),
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the case once
    pub fn run(&mut self, context: &mut C) -> Result<(), CaseError> {
        (self.run)(context)
    }
}

impl<C> fmt::Debug for TestCase<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Aggregate result of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequencerResult {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Per-case results, in execution order
    pub results: Vec<CaseResult>,
    /// Wall time of the whole run (ms)
    pub total_duration_ms: u64,
    /// The run was cancelled before every case got its turn
    #[serde(default)]
    pub cancelled: bool,
}

impl SequencerResult {
    fn push(&mut self, result: CaseResult) {
        match result.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
        self.results.push(result);
    }

    /// True when no case failed
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Number of failed cases as an exit status
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.failed).map_or(MAX_REPORTED_FAILURES, |n| n.min(MAX_REPORTED_FAILURES))
    }

    /// Human-readable report
    pub fn report(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            out.push_str(&result.to_line());
            out.push('\n');
        }
        out.push_str(&format!(
            "{} passed, {} failed, {} skipped\n",
            self.passed, self.failed, self.skipped
        ));
        out
    }

    /// Report as JSON
    pub fn report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Ordered executor of test cases
pub struct Sequencer<C> {
    cases: Vec<TestCase<C>>,
    filter: Option<HashSet<String>>,
    running: Arc<AtomicBool>,
}

impl<C> Default for Sequencer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Sequencer<C> {
    pub fn new() -> Self {
        Self {
            cases: Vec::new(),
            filter: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Append a case
    pub fn add(&mut self, case: TestCase<C>) {
        self.cases.push(case);
    }

    /// Append a case
    #[must_use]
    pub fn with_case(mut self, case: TestCase<C>) -> Self {
        self.add(case);
        self
    }

    /// Append several cases
    #[must_use]
    pub fn with_cases(mut self, cases: impl IntoIterator<Item = TestCase<C>>) -> Self {
        self.cases.extend(cases);
        self
    }

    /// Run only the named cases; the rest are reported as skipped
    #[must_use]
    pub fn with_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Names in the filter that match no case
    pub fn unknown_names(&self) -> Vec<String> {
        let Some(filter) = &self.filter else {
            return Vec::new();
        };
        let mut unknown: Vec<String> = filter
            .iter()
            .filter(|name| !self.cases.iter().any(|c| c.name == **name))
            .cloned()
            .collect();
        unknown.sort();
        unknown
    }

    /// Registered cases, in order
    pub fn cases(&self) -> &[TestCase<C>] {
        &self.cases
    }

    /// Handle that stops the run before the next case when cleared
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Cancel execution
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn selected(&self, name: &str) -> bool {
        self.filter.as_ref().map_or(true, |f| f.contains(name))
    }

    /// Run every case in order.
    ///
    /// Case failures are recorded and the run continues. A service error
    /// aborts the run and is returned.
    pub fn run(&mut self, context: &mut C) -> Result<SequencerResult, ServiceError> {
        let start = Instant::now();
        let mut result = SequencerResult::default();

        info!(cases = self.cases.len(), "Starting test run");

        for index in 0..self.cases.len() {
            let name = self.cases[index].name.clone();

            if !self.running.load(Ordering::SeqCst) {
                result.cancelled = true;
                result.push(CaseResult::skipped(&name, "cancelled"));
                continue;
            }
            if !self.selected(&name) {
                result.push(CaseResult::skipped(&name, "not selected"));
                continue;
            }

            info!(case = %name, "Running test case");
            let case_start = Instant::now();
            let outcome = self.cases[index].run(context);
            let duration_ms = duration_ms(case_start.elapsed());

            let (status, message) = match outcome {
                Ok(()) => {
                    info!(case = %name, duration_ms, "Test case passed");
                    (TestStatus::Passed, None)
                }
                Err(CaseError::Skipped(reason)) => {
                    info!(case = %name, %reason, "Test case skipped");
                    (TestStatus::Skipped, Some(reason))
                }
                Err(CaseError::Service(e)) => {
                    error!(case = %name, error = %e, "Test environment failure, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    warn!(case = %name, error = %e, duration_ms, "Test case failed");
                    (TestStatus::Failed, Some(e.to_string()))
                }
            };

            result.push(CaseResult {
                name,
                status,
                message,
                duration_ms,
            });
        }

        result.cancelled |= !self.running.load(Ordering::SeqCst);
        result.total_duration_ms = duration_ms(start.elapsed());
        info!(
            passed = result.passed,
            failed = result.failed,
            skipped = result.skipped,
            cancelled = result.cancelled,
            "Test run finished"
        );
        Ok(result)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
