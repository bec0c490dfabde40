//! Per-test lifecycle state
//!
//! ```text
//! NotStarted ──▶ Skipped
//!      │
//!      ▼
//!   Running ──▶ Passed | Failed | Skipped
//! ```
//!
//! Terminal states never transition. A timeout marks a running test
//! `Failed`; the worker completing afterwards leaves it that way.

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use streamcheck_core::{RecordVec, REPORT_BATCH};

/// Lifecycle state of one test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestState {
    /// Not launched (yet)
    #[serde(rename = "DNS")]
    NotStarted,
    /// Filtered out, or skipped by the test itself
    #[serde(rename = "SKIPPED")]
    Skipped,
    /// Worker is executing
    #[serde(rename = "RUNNING")]
    Running,
    /// Completed successfully
    #[serde(rename = "PASSED")]
    Passed,
    /// Failed, panicked or timed out
    #[serde(rename = "FAILED")]
    Failed,
}

impl TestState {
    /// Display name used in the summary and the report
    pub const fn name(&self) -> &'static str {
        match self {
            TestState::NotStarted => "DNS",
            TestState::Skipped => "SKIPPED",
            TestState::Running => "RUNNING",
            TestState::Passed => "PASSED",
            TestState::Failed => "FAILED",
        }
    }

    /// True for states that never change again
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestState::Skipped | TestState::Passed | TestState::Failed
        )
    }

    fn can_become(&self, to: TestState) -> bool {
        matches!(
            (self, to),
            (TestState::NotStarted, TestState::Skipped)
                | (TestState::NotStarted, TestState::Running)
                | (TestState::Running, TestState::Passed)
                | (TestState::Running, TestState::Failed)
                | (TestState::Running, TestState::Skipped)
        )
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable run state of one test, guarded by the scheduler lock
#[derive(Debug, Clone)]
pub struct TestRunState {
    name: String,
    state: TestState,
    start: Option<Instant>,
    duration: Duration,
    deadline: Option<Instant>,
    timeout: Duration,
    report: RecordVec<String>,
    skip_reason: Option<String>,
    failures: Vec<String>,
}

impl TestRunState {
    /// Fresh state for a registered test
    pub fn new(name: &str) -> Self {
        TestRunState {
            name: name.to_string(),
            state: TestState::NotStarted,
            start: None,
            duration: Duration::ZERO,
            deadline: None,
            timeout: Duration::ZERO,
            report: RecordVec::with_initial_batch(REPORT_BATCH),
            skip_reason: None,
            failures: Vec::new(),
        }
    }

    /// The `<MAIN>` pseudo run: starts `Passed` and is never transitioned
    pub fn main(now: Instant) -> Self {
        let mut main = TestRunState::new("<MAIN>");
        main.state = TestState::Passed;
        main.start = Some(now);
        main
    }

    /// Test name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> TestState {
        self.state
    }

    /// When the test was launched
    pub fn start(&self) -> Option<Instant> {
        self.start
    }

    /// Recorded duration, zero until the worker completes
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Recorded duration, or time elapsed since start if still running
    pub fn elapsed(&self, now: Instant) -> Duration {
        match (self.duration.is_zero(), self.start) {
            (true, Some(start)) => now.saturating_duration_since(start),
            _ => self.duration,
        }
    }

    /// Absolute deadline while running
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Effective timeout behind the current deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Entries added with `report_add`
    pub fn report(&self) -> &RecordVec<String> {
        &self.report
    }

    /// Why the test was skipped
    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// Deferred failures recorded by the test
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    fn transition(&mut self, to: TestState) -> HarnessResult<()> {
        if !self.state.can_become(to) {
            return Err(HarnessError::InvalidTransition {
                name: self.name.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Mark skipped with a reason (filtered, or skipped by the test)
    pub fn skip(&mut self, reason: &str) -> HarnessResult<()> {
        self.transition(TestState::Skipped)?;
        self.skip_reason = Some(reason.to_string());
        Ok(())
    }

    /// Launch: `Running` with `deadline = now + timeout`
    pub fn launch(&mut self, now: Instant, timeout: Duration) -> HarnessResult<()> {
        self.transition(TestState::Running)?;
        self.start = Some(now);
        self.set_deadline(now, timeout);
        Ok(())
    }

    /// Move the deadline; `timeout` is already scaled
    ///
    /// A timeout too large to represent as an instant leaves the test
    /// without a deadline.
    pub fn set_deadline(&mut self, now: Instant, timeout: Duration) {
        self.timeout = timeout;
        self.deadline = now.checked_add(timeout);
    }

    /// True if running past the deadline at `now`
    pub fn is_overdue(&self, now: Instant) -> bool {
        self.state == TestState::Running && self.deadline.map_or(false, |d| now > d)
    }

    /// Mark a running test failed (timeout, launch failure)
    pub fn fail(&mut self) -> HarnessResult<()> {
        self.transition(TestState::Failed)
    }

    /// Record the worker's outcome
    ///
    /// A test that skipped itself stays `Skipped` and one already failed by
    /// a timeout stays `Failed`. Otherwise the test passes only if it
    /// returned success and recorded no deferred failure.
    pub fn complete(&mut self, duration: Duration, succeeded: bool) -> TestState {
        self.duration = duration;
        if self.state == TestState::Running {
            let to = if succeeded && self.failures.is_empty() {
                TestState::Passed
            } else {
                TestState::Failed
            };
            self.state = to;
        }
        self.state
    }

    /// Record a deferred failure
    pub fn add_failure(&mut self, reason: String) {
        self.failures.push(reason);
    }

    /// Append a report entry
    pub fn add_report(&mut self, entry: String) -> usize {
        self.report.push(entry);
        self.report.len() - 1
    }

    /// Set the `<MAIN>` duration
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    /// Teardown failure of the `<MAIN>` pseudo run
    pub fn fail_main(&mut self, reason: String) {
        self.state = TestState::Failed;
        self.failures.push(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(TestState::NotStarted.to_string(), "DNS");
        assert_eq!(TestState::Skipped.to_string(), "SKIPPED");
        assert_eq!(TestState::Running.to_string(), "RUNNING");
        assert_eq!(TestState::Passed.to_string(), "PASSED");
        assert_eq!(TestState::Failed.to_string(), "FAILED");
        assert_eq!(
            serde_json::to_string(&TestState::NotStarted).unwrap(),
            "\"DNS\""
        );
    }

    #[test]
    fn test_launch_then_pass() {
        let now = Instant::now();
        let mut run = TestRunState::new("0001_a");
        run.launch(now, Duration::from_secs(20)).unwrap();
        assert_eq!(run.state(), TestState::Running);
        assert_eq!(run.deadline(), Some(now + Duration::from_secs(20)));

        let state = run.complete(Duration::from_millis(5), true);
        assert_eq!(state, TestState::Passed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_unrepresentable_deadline_never_expires() {
        let now = Instant::now();
        let mut run = TestRunState::new("0001_a");
        run.launch(now, Duration::MAX).unwrap();
        assert_eq!(run.deadline(), None);
        assert!(!run.is_overdue(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_deferred_failure_fails_on_success_return() {
        let mut run = TestRunState::new("0001_a");
        run.launch(Instant::now(), Duration::from_secs(1)).unwrap();
        run.add_failure("late".to_string());
        assert_eq!(run.complete(Duration::ZERO, true), TestState::Failed);
    }

    #[test]
    fn test_internal_skip_survives_completion() {
        let mut run = TestRunState::new("0001_a");
        run.launch(Instant::now(), Duration::from_secs(1)).unwrap();
        run.skip("no broker").unwrap();
        assert_eq!(run.complete(Duration::ZERO, true), TestState::Skipped);
        assert_eq!(run.skip_reason(), Some("no broker"));
    }

    #[test]
    fn test_timeout_wins_over_late_completion() {
        let mut run = TestRunState::new("0001_a");
        run.launch(Instant::now(), Duration::ZERO).unwrap();
        run.fail().unwrap();
        assert_eq!(run.complete(Duration::from_secs(3), true), TestState::Failed);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut run = TestRunState::new("0001_a");
        run.skip("filtered").unwrap();
        assert!(run.launch(Instant::now(), Duration::ZERO).is_err());
        assert!(run.fail().is_err());
        assert!(matches!(
            run.skip("again"),
            Err(HarnessError::InvalidTransition {
                from: TestState::Skipped,
                to: TestState::Skipped,
                ..
            })
        ));
    }

    #[test]
    fn test_not_started_cannot_finish() {
        let mut run = TestRunState::new("0001_a");
        assert!(run.fail().is_err());
        assert_eq!(run.complete(Duration::ZERO, true), TestState::NotStarted);
    }

    #[test]
    fn test_overdue_only_while_running() {
        let now = Instant::now();
        let mut run = TestRunState::new("0001_a");
        run.launch(now, Duration::from_millis(10)).unwrap();
        assert!(!run.is_overdue(now));
        assert!(run.is_overdue(now + Duration::from_millis(11)));
        run.complete(Duration::ZERO, true);
        assert!(!run.is_overdue(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_main_starts_passed() {
        let now = Instant::now();
        let mut main = TestRunState::main(now);
        assert_eq!(main.name(), "<MAIN>");
        assert_eq!(main.state(), TestState::Passed);
        main.fail_main("threads leaked".to_string());
        assert_eq!(main.state(), TestState::Failed);
        assert_eq!(main.failures(), &["threads leaked".to_string()]);
    }

    #[test]
    fn test_report_entries_are_indexed() {
        let mut run = TestRunState::new("0001_a");
        assert_eq!(run.add_report("{\"a\": 1}".to_string()), 0);
        assert_eq!(run.add_report("{\"b\": 2}".to_string()), 1);
        assert_eq!(run.report().len(), 2);
    }
}
