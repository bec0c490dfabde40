//! What a running test sees of the harness

use crate::client::ClientError;
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::scheduler::Shared;
use crate::stats::StatsSink;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamcheck_core::{Error, RunId};
use streamcheck_verifier::MessageVerifier;
use thiserror::Error;
use tracing::{debug, error, info};

/// Result of a test body
pub type TestResult = std::result::Result<(), TestFailure>;

/// Why a test body gave up
///
/// Returning `Err` fails the test immediately. Failures that should not stop
/// the test (so cleanup still runs) go through [`TestContext::fail_later`].
#[derive(Debug, Error)]
pub enum TestFailure {
    /// Assertion made by the test itself
    #[error("{0}")]
    Failed(String),

    /// Verification or payload error
    #[error(transparent)]
    Core(#[from] Error),

    /// Messaging client error
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Harness service error (statistics file, report)
    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl TestFailure {
    /// Failure with a message
    pub fn new(msg: impl Into<String>) -> Self {
        TestFailure::Failed(msg.into())
    }
}

/// Handle passed to every test body
///
/// Gives access to the test's run state (timeout, report entries, deferred
/// failures, skipping) and to run-wide settings.
pub struct TestContext {
    name: String,
    index: usize,
    shared: Arc<Shared>,
    config: Arc<HarnessConfig>,
    stats: StatsSink,
}

impl TestContext {
    pub(crate) fn new(
        name: &str,
        index: usize,
        shared: Arc<Shared>,
        config: Arc<HarnessConfig>,
        stats: StatsSink,
    ) -> Self {
        TestContext {
            name: name.to_string(),
            index,
            shared,
            config,
            stats,
        }
    }

    /// Test name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run-wide configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Per-test statistics sink
    pub fn stats(&self) -> &StatsSink {
        &self.stats
    }

    /// Replace the deadline with `now + timeout * multiplier`
    pub fn set_timeout(&self, timeout: Duration) {
        let mut table = self.shared.table.lock();
        info!(
            target: "streamcheck::scheduler",
            "{}: Setting test timeout to {}s * {:.1}",
            self.name,
            timeout.as_secs_f64(),
            table.timeout_multiplier
        );
        let scaled = table.scale(timeout);
        table.runs[self.index].set_deadline(Instant::now(), scaled);
    }

    /// Add an entry to this test's report; JSON objects are kept as JSON
    pub fn report_add(&self, entry: impl Into<String>) {
        let entry = entry.into();
        let index = self.shared.table.lock().runs[self.index].add_report(entry.clone());
        debug!(
            target: "streamcheck::scheduler",
            "{}: Report #{}: {}",
            self.name,
            index,
            entry
        );
    }

    /// Record a failure without stopping the test
    pub fn fail_later(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(target: "streamcheck::scheduler", "{}: {}", self.name, reason);
        self.shared.table.lock().runs[self.index].add_failure(reason);
    }

    /// Mark the test skipped; return the result from the test body
    pub fn skip(&self, reason: &str) -> TestResult {
        info!(
            target: "streamcheck::scheduler",
            "{}: skipping: {}",
            self.name,
            reason
        );
        if let Err(e) = self.shared.table.lock().runs[self.index].skip(reason) {
            debug!(target: "streamcheck::scheduler", "{}", e);
        }
        Ok(())
    }

    /// Fresh run id from the run's random source
    pub fn new_run_id(&self) -> RunId {
        RunId::from_raw(self.shared.rng.lock().gen())
    }

    /// Verifier for `run_id` at the configured verbosity
    pub fn verifier(&self, run_id: RunId) -> MessageVerifier {
        MessageVerifier::with_verbosity(run_id, self.config.verbosity)
    }

    /// `<prefix>_<suffix>`, or `<prefix>_rnd<hex>_<suffix>` when randomized
    pub fn topic_name(&self, suffix: &str, randomized: bool) -> String {
        let topic = if self.config.topic_random || randomized {
            let rnd: u64 = self.shared.rng.lock().gen();
            format!("{}_rnd{:x}_{}", self.config.topic_prefix, rnd, suffix)
        } else {
            format!("{}_{}", self.config.topic_prefix, suffix)
        };
        info!(target: "streamcheck::scheduler", "{}: Using topic \"{}\"", self.name, topic);
        topic
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("name", &self.name)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
