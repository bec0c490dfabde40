//! Concurrent test scheduler
//!
//! Tests are launched in registry order, each on its own named thread, with
//! at most `concurrency` running at once. One lock guards every run state
//! and the running count; a condition variable paired with it wakes the
//! scheduler whenever a worker finishes.
//!
//! The scheduler never sleeps longer than the poll interval. On every wake
//! it checks deadlines: a test running past its deadline is marked failed
//! and [`Harness::run`] returns [`HarnessError::TestTimedOut`] without
//! waiting for the others. With assert-on-failure enabled the same happens
//! as soon as any test has failed.
//!
//! An interrupt stops further launches. Tests already running finish (their
//! deadlines still apply) and tests never launched stay `DNS`.

use crate::client::{wait_teardown, MessagingClient};
use crate::config::HarnessConfig;
use crate::context::TestContext;
use crate::error::{HarnessError, HarnessResult};
use crate::registry::{eligibility, Eligibility, RunFilter, TestDescriptor, TestFn, TestRegistry};
use crate::report::{RunSummary, TestReport};
use crate::shutdown::ShutdownSignal;
use crate::state::{TestRunState, TestState};
use crate::stats::StatsSink;
use chrono::{DateTime, Local};
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Waits between "postponing" messages while the concurrency cap is reached
const POSTPONE_LOG_EVERY: u64 = 10;

/// State shared by the scheduler and every worker
pub(crate) struct Shared {
    pub(crate) table: Mutex<RunTable>,
    pub(crate) changed: Condvar,
    pub(crate) rng: Mutex<StdRng>,
}

/// Everything guarded by the run lock
pub(crate) struct RunTable {
    pub(crate) main: TestRunState,
    pub(crate) runs: Vec<TestRunState>,
    pub(crate) running: usize,
    pub(crate) peak_running: usize,
    pub(crate) timeout_multiplier: f64,
}

impl RunTable {
    /// `timeout * multiplier`, saturating at `Duration::MAX`
    pub(crate) fn scale(&self, timeout: Duration) -> Duration {
        Duration::try_from_secs_f64(timeout.as_secs_f64() * self.timeout_multiplier)
            .unwrap_or(Duration::MAX)
    }
}

/// Releases a worker's running slot and wakes the scheduler on drop, also
/// when the test body panicked
struct RunningSlotGuard<'a> {
    shared: &'a Shared,
}

impl Drop for RunningSlotGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.shared.table.lock();
        table.running = table.running.saturating_sub(1);
        self.shared.changed.notify_all();
    }
}

/// Runs a registry of tests and produces the run summary
pub struct Harness {
    registry: TestRegistry,
    config: Arc<HarnessConfig>,
    filter: RunFilter,
    shared: Arc<Shared>,
    shutdown: ShutdownSignal,
    client: Option<Arc<dyn MessagingClient>>,
    seed: u64,
    instance: u64,
    started_at: DateTime<Local>,
    started: Instant,
}

impl Harness {
    /// Harness over `registry`
    ///
    /// # Errors
    /// Returns `HarnessError::Core` if `config` does not validate.
    pub fn new(registry: TestRegistry, config: HarnessConfig) -> HarnessResult<Self> {
        config.validate()?;
        let filter = RunFilter {
            selection: config.tests.clone(),
            required: config.required_flags,
            excluded: config.excluded_flags,
            broker_version: Some(config.target_broker_version()?),
        };

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = StdRng::seed_from_u64(seed);
        let instance = rng.gen();
        info!(target: "streamcheck::scheduler", "Random seed: {}", seed);

        let started = Instant::now();
        let table = RunTable {
            main: TestRunState::main(started),
            runs: registry.iter().map(|t| TestRunState::new(t.name())).collect(),
            running: 0,
            peak_running: 0,
            timeout_multiplier: config.effective_multiplier(),
        };

        Ok(Harness {
            registry,
            config: Arc::new(config),
            filter,
            shared: Arc::new(Shared {
                table: Mutex::new(table),
                changed: Condvar::new(),
                rng: Mutex::new(rng),
            }),
            shutdown: ShutdownSignal::new(),
            client: None,
            seed,
            instance,
            started_at: Local::now(),
            started,
        })
    }

    /// Client whose teardown [`wait_exit`](Self::wait_exit) checks
    pub fn with_client(mut self, client: Arc<dyn MessagingClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use `signal` for interrupts instead of a private one
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    /// Handle for delivering interrupts
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Configuration in effect
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Registered tests
    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Filter built from the configuration
    pub fn filter(&self) -> &RunFilter {
        &self.filter
    }

    /// Seed of the run's random source
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Most tests that were running at the same time
    pub fn peak_running(&self) -> usize {
        self.shared.table.lock().peak_running
    }

    /// Current state of a test
    pub fn state_of(&self, name: &str) -> Option<TestState> {
        let index = self.registry.iter().position(|t| t.name() == name)?;
        Some(self.shared.table.lock().runs[index].state())
    }

    /// Run every registered test and wait for the launched ones
    ///
    /// Call once per harness; a second call finds every run state past
    /// `DNS` and fails with `InvalidTransition`.
    ///
    /// # Errors
    /// Returns a fatal error (timeout, assert-on-failure, thread start
    /// failure) as soon as it is detected. Workers still running are not
    /// joined; [`summary`](Self::summary) still reports their state.
    pub fn run(&self) -> HarnessResult<RunSummary> {
        self.log_header();

        let mut workers = Vec::new();
        for (index, test) in self.registry.iter().enumerate() {
            if self.shutdown.is_requested() {
                info!(target: "streamcheck::scheduler", "Interrupted: not starting {}", test.name());
                break;
            }

            if let Eligibility::Skip(reason) = eligibility(test, &self.filter) {
                info!(
                    target: "streamcheck::scheduler",
                    "Skipping test {}: {}",
                    test.name(),
                    reason
                );
                self.shared.table.lock().runs[index].skip(&reason)?;
                continue;
            }

            if !self.admit(index)? {
                info!(target: "streamcheck::scheduler", "Interrupted: not starting {}", test.name());
                break;
            }
            workers.push(self.launch(index, test)?);
        }

        self.supervise()?;

        for worker in workers {
            if worker.join().is_err() {
                warn!(target: "streamcheck::scheduler", "Test thread exited abnormally");
            }
        }

        let elapsed = self.started.elapsed();
        self.shared.table.lock().main.set_duration(elapsed);
        Ok(self.summary())
    }

    /// Snapshot of every run state
    pub fn summary(&self) -> RunSummary {
        let now = Instant::now();
        let table = self.shared.table.lock();
        let main = TestReport::from_run(&table.main, false, None, now);
        let tests = self
            .registry
            .iter()
            .zip(table.runs.iter())
            .map(|(test, run)| TestReport::from_run(run, test.is_known_issue(), test.extra(), now))
            .collect();
        RunSummary::new(&self.config.mode, self.started_at, main, tests)
    }

    /// Wait up to `timeout` for the messaging client to shut down
    ///
    /// Returns false, and marks `<MAIN>` failed, if client threads or
    /// objects remain. Without a client there is nothing to wait for.
    pub fn wait_exit(&self, timeout: Duration) -> bool {
        let client = match &self.client {
            Some(client) => client,
            None => return true,
        };

        let failures = wait_teardown(client.as_ref(), timeout, self.config.poll_interval());
        if failures.is_empty() {
            return true;
        }

        let mut table = self.shared.table.lock();
        for failure in failures {
            error!(target: "streamcheck::scheduler", "{}", failure);
            table.main.fail_main(failure);
        }
        false
    }

    fn log_header(&self) {
        let cfg = &self.config;
        info!(
            target: "streamcheck::scheduler",
            "Tests to run: {}",
            cfg.tests.as_deref().unwrap_or("all")
        );
        info!(target: "streamcheck::scheduler", "Test mode: {}", cfg.mode);
        info!(
            target: "streamcheck::scheduler",
            "Test filter: required {}, excluded {}, broker version {}",
            cfg.required_flags,
            cfg.excluded_flags,
            cfg.broker_version
        );
        info!(
            target: "streamcheck::scheduler",
            "Test timeout multiplier: {:.1}",
            cfg.effective_multiplier()
        );
        info!(
            target: "streamcheck::scheduler",
            "Action on test failure: {}",
            if cfg.assert_on_fail { "assert crash" } else { "continue other tests" }
        );
    }

    /// Wait for a free slot, then mark test `index` running
    ///
    /// Returns `Ok(false)` if interrupted while waiting.
    fn admit(&self, index: usize) -> HarnessResult<bool> {
        let cap = self.config.concurrency;
        let poll = self.config.poll_interval();
        let mut table = self.shared.table.lock();

        let mut waits: u64 = 0;
        while table.running >= cap {
            if self.shutdown.is_requested() {
                return Ok(false);
            }
            if waits % POSTPONE_LOG_EVERY == 0 {
                info!(
                    target: "streamcheck::scheduler",
                    "Too many tests running ({} >= {}): postponing {} start...",
                    table.running,
                    cap,
                    table.runs[index].name()
                );
            }
            waits += 1;
            self.shared.changed.wait_for(&mut table, poll);
            check_fatal(&mut table, self.config.assert_on_fail, Instant::now())?;
        }

        if self.shutdown.is_requested() {
            return Ok(false);
        }
        check_fatal(&mut table, self.config.assert_on_fail, Instant::now())?;

        let timeout = table.scale(self.config.test_timeout());
        table.runs[index].launch(Instant::now(), timeout)?;
        table.running += 1;
        table.peak_running = table.peak_running.max(table.running);
        Ok(true)
    }

    fn launch(&self, index: usize, test: &TestDescriptor) -> HarnessResult<JoinHandle<()>> {
        let stats = StatsSink::new(self.config.stats_dir.as_deref(), test.name(), self.instance);
        let ctx = TestContext::new(
            test.name(),
            index,
            Arc::clone(&self.shared),
            Arc::clone(&self.config),
            stats,
        );
        let shared = Arc::clone(&self.shared);
        let entry = Arc::clone(test.entry());

        std::thread::Builder::new()
            .name(format!("test-{}", test.number()))
            .spawn(move || run_worker(&shared, index, &entry, &ctx))
            .map_err(|source| {
                let mut table = self.shared.table.lock();
                table.running = table.running.saturating_sub(1);
                let run = &mut table.runs[index];
                run.add_failure(format!("Failed to start thread: {}", source));
                if let Err(e) = run.fail() {
                    debug!(target: "streamcheck::scheduler", "{}", e);
                }
                self.shared.changed.notify_all();
                HarnessError::Spawn {
                    name: test.name().to_string(),
                    source,
                }
            })
    }

    /// Wait for every running test, checking deadlines on each wake
    fn supervise(&self) -> HarnessResult<()> {
        let poll = self.config.poll_interval();
        let mut table = self.shared.table.lock();
        let mut announced = false;

        loop {
            check_fatal(&mut table, self.config.assert_on_fail, Instant::now())?;
            if table.running == 0 {
                return Ok(());
            }

            if self.shutdown.is_requested() && !announced {
                info!(
                    target: "streamcheck::scheduler",
                    "Exiting tests, waiting for running tests to finish."
                );
                announced = true;
            }

            let running: Vec<&str> = table
                .runs
                .iter()
                .filter(|r| r.state() == TestState::Running)
                .map(|r| r.name())
                .collect();
            debug!(
                target: "streamcheck::scheduler",
                "{} test(s) running: {}",
                table.running,
                running.join(" ")
            );

            self.shared.changed.wait_for(&mut table, poll);
        }
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("tests", &self.registry.len())
            .field("filter", &self.filter)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// Fail the first overdue test, or report an existing failure when
/// assert-on-failure is on
fn check_fatal(table: &mut RunTable, assert_on_fail: bool, now: Instant) -> HarnessResult<()> {
    if let Some(run) = table.runs.iter_mut().find(|r| r.is_overdue(now)) {
        let name = run.name().to_string();
        let timeout = run.timeout();
        run.fail()?;
        let err = HarnessError::TestTimedOut { name, timeout };
        run.add_failure(err.to_string());
        error!(target: "streamcheck::scheduler", "{}", err);
        return Err(err);
    }

    if assert_on_fail {
        if let Some(run) = table.runs.iter().find(|r| r.state() == TestState::Failed) {
            error!(
                target: "streamcheck::scheduler",
                "Test {} failed: aborting on failure",
                run.name()
            );
            return Err(HarnessError::AssertOnFail {
                name: run.name().to_string(),
            });
        }
    }
    Ok(())
}

fn run_worker(shared: &Shared, index: usize, entry: &TestFn, ctx: &TestContext) {
    let _slot = RunningSlotGuard { shared };
    let name = ctx.name();

    info!(
        target: "streamcheck::scheduler",
        "================= Running test {} =================",
        name
    );

    let started = Instant::now();
    let failure = match catch_unwind(AssertUnwindSafe(|| (**entry)(ctx))) {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(format!("test panicked: {}", panic_message(payload.as_ref()))),
    };
    let duration = started.elapsed();

    let state = {
        let mut table = shared.table.lock();
        let run = &mut table.runs[index];
        if let Some(reason) = &failure {
            run.add_failure(reason.clone());
        }
        run.complete(duration, failure.is_none())
    };

    match state {
        TestState::Passed => info!(
            target: "streamcheck::scheduler",
            "================= Test {} PASSED ({:.3}s) =================",
            name,
            duration.as_secs_f64()
        ),
        TestState::Skipped => info!(
            target: "streamcheck::scheduler",
            "================= Test {} SKIPPED =================",
            name
        ),
        _ => error!(
            target: "streamcheck::scheduler",
            "================= Test {} FAILED: {} =================",
            name,
            failure.as_deref().unwrap_or("deferred failure")
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("(non-string panic)")
}
