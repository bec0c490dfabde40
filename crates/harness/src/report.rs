//! Run summary and machine-readable report
//!
//! The summary lists `<MAIN>` first. `<MAIN>` carries the total run time and
//! teardown failures but is not counted as a test. A test still `RUNNING`
//! when the summary is taken counts as failed.

use crate::error::{HarnessError, HarnessResult};
use crate::state::{TestRunState, TestState};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

const C_CLR: &str = "\x1b[0m";
const C_RED: &str = "\x1b[31m";
const C_GRN: &str = "\x1b[32m";
const C_YEL: &str = "\x1b[33m";
const C_MAG: &str = "\x1b[35m";
const C_CYA: &str = "\x1b[36m";

const RULE: &str = "#==================================================================#";

/// One test in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Test name
    pub name: String,
    /// Final (or current) state
    pub state: TestState,
    /// Failures are expected
    pub known_issue: bool,
    /// Descriptor annotation
    pub extra: String,
    /// Duration in seconds
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    /// Entries added by the test
    pub report: Vec<Value>,
    /// Why the test was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Recorded failures
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl TestReport {
    /// Snapshot of a run state at `now`
    pub fn from_run(
        run: &TestRunState,
        known_issue: bool,
        extra: Option<&str>,
        now: Instant,
    ) -> Self {
        TestReport {
            name: run.name().to_string(),
            state: run.state(),
            known_issue,
            extra: extra.unwrap_or_default().to_string(),
            duration_secs: run.elapsed(now).as_secs_f64(),
            report: run
                .report()
                .iter()
                .map(|entry| {
                    serde_json::from_str(entry).unwrap_or_else(|_| Value::String(entry.clone()))
                })
                .collect(),
            skip_reason: run.skip_reason().map(str::to_string),
            failures: run.failures().to_vec(),
        }
    }

    fn color(&self) -> &'static str {
        match self.state {
            TestState::Passed => C_GRN,
            TestState::Failed => C_RED,
            TestState::Running => C_MAG,
            TestState::NotStarted => C_YEL,
            TestState::Skipped => C_CYA,
        }
    }

    fn annotation(&self) -> String {
        if self.state == TestState::Failed && self.known_issue {
            if self.extra.is_empty() {
                " <-- known issue".to_string()
            } else {
                format!(" <-- known issue: {}", self.extra)
            }
        } else {
            String::new()
        }
    }
}

/// Whole-run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// `<date>_<mode>`
    pub id: String,
    /// Run mode
    pub mode: String,
    /// `%Y%m%d%H%M%S` of the run start
    pub date: String,
    /// `<MAIN>` first, then every registered test in order
    pub tests: Vec<TestReport>,
    /// Tests that ran (passed, failed or still running)
    pub tests_run: usize,
    /// Tests that passed
    pub tests_passed: usize,
    /// Tests that failed, including still running ones
    pub tests_failed: usize,
    /// Failed tests flagged as known issues
    pub tests_failed_known: usize,
    /// Total run time in seconds
    #[serde(rename = "duration")]
    pub duration_secs: f64,
}

impl RunSummary {
    /// Count `tests`; `main` accounts the total duration only
    pub fn new(mode: &str, started: DateTime<Local>, main: TestReport, tests: Vec<TestReport>) -> Self {
        let date = started.format("%Y%m%d%H%M%S").to_string();
        let mut summary = RunSummary {
            id: format!("{}_{}", date, mode),
            mode: mode.to_string(),
            date,
            tests: Vec::with_capacity(tests.len() + 1),
            tests_run: 0,
            tests_passed: 0,
            tests_failed: 0,
            tests_failed_known: 0,
            duration_secs: main.duration_secs,
        };

        for test in &tests {
            match test.state {
                TestState::Passed => {
                    summary.tests_passed += 1;
                    summary.tests_run += 1;
                }
                TestState::Failed => {
                    if test.known_issue {
                        summary.tests_failed_known += 1;
                    }
                    summary.tests_failed += 1;
                    summary.tests_run += 1;
                }
                TestState::Running => {
                    summary.tests_failed += 1;
                    summary.tests_run += 1;
                }
                TestState::NotStarted | TestState::Skipped => {}
            }
        }

        summary.tests.push(main);
        summary.tests.extend(tests);
        summary
    }

    /// The `<MAIN>` entry
    pub fn main(&self) -> Option<&TestReport> {
        self.tests.first()
    }

    /// Entry by test name
    pub fn test(&self, name: &str) -> Option<&TestReport> {
        self.tests.iter().find(|t| t.name == name)
    }

    /// True if teardown marked `<MAIN>` failed
    pub fn main_failed(&self) -> bool {
        self.main().map_or(false, |m| m.state == TestState::Failed)
    }

    /// Failed tests not flagged as known issues, plus one for a failed
    /// `<MAIN>`
    pub fn exit_code(&self) -> i32 {
        let unexpected = self.tests_failed - self.tests_failed_known;
        unexpected as i32 + i32::from(self.main_failed())
    }

    /// Status table, optionally with ANSI colors
    pub fn render(&self, colored: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "TEST {} ({}) SUMMARY", self.date, self.mode);
        let _ = writeln!(out, "{}", RULE);
        for test in &self.tests {
            let (color, clear) = if colored { (test.color(), C_CLR) } else { ("", "") };
            let _ = writeln!(
                out,
                "|{} {:<40} | {:>10} | {:7.3}s {}|{}",
                color,
                test.name,
                test.state.name(),
                test.duration_secs,
                clear,
                test.annotation()
            );
        }
        let _ = writeln!(out, "{}", RULE);
        out
    }

    /// Default report path `test_report_<date>.json`
    pub fn default_report_path(&self) -> PathBuf {
        PathBuf::from(format!("test_report_{}.json", self.date))
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> HarnessResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| HarnessError::Report(e.to_string()))
    }

    /// Write the JSON report to `path`
    pub fn write_json(&self, path: &Path) -> HarnessResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| {
            HarnessError::Report(format!(
                "Failed to create report file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    fn report(name: &str, state: TestState, known_issue: bool) -> TestReport {
        TestReport {
            name: name.to_string(),
            state,
            known_issue,
            extra: String::new(),
            duration_secs: 1.5,
            report: Vec::new(),
            skip_reason: None,
            failures: Vec::new(),
        }
    }

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2016, 5, 4, 12, 30, 0).unwrap()
    }

    fn summary(main_state: TestState, tests: Vec<TestReport>) -> RunSummary {
        RunSummary::new("bare", started(), report("<MAIN>", main_state, false), tests)
    }

    #[test]
    fn test_counts_and_exit_code() {
        let s = summary(
            TestState::Passed,
            vec![
                report("0001_a", TestState::Passed, false),
                report("0002_b", TestState::Failed, false),
                report("0003_c", TestState::Failed, true),
                report("0004_d", TestState::Running, false),
                report("0005_e", TestState::Skipped, false),
                report("0006_f", TestState::NotStarted, false),
            ],
        );
        assert_eq!(s.tests_run, 4);
        assert_eq!(s.tests_passed, 1);
        assert_eq!(s.tests_failed, 3);
        assert_eq!(s.tests_failed_known, 1);
        assert_eq!(s.exit_code(), 2);
        assert_eq!(s.tests.len(), 7);
        assert_eq!(s.id, "20160504123000_bare");
    }

    #[test]
    fn test_main_is_not_counted_but_fails_exit_code() {
        let s = summary(TestState::Failed, vec![report("0001_a", TestState::Passed, false)]);
        assert_eq!(s.tests_run, 1);
        assert_eq!(s.tests_failed, 0);
        assert!(s.main_failed());
        assert_eq!(s.exit_code(), 1);
        assert_eq!(s.duration_secs, 1.5);
    }

    #[test]
    fn test_all_passed_exit_zero() {
        let s = summary(TestState::Passed, vec![report("0001_a", TestState::Passed, false)]);
        assert_eq!(s.exit_code(), 0);
    }

    #[test]
    fn test_render_marks_known_issues() {
        let mut known = report("0003_c", TestState::Failed, true);
        known.extra = "flaky on CI".to_string();
        let s = summary(TestState::Passed, vec![known]);

        let plain = s.render(false);
        assert!(plain.starts_with("TEST 20160504123000 (bare) SUMMARY\n"));
        assert!(plain.contains("| 0003_c"));
        assert!(plain.contains("FAILED"));
        assert!(plain.contains("<-- known issue: flaky on CI"));
        assert!(!plain.contains('\x1b'));

        let colored = s.render(true);
        assert!(colored.contains(C_RED));
        assert!(colored.contains(C_GRN));
    }

    #[test]
    fn test_report_entries_keep_json() {
        let mut run = TestRunState::new("0001_a");
        run.add_report("{\"msgs\": 10}".to_string());
        run.add_report("free text".to_string());
        run.launch(Instant::now(), Duration::from_secs(1)).unwrap();
        run.complete(Duration::from_millis(250), true);

        let r = TestReport::from_run(&run, false, None, Instant::now());
        assert_eq!(r.report[0]["msgs"], 10);
        assert_eq!(r.report[1], Value::String("free text".to_string()));
        assert_eq!(r.duration_secs, 0.25);
        assert_eq!(r.state, TestState::Passed);
    }

    #[test]
    fn test_write_json_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let s = summary(
            TestState::Passed,
            vec![report("0001_a", TestState::Skipped, false)],
        );
        s.write_json(&path).unwrap();

        let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["id"], "20160504123000_bare");
        assert_eq!(value["tests"][0]["name"], "<MAIN>");
        assert_eq!(value["tests"][1]["state"], "SKIPPED");
        assert_eq!(value["tests_run"], 0);
        assert!(value["duration"].is_number());

        let back: RunSummary = serde_json::from_value(value).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_write_json_to_missing_dir_is_report_error() {
        let dir = TempDir::new().unwrap();
        let s = summary(TestState::Passed, vec![]);
        let err = s.write_json(&dir.path().join("no").join("such.json"));
        assert!(matches!(err, Err(HarnessError::Report(_))));
    }

    #[test]
    fn test_default_report_path() {
        let s = summary(TestState::Passed, vec![]);
        assert_eq!(
            s.default_report_path(),
            PathBuf::from("test_report_20160504123000.json")
        );
    }
}
