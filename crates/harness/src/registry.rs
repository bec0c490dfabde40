//! Test descriptors and eligibility filtering
//!
//! Tests are named `NNNN_description`; the part before the first `_` is the
//! test number that run selections match against.

use crate::context::{TestContext, TestResult};
use std::fmt;
use std::sync::Arc;
use streamcheck_core::{BrokerVersion, TestFlags};

/// Test entry point
pub type TestFn = Arc<dyn Fn(&TestContext) -> TestResult + Send + Sync>;

/// Static description of one test
#[derive(Clone)]
pub struct TestDescriptor {
    name: String,
    entry: TestFn,
    flags: TestFlags,
    min_version: Option<BrokerVersion>,
    max_version: Option<BrokerVersion>,
    extra: Option<String>,
}

impl TestDescriptor {
    /// Descriptor with no flags and no version bounds
    pub fn new<F>(name: &str, entry: F) -> Self
    where
        F: Fn(&TestContext) -> TestResult + Send + Sync + 'static,
    {
        TestDescriptor {
            name: name.to_string(),
            entry: Arc::new(entry),
            flags: TestFlags::NONE,
            min_version: None,
            max_version: None,
            extra: None,
        }
    }

    /// Set capability flags
    pub fn with_flags(mut self, flags: TestFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Lowest applicable broker version (inclusive)
    pub fn with_min_version(mut self, version: BrokerVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Highest applicable broker version (inclusive)
    pub fn with_max_version(mut self, version: BrokerVersion) -> Self {
        self.max_version = Some(version);
        self
    }

    /// Free-text annotation, shown next to known issues
    pub fn with_extra(mut self, extra: &str) -> Self {
        self.extra = Some(extra.to_string());
        self
    }

    /// Full test name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Test number: the name up to the first `_`
    pub fn number(&self) -> &str {
        test_number(&self.name)
    }

    /// Entry point
    pub fn entry(&self) -> &TestFn {
        &self.entry
    }

    /// Capability flags
    pub fn flags(&self) -> TestFlags {
        self.flags
    }

    /// Lowest applicable broker version
    pub fn min_version(&self) -> Option<BrokerVersion> {
        self.min_version
    }

    /// Highest applicable broker version
    pub fn max_version(&self) -> Option<BrokerVersion> {
        self.max_version
    }

    /// Annotation
    pub fn extra(&self) -> Option<&str> {
        self.extra.as_deref()
    }

    /// True if failures of this test are expected
    pub fn is_known_issue(&self) -> bool {
        self.flags.contains(TestFlags::KNOWN_ISSUE)
    }
}

impl fmt::Debug for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDescriptor")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

/// Name up to the first `_`, or the whole name
pub fn test_number(name: &str) -> &str {
    name.split('_').next().unwrap_or(name)
}

/// What the run was asked to include
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    /// Run selection; tests whose number it matches run
    pub selection: Option<String>,
    /// Flags a test must carry
    pub required: TestFlags,
    /// Flags a test must not carry
    pub excluded: TestFlags,
    /// Target broker version
    pub broker_version: Option<BrokerVersion>,
}

/// Outcome of the eligibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Launch the test
    Run,
    /// Mark the test skipped with this reason
    Skip(String),
}

/// Decide whether `test` runs under `filter`
///
/// Predicates are checked in order (required flags, excluded flags, broker
/// version, selection) and the first failing one gives the skip reason.
pub fn eligibility(test: &TestDescriptor, filter: &RunFilter) -> Eligibility {
    let flags = test.flags();

    if !filter.required.is_empty() && !flags.contains(filter.required) {
        return Eligibility::Skip("filtered due to test flags".to_string());
    }

    if flags.intersects(filter.excluded) {
        return Eligibility::Skip("filtered due to negative test flags".to_string());
    }

    if let Some(target) = filter.broker_version {
        let too_old = test.min_version().map_or(false, |min| target < min);
        let too_new = test.max_version().map_or(false, |max| max < target);
        if too_old || too_new {
            return Eligibility::Skip(format!(
                "not applicable for broker version {}",
                target
            ));
        }
    }

    if let Some(selection) = filter.selection.as_deref() {
        let number = test.number();
        if !selection.contains(number) && !number.contains(selection) {
            return Eligibility::Skip("not included in test selection".to_string());
        }
    }

    Eligibility::Run
}

/// Ordered table of tests
#[derive(Debug, Clone, Default)]
pub struct TestRegistry {
    tests: Vec<TestDescriptor>,
}

impl TestRegistry {
    /// Registry over `tests`, in run order
    pub fn new(tests: Vec<TestDescriptor>) -> Self {
        TestRegistry { tests }
    }

    /// Descriptors in run order
    pub fn iter(&self) -> std::slice::Iter<'_, TestDescriptor> {
        self.tests.iter()
    }

    /// Descriptor by full name
    pub fn get(&self, name: &str) -> Option<&TestDescriptor> {
        self.tests.iter().find(|t| t.name == name)
    }

    /// Descriptor by position
    pub fn at(&self, index: usize) -> Option<&TestDescriptor> {
        self.tests.get(index)
    }

    /// Number of tests
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// True if there are no tests
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> TestDescriptor {
        TestDescriptor::new(name, |_| Ok(()))
    }

    fn skip_reason(e: Eligibility) -> String {
        match e {
            Eligibility::Skip(reason) => reason,
            Eligibility::Run => panic!("expected skip"),
        }
    }

    #[test]
    fn test_number_is_prefix() {
        assert_eq!(test_number("0033_regex_subscribe"), "0033");
        assert_eq!(test_number("0001"), "0001");
        assert_eq!(test_number(""), "");
    }

    #[test]
    fn test_no_filter_runs_everything() {
        let t = noop("0001_a").with_flags(TestFlags::KNOWN_ISSUE);
        assert_eq!(eligibility(&t, &RunFilter::default()), Eligibility::Run);
    }

    #[test]
    fn test_required_flags_must_all_be_present() {
        let filter = RunFilter {
            required: TestFlags::LOCAL,
            ..Default::default()
        };
        assert_eq!(
            skip_reason(eligibility(&noop("0001_a"), &filter)),
            "filtered due to test flags"
        );
        let local = noop("0002_b").with_flags(TestFlags::LOCAL | TestFlags::KNOWN_ISSUE);
        assert_eq!(eligibility(&local, &filter), Eligibility::Run);
    }

    #[test]
    fn test_excluded_flags_any_overlap() {
        let filter = RunFilter {
            excluded: TestFlags::LOCAL | TestFlags::KNOWN_ISSUE,
            ..Default::default()
        };
        let known = noop("0001_a").with_flags(TestFlags::KNOWN_ISSUE);
        assert_eq!(
            skip_reason(eligibility(&known, &filter)),
            "filtered due to negative test flags"
        );
        assert_eq!(eligibility(&noop("0002_b"), &filter), Eligibility::Run);
    }

    #[test]
    fn test_version_range_is_inclusive() {
        let t = noop("0001_a")
            .with_min_version(BrokerVersion::new(0, 9, 0, 0))
            .with_max_version(BrokerVersion::new(0, 10, 0, 0));

        for (version, runs) in [
            (BrokerVersion::new(0, 8, 2, 2), false),
            (BrokerVersion::new(0, 9, 0, 0), true),
            (BrokerVersion::new(0, 10, 0, 0), true),
            (BrokerVersion::new(0, 10, 0, 1), false),
        ] {
            let filter = RunFilter {
                broker_version: Some(version),
                ..Default::default()
            };
            assert_eq!(eligibility(&t, &filter) == Eligibility::Run, runs, "{}", version);
        }

        let filter = RunFilter {
            broker_version: Some(BrokerVersion::new(0, 8, 2, 2)),
            ..Default::default()
        };
        assert_eq!(
            skip_reason(eligibility(&t, &filter)),
            "not applicable for broker version 0.8.2.2"
        );
    }

    #[test]
    fn test_selection_matches_number() {
        let t = noop("0033_regex_subscribe");
        for (selection, runs) in [
            ("0033", true),
            ("0001,0033,0040", true),
            ("003", true),
            ("0034", false),
            ("regex", false),
        ] {
            let filter = RunFilter {
                selection: Some(selection.to_string()),
                ..Default::default()
            };
            assert_eq!(eligibility(&t, &filter) == Eligibility::Run, runs, "{}", selection);
        }
    }

    #[test]
    fn test_first_failing_predicate_gives_reason() {
        let filter = RunFilter {
            required: TestFlags::LOCAL,
            selection: Some("9999".to_string()),
            ..Default::default()
        };
        assert_eq!(
            skip_reason(eligibility(&noop("0001_a"), &filter)),
            "filtered due to test flags"
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TestRegistry::new(vec![noop("0001_a"), noop("0002_b")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("0002_b").unwrap().number(), "0002");
        assert!(registry.get("0003_c").is_none());
        assert_eq!(registry.at(0).unwrap().name(), "0001_a");
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_known_issue_flag() {
        assert!(noop("0001_a")
            .with_flags(TestFlags::KNOWN_ISSUE)
            .is_known_issue());
        assert!(!noop("0001_a").is_known_issue());
    }
}
