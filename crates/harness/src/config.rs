//! Harness configuration via `streamcheck.toml`
//!
//! Settings are read from the file named by `STREAMCHECK_CONF`, or from
//! `streamcheck.toml` in the working directory. A missing file means
//! defaults. Environment variables and command-line flags are applied on
//! top, in that order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use streamcheck_core::{BrokerVersion, Error, Result, TestFlags};
use tracing::debug;

/// Config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "streamcheck.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "STREAMCHECK_CONF";

/// Modes that slow the process down enough to need longer timeouts
const SLOW_MODES: &[&str] = &["valgrind", "helgrind"];
const SLOW_MODE_MULTIPLIER: f64 = 5.0;

/// Upper bound for `timeout_secs` (one week)
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Harness configuration loaded from `streamcheck.toml`
///
/// # Example
///
/// ```toml
/// concurrency = 20
/// timeout_secs = 20
/// broker_version = "0.9.0.0"
///
/// [client]
/// "bootstrap.servers" = "localhost:9092"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    /// Maximum number of tests running at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Default per-test timeout in seconds, before the multiplier
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Scales every test timeout
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,
    /// Supervisor wake-up interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Output level; the verifier warning cap is `(verbosity + 1) * 100`
    #[serde(default = "default_verbosity")]
    pub verbosity: u32,
    /// `"bare"`, `"valgrind"` or `"helgrind"`
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Target broker version `N.N.N.N` or `"trunk"`
    #[serde(default = "default_broker_version")]
    pub broker_version: String,
    /// Prefix of generated topic names
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Randomize every generated topic name
    #[serde(default)]
    pub topic_random: bool,
    /// Fail the run as soon as one test fails
    #[serde(default)]
    pub assert_on_fail: bool,
    /// Test selection: tests whose number matches it run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<String>,
    /// Only run tests carrying all of these flags
    #[serde(default)]
    pub required_flags: TestFlags,
    /// Skip tests carrying any of these flags
    #[serde(default)]
    pub excluded_flags: TestFlags,
    /// JSON report path; defaults to `test_report_<date>.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    /// Directory for per-test statistics files; none means discard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_dir: Option<PathBuf>,
    /// Random seed for run ids and topic names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Properties passed through to the messaging client
    #[serde(default)]
    pub client: BTreeMap<String, String>,
}

fn default_concurrency() -> usize {
    20
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_timeout_multiplier() -> f64 {
    1.0
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_verbosity() -> u32 {
    2
}

fn default_mode() -> String {
    "bare".to_string()
}

fn default_broker_version() -> String {
    "0.9.0.0".to_string()
}

fn default_topic_prefix() -> String {
    "rdkafkatest".to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            timeout_multiplier: default_timeout_multiplier(),
            poll_interval_ms: default_poll_interval_ms(),
            verbosity: default_verbosity(),
            mode: default_mode(),
            broker_version: default_broker_version(),
            topic_prefix: default_topic_prefix(),
            topic_random: false,
            assert_on_fail: false,
            tests: None,
            required_flags: TestFlags::NONE,
            excluded_flags: TestFlags::NONE,
            report_path: None,
            stats_dir: None,
            seed: None,
            client: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Config file content with every default spelled out
    pub fn default_toml() -> &'static str {
        r#"# streamcheck configuration
#
# Maximum number of tests running at once
concurrency = 20

# Per-test timeout in seconds, scaled by timeout_multiplier.
# Tests may extend their own timeout.
timeout_secs = 20
timeout_multiplier = 1.0

# Supervisor wake-up interval in milliseconds
poll_interval_ms = 1000

# Verbosity level (TEST_LEVEL)
verbosity = 2

# "bare", "valgrind" or "helgrind"; the latter two multiply timeouts by 5
mode = "bare"

# Target broker version N.N.N.N, or "trunk"
broker_version = "0.9.0.0"

topic_prefix = "rdkafkatest"
topic_random = false

# report_path = "test_report.json"
# stats_dir = "stats"
# seed = 1234

# Messaging client properties
# [client]
# "bootstrap.servers" = "localhost:9092"
"#
    }

    /// Read and parse config from a file path
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if the file does not exist
    ///
    /// # Errors
    /// Returns an error for unreadable or malformed files.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(
                target: "streamcheck::config",
                "Test config file {} not found",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Load from `STREAMCHECK_CONF` or `streamcheck.toml`
    ///
    /// # Errors
    /// Returns an error for unreadable or malformed files.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        Self::load_from(&path)
    }

    /// Serialize this config to TOML and write it to the given path
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `TESTS`, `TEST_BROKER_VERSION`, `TEST_LEVEL`, `TEST_MODE`,
    /// `TEST_SEED` and `TEST_REPORT` from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply environment-style overrides from `lookup`
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if a numeric variable does not parse
    /// or the result fails validation.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tests) = lookup("TESTS").filter(|s| !s.is_empty()) {
            self.tests = Some(tests);
        }
        if let Some(version) = lookup("TEST_BROKER_VERSION") {
            self.broker_version = version;
        }
        if let Some(level) = lookup("TEST_LEVEL") {
            self.verbosity = parse_var("TEST_LEVEL", &level)?;
        }
        if let Some(mode) = lookup("TEST_MODE") {
            self.mode = mode;
        }
        if let Some(seed) = lookup("TEST_SEED") {
            self.seed = Some(parse_var("TEST_SEED", &seed)?);
        }
        if let Some(report) = lookup("TEST_REPORT").filter(|s| !s.is_empty()) {
            self.report_path = Some(PathBuf::from(report));
        }
        self.validate()
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` or `Error::InvalidBrokerVersion`.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }
        if self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::invalid_config(format!(
                "timeout_secs must be at most {}, not {}",
                MAX_TIMEOUT_SECS, self.timeout_secs
            )));
        }
        if !(self.timeout_multiplier.is_finite() && self.timeout_multiplier > 0.0) {
            return Err(Error::invalid_config(format!(
                "timeout_multiplier must be positive, not {}",
                self.timeout_multiplier
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::invalid_config("poll_interval_ms must be at least 1"));
        }
        if self.mode != "bare" && !SLOW_MODES.contains(&self.mode.as_str()) {
            return Err(Error::invalid_config(format!(
                "Invalid mode '{}'. Expected \"bare\", \"valgrind\" or \"helgrind\".",
                self.mode
            )));
        }
        self.target_broker_version()?;
        Ok(())
    }

    /// Parsed target broker version
    pub fn target_broker_version(&self) -> Result<BrokerVersion> {
        self.broker_version.parse()
    }

    /// Multiplier applied to every timeout: configured value times the
    /// slow-mode factor
    pub fn effective_multiplier(&self) -> f64 {
        if SLOW_MODES.contains(&self.mode.as_str()) {
            self.timeout_multiplier * SLOW_MODE_MULTIPLIER
        } else {
            self.timeout_multiplier
        }
    }

    /// Default per-test timeout before scaling
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Supervisor wake-up interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_config(format!("{}: invalid value {:?}", name, value)))
}
