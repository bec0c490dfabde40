//! Clap command definition and config assembly.
//!
//! Settings are layered: config file, then environment variables, then
//! command-line flags.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use streamcheck_core::TestFlags;
use streamcheck_harness::HarnessConfig;

/// Build the command.
pub fn build_cli() -> Command {
    Command::new("streamcheck")
        .about("Concurrent integration-test runner with message-stream verification")
        .arg(
            Arg::new("tests")
                .value_name("TESTS")
                .help("Run only tests whose number matches, e.g. 0001 or \"0001,0004\""),
        )
        .arg(
            Arg::new("parallel")
                .short('p')
                .long("parallel")
                .value_name("N")
                .help("Run at most N tests at once (default: 20)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("local")
                .short('l')
                .long("local")
                .help("Only run local tests (no broker needed)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-local")
                .short('L')
                .long("no-local")
                .help("Skip local tests")
                .action(ArgAction::SetTrue)
                .conflicts_with("local"),
        )
        .arg(
            Arg::new("known-issues")
                .short('k')
                .long("known-issues")
                .help("Only run tests with known issues")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-known-issues")
                .short('K')
                .long("no-known-issues")
                .help("Skip tests with known issues")
                .action(ArgAction::SetTrue)
                .conflicts_with("known-issues"),
        )
        .arg(
            Arg::new("assert")
                .short('a')
                .long("assert")
                .help("Abort the run on the first test failure")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-summary")
                .short('S')
                .long("no-summary")
                .help("Do not print the summary table")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("broker-version")
                .short('V')
                .long("broker-version")
                .value_name("VERSION")
                .help("Target broker version N.N.N.N or \"trunk\""),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Raise the verbosity level (repeatable)")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Config file (default: $STREAMCHECK_CONF or streamcheck.toml)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_name("PATH")
                .help("JSON report path (default: test_report_<date>.json)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

/// Load the configuration and apply environment and flags on top.
pub fn load_config(matches: &ArgMatches) -> Result<HarnessConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::load().context("Failed to load config")?,
    };
    config
        .apply_env()
        .context("Invalid environment override")?;
    apply_matches(matches, &mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Apply command-line flags to `config`.
pub fn apply_matches(matches: &ArgMatches, config: &mut HarnessConfig) {
    if let Some(tests) = matches.get_one::<String>("tests") {
        config.tests = Some(tests.clone());
    }
    if let Some(&n) = matches.get_one::<usize>("parallel") {
        config.concurrency = n;
    }
    if matches.get_flag("local") {
        config.required_flags |= TestFlags::LOCAL;
    }
    if matches.get_flag("no-local") {
        config.excluded_flags |= TestFlags::LOCAL;
    }
    if matches.get_flag("known-issues") {
        config.required_flags |= TestFlags::KNOWN_ISSUE;
    }
    if matches.get_flag("no-known-issues") {
        config.excluded_flags |= TestFlags::KNOWN_ISSUE;
    }
    if matches.get_flag("assert") {
        config.assert_on_fail = true;
    }
    if let Some(version) = matches.get_one::<String>("broker-version") {
        config.broker_version = version.clone();
    }
    config.verbosity += u32::from(matches.get_count("verbose"));
    if let Some(path) = matches.get_one::<PathBuf>("report") {
        config.report_path = Some(path.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(args: &[&str]) -> HarnessConfig {
        let mut argv = vec!["streamcheck"];
        argv.extend_from_slice(args);
        let matches = build_cli().try_get_matches_from(argv).unwrap();
        let mut config = HarnessConfig::default();
        apply_matches(&matches, &mut config);
        config
    }

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_defaults_leave_config_alone() {
        assert_eq!(apply(&[]), HarnessConfig::default());
    }

    #[test]
    fn test_flags() {
        let config = apply(&["-p", "4", "-l", "-K", "-a", "-V", "trunk", "-vv", "0001"]);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.required_flags, TestFlags::LOCAL);
        assert_eq!(config.excluded_flags, TestFlags::KNOWN_ISSUE);
        assert!(config.assert_on_fail);
        assert_eq!(config.broker_version, "trunk");
        assert_eq!(config.verbosity, 4);
        assert_eq!(config.tests.as_deref(), Some("0001"));
    }

    #[test]
    fn test_report_path() {
        let config = apply(&["--report", "out.json"]);
        assert_eq!(config.report_path, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn test_conflicting_flags_are_rejected() {
        assert!(build_cli()
            .try_get_matches_from(["streamcheck", "-l", "-L"])
            .is_err());
    }
}
