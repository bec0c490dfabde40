//! streamcheck: run the integration-test suite against a messaging client.
//!
//! Tests run concurrently under the configured cap. On completion the
//! summary table is printed, a JSON report is written and the exit code is
//! the number of unexpected failures.
//!
//! The first Ctrl-C stops launching new tests and lets running ones finish;
//! the second exits immediately. A test timeout (or a failure with `-a`)
//! prints the summary and aborts.

mod commands;
mod suite;

use anyhow::Result;
use std::io::IsTerminal;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use streamcheck_harness::{Harness, HarnessConfig, LoopbackBroker, ShutdownSignal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::{build_cli, load_config};

/// Client teardown grace period after the last test
const EXIT_WAIT: Duration = Duration::from_secs(10);

fn main() {
    let matches = build_cli().get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("streamcheck: {:#}", e);
            process::exit(1);
        }
    };
    init_logging(&config);

    let print_summary = !matches.get_flag("no-summary");
    match run(config, print_summary) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

fn init_logging(config: &HarnessConfig) {
    let level = match config.verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_thread_names(true))
        .with(filter)
        .init();
}

/// Deliver Ctrl-C to `signal`; the second one exits the process
fn spawn_interrupt_handler(signal: ShutdownSignal) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                        return;
                    }
                    if signal.request() > 1 {
                        eprintln!("streamcheck: second interrupt, exiting");
                        process::exit(1);
                    }
                    info!("Interrupted: waiting for running tests to finish (Ctrl-C again to exit)");
                }
            })
        })?;
    Ok(())
}

fn run(config: HarnessConfig, print_summary: bool) -> Result<i32> {
    let colored = std::io::stdout().is_terminal();
    let broker = LoopbackBroker::new();
    let signal = ShutdownSignal::new();
    spawn_interrupt_handler(signal.clone())?;

    let harness = Harness::new(suite::registry(&broker), config)?
        .with_client(Arc::new(broker))
        .with_shutdown(signal);

    if let Err(e) = harness.run() {
        if !e.is_fatal() {
            return Err(e.into());
        }
        error!("{}", e);
        print!("{}", harness.summary().render(colored));
        process::abort();
    }

    harness.wait_exit(EXIT_WAIT);
    let summary = harness.summary();
    if print_summary {
        print!("{}", summary.render(colored));
    }

    let path = harness
        .config()
        .report_path
        .clone()
        .unwrap_or_else(|| summary.default_report_path());
    match summary.write_json(&path) {
        Ok(()) => info!("Test report written to {}", path.display()),
        Err(e) => warn!("{}", e),
    }

    Ok(summary.exit_code())
}
