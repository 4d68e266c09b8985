mod cancel;
mod command;
mod config;
mod engine;
mod evaluator;
mod executor;
mod parser;
mod reporter;


use config::{FrameworkConfigManager, RunnerSettings};
use cpptest_common::config::SuiteManifest;
use executor::SuiteExecutor;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = RunnerSettings::from_env()?;
    init_tracing(settings.json_logs);

    info!("cpptest runner booting...");

    // Load suite manifest
    let manifest = SuiteManifest::load(&settings.suite_path).map_err(|e| {
        error!("Failed to load suite manifest: {:#}", e);
        error!(
            "Make sure {} exists (or set CPPTEST_SUITE)",
            settings.suite_path.display()
        );
        e
    })?;

    // Framework flags: optional overrides on top of the built-ins
    let frameworks = match settings.frameworks_path {
        Some(ref path) => FrameworkConfigManager::load(path)?,
        None => FrameworkConfigManager::builtin(),
    };

    let concurrency = settings
        .concurrency
        .or(manifest.concurrency)
        .unwrap_or_else(num_cpus::get);

    let binaries = manifest.test_binaries();
    info!(
        suite = %settings.suite_path.display(),
        binaries = binaries.len(),
        concurrency,
        "Loaded suite"
    );

    let (cancel_handle, cancel_signal) = cancel::cancel_pair();

    // Ctrl-C kills in-flight binaries and marks the rest cancelled
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received interrupt, cancelling suite...");
                cancel_handle.cancel();
            }
            Err(e) => error!(error = %e, "Failed to install Ctrl-C handler"),
        }
    });

    let executor = SuiteExecutor::new(frameworks, concurrency);
    let report = executor.run_suite(&binaries, &cancel_signal).await;

    reporter::print_summary(&report);

    if let Some(ref path) = settings.report_path {
        match reporter::write_json(&report, path) {
            Ok(()) => info!(path = %path.display(), "Report written"),
            Err(e) => error!("Failed to write report: {:#}", e),
        }
    }

    info!(
        overall_success = report.overall_success,
        "cpptest runner finished"
    );
    std::process::exit(report.exit_code());
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
