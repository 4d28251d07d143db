//! GPUDiag
//!
//! One-shot health diagnostics for multi-GPU servers. Collects facts from the
//! driver stack, kernel log and RDMA fabric, correlates them into issues and
//! prints a JSON report followed by a human-readable summary.

mod cli;
mod config;
mod privilege;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;
use config::Config;
use gpudiag_core::metrics::MetricsRegistry;
use gpudiag_core::{create_fact_provider, DiagnosticEngine, DiagnosticReport, ProcFs, Severity};

/// Exit status for a FAIL verdict under `--strict`
const EXIT_FAIL_VERDICT: i32 = 2;

/// Initialize the tracing/logging subsystem
fn init_logging(log_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // stdout carries the report only
    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        warn!(path = ?cli.config, "Config file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if cli.parallel {
        config.parallel = true;
    }
    if let Some(source) = cli.source {
        config.fact_source = source;
    }
    if cli.metrics_file.is_some() {
        config.metrics_file = cli.metrics_file.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn write_metrics(metrics: &MetricsRegistry, path: &Path) -> Result<()> {
    let text = metrics.render().context("Failed to render metrics")?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write metrics file {:?}", path))?;
    info!(path = ?path, "Metrics written");
    Ok(())
}

/// Run one diagnostic pass and return the verdict
async fn run(config: Config) -> Result<Severity> {
    let provider = create_fact_provider(config.fact_source, config.provider_settings())
        .context("Failed to create fact provider")?;

    let metrics = Arc::new(MetricsRegistry::new());
    let engine = DiagnosticEngine::standard(
        config.evaluation_config(),
        Arc::new(ProcFs::new(config.proc_root.clone())),
    )
    .with_mode(config.execution_mode())
    .with_metrics(metrics.clone());

    let report = engine.diagnose(provider.as_ref()).await;
    metrics.observe_report(&report);

    publish(
        &report,
        &metrics,
        config.metrics_file.as_deref(),
        &mut std::io::stdout().lock(),
    )?;

    Ok(report.status)
}

/// Print the report and summary, then export metrics.
///
/// A metrics write failure never withholds a finished report.
fn publish(
    report: &DiagnosticReport,
    metrics: &MetricsRegistry,
    metrics_file: Option<&Path>,
    out: &mut impl Write,
) -> Result<()> {
    let json = report
        .to_json_pretty()
        .context("Failed to serialize report")?;
    writeln!(out, "{}", json).context("Failed to write report")?;
    writeln!(out, "{}", report.summary()).context("Failed to write summary")?;
    out.flush().context("Failed to flush report")?;

    if let Some(path) = metrics_file {
        if let Err(e) = write_metrics(metrics, path) {
            warn!(error = ?e, "Metrics export failed");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(&cli.log_level, cli.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "GPUDiag starting");

    if cli.skip_privilege_check {
        warn!("Privilege check skipped, results may be incomplete");
    } else if !privilege::is_root() {
        privilege::print_banner();
        std::process::exit(1);
    }

    let config = load_config(&cli)?;
    info!(
        source = %config.fact_source,
        mode = ?config.execution_mode(),
        "Configuration loaded"
    );

    let status = run(config).await?;

    if cli.strict && status == Severity::Fail {
        std::process::exit(EXIT_FAIL_VERDICT);
    }
    Ok(())
}
