//! CLI argument parsing for GPUDiag

use std::path::PathBuf;

use clap::Parser;
use gpudiag_core::FactSource;

/// GPUDiag - one-shot health diagnostics for multi-GPU servers
#[derive(Debug, Parser)]
#[command(name = "gpudiag")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/gpudiag/config.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GPUDIAG_LOG_LEVEL")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long, default_value = "false", env = "GPUDIAG_LOG_JSON")]
    pub log_json: bool,

    /// Run evaluators concurrently
    #[arg(long)]
    pub parallel: bool,

    /// GPU fact source (overrides config)
    #[arg(long, value_enum, ignore_case = true)]
    pub source: Option<FactSource>,

    /// Write Prometheus metrics to this textfile
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Exit with status 2 when the verdict is FAIL
    #[arg(long)]
    pub strict: bool,

    /// Do not require root
    #[arg(long)]
    pub skip_privilege_check: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
