//! Configuration module for GPUDiag
//!
//! Handles loading and validating configuration from YAML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use gpudiag_core::evaluators::{DEFAULT_TEMPERATURE_THRESHOLD, DEFAULT_XID_TAIL};
use gpudiag_core::{EvaluationConfig, ExecutionMode, FactSource, ProviderSettings};
use serde::{Deserialize, Serialize};

/// Evaluator thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Temperatures strictly above this raise a warning (Celsius)
    #[serde(default = "default_temperature_threshold")]
    pub temperature_celsius: u32,

    /// Number of most recent Xid lines to inspect
    #[serde(default = "default_xid_tail")]
    pub xid_tail: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            temperature_celsius: default_temperature_threshold(),
            xid_tail: default_xid_tail(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where GPU facts are read from
    #[serde(default)]
    pub fact_source: FactSource,

    /// Timeout for every external command
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,

    /// Fabric manager binary
    #[serde(default = "default_fabric_manager_path")]
    pub fabric_manager_path: PathBuf,

    /// RDMA adapter sysfs directory
    #[serde(default = "default_infiniband_sysfs_path")]
    pub infiniband_sysfs_path: PathBuf,

    /// procfs mount used for process liveness
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Run evaluators concurrently
    #[serde(default)]
    pub parallel: bool,

    /// Prometheus textfile output
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fact_source: FactSource::default(),
            command_timeout: default_command_timeout(),
            fabric_manager_path: default_fabric_manager_path(),
            infiniband_sysfs_path: default_infiniband_sysfs_path(),
            proc_root: default_proc_root(),
            thresholds: ThresholdConfig::default(),
            parallel: false,
            metrics_file: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let temp = self.thresholds.temperature_celsius;
        if temp == 0 || temp > 150 {
            anyhow::bail!("thresholds.temperature_celsius must be between 1 and 150");
        }
        if self.thresholds.xid_tail == 0 {
            anyhow::bail!("thresholds.xid_tail must be > 0");
        }
        if self.command_timeout.is_zero() {
            anyhow::bail!("command_timeout must be > 0");
        }
        Ok(())
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            command_timeout: self.command_timeout,
            fabric_manager_path: self.fabric_manager_path.clone(),
            infiniband_sysfs_path: self.infiniband_sysfs_path.clone(),
        }
    }

    pub fn evaluation_config(&self) -> EvaluationConfig {
        EvaluationConfig {
            temperature_threshold: self.thresholds.temperature_celsius,
            xid_tail: self.thresholds.xid_tail,
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }
}

// Default value functions
fn default_temperature_threshold() -> u32 {
    DEFAULT_TEMPERATURE_THRESHOLD
}

fn default_xid_tail() -> usize {
    DEFAULT_XID_TAIL
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_fabric_manager_path() -> PathBuf {
    PathBuf::from("/usr/bin/nv-fabricmanager")
}

fn default_infiniband_sysfs_path() -> PathBuf {
    PathBuf::from("/sys/class/infiniband")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}
