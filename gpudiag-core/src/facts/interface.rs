//! Fact provider trait and fact types
//!
//! Facts are typed, optional observations. Absence is a first-class value:
//! a probe that cannot run, or runs and prints nothing, yields `None`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where GPU-side facts are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum FactSource {
    /// Try NVML, fall back to nvidia-smi
    #[default]
    Auto,
    /// Parse nvidia-smi output
    Smi,
    /// Query NVML directly
    Nvml,
}

impl fmt::Display for FactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactSource::Auto => write!(f, "auto"),
            FactSource::Smi => write!(f, "smi"),
            FactSource::Nvml => write!(f, "nvml"),
        }
    }
}

/// State of the fabric manager systemd unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Active,
    Inactive,
    #[default]
    NotInstalled,
}

impl ServiceState {
    /// Interpret the output of `systemctl is-active`
    pub fn from_is_active(output: &str) -> Self {
        match output.trim() {
            "" => ServiceState::NotInstalled,
            "active" => ServiceState::Active,
            _ => ServiceState::Inactive,
        }
    }

    /// Combine `systemctl is-active` output with whether the unit file
    /// exists. `is-active` prints `inactive` for units that do not exist.
    pub fn from_systemctl(is_active: Option<&str>, unit_installed: bool) -> Self {
        match is_active.map_or(ServiceState::NotInstalled, Self::from_is_active) {
            ServiceState::Inactive if !unit_installed => ServiceState::NotInstalled,
            state => state,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ServiceState::Active)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Active => write!(f, "active"),
            ServiceState::Inactive => write!(f, "inactive"),
            ServiceState::NotInstalled => write!(f, "not_installed"),
        }
    }
}

/// Version-related facts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionFacts {
    /// Driver version as reported once per GPU, in enumeration order
    pub driver_versions: Vec<String>,
    /// Fabric manager version (`X.Y.Z`)
    pub fabric_manager_version: Option<String>,
    /// Fabric manager service state
    pub fabric_manager_service: ServiceState,
    /// CUDA release reported by the compiler
    pub nvcc_version: Option<String>,
    /// Maximum CUDA version supported by the driver
    pub cuda_driver_version: Option<String>,
}

/// One row of per-GPU telemetry, as reported by the driver.
///
/// Numeric fields are kept as reported text; a value the driver could not
/// produce (e.g. `[N/A]`) only disables the checks that depend on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuTelemetry {
    pub index: String,
    pub name: String,
    pub uuid: String,
    pub temperature: String,
    pub power_draw: String,
    pub power_limit: String,
    pub pcie_width_current: String,
    pub pcie_width_max: String,
    /// Aggregate uncorrected ECC error count, if the query succeeded
    pub ecc_uncorrected: Option<String>,
}

/// GPUs visible to the driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuInventory {
    /// Number of GPUs the driver reported, including rows that failed to parse
    pub visible_count: u32,
    /// Telemetry for every well-formed row
    pub gpus: Vec<GpuTelemetry>,
}

/// A process the driver reports as holding GPU memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeProcess {
    pub pid: u32,
    /// Used GPU memory in MiB, as reported
    pub used_memory: String,
}

impl ComputeProcess {
    pub fn new(pid: u32, used_memory: impl Into<String>) -> Self {
        Self {
            pid,
            used_memory: used_memory.into(),
        }
    }
}

/// State of a single NVLink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState {
    /// GPU the link belongs to, when the output names it
    pub gpu: Option<u32>,
    pub link: u32,
    /// Raw state text, e.g. `26.562 GB/s` or `<inactive>`
    pub state: String,
}

impl LinkState {
    pub fn is_inactive(&self) -> bool {
        self.state.to_ascii_lowercase().contains("inactive")
    }
}

/// NVLink error categories tracked by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkErrorCategory {
    Replay,
    Recovery,
    #[serde(rename = "CRC")]
    Crc,
    Data,
    Fatal,
}

impl LinkErrorCategory {
    /// All categories, in reporting order
    pub const ALL: [LinkErrorCategory; 5] = [
        LinkErrorCategory::Replay,
        LinkErrorCategory::Recovery,
        LinkErrorCategory::Crc,
        LinkErrorCategory::Data,
        LinkErrorCategory::Fatal,
    ];

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Replay" => Some(LinkErrorCategory::Replay),
            "Recovery" => Some(LinkErrorCategory::Recovery),
            "CRC" => Some(LinkErrorCategory::Crc),
            "Data" => Some(LinkErrorCategory::Data),
            "Fatal" => Some(LinkErrorCategory::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for LinkErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkErrorCategory::Replay => write!(f, "Replay"),
            LinkErrorCategory::Recovery => write!(f, "Recovery"),
            LinkErrorCategory::Crc => write!(f, "CRC"),
            LinkErrorCategory::Data => write!(f, "Data"),
            LinkErrorCategory::Fatal => write!(f, "Fatal"),
        }
    }
}

/// One NVLink error counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkErrorCounter {
    pub gpu: Option<u32>,
    pub link: Option<u32>,
    pub category: LinkErrorCategory,
    pub count: u64,
}

/// NVLink facts: link states plus error counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkFacts {
    pub states: Vec<LinkState>,
    /// `None` when the error query produced nothing
    pub error_counters: Option<Vec<LinkErrorCounter>>,
}

/// RDMA network facts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkFacts {
    /// Port states (`PORT_ACTIVE`, `PORT_DOWN`, ...) from the query tool
    pub port_states: Option<Vec<String>>,
    /// Number of adapters in the sysfs listing, used when the tool is unavailable
    pub adapter_count: Option<usize>,
}

/// Errors that can occur while acquiring facts
#[derive(Debug, Error)]
pub enum FactError {
    /// NVML initialization failed
    #[error("Failed to initialize NVML: {0}")]
    NvmlInitError(String),

    /// NVML query failed
    #[error("NVML query failed: {0}")]
    NvmlQuery(String),

    /// Command could not be spawned
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command did not finish in time
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Source of facts for one diagnostic pass.
///
/// Every method reports absence as `Ok(None)`. An `Err` means the probe
/// could not run at all; callers turn it into absence before evaluation.
#[async_trait]
pub trait FactProvider: Send + Sync {
    /// Driver version once per GPU
    async fn driver_versions(&self) -> Result<Option<Vec<String>>, FactError>;

    /// Maximum CUDA version supported by the driver
    async fn cuda_driver_version(&self) -> Result<Option<String>, FactError>;

    /// Fabric manager service state
    async fn fabric_manager_service(&self) -> Result<ServiceState, FactError>;

    /// Fabric manager version
    async fn fabric_manager_version(&self) -> Result<Option<String>, FactError>;

    /// CUDA compiler release
    async fn nvcc_version(&self) -> Result<Option<String>, FactError>;

    /// Number of NVIDIA display/3D controllers on the PCIe bus
    async fn physical_gpu_count(&self) -> Result<Option<u32>, FactError>;

    /// GPUs visible to the driver, with per-GPU telemetry
    async fn gpu_inventory(&self) -> Result<Option<GpuInventory>, FactError>;

    /// Processes holding GPU memory
    async fn compute_processes(&self) -> Result<Option<Vec<ComputeProcess>>, FactError>;

    /// NVLink states and error counters
    async fn link_facts(&self) -> Result<Option<LinkFacts>, FactError>;

    /// Kernel log lines carrying the Xid tag, oldest first
    async fn xid_log_lines(&self) -> Result<Option<Vec<String>>, FactError>;

    /// RDMA port states and adapter count
    async fn network_facts(&self) -> Result<NetworkFacts, FactError>;
}
