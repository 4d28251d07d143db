//! Diagnostic report model
//!
//! The severity lattice (`Pass < Warning < Fail`), issues, the structured
//! report sections, and the renderers for JSON and the human summary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::facts::{LinkErrorCategory, ServiceState};

/// Overall verdict. Ordered so that join is `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Pass,
    Warning,
    Fail,
}

impl Severity {
    /// Least upper bound of two severities
    pub fn join(self, other: Severity) -> Severity {
        self.max(other)
    }

    /// Numeric value used for metrics export
    pub fn as_gauge(self) -> i64 {
        match self {
            Severity::Pass => 0,
            Severity::Warning => 1,
            Severity::Fail => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Pass => write!(f, "PASS"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Fail => write!(f, "FAIL"),
        }
    }
}

/// Severity an issue can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueLevel {
    Warning,
    Fail,
}

impl From<IssueLevel> for Severity {
    fn from(level: IssueLevel) -> Self {
        match level {
            IssueLevel::Warning => Severity::Warning,
            IssueLevel::Fail => Severity::Fail,
        }
    }
}

impl fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Severity::from(*self).fmt(f)
    }
}

/// A single finding. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    level: IssueLevel,
    message: String,
}

impl Issue {
    pub fn new(level: IssueLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(IssueLevel::Warning, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(IssueLevel::Fail, message)
    }

    pub fn level(&self) -> IssueLevel {
        self.level
    }

    pub fn severity(&self) -> Severity {
        self.level.into()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Driver / fabric manager / CUDA version facts as reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSection {
    pub driver_version: Option<String>,
    pub fabric_manager_version: String,
    pub fabric_manager_service: ServiceState,
    pub cuda_driver_version: Option<String>,
    pub nvcc_version: String,
}

/// Bus-level versus driver-visible GPU counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropDetection {
    pub physical_count: u32,
    pub driver_visible_count: u32,
}

/// Per-GPU telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuRecord {
    pub index: String,
    pub name: String,
    pub uuid: String,
    pub temperature: Option<u32>,
    pub ecc_uncorrected: u64,
    pub pcie_width_current: Option<u32>,
    pub pcie_width_max: Option<u32>,
    pub power_draw_w: Option<f64>,
    pub power_limit_w: Option<f64>,
}

/// A process holding GPU memory that the OS no longer tracks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZombieRecord {
    pub pid: u32,
    pub gpu_memory_usage: String,
    pub evidence: String,
}

/// Nonzero NVLink error counter total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkErrorRecord {
    pub category: LinkErrorCategory,
    pub count: u64,
}

/// NVLink summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSection {
    pub inactive_links: usize,
    pub errors: Vec<LinkErrorRecord>,
}

/// RDMA network summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_ports: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_ports: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_count: Option<usize>,
}

/// The complete result of one diagnostic pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub timestamp: DateTime<Utc>,
    pub status: Severity,
    pub issues: Vec<Issue>,
    pub version_compatibility: Option<VersionSection>,
    pub drop_detection: Option<DropDetection>,
    pub gpu_info: Vec<GpuRecord>,
    pub nvlink_status: Option<LinkSection>,
    pub xid_errors: Vec<String>,
    pub zombie_processes: Vec<ZombieRecord>,
    pub network_info: NetworkSection,
}

impl DiagnosticReport {
    /// Empty report with status PASS
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            status: Severity::Pass,
            issues: Vec::new(),
            version_compatibility: None,
            drop_detection: None,
            gpu_info: Vec::new(),
            nvlink_status: None,
            xid_errors: Vec::new(),
            zombie_processes: Vec::new(),
            network_info: NetworkSection::default(),
        }
    }

    /// Number of issues at `level`
    pub fn count_level(&self, level: IssueLevel) -> usize {
        self.issues.iter().filter(|i| i.level() == level).count()
    }

    /// Pretty-printed JSON
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let rule = "=".repeat(30);
        let mut lines = vec![rule.clone(), format!("DIAGNOSTIC RESULT: {}", self.status)];

        if self.issues.is_empty() {
            lines.push("All systems appear normal.".to_string());
        } else {
            lines.extend(self.issues.iter().map(|issue| format!(" - {}", issue)));
        }

        lines.push(rule);
        lines.join("\n")
    }
}

impl Default for DiagnosticReport {
    fn default() -> Self {
        Self::new()
    }
}
