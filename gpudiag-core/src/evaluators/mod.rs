//! Rule evaluators
//!
//! Six independent evaluators, each a pure function of its own slice of the
//! fact snapshot:
//! - Versions: driver / fabric manager / CUDA consistency
//! - GPU health: bus-vs-driver drop detection and per-GPU telemetry
//! - Zombies: GPU memory holders the OS no longer tracks
//! - NVLink: inactive links and error counters
//! - Kernel log: recent Xid fault codes
//! - Network: RDMA port states

mod gpu_health;
mod kernel_log;
mod network;
mod nvlink;
mod version;
mod zombie;

pub use gpu_health::GpuHealthEvaluator;
pub use kernel_log::{xid_description, KernelLogEvaluator};
pub use network::NetworkEvaluator;
pub use nvlink::LinkEvaluator;
pub use version::VersionEvaluator;
pub use zombie::ZombieProcessEvaluator;

use serde::{Deserialize, Serialize};

use crate::facts::FactSnapshot;
use crate::report::{
    DropDetection, GpuRecord, Issue, LinkSection, NetworkSection, VersionSection, ZombieRecord,
};

/// Default temperature warning threshold in Celsius
pub const DEFAULT_TEMPERATURE_THRESHOLD: u32 = 85;

/// Default number of most recent Xid lines kept
pub const DEFAULT_XID_TAIL: usize = 5;

/// Tunable thresholds for the evaluators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Temperatures strictly above this raise a warning
    pub temperature_threshold: u32,
    /// Number of most recent Xid lines considered
    pub xid_tail: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            temperature_threshold: DEFAULT_TEMPERATURE_THRESHOLD,
            xid_tail: DEFAULT_XID_TAIL,
        }
    }
}

/// Structured data an evaluator contributes to the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Section {
    Versions(VersionSection),
    GpuHealth {
        drop_detection: DropDetection,
        gpus: Vec<GpuRecord>,
    },
    Zombies(Vec<ZombieRecord>),
    Links(LinkSection),
    KernelLog(Vec<String>),
    Network(NetworkSection),
    /// The evaluator's facts were absent
    Empty,
}

/// Output of one evaluator run
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Evaluator that produced this
    pub evaluator: &'static str,
    /// Issues in the order they were raised
    pub issues: Vec<Issue>,
    pub section: Section,
}

impl Evaluation {
    pub fn new(evaluator: &'static str, section: Section) -> Self {
        Self {
            evaluator,
            issues: Vec::new(),
            section,
        }
    }

    /// Evaluation for absent facts: no issues, no section
    pub fn empty(evaluator: &'static str) -> Self {
        Self::new(evaluator, Section::Empty)
    }

    pub fn push(&mut self, issue: Issue) {
        tracing::warn!(
            evaluator = self.evaluator,
            level = %issue.level(),
            message = %issue.message(),
            "Issue raised"
        );
        self.issues.push(issue);
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// A rule evaluator over the fact snapshot.
///
/// Implementations hold no mutable state: evaluating the same facts twice
/// yields identical results.
pub trait Evaluator: Send + Sync {
    /// Short stable name, used in logs and metrics
    fn name(&self) -> &'static str;

    /// Evaluate this evaluator's slice of the snapshot
    fn evaluate(&self, facts: &FactSnapshot) -> Evaluation;
}
