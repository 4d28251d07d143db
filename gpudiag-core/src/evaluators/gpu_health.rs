//! GPU enumeration and per-GPU telemetry checks
//!
//! - Drop detection: GPUs on the PCIe bus versus GPUs the driver sees
//! - PCIe link width degradation
//! - Uncorrected ECC errors
//! - Temperature

use std::str::FromStr;

use tracing::{debug, trace};

use super::{Evaluation, Evaluator, Section, DEFAULT_TEMPERATURE_THRESHOLD};
use crate::facts::{FactSnapshot, GpuInventory, GpuTelemetry};
use crate::report::{DropDetection, GpuRecord, Issue};

fn parse_number<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

/// Uncorrected ECC count; anything that is not a plain number counts as 0
fn parse_ecc(value: Option<&str>) -> u64 {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Checks GPU enumeration and telemetry
#[derive(Debug, Clone, Copy)]
pub struct GpuHealthEvaluator {
    temperature_threshold: u32,
}

impl GpuHealthEvaluator {
    pub fn new(temperature_threshold: u32) -> Self {
        Self {
            temperature_threshold,
        }
    }

    /// Compare bus-level and driver-visible GPU counts.
    ///
    /// An empty bus is reported on its own and takes precedence over the
    /// drop message.
    pub fn check_drop(&self, physical: u32, visible: u32) -> Option<Issue> {
        if physical == 0 {
            Some(Issue::fail("No NVIDIA GPUs found on PCIe bus."))
        } else if visible < physical {
            Some(Issue::fail(format!(
                "GPU DROP DETECTED: Physical Bus has {} GPUs, but Driver only sees {}.",
                physical, visible
            )))
        } else {
            None
        }
    }

    /// Evaluate one GPU. Every check runs regardless of the others.
    pub fn check_gpu(&self, gpu: &GpuTelemetry) -> (GpuRecord, Vec<Issue>) {
        let record = GpuRecord {
            index: gpu.index.clone(),
            name: gpu.name.clone(),
            uuid: gpu.uuid.clone(),
            temperature: parse_number(&gpu.temperature),
            ecc_uncorrected: parse_ecc(gpu.ecc_uncorrected.as_deref()),
            pcie_width_current: parse_number(&gpu.pcie_width_current),
            pcie_width_max: parse_number(&gpu.pcie_width_max),
            power_draw_w: parse_number(&gpu.power_draw),
            power_limit_w: parse_number(&gpu.power_limit),
        };
        trace!(gpu = %record.index, record = ?record, "GPU record");

        let mut issues = Vec::new();

        match (record.pcie_width_current, record.pcie_width_max) {
            (Some(current), Some(max)) if current != max => {
                issues.push(Issue::fail(format!(
                    "GPU {} PCIe Bandwidth Degraded: Current x{}, Max x{}",
                    record.index, current, max
                )));
            }
            (Some(_), Some(_)) => {}
            _ => debug!(
                gpu = %record.index,
                current = %gpu.pcie_width_current,
                max = %gpu.pcie_width_max,
                "Unparseable PCIe link width, skipping check"
            ),
        }

        if record.ecc_uncorrected > 0 {
            issues.push(Issue::fail(format!(
                "GPU {} Detected {} UNCORRECTED ECC errors",
                record.index, record.ecc_uncorrected
            )));
        }

        match record.temperature {
            Some(temp) if temp > self.temperature_threshold => {
                issues.push(Issue::warning(format!(
                    "GPU {} Temperature too high: {}C (threshold {}C)",
                    record.index, temp, self.temperature_threshold
                )));
            }
            Some(_) => {}
            None => debug!(
                gpu = %record.index,
                temperature = %gpu.temperature,
                "Unparseable temperature, skipping check"
            ),
        }

        (record, issues)
    }

    pub fn check(&self, physical: Option<u32>, inventory: Option<&GpuInventory>) -> Evaluation {
        // No lspci output means nothing was found on the bus
        let physical_count = physical.unwrap_or(0);
        let visible_count = inventory.map_or(0, |i| i.visible_count);

        let mut gpus = Vec::new();
        let mut issues = Vec::new();

        if let Some(issue) = self.check_drop(physical_count, visible_count) {
            issues.push(issue);
        }

        for gpu in inventory.map(|i| i.gpus.as_slice()).unwrap_or_default() {
            let (record, gpu_issues) = self.check_gpu(gpu);
            gpus.push(record);
            issues.extend(gpu_issues);
        }

        let mut evaluation = Evaluation::new(
            self.name(),
            Section::GpuHealth {
                drop_detection: DropDetection {
                    physical_count,
                    driver_visible_count: visible_count,
                },
                gpus,
            },
        );
        for issue in issues {
            evaluation.push(issue);
        }
        evaluation
    }
}

impl Default for GpuHealthEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPERATURE_THRESHOLD)
    }
}

impl Evaluator for GpuHealthEvaluator {
    fn name(&self) -> &'static str {
        "gpu_health"
    }

    fn evaluate(&self, facts: &FactSnapshot) -> Evaluation {
        self.check(facts.physical_gpu_count, facts.gpu_inventory.as_ref())
    }
}
