//! Prometheus metrics for GPUDiag
//!
//! Rendered once at the end of a pass, suitable for a node-exporter
//! textfile collector.

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_gauge_vec, register_histogram_vec, register_int_gauge,
    register_int_gauge_vec, GaugeVec, HistogramVec, IntGauge, IntGaugeVec, TextEncoder,
};

use crate::report::{DiagnosticReport, IssueLevel};

/// Overall status (0=pass, 1=warning, 2=fail)
static STATUS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!("gpudiag_status", "Overall diagnostic status"))
        .expect("Failed to create status metric")
});

/// Issues by level
static ISSUES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!("gpudiag_issues", "Number of issues raised by level"),
        &["level"]
    )
    .expect("Failed to create issues metric")
});

/// GPU temperature metric
static GPU_TEMPERATURE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!("gpudiag_gpu_temperature_celsius", "GPU temperature in Celsius"),
        &["gpu", "uuid"]
    )
    .expect("Failed to create gpu_temperature metric")
});

/// Uncorrected ECC errors per GPU
static GPU_ECC_UNCORRECTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!(
            "gpudiag_gpu_ecc_uncorrected",
            "Aggregate uncorrected ECC errors"
        ),
        &["gpu", "uuid"]
    )
    .expect("Failed to create gpu_ecc_uncorrected metric")
});

/// GPUs visible on the bus and to the driver
static GPU_COUNT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!("gpudiag_gpu_count", "Number of GPUs detected"),
        &["source"]
    )
    .expect("Failed to create gpu_count metric")
});

static ZOMBIE_PROCESSES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "gpudiag_zombie_processes",
        "GPU memory holders missing from the process table"
    ))
    .expect("Failed to create zombie_processes metric")
});

static INACTIVE_NVLINKS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!("gpudiag_nvlink_inactive", "Inactive NVLinks"))
        .expect("Failed to create nvlink_inactive metric")
});

static RDMA_PORTS_DOWN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!("gpudiag_rdma_ports_down", "RDMA ports in PORT_DOWN"))
        .expect("Failed to create rdma_ports_down metric")
});

/// Evaluator duration histogram
static EVALUATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gpudiag_evaluation_duration_seconds",
        "Duration of evaluator runs",
        &["evaluator"],
        vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0]
    )
    .expect("Failed to create evaluation_duration metric")
});

/// Metrics registry wrapper
pub struct MetricsRegistry;

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        // Force initialization of lazy statics
        let _ = &*STATUS;
        let _ = &*ISSUES;
        let _ = &*GPU_TEMPERATURE;
        let _ = &*GPU_ECC_UNCORRECTED;
        let _ = &*GPU_COUNT;
        let _ = &*ZOMBIE_PROCESSES;
        let _ = &*INACTIVE_NVLINKS;
        let _ = &*RDMA_PORTS_DOWN;
        let _ = &*EVALUATION_DURATION;
        Self
    }

    /// Record evaluator duration
    pub fn observe_evaluation(&self, evaluator: &str, duration_secs: f64) {
        EVALUATION_DURATION
            .with_label_values(&[evaluator])
            .observe(duration_secs);
    }

    /// Export the contents of a finished report
    pub fn observe_report(&self, report: &DiagnosticReport) {
        STATUS.set(report.status.as_gauge());
        ISSUES
            .with_label_values(&["warning"])
            .set(report.count_level(IssueLevel::Warning) as i64);
        ISSUES
            .with_label_values(&["fail"])
            .set(report.count_level(IssueLevel::Fail) as i64);

        if let Some(drop) = &report.drop_detection {
            GPU_COUNT
                .with_label_values(&["bus"])
                .set(drop.physical_count as i64);
            GPU_COUNT
                .with_label_values(&["driver"])
                .set(drop.driver_visible_count as i64);
        }

        for gpu in &report.gpu_info {
            if let Some(temp) = gpu.temperature {
                GPU_TEMPERATURE
                    .with_label_values(&[&gpu.index, &gpu.uuid])
                    .set(temp as f64);
            }
            GPU_ECC_UNCORRECTED
                .with_label_values(&[&gpu.index, &gpu.uuid])
                .set(gpu.ecc_uncorrected as f64);
        }

        ZOMBIE_PROCESSES.set(report.zombie_processes.len() as i64);
        INACTIVE_NVLINKS.set(
            report
                .nvlink_status
                .as_ref()
                .map_or(0, |l| l.inactive_links as i64),
        );
        RDMA_PORTS_DOWN.set(report.network_info.down_ports.unwrap_or(0) as i64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&prometheus::gather())
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{DropDetection, GpuRecord, Issue, Severity};

    #[test]
    fn test_metrics_registry() {
        let registry = MetricsRegistry::new();

        let mut report = DiagnosticReport::new();
        report.status = Severity::Fail;
        report.issues.push(Issue::fail("GPU 0 Detected 1 UNCORRECTED ECC errors"));
        report.drop_detection = Some(DropDetection {
            physical_count: 2,
            driver_visible_count: 2,
        });
        report.gpu_info.push(GpuRecord {
            index: "0".to_string(),
            name: "Test GPU".to_string(),
            uuid: "GPU-TEST".to_string(),
            temperature: Some(45),
            ecc_uncorrected: 1,
            pcie_width_current: Some(16),
            pcie_width_max: Some(16),
            power_draw_w: Some(100.0),
            power_limit_w: Some(700.0),
        });

        registry.observe_report(&report);
        registry.observe_evaluation("gpu_health", 0.0001);

        let text = registry.render().unwrap();
        assert!(text.contains("gpudiag_status 2"));
        assert!(text.contains("gpudiag_gpu_temperature_celsius"));
        assert!(text.contains("GPU-TEST"));
        assert!(text.contains("gpudiag_evaluation_duration_seconds"));
    }
}
