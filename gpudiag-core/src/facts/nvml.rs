//! NVML-backed GPU facts
//!
//! Reads driver version, telemetry and compute processes straight from the
//! NVIDIA Management Library instead of parsing nvidia-smi output.

use std::sync::Arc;

use nvml_wrapper::enum_wrappers::device::{EccCounter, MemoryError, TemperatureSensor};
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use once_cell::sync::OnceCell;
use tracing::trace;

use super::{ComputeProcess, FactError, GpuInventory, GpuTelemetry};

/// Placeholder for values NVML could not produce, matching nvidia-smi
const NOT_AVAILABLE: &str = "[N/A]";

/// Global NVML instance
static NVML: OnceCell<Arc<Nvml>> = OnceCell::new();

/// Get or initialize the global NVML instance
fn get_nvml() -> Result<&'static Arc<Nvml>, FactError> {
    NVML.get_or_try_init(|| {
        Nvml::init()
            .map(Arc::new)
            .map_err(|e| FactError::NvmlInitError(e.to_string()))
    })
}

fn query_error(e: NvmlError) -> FactError {
    FactError::NvmlQuery(e.to_string())
}

/// Format a CUDA driver version integer (e.g. 12040) as `12.4`
fn format_cuda_version(version: i32) -> String {
    format!("{}.{}", version / 1000, (version % 1000) / 10)
}

fn bytes_to_mib(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

/// NVML query handle
pub struct NvmlProbe {
    nvml: &'static Arc<Nvml>,
}

impl NvmlProbe {
    pub fn new() -> Result<Self, FactError> {
        Ok(Self { nvml: get_nvml()? })
    }

    /// Driver version, repeated once per GPU
    pub fn driver_versions(&self) -> Result<Vec<String>, FactError> {
        let version = self.nvml.sys_driver_version().map_err(query_error)?;
        let count = self.nvml.device_count().map_err(query_error)?;
        Ok(vec![version; count as usize])
    }

    /// Maximum CUDA version supported by the driver
    pub fn cuda_driver_version(&self) -> Result<String, FactError> {
        self.nvml
            .sys_cuda_driver_version()
            .map(format_cuda_version)
            .map_err(query_error)
    }

    /// Per-GPU telemetry.
    ///
    /// Fields NVML cannot report become `[N/A]` so the evaluator skips only
    /// the affected checks.
    pub fn inventory(&self) -> Result<GpuInventory, FactError> {
        let count = self.nvml.device_count().map_err(query_error)?;
        let mut gpus = Vec::with_capacity(count as usize);

        for i in 0..count {
            let device = self.nvml.device_by_index(i).map_err(query_error)?;
            let or_na = |value: Result<String, NvmlError>| {
                value.unwrap_or_else(|_| NOT_AVAILABLE.to_string())
            };

            let telemetry = GpuTelemetry {
                index: i.to_string(),
                name: or_na(device.name()),
                uuid: or_na(device.uuid()),
                temperature: or_na(
                    device
                        .temperature(TemperatureSensor::Gpu)
                        .map(|t| t.to_string()),
                ),
                power_draw: or_na(
                    device
                        .power_usage()
                        .map(|mw| format!("{:.2}", mw as f64 / 1000.0)),
                ),
                power_limit: or_na(
                    device
                        .power_management_limit()
                        .map(|mw| format!("{:.2}", mw as f64 / 1000.0)),
                ),
                pcie_width_current: or_na(device.current_pcie_link_width().map(|w| w.to_string())),
                pcie_width_max: or_na(device.max_pcie_link_width().map(|w| w.to_string())),
                ecc_uncorrected: device
                    .total_ecc_errors(MemoryError::Uncorrected, EccCounter::Aggregate)
                    .ok()
                    .map(|c| c.to_string()),
            };

            trace!(gpu = i, telemetry = ?telemetry, "NVML telemetry");
            gpus.push(telemetry);
        }

        Ok(GpuInventory {
            visible_count: count,
            gpus,
        })
    }

    /// Processes holding GPU memory, across all GPUs
    pub fn compute_processes(&self) -> Result<Vec<ComputeProcess>, FactError> {
        let count = self.nvml.device_count().map_err(query_error)?;
        let mut processes = Vec::new();

        for i in 0..count {
            let device = self.nvml.device_by_index(i).map_err(query_error)?;
            for info in device.running_compute_processes().map_err(query_error)? {
                let used_memory = match info.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => bytes_to_mib(bytes).to_string(),
                    UsedGpuMemory::Unavailable => NOT_AVAILABLE.to_string(),
                };
                processes.push(ComputeProcess::new(info.pid, used_memory));
            }
        }

        Ok(processes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cuda_version() {
        assert_eq!(format_cuda_version(12040), "12.4");
        assert_eq!(format_cuda_version(11080), "11.8");
        assert_eq!(format_cuda_version(12000), "12.0");
    }

    #[test]
    fn test_bytes_to_mib() {
        assert_eq!(bytes_to_mib(4096 * 1024 * 1024), 4096);
        assert_eq!(bytes_to_mib(1024), 0);
    }
}
