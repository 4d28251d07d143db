//! Fact acquisition layer
//!
//! Provides the `FactProvider` abstraction over the host's GPU tooling and
//! the immutable `FactSnapshot` the evaluators run on.

mod command;
mod interface;
mod mock;
mod nvml;
pub mod parse;
mod process;
mod system;

pub use command::CommandRunner;
pub use interface::*;
pub use mock::MockFactProvider;
pub use nvml::NvmlProbe;
pub use process::{ProcFs, ProcessTable};
pub use system::{ProviderSettings, SystemFactProvider};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Create a fact provider based on the fact source
pub fn create_fact_provider(
    source: FactSource,
    settings: ProviderSettings,
) -> Result<Arc<dyn FactProvider>, FactError> {
    match source {
        FactSource::Auto => match SystemFactProvider::with_nvml(settings.clone()) {
            Ok(provider) => {
                tracing::info!("Using NVML for GPU facts");
                Ok(Arc::new(provider))
            }
            Err(e) => {
                warn!(error = %e, "NVML not available, using nvidia-smi");
                Ok(Arc::new(SystemFactProvider::with_smi(settings)))
            }
        },
        FactSource::Nvml => Ok(Arc::new(SystemFactProvider::with_nvml(settings)?)),
        FactSource::Smi => Ok(Arc::new(SystemFactProvider::with_smi(settings))),
    }
}

/// Every fact gathered for one diagnostic pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactSnapshot {
    pub versions: VersionFacts,
    /// NVIDIA controllers on the PCIe bus
    pub physical_gpu_count: Option<u32>,
    pub gpu_inventory: Option<GpuInventory>,
    pub compute_processes: Option<Vec<ComputeProcess>>,
    pub links: Option<LinkFacts>,
    /// Xid-tagged kernel log lines, oldest first
    pub xid_lines: Option<Vec<String>>,
    pub network: NetworkFacts,
}

/// Turn an acquisition failure into absence
fn absent_on_error<T>(category: &str, result: Result<T, FactError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(category, error = %e, "Fact acquisition failed, treating as absent");
            None
        }
    }
}

impl FactSnapshot {
    /// Query every fact category concurrently.
    ///
    /// Acquisition failures are logged and become absence; this never fails.
    pub async fn collect(provider: &dyn FactProvider) -> Self {
        let (
            driver_versions,
            cuda_driver_version,
            fabric_manager_service,
            fabric_manager_version,
            nvcc_version,
            physical_gpu_count,
            gpu_inventory,
            compute_processes,
            links,
            xid_lines,
            network,
        ) = futures::join!(
            provider.driver_versions(),
            provider.cuda_driver_version(),
            provider.fabric_manager_service(),
            provider.fabric_manager_version(),
            provider.nvcc_version(),
            provider.physical_gpu_count(),
            provider.gpu_inventory(),
            provider.compute_processes(),
            provider.link_facts(),
            provider.xid_log_lines(),
            provider.network_facts(),
        );

        let snapshot = Self {
            versions: VersionFacts {
                driver_versions: absent_on_error("driver_versions", driver_versions)
                    .flatten()
                    .unwrap_or_default(),
                fabric_manager_version: absent_on_error(
                    "fabric_manager_version",
                    fabric_manager_version,
                )
                .flatten(),
                fabric_manager_service: absent_on_error(
                    "fabric_manager_service",
                    fabric_manager_service,
                )
                .unwrap_or_default(),
                nvcc_version: absent_on_error("nvcc_version", nvcc_version).flatten(),
                cuda_driver_version: absent_on_error("cuda_driver_version", cuda_driver_version)
                    .flatten(),
            },
            physical_gpu_count: absent_on_error("physical_gpu_count", physical_gpu_count)
                .flatten(),
            gpu_inventory: absent_on_error("gpu_inventory", gpu_inventory).flatten(),
            compute_processes: absent_on_error("compute_processes", compute_processes).flatten(),
            links: absent_on_error("link_facts", links).flatten(),
            xid_lines: absent_on_error("xid_log_lines", xid_lines).flatten(),
            network: absent_on_error("network_facts", network).unwrap_or_default(),
        };

        debug!(
            physical = ?snapshot.physical_gpu_count,
            visible = ?snapshot.gpu_inventory.as_ref().map(|i| i.visible_count),
            "Fact snapshot collected"
        );
        snapshot
    }
}
