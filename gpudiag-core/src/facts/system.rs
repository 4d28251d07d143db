//! Production fact provider
//!
//! Probes the host with the same tools an operator would use by hand:
//! nvidia-smi, systemctl, nv-fabricmanager, nvcc, lspci, dmesg and
//! ibv_devinfo. GPU-side facts can come from NVML instead of nvidia-smi.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::command::CommandRunner;
use super::nvml::NvmlProbe;
use super::parse;
use super::{
    ComputeProcess, FactError, FactProvider, GpuInventory, LinkFacts, NetworkFacts, ServiceState,
};

const NVIDIA_SMI: &str = "nvidia-smi";
const FABRIC_MANAGER_UNIT: &str = "nvidia-fabricmanager.service";
const GPU_QUERY: &str = "--query-gpu=index,name,uuid,temperature.gpu,power.draw,power.limit,\
                         pcie.link.width.current,pcie.link.width.max";

/// Settings for the system probes
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Timeout applied to every external command
    pub command_timeout: Duration,
    /// Fabric manager binary
    pub fabric_manager_path: PathBuf,
    /// Directory listing RDMA adapters
    pub infiniband_sysfs_path: PathBuf,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            fabric_manager_path: PathBuf::from("/usr/bin/nv-fabricmanager"),
            infiniband_sysfs_path: PathBuf::from("/sys/class/infiniband"),
        }
    }
}

/// Fact provider backed by the host's tools
pub struct SystemFactProvider {
    runner: CommandRunner,
    settings: ProviderSettings,
    nvml: Option<NvmlProbe>,
}

impl SystemFactProvider {
    /// Provider that reads GPU facts from nvidia-smi
    pub fn with_smi(settings: ProviderSettings) -> Self {
        Self {
            runner: CommandRunner::new(settings.command_timeout),
            settings,
            nvml: None,
        }
    }

    /// Provider that reads GPU facts from NVML
    pub fn with_nvml(settings: ProviderSettings) -> Result<Self, FactError> {
        let probe = NvmlProbe::new()?;
        Ok(Self {
            runner: CommandRunner::new(settings.command_timeout),
            settings,
            nvml: Some(probe),
        })
    }

    pub fn uses_nvml(&self) -> bool {
        self.nvml.is_some()
    }

    async fn smi(&self, args: &[&str]) -> Result<Option<String>, FactError> {
        self.runner.run(NVIDIA_SMI, args).await
    }

    async fn ecc_uncorrected(&self, index: &str) -> Result<Option<String>, FactError> {
        self.smi(&[
            "-i",
            index,
            "--query-gpu=ecc.errors.uncorrected.aggregate.total",
            "--format=csv,noheader,nounits",
        ])
        .await
    }
}

async fn count_dir_entries(path: &Path) -> Result<Option<usize>, FactError> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }

    let mut entries = tokio::fs::read_dir(path).await?;
    let mut count = 0;
    while entries.next_entry().await?.is_some() {
        count += 1;
    }
    Ok(Some(count))
}

#[async_trait]
impl FactProvider for SystemFactProvider {
    async fn driver_versions(&self) -> Result<Option<Vec<String>>, FactError> {
        if let Some(nvml) = &self.nvml {
            return nvml.driver_versions().map(Some);
        }

        let output = self
            .smi(&["--query-gpu=driver_version", "--format=csv,noheader"])
            .await?;
        Ok(output.map(|out| parse::parse_driver_versions(&out)))
    }

    async fn cuda_driver_version(&self) -> Result<Option<String>, FactError> {
        if let Some(nvml) = &self.nvml {
            return nvml.cuda_driver_version().map(Some);
        }

        let output = self.smi(&[]).await?;
        Ok(output.and_then(|out| parse::parse_cuda_driver_version(&out)))
    }

    async fn fabric_manager_service(&self) -> Result<ServiceState, FactError> {
        let is_active = self
            .runner
            .run_any_status("systemctl", &["is-active", FABRIC_MANAGER_UNIT])
            .await?;
        let state = ServiceState::from_systemctl(is_active.as_deref(), true);
        if state != ServiceState::Inactive {
            return Ok(state);
        }

        let listing = self
            .runner
            .run_any_status("systemctl", &["list-unit-files", FABRIC_MANAGER_UNIT])
            .await?;
        let installed = listing
            .as_deref()
            .map_or(false, |out| parse::unit_file_listed(out, FABRIC_MANAGER_UNIT));
        trace!(installed, "Fabric manager unit file lookup");
        Ok(ServiceState::from_systemctl(is_active.as_deref(), installed))
    }

    async fn fabric_manager_version(&self) -> Result<Option<String>, FactError> {
        let program = self.settings.fabric_manager_path.to_string_lossy();
        let output = self.runner.run(&program, &["--version"]).await?;
        Ok(output.and_then(|out| parse::parse_fabric_manager_version(&out)))
    }

    async fn nvcc_version(&self) -> Result<Option<String>, FactError> {
        let output = self.runner.run("nvcc", &["--version"]).await?;
        Ok(output.and_then(|out| parse::parse_nvcc_release(&out)))
    }

    async fn physical_gpu_count(&self) -> Result<Option<u32>, FactError> {
        let output = self.runner.run("lspci", &[]).await?;
        Ok(output.map(|out| parse::count_nvidia_bus_devices(&out)))
    }

    async fn gpu_inventory(&self) -> Result<Option<GpuInventory>, FactError> {
        if let Some(nvml) = &self.nvml {
            return nvml.inventory().map(Some);
        }

        let Some(output) = self
            .smi(&[GPU_QUERY, "--format=csv,noheader,nounits"])
            .await?
        else {
            return Ok(None);
        };

        let mut inventory = parse::parse_gpu_inventory(&output);
        for gpu in &mut inventory.gpus {
            // A failed per-GPU ECC query only leaves that counter unknown
            gpu.ecc_uncorrected = match self.ecc_uncorrected(&gpu.index).await {
                Ok(value) => value,
                Err(e) => {
                    debug!(gpu = %gpu.index, error = %e, "ECC query failed");
                    None
                }
            };
        }

        trace!(visible = inventory.visible_count, "GPU inventory collected");
        Ok(Some(inventory))
    }

    async fn compute_processes(&self) -> Result<Option<Vec<ComputeProcess>>, FactError> {
        if let Some(nvml) = &self.nvml {
            return nvml.compute_processes().map(Some);
        }

        let output = self
            .smi(&[
                "--query-compute-apps=pid,used_memory",
                "--format=csv,noheader,nounits",
            ])
            .await?;
        Ok(output.map(|out| parse::parse_compute_apps(&out)))
    }

    async fn link_facts(&self) -> Result<Option<LinkFacts>, FactError> {
        let Some(status) = self.smi(&["nvlink", "-s"]).await? else {
            return Ok(None);
        };

        let error_counters = self
            .smi(&["nvlink", "-e"])
            .await?
            .map(|out| parse::parse_nvlink_errors(&out));

        Ok(Some(LinkFacts {
            states: parse::parse_nvlink_states(&status),
            error_counters,
        }))
    }

    async fn xid_log_lines(&self) -> Result<Option<Vec<String>>, FactError> {
        let output = self.runner.run("dmesg", &["-T"]).await?;
        Ok(output
            .map(|out| parse::filter_xid_lines(&out))
            .filter(|lines| !lines.is_empty()))
    }

    async fn network_facts(&self) -> Result<NetworkFacts, FactError> {
        if let Some(output) = self.runner.run("ibv_devinfo", &[]).await? {
            return Ok(NetworkFacts {
                port_states: Some(parse::parse_port_states(&output)),
                adapter_count: None,
            });
        }

        Ok(NetworkFacts {
            port_states: None,
            adapter_count: count_dir_entries(&self.settings.infiniband_sysfs_path).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_count_dir_entries() {
        let root = std::env::temp_dir().join(format!("gpudiag-ib-{}", std::process::id()));
        tokio::fs::create_dir_all(root.join("mlx5_0")).await.unwrap();
        tokio::fs::create_dir_all(root.join("mlx5_1")).await.unwrap();

        assert_eq!(count_dir_entries(&root).await.unwrap(), Some(2));
        assert_eq!(
            count_dir_entries(&root.join("missing")).await.unwrap(),
            None
        );

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_network_falls_back_to_sysfs() {
        let settings = ProviderSettings {
            infiniband_sysfs_path: PathBuf::from("/nonexistent/gpudiag/infiniband"),
            ..ProviderSettings::default()
        };
        let provider = SystemFactProvider::with_smi(settings);
        assert!(!provider.uses_nvml());

        // Without ibv_devinfo on the test host, the sysfs path decides
        if which_ibv_devinfo().is_none() {
            let facts = provider.network_facts().await.unwrap();
            assert!(facts.port_states.is_none());
            assert!(facts.adapter_count.is_none());
        }
    }

    fn which_ibv_devinfo() -> Option<PathBuf> {
        std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join("ibv_devinfo"))
                .find(|p| p.exists())
        })
    }
}
