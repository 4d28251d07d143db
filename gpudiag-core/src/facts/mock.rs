//! Mock fact provider for testing

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{
    ComputeProcess, FactError, FactProvider, GpuInventory, GpuTelemetry, LinkErrorCounter,
    LinkFacts, LinkState, NetworkFacts, ServiceState, VersionFacts,
};

/// Synthetic fact provider
pub struct MockFactProvider {
    versions: VersionFacts,
    physical_gpu_count: Option<u32>,
    inventory: Option<GpuInventory>,
    compute_processes: Option<Vec<ComputeProcess>>,
    links: Option<LinkFacts>,
    xid_lines: Option<Vec<String>>,
    network: NetworkFacts,
    /// Configurable acquisition failure simulation
    pub fail_probes: AtomicBool,
}

impl MockFactProvider {
    /// A healthy node with 2 GPUs
    pub fn new() -> Self {
        Self::with_gpu_count(2)
    }

    /// A healthy node with the specified number of GPUs
    pub fn with_gpu_count(count: u32) -> Self {
        let gpus: Vec<GpuTelemetry> = (0..count).map(Self::healthy_gpu).collect();
        let states = (0..count)
            .flat_map(|gpu| {
                (0..2).map(move |link| LinkState {
                    gpu: Some(gpu),
                    link,
                    state: "26.562 GB/s".to_string(),
                })
            })
            .collect();

        Self {
            versions: VersionFacts {
                driver_versions: vec!["550.90.07".to_string(); count as usize],
                fabric_manager_version: Some("550.90.07".to_string()),
                fabric_manager_service: ServiceState::Active,
                nvcc_version: Some("12.2".to_string()),
                cuda_driver_version: Some("12.4".to_string()),
            },
            physical_gpu_count: Some(count),
            inventory: Some(GpuInventory {
                visible_count: count,
                gpus,
            }),
            compute_processes: Some(Vec::new()),
            links: Some(LinkFacts {
                states,
                error_counters: Some(Vec::new()),
            }),
            xid_lines: None,
            network: NetworkFacts {
                port_states: Some(vec!["PORT_ACTIVE".to_string(); 2]),
                adapter_count: None,
            },
            fail_probes: AtomicBool::new(false),
        }
    }

    /// A node where every fact category is absent
    pub fn empty() -> Self {
        Self {
            versions: VersionFacts::default(),
            physical_gpu_count: None,
            inventory: None,
            compute_processes: None,
            links: None,
            xid_lines: None,
            network: NetworkFacts::default(),
            fail_probes: AtomicBool::new(false),
        }
    }

    /// Telemetry for a healthy GPU
    pub fn healthy_gpu(index: u32) -> GpuTelemetry {
        GpuTelemetry {
            index: index.to_string(),
            name: "NVIDIA H100 80GB HBM3".to_string(),
            uuid: format!("GPU-MOCK-{:04}", index),
            temperature: "45".to_string(),
            power_draw: "120.50".to_string(),
            power_limit: "700.00".to_string(),
            pcie_width_current: "16".to_string(),
            pcie_width_max: "16".to_string(),
            ecc_uncorrected: Some("0".to_string()),
        }
    }

    pub fn with_versions(mut self, versions: VersionFacts) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_physical_gpu_count(mut self, count: Option<u32>) -> Self {
        self.physical_gpu_count = count;
        self
    }

    pub fn with_inventory(mut self, inventory: Option<GpuInventory>) -> Self {
        self.inventory = inventory;
        self
    }

    /// Replace the telemetry of one GPU
    pub fn with_gpu(mut self, telemetry: GpuTelemetry) -> Self {
        if let Some(inventory) = &mut self.inventory {
            match inventory.gpus.iter_mut().find(|g| g.index == telemetry.index) {
                Some(gpu) => *gpu = telemetry,
                None => {
                    inventory.visible_count += 1;
                    inventory.gpus.push(telemetry);
                }
            }
        }
        self
    }

    pub fn with_compute_processes(mut self, processes: Vec<ComputeProcess>) -> Self {
        self.compute_processes = Some(processes);
        self
    }

    pub fn with_link_states(mut self, states: Vec<LinkState>) -> Self {
        self.links.get_or_insert_with(LinkFacts::default).states = states;
        self
    }

    pub fn with_link_errors(mut self, counters: Vec<LinkErrorCounter>) -> Self {
        self.links.get_or_insert_with(LinkFacts::default).error_counters = Some(counters);
        self
    }

    pub fn with_xid_lines(mut self, lines: Vec<String>) -> Self {
        self.xid_lines = Some(lines);
        self
    }

    pub fn with_network(mut self, network: NetworkFacts) -> Self {
        self.network = network;
        self
    }

    /// Set whether every probe should fail
    pub fn set_fail_probes(&self, fail: bool) {
        self.fail_probes.store(fail, Ordering::SeqCst);
    }

    fn check_probe(&self, probe: &str) -> Result<(), FactError> {
        if self.fail_probes.load(Ordering::SeqCst) {
            Err(FactError::Spawn {
                command: probe.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "mock failure"),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for MockFactProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FactProvider for MockFactProvider {
    async fn driver_versions(&self) -> Result<Option<Vec<String>>, FactError> {
        self.check_probe("driver_versions")?;
        let versions = &self.versions.driver_versions;
        Ok((!versions.is_empty()).then(|| versions.clone()))
    }

    async fn cuda_driver_version(&self) -> Result<Option<String>, FactError> {
        self.check_probe("cuda_driver_version")?;
        Ok(self.versions.cuda_driver_version.clone())
    }

    async fn fabric_manager_service(&self) -> Result<ServiceState, FactError> {
        self.check_probe("fabric_manager_service")?;
        Ok(self.versions.fabric_manager_service)
    }

    async fn fabric_manager_version(&self) -> Result<Option<String>, FactError> {
        self.check_probe("fabric_manager_version")?;
        Ok(self.versions.fabric_manager_version.clone())
    }

    async fn nvcc_version(&self) -> Result<Option<String>, FactError> {
        self.check_probe("nvcc_version")?;
        Ok(self.versions.nvcc_version.clone())
    }

    async fn physical_gpu_count(&self) -> Result<Option<u32>, FactError> {
        self.check_probe("physical_gpu_count")?;
        Ok(self.physical_gpu_count)
    }

    async fn gpu_inventory(&self) -> Result<Option<GpuInventory>, FactError> {
        self.check_probe("gpu_inventory")?;
        Ok(self.inventory.clone())
    }

    async fn compute_processes(&self) -> Result<Option<Vec<ComputeProcess>>, FactError> {
        self.check_probe("compute_processes")?;
        Ok(self.compute_processes.clone())
    }

    async fn link_facts(&self) -> Result<Option<LinkFacts>, FactError> {
        self.check_probe("link_facts")?;
        Ok(self.links.clone())
    }

    async fn xid_log_lines(&self) -> Result<Option<Vec<String>>, FactError> {
        self.check_probe("xid_log_lines")?;
        Ok(self.xid_lines.clone())
    }

    async fn network_facts(&self) -> Result<NetworkFacts, FactError> {
        self.check_probe("network_facts")?;
        Ok(self.network.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_healthy_node() {
        let mock = MockFactProvider::with_gpu_count(4);
        let inventory = mock.gpu_inventory().await.unwrap().unwrap();
        assert_eq!(inventory.visible_count, 4);
        assert_eq!(mock.physical_gpu_count().await.unwrap(), Some(4));
        assert_eq!(mock.driver_versions().await.unwrap().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_with_gpu_replaces_row() {
        let mut hot = MockFactProvider::healthy_gpu(1);
        hot.temperature = "91".to_string();
        let mock = MockFactProvider::new().with_gpu(hot);

        let inventory = mock.gpu_inventory().await.unwrap().unwrap();
        assert_eq!(inventory.visible_count, 2);
        assert_eq!(inventory.gpus[1].temperature, "91");
    }

    #[tokio::test]
    async fn test_mock_fail_probes() {
        let mock = MockFactProvider::new();
        mock.set_fail_probes(true);
        assert!(mock.gpu_inventory().await.is_err());
        assert!(mock.network_facts().await.is_err());

        mock.set_fail_probes(false);
        assert!(mock.gpu_inventory().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_empty() {
        let mock = MockFactProvider::empty();
        assert!(mock.driver_versions().await.unwrap().is_none());
        assert_eq!(
            mock.fabric_manager_service().await.unwrap(),
            ServiceState::NotInstalled
        );
        assert!(mock.link_facts().await.unwrap().is_none());
    }
}
