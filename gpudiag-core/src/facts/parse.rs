//! Parsers for system tool output
//!
//! Pure functions turning captured text into fact values. Lines that do not
//! parse are dropped here; the evaluators deal with values that parse as
//! text but not as numbers.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    ComputeProcess, GpuInventory, GpuTelemetry, LinkErrorCategory, LinkErrorCounter, LinkState,
};

static CUDA_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CUDA Version:\s*(\d+\.\d+)").unwrap());

static FABRIC_MANAGER_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)version\s+is\s*:\s*(\d+\.\d+\.\d+)").unwrap());

static NVCC_RELEASE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"release (\d+\.\d+)").unwrap());

static GPU_HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*GPU (\d+):").unwrap());

static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*Link (\d+):\s*(.*)$").unwrap());

static LINK_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(Replay|Recovery|CRC|Data|Fatal)\b[^:\n]*:\s*(\d+)").unwrap()
});

static PORT_STATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(PORT_[A-Z_]+)\b").unwrap());

/// Tag carried by GPU driver fault lines in the kernel log
pub const XID_TAG: &str = "NVRM: Xid";

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Driver version column, one line per GPU
pub fn parse_driver_versions(output: &str) -> Vec<String> {
    non_empty_lines(output).map(str::to_string).collect()
}

/// Maximum CUDA version from the nvidia-smi banner
pub fn parse_cuda_driver_version(output: &str) -> Option<String> {
    CUDA_VERSION_RE
        .captures(output)
        .map(|cap| cap[1].to_string())
}

/// Version from `nv-fabricmanager --version`
pub fn parse_fabric_manager_version(output: &str) -> Option<String> {
    FABRIC_MANAGER_VERSION_RE
        .captures(output)
        .map(|cap| cap[1].to_string())
}

/// Release from `nvcc --version`
pub fn parse_nvcc_release(output: &str) -> Option<String> {
    NVCC_RELEASE_RE
        .captures(output)
        .map(|cap| cap[1].to_string())
}

/// Count NVIDIA VGA/3D controllers in `lspci` output.
///
/// Lines look like `<slot> <class>: <vendor and device>`; the class is
/// matched on its own since slot addresses can contain `3d`.
pub fn count_nvidia_bus_devices(output: &str) -> u32 {
    non_empty_lines(output)
        .filter_map(|line| line.split_once(char::is_whitespace))
        .filter_map(|(_slot, rest)| rest.split_once(':'))
        .filter(|(class, device)| {
            let class = class.to_ascii_lowercase();
            (class.contains("vga") || class.contains("3d"))
                && device.to_ascii_lowercase().contains("nvidia")
        })
        .count() as u32
}

/// Whether `systemctl list-unit-files <unit>` output lists `unit`
pub fn unit_file_listed(output: &str, unit: &str) -> bool {
    non_empty_lines(output).any(|line| line.split_whitespace().next() == Some(unit))
}

/// Parse `--query-gpu=index,name,uuid,temperature.gpu,power.draw,power.limit,
/// pcie.link.width.current,pcie.link.width.max` CSV output.
///
/// Every non-blank line counts as a driver-visible GPU, but only lines with
/// all eight fields become telemetry rows.
pub fn parse_gpu_inventory(output: &str) -> GpuInventory {
    let mut inventory = GpuInventory::default();

    for line in non_empty_lines(output) {
        inventory.visible_count += 1;

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 8 {
            tracing::debug!(line = %line, "Skipping malformed GPU telemetry row");
            continue;
        }

        inventory.gpus.push(GpuTelemetry {
            index: parts[0].to_string(),
            name: parts[1].to_string(),
            uuid: parts[2].to_string(),
            temperature: parts[3].to_string(),
            power_draw: parts[4].to_string(),
            power_limit: parts[5].to_string(),
            pcie_width_current: parts[6].to_string(),
            pcie_width_max: parts[7].to_string(),
            ecc_uncorrected: None,
        });
    }

    inventory
}

/// Parse `--query-compute-apps=pid,used_memory` CSV output
pub fn parse_compute_apps(output: &str) -> Vec<ComputeProcess> {
    non_empty_lines(output)
        .filter_map(|line| {
            let mut parts = line.split(',').map(str::trim);
            let pid = parts.next()?.parse::<u32>().ok()?;
            let used_memory = parts.next()?;
            Some(ComputeProcess::new(pid, used_memory))
        })
        .collect()
}

/// Parse `nvidia-smi nvlink -s`
pub fn parse_nvlink_states(output: &str) -> Vec<LinkState> {
    let mut gpu = None;
    let mut states = Vec::new();

    for line in output.lines() {
        if let Some(cap) = GPU_HEADER_RE.captures(line) {
            gpu = cap[1].parse().ok();
            continue;
        }
        if let Some(cap) = LINK_RE.captures(line) {
            if let Ok(link) = cap[1].parse() {
                states.push(LinkState {
                    gpu,
                    link,
                    state: cap[2].trim().to_string(),
                });
            }
        }
    }

    states
}

/// Parse `nvidia-smi nvlink -e`.
///
/// Handles both the one-line (`Link 0: Replay Errors: 0`) and the nested
/// layout where counters follow a bare `Link 0:` line.
pub fn parse_nvlink_errors(output: &str) -> Vec<LinkErrorCounter> {
    let mut gpu = None;
    let mut link = None;
    let mut counters = Vec::new();

    for line in output.lines() {
        if let Some(cap) = GPU_HEADER_RE.captures(line) {
            gpu = cap[1].parse().ok();
            link = None;
            continue;
        }

        let rest = match LINK_RE.captures(line) {
            Some(cap) => {
                link = cap[1].parse().ok();
                cap.get(2).map_or("", |m| m.as_str())
            }
            None => line,
        };

        if let Some(cap) = LINK_ERROR_RE.captures(rest) {
            let category = LinkErrorCategory::from_label(&cap[1]);
            let count = cap[2].parse::<u64>().ok();
            if let (Some(category), Some(count)) = (category, count) {
                counters.push(LinkErrorCounter {
                    gpu,
                    link,
                    category,
                    count,
                });
            }
        }
    }

    counters
}

/// Keep only kernel log lines carrying the Xid tag
pub fn filter_xid_lines(output: &str) -> Vec<String> {
    let tag = XID_TAG.to_ascii_lowercase();
    non_empty_lines(output)
        .filter(|l| l.to_ascii_lowercase().contains(&tag))
        .map(str::to_string)
        .collect()
}

/// Port states from `ibv_devinfo`
pub fn parse_port_states(output: &str) -> Vec<String> {
    PORT_STATE_RE
        .captures_iter(output)
        .map(|cap| cap[1].to_string())
        .collect()
}
