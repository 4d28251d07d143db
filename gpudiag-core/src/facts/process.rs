//! OS process table liveness

use std::path::{Path, PathBuf};

/// Liveness predicate over the OS process table
pub trait ProcessTable: Send + Sync {
    /// Whether the OS still tracks `pid`
    fn is_running(&self, pid: u32) -> bool;

    /// Human-readable evidence that `pid` is gone
    fn evidence(&self, pid: u32) -> String {
        format!("PID {} not found in process table", pid)
    }
}

impl<F> ProcessTable for F
where
    F: Fn(u32) -> bool + Send + Sync,
{
    fn is_running(&self, pid: u32) -> bool {
        self(pid)
    }
}

/// Process table backed by procfs
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pid_path(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessTable for ProcFs {
    fn is_running(&self, pid: u32) -> bool {
        self.pid_path(pid).exists()
    }

    fn evidence(&self, pid: u32) -> String {
        format!("{} does not exist", self.pid_path(pid).display())
    }
}
