//! Zombie GPU process detection
//!
//! Flags processes the driver still lists as holding GPU memory but which
//! no longer exist in the OS process table. Detection only; nothing is
//! killed.

use std::sync::Arc;

use tracing::trace;

use super::{Evaluation, Evaluator, Section};
use crate::facts::{ComputeProcess, FactSnapshot, ProcessTable};
use crate::report::{Issue, ZombieRecord};

/// Cross-references GPU memory holders against the process table
pub struct ZombieProcessEvaluator {
    processes: Arc<dyn ProcessTable>,
}

impl ZombieProcessEvaluator {
    pub fn new(processes: Arc<dyn ProcessTable>) -> Self {
        Self { processes }
    }

    pub fn check(&self, holders: Option<&[ComputeProcess]>) -> Evaluation {
        let Some(holders) = holders else {
            return Evaluation::empty(self.name());
        };

        let mut zombies = Vec::new();
        let mut issues = Vec::new();

        for holder in holders {
            if self.processes.is_running(holder.pid) {
                trace!(pid = holder.pid, "GPU process alive");
                continue;
            }

            zombies.push(ZombieRecord {
                pid: holder.pid,
                gpu_memory_usage: format!("{} MiB", holder.used_memory),
                evidence: self.processes.evidence(holder.pid),
            });
            issues.push(Issue::fail(format!(
                "Zombie Process Detected: PID {} is occupying {}MiB vRAM but does not exist in system.",
                holder.pid, holder.used_memory
            )));
        }

        let mut evaluation = Evaluation::new(self.name(), Section::Zombies(zombies));
        for issue in issues {
            evaluation.push(issue);
        }
        evaluation
    }
}

impl Evaluator for ZombieProcessEvaluator {
    fn name(&self) -> &'static str {
        "zombie_processes"
    }

    fn evaluate(&self, facts: &FactSnapshot) -> Evaluation {
        self.check(facts.compute_processes.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(alive: bool) -> ZombieProcessEvaluator {
        ZombieProcessEvaluator::new(Arc::new(move |_pid: u32| alive))
    }

    #[test]
    fn test_dead_holder_is_zombie() {
        let holders = [ComputeProcess::new(1234, "4096")];
        let result = evaluator(false).check(Some(&holders));

        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].message().contains("4096"));
        assert!(result.issues[0].message().contains("PID 1234"));

        match result.section {
            Section::Zombies(zombies) => {
                assert_eq!(zombies.len(), 1);
                assert_eq!(zombies[0].pid, 1234);
                assert_eq!(zombies[0].gpu_memory_usage, "4096 MiB");
                assert!(zombies[0].evidence.contains("1234"));
            }
            other => panic!("unexpected section {:?}", other),
        }
    }

    #[test]
    fn test_live_holder_is_ignored() {
        let holders = [ComputeProcess::new(1234, "4096")];
        let result = evaluator(true).check(Some(&holders));

        assert!(!result.has_issues());
        assert_eq!(result.section, Section::Zombies(Vec::new()));
    }

    #[test]
    fn test_only_dead_pids_flagged() {
        let table = Arc::new(|pid: u32| pid % 2 == 0);
        let holders = [
            ComputeProcess::new(10, "100"),
            ComputeProcess::new(11, "200"),
            ComputeProcess::new(13, "300"),
        ];
        let result = ZombieProcessEvaluator::new(table).check(Some(&holders));

        assert_eq!(result.issues.len(), 2);
        assert!(result.issues[0].message().contains("PID 11"));
        assert!(result.issues[1].message().contains("PID 13"));
    }

    #[test]
    fn test_absent_process_list() {
        let result = evaluator(false).check(None);
        assert!(!result.has_issues());
        assert_eq!(result.section, Section::Empty);
    }
}
