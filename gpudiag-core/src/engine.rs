//! Diagnostic engine
//!
//! Runs the evaluators over one fact snapshot and folds their output into a
//! single report. Evaluators are independent; in parallel mode each runs on
//! its own task and a single owner of the aggregator receives results over
//! a channel. A panicking evaluator aborts the pass in either mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::aggregator::IssueAggregator;
use crate::evaluators::{
    Evaluation, EvaluationConfig, Evaluator, GpuHealthEvaluator, KernelLogEvaluator,
    LinkEvaluator, NetworkEvaluator, VersionEvaluator, ZombieProcessEvaluator,
};
use crate::facts::{FactProvider, FactSnapshot, ProcessTable};
use crate::metrics::MetricsRegistry;
use crate::report::DiagnosticReport;

/// How evaluators are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One after another, in registration order
    #[default]
    Sequential,
    /// One task per evaluator
    Parallel,
}

/// Evaluates fact snapshots into diagnostic reports
pub struct DiagnosticEngine {
    evaluators: Vec<Arc<dyn Evaluator>>,
    mode: ExecutionMode,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl DiagnosticEngine {
    /// Create an engine over the given evaluators
    pub fn new(evaluators: Vec<Arc<dyn Evaluator>>) -> Self {
        Self {
            evaluators,
            mode: ExecutionMode::default(),
            metrics: None,
        }
    }

    /// Engine with the six standard evaluators in canonical order
    pub fn standard(config: EvaluationConfig, processes: Arc<dyn ProcessTable>) -> Self {
        Self::new(vec![
            Arc::new(VersionEvaluator::new()),
            Arc::new(GpuHealthEvaluator::new(config.temperature_threshold)),
            Arc::new(ZombieProcessEvaluator::new(processes)),
            Arc::new(LinkEvaluator::new()),
            Arc::new(KernelLogEvaluator::new(config.xid_tail)),
            Arc::new(NetworkEvaluator::new()),
        ])
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Names of the registered evaluators, in order
    pub fn evaluator_names(&self) -> Vec<&'static str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    /// Collect facts from `provider` and evaluate them
    pub async fn diagnose(&self, provider: &dyn FactProvider) -> DiagnosticReport {
        let facts = FactSnapshot::collect(provider).await;
        self.run(facts).await
    }

    /// Evaluate a fact snapshot
    pub async fn run(&self, facts: FactSnapshot) -> DiagnosticReport {
        info!(
            mode = ?self.mode,
            evaluators = self.evaluators.len(),
            "Starting evaluation pass"
        );
        let start = Instant::now();

        let report = match self.mode {
            ExecutionMode::Sequential => self.run_sequential(&facts),
            ExecutionMode::Parallel => self.run_parallel(Arc::new(facts)).await,
        };

        info!(
            status = %report.status,
            issues = report.issues.len(),
            elapsed = %humantime::format_duration(start.elapsed()),
            "Evaluation pass complete"
        );
        report
    }

    fn run_sequential(&self, facts: &FactSnapshot) -> DiagnosticReport {
        let mut aggregator = IssueAggregator::new();
        for evaluator in &self.evaluators {
            let (evaluation, elapsed) = timed(evaluator.as_ref(), facts);
            self.observe(evaluation.evaluator, elapsed);
            aggregator.absorb(evaluation);
        }
        aggregator.into_report()
    }

    async fn run_parallel(&self, facts: Arc<FactSnapshot>) -> DiagnosticReport {
        let (tx, mut rx) = mpsc::channel::<(Evaluation, Duration)>(self.evaluators.len().max(1));

        let handles: Vec<_> = self
            .evaluators
            .iter()
            .map(|evaluator| {
                let evaluator = Arc::clone(evaluator);
                let facts = Arc::clone(&facts);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = timed(evaluator.as_ref(), &facts);
                    if tx.send(result).await.is_err() {
                        error!(evaluator = evaluator.name(), "Aggregator gone, dropping evaluation");
                    }
                })
            })
            .collect();
        drop(tx);

        // Only this task touches the aggregator
        let mut aggregator = IssueAggregator::new();
        while let Some((evaluation, elapsed)) = rx.recv().await {
            self.observe(evaluation.evaluator, elapsed);
            aggregator.absorb(evaluation);
        }

        // A check that never ran must not read as a pass
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    error!(error = %e, "Evaluator panicked, aborting pass");
                    std::panic::resume_unwind(e.into_panic());
                }
                Err(e) => error!(error = %e, "Evaluator task cancelled"),
            }
        }

        aggregator.into_report()
    }

    fn observe(&self, evaluator: &str, elapsed: Duration) {
        debug!(evaluator, elapsed = ?elapsed, "Evaluator finished");
        if let Some(metrics) = &self.metrics {
            metrics.observe_evaluation(evaluator, elapsed.as_secs_f64());
        }
    }
}

fn timed(evaluator: &dyn Evaluator, facts: &FactSnapshot) -> (Evaluation, Duration) {
    let start = Instant::now();
    let evaluation = evaluator.evaluate(facts);
    (evaluation, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluators::Section;
    use crate::facts::{
        ComputeProcess, LinkState, MockFactProvider, NetworkFacts, ServiceState, VersionFacts,
    };
    use crate::report::{Issue, IssueLevel, Severity};

    fn engine() -> DiagnosticEngine {
        DiagnosticEngine::standard(EvaluationConfig::default(), Arc::new(|_pid: u32| true))
    }

    fn sorted_messages(issues: &[Issue]) -> Vec<String> {
        let mut messages: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
        messages.sort();
        messages
    }

    #[test]
    fn test_standard_evaluator_order() {
        assert_eq!(
            engine().evaluator_names(),
            vec!["versions", "gpu_health", "zombie_processes", "nvlink", "kernel_log", "network"]
        );
    }

    #[tokio::test]
    async fn test_healthy_node_passes() {
        let report = engine().diagnose(&MockFactProvider::new()).await;

        assert_eq!(report.status, Severity::Pass);
        assert!(report.issues.is_empty());
        assert_eq!(report.gpu_info.len(), 2);
        assert_eq!(report.network_info.active_ports, Some(2));
        assert!(report.version_compatibility.is_some());
    }

    #[tokio::test]
    async fn test_inactive_link_and_ecc_fail() {
        let mut gpu = MockFactProvider::healthy_gpu(0);
        gpu.ecc_uncorrected = Some("3".to_string());
        let mock = MockFactProvider::new()
            .with_gpu(gpu)
            .with_link_states(vec![LinkState {
                gpu: Some(1),
                link: 5,
                state: "<inactive>".to_string(),
            }]);

        let report = engine().diagnose(&mock).await;

        assert_eq!(report.status, Severity::Fail);
        assert_eq!(report.issues.len(), 2);
        assert!(report
            .issues
            .iter()
            .any(|i| i.level() == IssueLevel::Warning && i.message().contains("Inactive")));
        assert!(report
            .issues
            .iter()
            .any(|i| i.level() == IssueLevel::Fail && i.message().contains("ECC")));
    }

    #[tokio::test]
    async fn test_zombie_reaches_report() {
        let mock = MockFactProvider::new()
            .with_compute_processes(vec![ComputeProcess::new(1234, "4096")]);
        let engine =
            DiagnosticEngine::standard(EvaluationConfig::default(), Arc::new(|_pid: u32| false));

        let report = engine.diagnose(&mock).await;
        assert_eq!(report.status, Severity::Fail);
        assert_eq!(report.zombie_processes.len(), 1);
        assert_eq!(report.zombie_processes[0].pid, 1234);
    }

    #[tokio::test]
    async fn test_failed_probes_still_produce_report() {
        let mock = MockFactProvider::new();
        mock.set_fail_probes(true);

        let report = engine().diagnose(&mock).await;

        // Only the empty-bus rule can fire without facts
        assert_eq!(report.status, Severity::Fail);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].message().contains("No NVIDIA GPUs found"));
        assert!(report.xid_errors.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_matches_sequential() {
        let mut gpu = MockFactProvider::healthy_gpu(1);
        gpu.temperature = "92".to_string();
        gpu.pcie_width_current = "4".to_string();
        let mock = MockFactProvider::new()
            .with_gpu(gpu)
            .with_versions(VersionFacts {
                driver_versions: vec!["550.90.07".to_string(); 2],
                fabric_manager_version: None,
                fabric_manager_service: ServiceState::Inactive,
                nvcc_version: None,
                cuda_driver_version: None,
            })
            .with_xid_lines(vec![
                "NVRM: Xid (PCI:0000:17:00): 79, pid=1, GPU has fallen off the bus.".to_string(),
            ])
            .with_network(NetworkFacts {
                port_states: Some(vec!["PORT_DOWN".to_string()]),
                adapter_count: None,
            });
        let facts = FactSnapshot::collect(&mock).await;

        let sequential = engine().run(facts.clone()).await;
        let parallel = engine()
            .with_mode(ExecutionMode::Parallel)
            .with_metrics(Arc::new(MetricsRegistry::new()))
            .run(facts)
            .await;

        assert_eq!(sequential.status, Severity::Fail);
        assert_eq!(parallel.status, sequential.status);
        assert_eq!(
            sorted_messages(&parallel.issues),
            sorted_messages(&sequential.issues)
        );
        assert_eq!(parallel.gpu_info, sequential.gpu_info);
        assert_eq!(parallel.network_info, sequential.network_info);

        // Per-evaluator order survives: bandwidth before temperature for GPU 1
        let gpu1: Vec<&Issue> = parallel
            .issues
            .iter()
            .filter(|i| i.message().starts_with("GPU 1"))
            .collect();
        assert_eq!(gpu1.len(), 2);
        assert!(gpu1[0].message().contains("Bandwidth"));
        assert!(gpu1[1].message().contains("Temperature"));
    }

    struct FailThenPanic;

    impl Evaluator for FailThenPanic {
        fn name(&self) -> &'static str {
            "fail_then_panic"
        }

        fn evaluate(&self, _facts: &FactSnapshot) -> Evaluation {
            let mut evaluation = Evaluation::new(self.name(), Section::Empty);
            evaluation.push(Issue::fail("raised before crashing"));
            panic!("evaluator crashed");
        }
    }

    #[tokio::test]
    #[should_panic(expected = "evaluator crashed")]
    async fn test_parallel_evaluator_panic_aborts_pass() {
        let engine = DiagnosticEngine::new(vec![Arc::new(FailThenPanic)])
            .with_mode(ExecutionMode::Parallel);
        engine.run(FactSnapshot::default()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[should_panic(expected = "evaluator crashed")]
    async fn test_parallel_panic_among_healthy_evaluators() {
        let mut evaluators: Vec<Arc<dyn Evaluator>> = vec![
            Arc::new(VersionEvaluator::new()),
            Arc::new(NetworkEvaluator::new()),
        ];
        evaluators.push(Arc::new(FailThenPanic));
        let engine = DiagnosticEngine::new(evaluators).with_mode(ExecutionMode::Parallel);

        engine.diagnose(&MockFactProvider::new()).await;
    }

    #[tokio::test]
    #[should_panic(expected = "evaluator crashed")]
    async fn test_sequential_evaluator_panic_aborts_pass() {
        let engine = DiagnosticEngine::new(vec![Arc::new(FailThenPanic)]);
        engine.run(FactSnapshot::default()).await;
    }

    #[tokio::test]
    async fn test_custom_evaluator_set() {
        struct AlwaysWarn;

        impl Evaluator for AlwaysWarn {
            fn name(&self) -> &'static str {
                "always_warn"
            }

            fn evaluate(&self, _facts: &FactSnapshot) -> Evaluation {
                let mut evaluation = Evaluation::new(self.name(), Section::Empty);
                evaluation.push(Issue::warning("synthetic"));
                evaluation
            }
        }

        let engine = DiagnosticEngine::new(vec![Arc::new(AlwaysWarn), Arc::new(AlwaysWarn)])
            .with_mode(ExecutionMode::Parallel);
        let report = engine.run(FactSnapshot::default()).await;

        assert_eq!(report.status, Severity::Warning);
        assert_eq!(report.issues.len(), 2);
    }
}
