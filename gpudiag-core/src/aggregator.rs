//! Issue aggregation
//!
//! The aggregator owns the report while a pass runs. `record` is the only
//! way issues reach it, and it keeps `status` at the join of every severity
//! recorded so far.

use tracing::debug;

use crate::evaluators::{Evaluation, Section};
use crate::report::{DiagnosticReport, Issue, Severity};

/// Collects findings into a `DiagnosticReport`
#[derive(Debug, Default)]
pub struct IssueAggregator {
    report: DiagnosticReport,
}

impl IssueAggregator {
    pub fn new() -> Self {
        Self {
            report: DiagnosticReport::new(),
        }
    }

    /// Append an issue and raise the status to its severity if higher.
    /// Never lowers the status.
    pub fn record(&mut self, issue: Issue) {
        self.report.status = self.report.status.join(issue.severity());
        self.report.issues.push(issue);
    }

    /// Record an evaluator's issues in order, then store its section
    pub fn absorb(&mut self, evaluation: Evaluation) {
        debug!(
            evaluator = evaluation.evaluator,
            issues = evaluation.issues.len(),
            "Absorbing evaluation"
        );

        for issue in evaluation.issues {
            self.record(issue);
        }

        let report = &mut self.report;
        match evaluation.section {
            Section::Versions(versions) => report.version_compatibility = Some(versions),
            Section::GpuHealth {
                drop_detection,
                gpus,
            } => {
                report.drop_detection = Some(drop_detection);
                report.gpu_info = gpus;
            }
            Section::Zombies(zombies) => report.zombie_processes = zombies,
            Section::Links(links) => report.nvlink_status = Some(links),
            Section::KernelLog(lines) => report.xid_errors = lines,
            Section::Network(network) => report.network_info = network,
            Section::Empty => {}
        }
    }

    /// Current overall status
    pub fn status(&self) -> Severity {
        self.report.status
    }

    pub fn issues(&self) -> &[Issue] {
        &self.report.issues
    }

    pub fn report(&self) -> &DiagnosticReport {
        &self.report
    }

    pub fn into_report(self) -> DiagnosticReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{IssueLevel, LinkSection};

    #[test]
    fn test_empty_aggregator_passes() {
        let aggregator = IssueAggregator::new();
        assert_eq!(aggregator.status(), Severity::Pass);
        assert!(aggregator.issues().is_empty());
    }

    #[test]
    fn test_status_is_monotonic_supremum() {
        let sequence = [
            IssueLevel::Warning,
            IssueLevel::Fail,
            IssueLevel::Warning,
            IssueLevel::Fail,
            IssueLevel::Warning,
        ];

        let mut aggregator = IssueAggregator::new();
        let mut previous = aggregator.status();
        let mut max_seen = Severity::Pass;

        for (i, level) in sequence.iter().enumerate() {
            aggregator.record(Issue::new(*level, format!("issue {}", i)));
            max_seen = max_seen.max((*level).into());

            assert!(aggregator.status() >= previous);
            assert_eq!(aggregator.status(), max_seen);
            previous = aggregator.status();
        }

        assert_eq!(aggregator.issues().len(), sequence.len());
        assert_eq!(aggregator.issues()[2].message(), "issue 2");
    }

    #[test]
    fn test_warning_and_fail_in_either_order() {
        let warning = Issue::warning("Detected 1 Inactive NVLink(s).");
        let fail = Issue::fail("GPU 0 Detected 3 UNCORRECTED ECC errors");

        for order in [[&warning, &fail], [&fail, &warning]] {
            let mut aggregator = IssueAggregator::new();
            for issue in order {
                aggregator.record(issue.clone());
            }
            assert_eq!(aggregator.status(), Severity::Fail);
            assert!(aggregator.issues().contains(&warning));
            assert!(aggregator.issues().contains(&fail));
        }
    }

    #[test]
    fn test_absorb_records_issues_and_section() {
        let mut evaluation = Evaluation::new(
            "nvlink",
            Section::Links(LinkSection {
                inactive_links: 2,
                errors: Vec::new(),
            }),
        );
        evaluation.push(Issue::warning("Detected 2 Inactive NVLink(s)."));

        let mut aggregator = IssueAggregator::new();
        aggregator.absorb(evaluation);
        aggregator.absorb(Evaluation::empty("network"));

        let report = aggregator.into_report();
        assert_eq!(report.status, Severity::Warning);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.nvlink_status.unwrap().inactive_links, 2);
    }
}
