//! Driver, fabric manager and CUDA version consistency

use std::collections::BTreeSet;

use tracing::debug;

use super::{Evaluation, Evaluator, Section};
use crate::facts::{FactSnapshot, VersionFacts};
use crate::report::{Issue, VersionSection};

const UNKNOWN: &str = "unknown";
const NOT_FOUND: &str = "not_found";

/// Leading (major) component of a dotted version string
fn major_component(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// Checks version consistency across the driver stack
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionEvaluator;

impl VersionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, facts: &VersionFacts) -> Evaluation {
        let driver_version = facts.driver_versions.first().cloned();
        let mut evaluation = Evaluation::new(
            self.name(),
            Section::Versions(VersionSection {
                driver_version: driver_version.clone(),
                fabric_manager_version: facts
                    .fabric_manager_version
                    .clone()
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                fabric_manager_service: facts.fabric_manager_service,
                cuda_driver_version: facts.cuda_driver_version.clone(),
                nvcc_version: facts
                    .nvcc_version
                    .clone()
                    .unwrap_or_else(|| NOT_FOUND.to_string()),
            }),
        );

        let distinct: BTreeSet<&str> = facts.driver_versions.iter().map(String::as_str).collect();
        if distinct.len() > 1 {
            let listed: Vec<&str> = distinct.into_iter().collect();
            evaluation.push(Issue::fail(format!(
                "Driver Version Mismatch: Multiple versions found {{{}}}",
                listed.join(", ")
            )));
        }

        if let Some(driver) = &driver_version {
            if facts.fabric_manager_service.is_active() {
                if let Some(fm) = &facts.fabric_manager_version {
                    let (drv_major, fm_major) = (major_component(driver), major_component(fm));
                    if drv_major != fm_major {
                        evaluation.push(Issue::fail(format!(
                            "Compatibility FAIL: Driver ({}) and Fabric Manager ({}) major version \
                             mismatch ({} vs {}). NVLink will not function correctly.",
                            driver, fm, drv_major, fm_major
                        )));
                    }
                }
            } else {
                evaluation.push(Issue::fail(format!(
                    "Fabric Manager is NOT active (service state: {}).",
                    facts.fabric_manager_service
                )));
            }
        }

        if let (Some(nvcc), Some(max)) = (&facts.nvcc_version, &facts.cuda_driver_version) {
            match (nvcc.parse::<f64>(), max.parse::<f64>()) {
                (Ok(nvcc_v), Ok(max_v)) if nvcc_v > max_v => {
                    evaluation.push(Issue::fail(format!(
                        "CUDA Compatibility: NVCC v{} is higher than the maximum supported \
                         version v{}. This may cause compilation or runtime failures.",
                        nvcc, max
                    )));
                }
                (Ok(_), Ok(_)) => {}
                _ => debug!(nvcc = %nvcc, max = %max, "Unparseable CUDA version, skipping check"),
            }
        }

        evaluation
    }
}

impl Evaluator for VersionEvaluator {
    fn name(&self) -> &'static str {
        "versions"
    }

    fn evaluate(&self, facts: &FactSnapshot) -> Evaluation {
        self.check(&facts.versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::ServiceState;
    use crate::report::IssueLevel;

    fn facts(driver: &str, fm: Option<&str>, service: ServiceState) -> VersionFacts {
        VersionFacts {
            driver_versions: vec![driver.to_string(); 2],
            fabric_manager_version: fm.map(str::to_string),
            fabric_manager_service: service,
            nvcc_version: None,
            cuda_driver_version: None,
        }
    }

    #[test]
    fn test_major_version_mismatch() {
        let result = VersionEvaluator::new().check(&facts(
            "550.90.07",
            Some("535.10.02"),
            ServiceState::Active,
        ));

        assert_eq!(result.issues.len(), 1);
        let issue = &result.issues[0];
        assert_eq!(issue.level(), IssueLevel::Fail);
        assert!(issue.message().contains("(550 vs 535)"));
    }

    #[test]
    fn test_major_version_match_ignores_minor() {
        let result = VersionEvaluator::new().check(&facts(
            "550.90.07",
            Some("550.54.01"),
            ServiceState::Active,
        ));
        assert!(!result.has_issues());
    }

    #[test]
    fn test_fabric_manager_inactive() {
        for service in [ServiceState::Inactive, ServiceState::NotInstalled] {
            let result = VersionEvaluator::new().check(&facts("550.90.07", None, service));
            assert_eq!(result.issues.len(), 1);
            assert!(result.issues[0].message().contains("Fabric Manager is NOT active"));
        }
    }

    #[test]
    fn test_active_without_fm_version_is_silent() {
        let result =
            VersionEvaluator::new().check(&facts("550.90.07", None, ServiceState::Active));
        assert!(!result.has_issues());
    }

    #[test]
    fn test_no_driver_skips_fabric_manager_rules() {
        let result = VersionEvaluator::new().check(&VersionFacts::default());
        assert!(!result.has_issues());

        match result.section {
            Section::Versions(section) => {
                assert_eq!(section.driver_version, None);
                assert_eq!(section.fabric_manager_version, "unknown");
                assert_eq!(section.fabric_manager_service, ServiceState::NotInstalled);
                assert_eq!(section.nvcc_version, "not_found");
            }
            other => panic!("unexpected section {:?}", other),
        }
    }

    #[test]
    fn test_multiple_driver_versions() {
        let mut versions = facts("550.90.07", Some("550.90.07"), ServiceState::Active);
        versions.driver_versions.push("535.104.05".to_string());

        let result = VersionEvaluator::new().check(&versions);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0]
            .message()
            .contains("{535.104.05, 550.90.07}"));
    }

    #[test]
    fn test_nvcc_newer_than_driver_supports() {
        let mut versions = facts("550.90.07", Some("550.90.07"), ServiceState::Active);
        versions.nvcc_version = Some("12.6".to_string());
        versions.cuda_driver_version = Some("12.4".to_string());

        let result = VersionEvaluator::new().check(&versions);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].message().contains("NVCC v12.6"));

        versions.nvcc_version = Some("12.4".to_string());
        assert!(!VersionEvaluator::new().check(&versions).has_issues());
    }

    #[test]
    fn test_unparseable_cuda_version_skipped() {
        let mut versions = facts("550.90.07", Some("550.90.07"), ServiceState::Active);
        versions.nvcc_version = Some("12.x".to_string());
        versions.cuda_driver_version = Some("12.4".to_string());
        assert!(!VersionEvaluator::new().check(&versions).has_issues());
    }
}
