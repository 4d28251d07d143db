//! NVLink state and error counter checks

use std::collections::BTreeMap;

use super::{Evaluation, Evaluator, Section};
use crate::facts::{FactSnapshot, LinkErrorCategory, LinkFacts};
use crate::report::{Issue, LinkErrorRecord, LinkSection};

/// Checks inter-GPU interconnect links
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkEvaluator;

impl LinkEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, links: Option<&LinkFacts>) -> Evaluation {
        let Some(links) = links else {
            return Evaluation::empty(self.name());
        };

        let inactive = links.states.iter().filter(|s| s.is_inactive()).count();

        let mut totals: BTreeMap<LinkErrorCategory, u64> = BTreeMap::new();
        for counter in links.error_counters.iter().flatten() {
            *totals.entry(counter.category).or_default() += counter.count;
        }

        let errors: Vec<LinkErrorRecord> = LinkErrorCategory::ALL
            .iter()
            .filter_map(|category| {
                totals
                    .get(category)
                    .filter(|count| **count > 0)
                    .map(|count| LinkErrorRecord {
                        category: *category,
                        count: *count,
                    })
            })
            .collect();

        let mut evaluation = Evaluation::new(
            self.name(),
            Section::Links(LinkSection {
                inactive_links: inactive,
                errors: errors.clone(),
            }),
        );

        // Inactive links may be intentional topology
        if inactive > 0 {
            evaluation.push(Issue::warning(format!(
                "Detected {} Inactive NVLink(s).",
                inactive
            )));
        }

        for record in errors {
            evaluation.push(Issue::fail(format!(
                "NVLink {} Error: {} counts.",
                record.category, record.count
            )));
        }

        evaluation
    }
}

impl Evaluator for LinkEvaluator {
    fn name(&self) -> &'static str {
        "nvlink"
    }

    fn evaluate(&self, facts: &FactSnapshot) -> Evaluation {
        self.check(facts.links.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{LinkErrorCounter, LinkState};
    use crate::report::IssueLevel;

    fn state(link: u32, state: &str) -> LinkState {
        LinkState {
            gpu: Some(0),
            link,
            state: state.to_string(),
        }
    }

    fn counter(link: u32, category: LinkErrorCategory, count: u64) -> LinkErrorCounter {
        LinkErrorCounter {
            gpu: Some(0),
            link: Some(link),
            category,
            count,
        }
    }

    #[test]
    fn test_inactive_links_single_warning() {
        let links = LinkFacts {
            states: vec![state(0, "26.562 GB/s"), state(1, "<inactive>"), state(2, "<inactive>")],
            error_counters: None,
        };
        let result = LinkEvaluator::new().check(Some(&links));

        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].level(), IssueLevel::Warning);
        assert!(result.issues[0].message().contains("Detected 2 Inactive"));
    }

    #[test]
    fn test_error_counters_one_issue_per_category() {
        let links = LinkFacts {
            states: vec![state(0, "26.562 GB/s")],
            error_counters: Some(vec![
                counter(0, LinkErrorCategory::Crc, 4),
                counter(0, LinkErrorCategory::Replay, 0),
                counter(1, LinkErrorCategory::Crc, 3),
                counter(1, LinkErrorCategory::Replay, 2),
                counter(1, LinkErrorCategory::Fatal, 0),
            ]),
        };
        let result = LinkEvaluator::new().check(Some(&links));

        assert_eq!(result.issues.len(), 2);
        assert!(result.issues.iter().all(|i| i.level() == IssueLevel::Fail));
        assert_eq!(result.issues[0].message(), "NVLink Replay Error: 2 counts.");
        assert_eq!(result.issues[1].message(), "NVLink CRC Error: 7 counts.");

        match result.section {
            Section::Links(section) => {
                assert_eq!(section.inactive_links, 0);
                assert_eq!(section.errors.len(), 2);
            }
            other => panic!("unexpected section {:?}", other),
        }
    }

    #[test]
    fn test_zero_counters_raise_nothing() {
        let links = LinkFacts {
            states: vec![state(0, "26.562 GB/s")],
            error_counters: Some(
                LinkErrorCategory::ALL
                    .iter()
                    .map(|c| counter(0, *c, 0))
                    .collect(),
            ),
        };
        assert!(!LinkEvaluator::new().check(Some(&links)).has_issues());
    }

    #[test]
    fn test_absent_link_facts() {
        let result = LinkEvaluator::new().check(None);
        assert!(!result.has_issues());
        assert_eq!(result.section, Section::Empty);
    }
}
