//! Kernel log Xid fault scanning

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{Evaluation, Evaluator, Section, DEFAULT_XID_TAIL};
use crate::facts::FactSnapshot;
use crate::report::Issue;

/// Format: `NVRM: Xid (PCI:0000:xx:xx): XX, ...`
static XID_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Xid \(PCI:.*?\): (\d+)").unwrap());

/// Extract the Xid code from a kernel log line
fn parse_xid_code(line: &str) -> Option<u32> {
    XID_CODE_RE
        .captures(line)
        .and_then(|cap| cap[1].parse().ok())
}

/// Human-readable description for well-known Xid codes
pub fn xid_description(code: u32) -> &'static str {
    match code {
        13 => "Graphics Engine Exception",
        31 => "GPU memory page fault",
        32 => "Invalid or corrupted push buffer stream",
        38 => "Driver firmware error",
        43 => "GPU stopped processing",
        45 => "Preemptive cleanup, due to previous errors",
        48 => "Double Bit ECC Error",
        61 => "Internal micro-controller breakpoint/warning",
        62 => "Internal micro-controller halt",
        63 => "ECC page retirement or row remapping recording event",
        64 => "ECC page retirement or row remapper recording failure",
        68 => "NVDEC0 Exception",
        69 => "Graphics Engine class error",
        74 => "NVLINK Error",
        79 => "GPU has fallen off the bus",
        92 => "High single-bit ECC error rate",
        94 => "Contained ECC error",
        95 => "Uncontained ECC error",
        _ => "Unknown Xid",
    }
}

/// Scans the most recent Xid lines for fault codes
#[derive(Debug, Clone, Copy)]
pub struct KernelLogEvaluator {
    tail: usize,
}

impl KernelLogEvaluator {
    pub fn new(tail: usize) -> Self {
        Self { tail }
    }

    /// `lines` are Xid-tagged kernel log lines, oldest first
    pub fn check(&self, lines: Option<&[String]>) -> Evaluation {
        let Some(lines) = lines else {
            return Evaluation::empty(self.name());
        };

        let recent = &lines[lines.len().saturating_sub(self.tail)..];
        let mut evaluation = Evaluation::new(self.name(), Section::KernelLog(recent.to_vec()));

        for line in recent {
            match parse_xid_code(line) {
                Some(code) => evaluation.push(Issue::fail(format!(
                    "Critical Xid {} ({}) found in kernel log (potential hardware issue)",
                    code,
                    xid_description(code)
                ))),
                None => debug!(line = %line, "Xid line without a parseable code"),
            }
        }

        evaluation
    }
}

impl Default for KernelLogEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_XID_TAIL)
    }
}

impl Evaluator for KernelLogEvaluator {
    fn name(&self) -> &'static str {
        "kernel_log"
    }

    fn evaluate(&self, facts: &FactSnapshot) -> Evaluation {
        self.check(facts.xid_lines.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xid_line(second: u32, code: u32) -> String {
        format!(
            "[Mon Oct  6 10:00:{:02} 2026] NVRM: Xid (PCI:0000:17:00): {}, pid=1234, name=python",
            second, code
        )
    }

    #[test]
    fn test_xid_descriptions() {
        assert!(xid_description(31).contains("page fault"));
        assert!(xid_description(43).contains("stopped"));
        assert!(xid_description(48).contains("ECC"));
        assert!(xid_description(79).contains("fallen off"));
        assert!(xid_description(9999).contains("Unknown"));
    }

    #[test]
    fn test_parse_xid_code() {
        assert_eq!(parse_xid_code(&xid_line(1, 79)), Some(79));
        assert_eq!(parse_xid_code("NVRM: Xid (PCI:0000:17:00): , garbage"), None);
        assert_eq!(parse_xid_code("unrelated"), None);
    }

    #[test]
    fn test_only_recent_lines_kept() {
        let lines: Vec<String> = (0..8).map(|i| xid_line(i, 40 + i)).collect();
        let result = KernelLogEvaluator::default().check(Some(&lines));

        assert_eq!(result.issues.len(), 5);
        assert!(result.issues[0].message().contains("Xid 43"));
        assert!(result.issues[4].message().contains("Xid 47"));

        match result.section {
            Section::KernelLog(excerpt) => assert_eq!(excerpt, lines[3..].to_vec()),
            other => panic!("unexpected section {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_line_kept_in_excerpt_only() {
        let lines = vec![
            xid_line(1, 79),
            "[Mon Oct  6 10:00:02 2026] NVRM: Xid (PCI:0000:17:00): corrupted".to_string(),
        ];
        let result = KernelLogEvaluator::default().check(Some(&lines));

        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].message().contains("fallen off the bus"));
        assert_eq!(result.section, Section::KernelLog(lines));
    }

    #[test]
    fn test_fewer_lines_than_tail() {
        let lines = vec![xid_line(1, 48)];
        let result = KernelLogEvaluator::new(5).check(Some(&lines));
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn test_absent_kernel_log() {
        let result = KernelLogEvaluator::default().check(None);
        assert!(!result.has_issues());
        assert_eq!(result.section, Section::Empty);
    }
}
