//! Parser for the reviewer output contract: exact tokens, case-sensitive
//! prefixes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    fn from_str_default_major(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "minor" => Severity::Minor,
            _ => Severity::Major,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Medium,
    Low,
}

impl Level {
    fn from_str_default_high(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "medium" => Level::Medium,
            "low" => Level::Low,
            "high" => Level::High,
            _ => Level::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub satisfaction: Level,
    pub risk: Level,
    pub needs_human_review: bool,
    pub summary: String,
}

impl Default for Report {
    /// Conservative defaults applied when the `REPORT:` block is missing
    /// or malformed: `risk=high`, `needs_human_review=yes`.
    fn default() -> Self {
        Self {
            satisfaction: Level::Low,
            risk: Level::High,
            needs_human_review: true,
            summary: "reviewer did not produce a REPORT block".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReviewOutcome {
    Approved { justification: String, report: Report },
    Issues { issues: Vec<Issue>, report: Report },
}

impl ReviewOutcome {
    pub fn report(&self) -> &Report {
        match self {
            ReviewOutcome::Approved { report, .. } => report,
            ReviewOutcome::Issues { report, .. } => report,
        }
    }

    pub fn has_blocking_issue(&self) -> bool {
        matches!(self, ReviewOutcome::Issues { issues, .. }
            if issues.iter().any(|i| matches!(i.severity, Severity::Critical | Severity::Major)))
    }
}

fn approved_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^APPROVED:[ \t]*(.*)$").unwrap())
}

fn issue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?ms)^ISSUE:[ \t]*\n(?:SEVERITY:[ \t]*(\w+)[ \t]*\n)?DESCRIPTION:[ \t]*(.*?)(?=\n(?:ISSUE:|REPORT:|APPROVED:|\z))")
            .unwrap()
    })
}

fn report_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ms)^REPORT:[ \t]*\n(?:SATISFACTION:[ \t]*(\w+)[ \t]*\n)?(?:RISK:[ \t]*(\w+)[ \t]*\n)?(?:NEEDS_HUMAN_REVIEW:[ \t]*(\w+)[ \t]*\n)?(?:SUMMARY:[ \t]*(.*?))?(?=\n(?:ISSUE:|APPROVED:|\z)|\z)",
        )
        .unwrap()
    })
}

fn parse_report(text: &str) -> Report {
    let Some(caps) = report_re().captures(text) else {
        return Report::default();
    };
    let default = Report::default();
    let satisfaction = caps
        .get(1)
        .map(|m| Level::from_str_default_high(m.as_str()))
        .unwrap_or(default.satisfaction);
    let risk = caps.get(2).map(|m| Level::from_str_default_high(m.as_str())).unwrap_or(default.risk);
    let needs_human_review = caps
        .get(3)
        .map(|m| m.as_str().trim().eq_ignore_ascii_case("yes"))
        .unwrap_or(default.needs_human_review);
    let summary = caps
        .get(4)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(default.summary);
    Report {
        satisfaction,
        risk,
        needs_human_review,
        summary,
    }
}

fn parse_issues(text: &str) -> Vec<Issue> {
    issue_re()
        .captures_iter(text)
        .map(|caps| {
            let severity = caps
                .get(1)
                .map(|m| Severity::from_str_default_major(m.as_str()))
                .unwrap_or(Severity::Major);
            let description = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            Issue { severity, description }
        })
        .collect()
}

/// Parse a reviewer's raw output into an outcome. Never fails: a reviewer
/// that produces neither `APPROVED:` nor any `ISSUE:` block is treated as a
/// single synthetic critical issue rather than silently approved.
pub fn parse_reviewer_output(text: &str) -> ReviewOutcome {
    let report = parse_report(text);

    if let Some(caps) = approved_re().captures(text) {
        let justification = caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        return ReviewOutcome::Approved { justification, report };
    }

    let issues = parse_issues(text);
    if !issues.is_empty() {
        return ReviewOutcome::Issues { issues, report };
    }

    ReviewOutcome::Issues {
        issues: vec![Issue {
            severity: Severity::Critical,
            description: "reviewer output contained neither APPROVED: nor ISSUE: blocks".to_string(),
        }],
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_approved_with_justification_and_report() {
        let text = "APPROVED: implementation matches the spec\n\nREPORT:\nSATISFACTION: high\nRISK: low\nNEEDS_HUMAN_REVIEW: no\nSUMMARY: all good\n";
        let outcome = parse_reviewer_output(text);
        match outcome {
            ReviewOutcome::Approved { justification, report } => {
                assert_eq!(justification, "implementation matches the spec");
                assert_eq!(report.risk, Level::Low);
                assert!(!report.needs_human_review);
            }
            _ => panic!("expected Approved"),
        }
    }

    #[test]
    fn parses_multiple_issue_blocks_with_default_severity() {
        let text = "ISSUE:\nSEVERITY: critical\nDESCRIPTION: crashes on empty input\nISSUE:\nDESCRIPTION: missing test coverage\nREPORT:\nSATISFACTION: low\nRISK: high\nNEEDS_HUMAN_REVIEW: yes\nSUMMARY: needs another pass\n";
        let outcome = parse_reviewer_output(text);
        match outcome {
            ReviewOutcome::Issues { issues, .. } => {
                assert_eq!(issues.len(), 2);
                assert_eq!(issues[0].severity, Severity::Critical);
                assert_eq!(issues[1].severity, Severity::Major);
                assert!(issues[1].description.contains("missing test coverage"));
            }
            _ => panic!("expected Issues"),
        }
    }

    #[test]
    fn malformed_output_falls_back_to_synthetic_critical_issue() {
        let outcome = parse_reviewer_output("the code looks fine to me");
        match outcome {
            ReviewOutcome::Issues { issues, report } => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].severity, Severity::Critical);
                assert_eq!(report.risk, Level::High);
                assert!(report.needs_human_review);
            }
            _ => panic!("expected Issues"),
        }
    }

    #[test]
    fn missing_report_block_uses_conservative_defaults() {
        let outcome = parse_reviewer_output("APPROVED: looks done");
        assert_eq!(outcome.report().risk, Level::High);
        assert!(outcome.report().needs_human_review);
    }

    #[test]
    fn has_blocking_issue_true_only_for_critical_or_major() {
        let minor_only = ReviewOutcome::Issues {
            issues: vec![Issue {
                severity: Severity::Minor,
                description: "nit".into(),
            }],
            report: Report::default(),
        };
        assert!(!minor_only.has_blocking_issue());

        let major = ReviewOutcome::Issues {
            issues: vec![Issue {
                severity: Severity::Major,
                description: "bug".into(),
            }],
            report: Report::default(),
        };
        assert!(major.has_blocking_issue());
    }
}
