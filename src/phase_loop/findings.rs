//! Tracks the finding lifecycle across review cycles: a raised issue is
//! `still_present` while it keeps recurring, `fixed` once a cycle's
//! re-read no longer surfaces it, and `regressed` if it reappears after
//! having been fixed.

use std::collections::HashMap;

use super::contract::{Issue, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingStatus {
    StillPresent,
    Fixed,
    Regressed,
}

/// A finding carrying its lifecycle status, as fed into the next cycle's
/// reviewer/coder prompts so they know what changed since last time.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFinding {
    pub description: String,
    pub severity: Severity,
    pub status: FindingStatus,
}

#[derive(Debug, Clone)]
struct FindingEntry {
    active: bool,
    ever_fixed: bool,
    severity: Severity,
}

/// Keyed by a normalized issue description; a real tracker would prefer a
/// stable reviewer-assigned id, but the output contract carries no id.
fn key(issue: &Issue) -> String {
    issue.description.trim().to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct FindingLedger {
    history: HashMap<String, FindingEntry>,
}

impl FindingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the ledger with this cycle's issues and return each tracked
    /// issue labeled with its status transition.
    pub fn advance(&mut self, cycle_issues: &[Issue]) -> Vec<LabeledFinding> {
        let mut present: HashMap<String, &Issue> = HashMap::new();
        for issue in cycle_issues {
            present.insert(key(issue), issue);
        }

        let mut transitions = Vec::new();

        // Anything previously active but absent this cycle is fixed.
        for (desc, entry) in self.history.iter_mut() {
            if entry.active && !present.contains_key(desc) {
                entry.active = false;
                entry.ever_fixed = true;
                transitions.push(LabeledFinding {
                    description: desc.clone(),
                    severity: entry.severity,
                    status: FindingStatus::Fixed,
                });
            }
        }

        for issue in cycle_issues {
            let k = key(issue);
            let status = match self.history.get(&k) {
                Some(entry) if !entry.active && entry.ever_fixed => FindingStatus::Regressed,
                Some(entry) if entry.active => FindingStatus::StillPresent,
                _ => FindingStatus::StillPresent,
            };
            self.history
                .entry(k.clone())
                .and_modify(|e| {
                    e.active = true;
                    e.severity = issue.severity;
                })
                .or_insert(FindingEntry {
                    active: true,
                    ever_fixed: false,
                    severity: issue.severity,
                });
            transitions.push(LabeledFinding {
                description: issue.description.clone(),
                severity: issue.severity,
                status,
            });
        }

        transitions
    }
}
