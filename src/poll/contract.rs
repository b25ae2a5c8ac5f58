//! Declarative poller: a phase may proceed once every phase it depends on
//! has published contracts (is `done` on the fabric) and none of its scope
//! files are claimed by another phase.

use std::collections::HashMap;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::fabric::Snapshot;

use super::types::{PollResult, Poller};

#[derive(Debug, Clone)]
pub struct PhaseRequirement {
    pub phase_id: String,
    pub depends_on: Vec<String>,
    pub scope: Vec<String>,
}

fn build_globset(patterns: &[String]) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        if let Ok(glob) = Glob::new(p) {
            builder.add(glob);
        }
    }
    builder.build().ok()
}

pub struct ContractPoller {
    requirements: HashMap<String, PhaseRequirement>,
}

impl ContractPoller {
    pub fn new(requirements: Vec<PhaseRequirement>) -> Self {
        Self {
            requirements: requirements.into_iter().map(|r| (r.phase_id.clone(), r)).collect(),
        }
    }

    pub fn classify(&self, phase_id: &str, snapshot: &Snapshot) -> PollResult {
        let Some(req) = self.requirements.get(phase_id) else {
            return PollResult::Proceed;
        };

        let missing: Vec<String> = req
            .depends_on
            .iter()
            .filter(|d| !snapshot.completed.contains(*d))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return PollResult::NeedInfo {
                reason: format!("waiting on contracts from: {}", missing.join(", ")),
                missing_info: missing,
            };
        }

        if let Some(scope_set) = build_globset(&req.scope) {
            for (path, owner) in &snapshot.file_claims {
                if owner != &req.phase_id && scope_set.is_match(path) {
                    return PollResult::Conflict {
                        reason: format!("scope file '{path}' already claimed by '{owner}'"),
                        conflict_with: owner.clone(),
                    };
                }
            }
        }

        PollResult::Proceed
    }
}

#[async_trait]
impl Poller for ContractPoller {
    async fn poll(&self, phase_id: &str, snapshot: &Snapshot) -> anyhow::Result<PollResult> {
        Ok(self.classify(phase_id, snapshot))
    }
}
