//! DAG-level eligibility: which phases may be considered for dispatch at
//! all, independent of fabric polling.

use std::collections::{HashMap, HashSet};

use globset::{Glob, GlobSetBuilder};

use crate::dag::DagEngine;
use crate::fabric::PhaseStatus;

#[derive(Debug, Clone)]
pub struct PhaseMeta {
    pub id: String,
    pub scope: Vec<String>,
    pub allow_scope_overlap: bool,
}

pub(crate) fn scopes_overlap(a: &[String], b: &[String]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let mut builder = GlobSetBuilder::new();
    for p in a {
        if let Ok(g) = Glob::new(p) {
            builder.add(g);
        }
    }
    let Ok(set) = builder.build() else { return false };
    b.iter().any(|p| {
        // treat literal paths and glob patterns the same by testing the
        // pattern text itself and, if it contains no glob metacharacters,
        // as a path.
        set.is_match(p) || Glob::new(p).map(|g| g.compile_matcher().is_match(p)).unwrap_or(false)
    })
}

/// Phases eligible for dispatch, sorted by impact_score desc, then
/// priority asc (lower number = higher priority), then lexical id.
pub fn eligible_phases(
    dag: &DagEngine,
    phases: &HashMap<String, PhaseMeta>,
    statuses: &HashMap<String, PhaseStatus>,
    running: &HashSet<String>,
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    for (id, meta) in phases {
        let status = statuses.get(id).copied().unwrap_or(PhaseStatus::Pending);
        if status.is_terminal() || status == PhaseStatus::Running {
            continue;
        }
        let deps = dag.dependencies(id);
        let all_done = deps.iter().all(|d| statuses.get(d).copied() == Some(PhaseStatus::Done));
        if !all_done {
            continue;
        }
        let any_failed = deps.iter().any(|d| statuses.get(d).copied() == Some(PhaseStatus::Failed));
        if any_failed {
            continue;
        }
        if !meta.allow_scope_overlap {
            let clashes = running.iter().any(|r| {
                phases
                    .get(r)
                    .map(|rm| !rm.allow_scope_overlap && scopes_overlap(&meta.scope, &rm.scope))
                    .unwrap_or(false)
            });
            if clashes {
                continue;
            }
        }
        candidates.push(id.clone());
    }

    candidates.sort_by(|a, b| {
        let impact_a = dag.impact_score(a);
        let impact_b = dag.impact_score(b);
        let prio_a = dag.node(a).map(|n| n.priority).unwrap_or(0);
        let prio_b = dag.node(b).map(|n| n.priority).unwrap_or(0);
        impact_b.cmp(&impact_a).then(prio_a.cmp(&prio_b)).then_with(|| a.cmp(b))
    });

    candidates
}
