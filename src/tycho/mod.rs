//! Scheduler: combines DAG-level eligibility, fabric polling/pushback, and
//! stale-item detection into one facade.
//!
//! Generalizes the ready/running/skip bookkeeping of
//! `dag::scheduler::DagScheduler` into a fabric-aware scheduling loop driven
//! by a pluggable `Poller`.

mod eligibility;
mod scan;
mod stale;

pub use eligibility::{eligible_phases, PhaseMeta};
pub(crate) use eligibility::scopes_overlap;
pub use scan::{flat_scan, wave_scan, ScanOutcome};
pub use stale::{stale_items, StaleItem, StaleKind};

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::dag::DagEngine;
use crate::fabric::{FileClaim, PhaseStatus, Snapshot};
use crate::poll::Poller;
use crate::pushback::PushbackHandler;

pub struct Scheduler {
    phases: HashMap<String, PhaseMeta>,
    pushback: PushbackHandler,
}

impl Scheduler {
    pub fn new(phases: HashMap<String, PhaseMeta>, max_retries: u32) -> Self {
        Self {
            phases,
            pushback: PushbackHandler::new(max_retries),
        }
    }

    pub fn eligible(
        &self,
        dag: &DagEngine,
        statuses: &HashMap<String, PhaseStatus>,
        running: &HashSet<String>,
    ) -> Vec<String> {
        eligible_phases(dag, &self.phases, statuses, running)
    }

    pub async fn scan_flat(
        &mut self,
        eligible: &[String],
        poller: &dyn Poller,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ScanOutcome> {
        flat_scan(eligible, poller, snapshot, &mut self.pushback, now).await
    }

    pub async fn scan_waves(
        &mut self,
        waves: &[Vec<String>],
        eligible: &HashSet<String>,
        dag: &DagEngine,
        poller: &dyn Poller,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ScanOutcome> {
        wave_scan(waves, eligible, dag, poller, snapshot, &mut self.pushback, now).await
    }

    pub fn stale(
        &self,
        claims: &[FileClaim],
        running: &HashSet<String>,
        now: DateTime<Utc>,
        stale_claim_secs: i64,
        stale_task_secs: i64,
    ) -> Vec<StaleItem> {
        stale_items(claims, &self.pushback, running, now, stale_claim_secs, stale_task_secs)
    }

    pub fn is_overridden(&self, phase_id: &str) -> bool {
        self.pushback.is_overridden(phase_id)
    }

    pub fn unblock(&mut self, phase_id: &str) {
        self.pushback.unblock(phase_id)
    }

    /// Phases still blocked once the deadlock detector (outside this module)
    /// decides the fleet cannot make further progress on its own.
    pub fn escalate_all_blocked(&mut self) -> Vec<String> {
        self.pushback.escalate_all_blocked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_exposes_eligibility_and_stale_detection_together() {
        let mut dag = DagEngine::new();
        dag.add_node("a", 0).unwrap();
        let phases: HashMap<String, PhaseMeta> = [(
            "a".to_string(),
            PhaseMeta {
                id: "a".to_string(),
                scope: vec![],
                allow_scope_overlap: false,
            },
        )]
        .into_iter()
        .collect();
        let scheduler = Scheduler::new(phases, 3);
        let statuses = HashMap::new();
        let eligible = scheduler.eligible(&dag, &statuses, &HashSet::new());
        assert_eq!(eligible, vec!["a".to_string()]);

        let now = DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z").unwrap().with_timezone(&Utc);
        let items = scheduler.stale(&[], &HashSet::new(), now, 900, 1800);
        assert!(items.is_empty());
    }
}
