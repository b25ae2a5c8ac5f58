//! Fabric-level scanning: polling eligible phases and routing non-proceed
//! results through the pushback handler.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::dag::DagEngine;
use crate::fabric::Snapshot;
use crate::poll::{PollResult, Poller};
use crate::pushback::{PushbackAction, PushbackHandler};

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub proceed: Vec<String>,
    pub escalated: Vec<String>,
    /// (phase_id, reason) — phases never polled this cycle.
    pub pruned: Vec<(String, String)>,
}

/// Iterate eligible ids; for each non-blocked, non-overridden phase, call
/// `poll`. On `PROCEED` include it in the return. On non-proceed, feed to
/// the pushback handler.
pub async fn flat_scan(
    eligible: &[String],
    poller: &dyn Poller,
    snapshot: &Snapshot,
    pushback: &mut PushbackHandler,
    now: DateTime<Utc>,
) -> anyhow::Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    for id in eligible {
        if pushback.is_overridden(id) {
            outcome.proceed.push(id.clone());
            continue;
        }
        let result = poller.poll(id, snapshot).await?;
        route(id, &result, snapshot, pushback, now, &mut outcome);
    }
    Ok(outcome)
}

/// Walk waves in order. A phase whose upstream ancestor blocked earlier in
/// this cycle is pruned rather than polled, preventing dogpiling the
/// fabric and stale-assumption starts.
pub async fn wave_scan(
    waves: &[Vec<String>],
    eligible: &HashSet<String>,
    dag: &DagEngine,
    poller: &dyn Poller,
    snapshot: &Snapshot,
    pushback: &mut PushbackHandler,
    now: DateTime<Utc>,
) -> anyhow::Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    let mut blocked_this_cycle: HashMap<String, String> = HashMap::new();

    for wave in waves {
        for id in wave {
            if !eligible.contains(id) {
                continue;
            }
            let blocking_ancestor = dag
                .ancestors(id)
                .into_iter()
                .find_map(|a| blocked_this_cycle.get(&a).map(|reason| (a, reason.clone())));
            if let Some((ancestor, reason)) = blocking_ancestor {
                let note = format!("upstream {ancestor} blocked: {reason}");
                outcome.pruned.push((id.clone(), note));
                continue;
            }

            if pushback.is_overridden(id) {
                outcome.proceed.push(id.clone());
                continue;
            }

            let result = poller.poll(id, snapshot).await?;
            let reason_for_pruning = match &result {
                PollResult::NeedInfo { reason, .. } => Some(reason.clone()),
                PollResult::Conflict { reason, .. } => Some(reason.clone()),
                PollResult::Proceed => None,
            };
            let proceeded = matches!(result, PollResult::Proceed);
            route(id, &result, snapshot, pushback, now, &mut outcome);
            if !proceeded {
                if let Some(reason) = reason_for_pruning {
                    blocked_this_cycle.insert(id.clone(), reason);
                }
            }
        }
    }

    Ok(outcome)
}

fn route(
    id: &str,
    result: &PollResult,
    snapshot: &Snapshot,
    pushback: &mut PushbackHandler,
    now: DateTime<Utc>,
    outcome: &mut ScanOutcome,
) {
    match pushback.handle(id, result, snapshot, now) {
        PushbackAction::Proceed => outcome.proceed.push(id.to_string()),
        PushbackAction::Retry => {}
        PushbackAction::Escalate => outcome.escalated.push(id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct ScriptedPoller(Map<String, PollResult>);

    #[async_trait]
    impl Poller for ScriptedPoller {
        async fn poll(&self, phase_id: &str, _snapshot: &Snapshot) -> anyhow::Result<PollResult> {
            Ok(self.0.get(phase_id).cloned().unwrap_or(PollResult::Proceed))
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn flat_scan_proceeds_on_proceed_and_retries_on_need_info() {
        let mut scripted = Map::new();
        scripted.insert(
            "02".to_string(),
            PollResult::NeedInfo {
                reason: "waiting".into(),
                missing_info: vec!["01".into()],
            },
        );
        let poller = ScriptedPoller(scripted);
        let snapshot = Snapshot::default();
        let mut pushback = PushbackHandler::new(3);

        let outcome = flat_scan(
            &["01".to_string(), "02".to_string()],
            &poller,
            &snapshot,
            &mut pushback,
            now(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.proceed, vec!["01".to_string()]);
        assert!(outcome.escalated.is_empty());
    }

    #[tokio::test]
    async fn wave_scan_prunes_descendants_of_a_blocked_upstream() {
        let mut dag = DagEngine::new();
        dag.add_node("a", 0).unwrap();
        dag.add_node("b", 0).unwrap();
        dag.add_edge("b", "a").unwrap();

        let mut scripted = Map::new();
        scripted.insert(
            "a".to_string(),
            PollResult::NeedInfo {
                reason: "still working".into(),
                missing_info: vec![],
            },
        );
        let poller = ScriptedPoller(scripted);
        let snapshot = Snapshot::default();
        let mut pushback = PushbackHandler::new(3);
        let waves = vec![vec!["a".to_string()], vec!["b".to_string()]];
        let eligible: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();

        let outcome = wave_scan(&waves, &eligible, &dag, &poller, &snapshot, &mut pushback, now())
            .await
            .unwrap();

        assert!(outcome.proceed.is_empty());
        assert_eq!(outcome.pruned.len(), 1);
        assert_eq!(outcome.pruned[0].0, "b");
        assert!(outcome.pruned[0].1.contains("upstream a blocked"));
    }
}
