//! Surfaces claims and blocked phases that have aged past their
//! configured thresholds without progress.

use chrono::{DateTime, Utc};

use crate::fabric::{parse_flexible_timestamp, FileClaim};
use crate::pushback::PushbackHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleKind {
    Claim,
    BlockedTask,
}

#[derive(Debug, Clone)]
pub struct StaleItem {
    pub kind: StaleKind,
    pub id: String,
    pub age_secs: i64,
    pub details: String,
}

/// Claims older than `stale_claim_secs` whose owner is not currently
/// running, and blocked phases older than `stale_task_secs`.
pub fn stale_items(
    claims: &[FileClaim],
    pushback: &PushbackHandler,
    running: &std::collections::HashSet<String>,
    now: DateTime<Utc>,
    stale_claim_secs: i64,
    stale_task_secs: i64,
) -> Vec<StaleItem> {
    let mut out = Vec::new();

    for claim in claims {
        if running.contains(&claim.owner_phase_id) {
            continue;
        }
        let Some(claimed_at) = parse_flexible_timestamp(&claim.claimed_at) else {
            continue;
        };
        let age = (now - claimed_at).num_seconds();
        if age >= stale_claim_secs {
            out.push(StaleItem {
                kind: StaleKind::Claim,
                id: claim.filepath.clone(),
                age_secs: age,
                details: format!("owned by '{}' which is not running", claim.owner_phase_id),
            });
        }
    }

    for blocked in pushback.blocked_phases() {
        let age = (now - blocked.blocked_at).num_seconds();
        if age >= stale_task_secs {
            out.push(StaleItem {
                kind: StaleKind::BlockedTask,
                id: blocked.phase_id.clone(),
                age_secs: age,
                details: blocked.last_result.reason.clone(),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::PollResult;
    use std::collections::HashSet;

    fn ts(s: &str) -> String {
        s.to_string()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-28T01:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn stale_claim_flagged_when_owner_not_running() {
        let claims = vec![FileClaim {
            filepath: "pkg/x.go".into(),
            owner_phase_id: "01".into(),
            claimed_at: ts("2026-07-28T00:00:00Z"),
        }];
        let pushback = PushbackHandler::new(3);
        let items = stale_items(&claims, &pushback, &HashSet::new(), now(), 900, 1800);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, StaleKind::Claim);
    }

    #[test]
    fn claim_not_stale_when_owner_running() {
        let claims = vec![FileClaim {
            filepath: "pkg/x.go".into(),
            owner_phase_id: "01".into(),
            claimed_at: ts("2026-07-28T00:00:00Z"),
        }];
        let pushback = PushbackHandler::new(3);
        let running: HashSet<String> = ["01".to_string()].into_iter().collect();
        let items = stale_items(&claims, &pushback, &running, now(), 900, 1800);
        assert!(items.is_empty());
    }

    #[test]
    fn blocked_phase_flagged_past_stale_task_threshold() {
        let mut pushback = PushbackHandler::new(3);
        let blocked_at = DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z").unwrap().with_timezone(&Utc);
        pushback.handle(
            "02",
            &PollResult::NeedInfo {
                reason: "waiting".into(),
                missing_info: vec![],
            },
            &crate::fabric::Snapshot::default(),
            blocked_at,
        );
        let items = stale_items(&[], &pushback, &HashSet::new(), now(), 900, 1800);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, StaleKind::BlockedTask);
    }
}
