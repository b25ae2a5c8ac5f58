//! Tracks blocked phases and decides whether a non-proceed poll result
//! should be retried, escalated to a human, or overridden.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::fabric::Snapshot;
use crate::poll::PollResult;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastResult {
    pub decision: String,
    pub reason: String,
    pub missing_info: Vec<String>,
    pub conflict_with: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BlockedPhase {
    pub phase_id: String,
    pub blocked_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_result: LastResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushbackAction {
    Retry,
    Escalate,
    Proceed,
}

pub struct PushbackHandler {
    max_retries: u32,
    blocked: HashMap<String, BlockedPhase>,
    overridden: HashSet<String>,
}

impl PushbackHandler {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            blocked: HashMap::new(),
            overridden: HashSet::new(),
        }
    }

    pub fn is_overridden(&self, phase_id: &str) -> bool {
        self.overridden.contains(phase_id)
    }

    pub fn blocked_phases(&self) -> impl Iterator<Item = &BlockedPhase> {
        self.blocked.values()
    }

    /// Removes a phase's blocked-tracking state (called when a fresh poll
    /// proceeds). Retry counts reset to 0 on the next block.
    pub fn unblock(&mut self, phase_id: &str) {
        self.blocked.remove(phase_id);
    }

    /// Classifies `result` for `phase_id` and records the updated
    /// blocked-pool state. `now` is caller-supplied (no wall-clock reads in
    /// library code so call sites stay testable and deterministic).
    pub fn handle(
        &mut self,
        phase_id: &str,
        result: &PollResult,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> PushbackAction {
        match result {
            PollResult::Proceed => {
                self.unblock(phase_id);
                PushbackAction::Proceed
            }
            PollResult::NeedInfo { reason, missing_info } => {
                let plausible = missing_info.iter().any(|m| {
                    snapshot.in_progress.iter().any(|p| m.contains(p.as_str()) || p.contains(m.as_str()))
                });
                let entry = self.blocked.entry(phase_id.to_string()).or_insert_with(|| BlockedPhase {
                    phase_id: phase_id.to_string(),
                    blocked_at: now,
                    retry_count: 0,
                    last_result: LastResult::default(),
                });
                entry.retry_count += 1;
                entry.last_result = LastResult {
                    decision: "need_info".into(),
                    reason: reason.clone(),
                    missing_info: missing_info.clone(),
                    conflict_with: None,
                };
                let cap = if plausible { 2 * self.max_retries } else { self.max_retries };
                if entry.retry_count >= cap {
                    PushbackAction::Escalate
                } else {
                    PushbackAction::Retry
                }
            }
            PollResult::Conflict { reason, conflict_with } => {
                let entry = self.blocked.entry(phase_id.to_string()).or_insert_with(|| BlockedPhase {
                    phase_id: phase_id.to_string(),
                    blocked_at: now,
                    retry_count: 0,
                    last_result: LastResult::default(),
                });
                entry.retry_count += 1;
                entry.last_result = LastResult {
                    decision: "conflict".into(),
                    reason: reason.clone(),
                    missing_info: vec![],
                    conflict_with: Some(conflict_with.clone()),
                };
                // RETRY when the conflicting phase holds a file claim (it is
                // actively producing, so the claim should clear on its own);
                // ESCALATE a pure interface/contract conflict immediately,
                // since no claim means no in-flight work will resolve it.
                let holds_claim = snapshot.file_claims.values().any(|owner| owner == conflict_with);
                if holds_claim {
                    PushbackAction::Retry
                } else {
                    PushbackAction::Escalate
                }
            }
        }
    }

    /// Forces every currently blocked phase to escalate — a detected
    /// deadlock (no phase in flight, all ready phases blocked).
    pub fn escalate_all_blocked(&mut self) -> Vec<String> {
        self.blocked.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn snapshot_with(in_progress: &[&str], file_claims: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            in_progress: in_progress.iter().map(|s| s.to_string()).collect(),
            file_claims: file_claims.iter().map(|(path, owner)| (path.to_string(), owner.to_string())).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn need_info_with_plausible_producer_retries_up_to_double_cap() {
        let mut handler = PushbackHandler::new(3);
        let snapshot = snapshot_with(&["01-bootstrap"], &[]);
        let result = PollResult::NeedInfo {
            reason: "waiting".into(),
            missing_info: vec!["01-bootstrap".into()],
        };
        for _ in 0..5 {
            let action = handler.handle("02", &result, &snapshot, now());
            assert_eq!(action, PushbackAction::Retry);
        }
        let action = handler.handle("02", &result, &snapshot, now());
        assert_eq!(action, PushbackAction::Escalate);
    }

    #[test]
    fn need_info_with_no_plausible_producer_escalates_at_max_retries() {
        let mut handler = PushbackHandler::new(2);
        let snapshot = Snapshot::default();
        let result = PollResult::NeedInfo {
            reason: "waiting".into(),
            missing_info: vec!["ghost-phase".into()],
        };
        assert_eq!(handler.handle("02", &result, &snapshot, now()), PushbackAction::Retry);
        assert_eq!(handler.handle("02", &result, &snapshot, now()), PushbackAction::Escalate);
    }

    #[test]
    fn conflict_retries_while_conflicting_phase_holds_a_file_claim() {
        let mut handler = PushbackHandler::new(3);
        let snapshot = snapshot_with(&[], &[("pkg/x.go", "03")]);
        let result = PollResult::Conflict {
            reason: "file clash".into(),
            conflict_with: "03".into(),
        };
        assert_eq!(handler.handle("02", &result, &snapshot, now()), PushbackAction::Retry);
    }

    #[test]
    fn conflict_escalates_immediately_when_no_file_claim_backs_it() {
        let mut handler = PushbackHandler::new(3);
        // "03" is running but holds no file claim: a pure interface/contract
        // conflict, which is escalated rather than retried.
        let snapshot = snapshot_with(&["03"], &[]);
        let result = PollResult::Conflict {
            reason: "interface clash".into(),
            conflict_with: "03".into(),
        };
        assert_eq!(handler.handle("02", &result, &snapshot, now()), PushbackAction::Escalate);
    }

    #[test]
    fn proceed_clears_blocked_entry_and_marks_action_proceed() {
        let mut handler = PushbackHandler::new(3);
        let snapshot = Snapshot::default();
        let need_info = PollResult::NeedInfo {
            reason: "x".into(),
            missing_info: vec!["01".into()],
        };
        handler.handle("02", &need_info, &snapshot, now());
        assert_eq!(handler.blocked_phases().count(), 1);
        let action = handler.handle("02", &PollResult::Proceed, &snapshot, now());
        assert_eq!(action, PushbackAction::Proceed);
        assert_eq!(handler.blocked_phases().count(), 0);
    }

    #[test]
    fn escalate_all_blocked_returns_every_tracked_phase() {
        let mut handler = PushbackHandler::new(1);
        let snapshot = Snapshot::default();
        let need_info = PollResult::NeedInfo {
            reason: "x".into(),
            missing_info: vec![],
        };
        handler.handle("02", &need_info, &snapshot, now());
        handler.handle("03", &need_info, &snapshot, now());
        let mut escalated = handler.escalate_all_blocked();
        escalated.sort();
        assert_eq!(escalated, vec!["02".to_string(), "03".to_string()]);
    }
}
