use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fabric::Snapshot;

/// Outcome of polling a single phase against a fabric snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PollResult {
    Proceed,
    NeedInfo {
        reason: String,
        missing_info: Vec<String>,
    },
    Conflict {
        reason: String,
        conflict_with: String,
    },
}

impl PollResult {
    pub fn is_proceed(&self) -> bool {
        matches!(self, PollResult::Proceed)
    }
}

/// Pluggable poll decision. The scheduler treats every implementation
/// identically.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self, phase_id: &str, snapshot: &Snapshot) -> anyhow::Result<PollResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_result_serializes_with_decision_tag() {
        let r = PollResult::NeedInfo {
            reason: "waiting".into(),
            missing_info: vec!["01-bootstrap".into()],
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"decision\":\"need_info\""));
    }

    #[test]
    fn is_proceed_only_true_for_proceed_variant() {
        assert!(PollResult::Proceed.is_proceed());
        assert!(!PollResult::Conflict {
            reason: "x".into(),
            conflict_with: "y".into()
        }
        .is_proceed());
    }
}
