//! LLM-backed poller: submits a compact prompt with the phase body and a
//! rendered snapshot, and parses the model's decision.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::fabric::Snapshot;

use super::types::{PollResult, Poller};

/// Anything that can answer a prompt with free text — satisfied by the
/// Agent Invoker's `claude -p` wrapper.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn run_prompt(&self, prompt: &str) -> anyhow::Result<String>;
}

pub struct LlmPoller<R: PromptRunner> {
    runner: R,
    phase_bodies: HashMap<String, String>,
}

impl<R: PromptRunner> LlmPoller<R> {
    pub fn new(runner: R, phase_bodies: HashMap<String, String>) -> Self {
        Self { runner, phase_bodies }
    }

    fn render_prompt(&self, phase_id: &str, snapshot: &Snapshot) -> String {
        let body = self.phase_bodies.get(phase_id).map(String::as_str).unwrap_or("");
        let completed: Vec<&str> = snapshot.completed.iter().map(String::as_str).collect();
        let in_progress: Vec<&str> = snapshot.in_progress.iter().map(String::as_str).collect();
        let claims: Vec<String> = snapshot
            .file_claims
            .iter()
            .map(|(path, owner)| format!("{path} -> {owner}"))
            .collect();

        format!(
            "You are deciding whether phase '{phase_id}' may start.\n\
             PHASE BODY:\n{body}\n\n\
             FABRIC SNAPSHOT:\ncompleted: {completed:?}\nin_progress: {in_progress:?}\nfile_claims: {claims:?}\n\n\
             Respond with exactly one line:\n\
             DECISION: PROCEED\n\
             or\n\
             DECISION: NEED_INFO reason=\"...\" missing_info=\"a,b\"\n\
             or\n\
             DECISION: CONFLICT reason=\"...\" conflict_with=\"...\"\n"
        )
    }

    pub fn parse_decision(text: &str) -> PollResult {
        let Some(line) = text.lines().find(|l| l.trim_start().starts_with("DECISION:")) else {
            return PollResult::NeedInfo {
                reason: "poller produced no parseable decision".into(),
                missing_info: vec![],
            };
        };
        let rest = line.trim_start().trim_start_matches("DECISION:").trim();

        if rest.starts_with("PROCEED") {
            return PollResult::Proceed;
        }
        if let Some(args) = rest.strip_prefix("NEED_INFO") {
            let reason = extract_quoted(args, "reason").unwrap_or_default();
            let missing_info = extract_quoted(args, "missing_info")
                .map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
                .unwrap_or_default();
            return PollResult::NeedInfo { reason, missing_info };
        }
        if let Some(args) = rest.strip_prefix("CONFLICT") {
            let reason = extract_quoted(args, "reason").unwrap_or_default();
            let conflict_with = extract_quoted(args, "conflict_with").unwrap_or_default();
            return PollResult::Conflict { reason, conflict_with };
        }

        PollResult::NeedInfo {
            reason: format!("unrecognized decision line: {rest}"),
            missing_info: vec![],
        }
    }
}

fn extract_quoted(text: &str, key: &str) -> Option<String> {
    let marker = format!("{key}=\"");
    let start = text.find(&marker)? + marker.len();
    let end = text[start..].find('"')? + start;
    Some(text[start..end].to_string())
}

#[async_trait]
impl<R: PromptRunner> Poller for LlmPoller<R> {
    async fn poll(&self, phase_id: &str, snapshot: &Snapshot) -> anyhow::Result<PollResult> {
        let prompt = self.render_prompt(phase_id, snapshot);
        let response = self.runner.run_prompt(&prompt).await?;
        Ok(Self::parse_decision(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoRunner(String);

    #[async_trait]
    impl PromptRunner for EchoRunner {
        async fn run_prompt(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn parse_decision_proceed() {
        assert_eq!(
            LlmPoller::<EchoRunner>::parse_decision("DECISION: PROCEED"),
            PollResult::Proceed
        );
    }

    #[test]
    fn parse_decision_need_info_splits_missing_info() {
        let text = r#"DECISION: NEED_INFO reason="waiting" missing_info="01-bootstrap, 02-schema""#;
        match LlmPoller::<EchoRunner>::parse_decision(text) {
            PollResult::NeedInfo { reason, missing_info } => {
                assert_eq!(reason, "waiting");
                assert_eq!(missing_info, vec!["01-bootstrap", "02-schema"]);
            }
            other => panic!("expected NeedInfo, got {other:?}"),
        }
    }

    #[test]
    fn parse_decision_conflict() {
        let text = r#"DECISION: CONFLICT reason="clash" conflict_with="03-api""#;
        match LlmPoller::<EchoRunner>::parse_decision(text) {
            PollResult::Conflict { conflict_with, .. } => assert_eq!(conflict_with, "03-api"),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_delegates_to_runner_and_parses() {
        let poller = LlmPoller::new(EchoRunner("DECISION: PROCEED".into()), HashMap::new());
        let snap = Snapshot::default();
        let result = poller.poll("01", &snap).await.unwrap();
        assert!(result.is_proceed());
    }
}
