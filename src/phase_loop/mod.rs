//! `code` → `lint` → `review` → `decision` state machine for a single
//! phase: a bounded coder/reviewer cycle with a parsed reviewer contract,
//! finding lifecycle tracking, and hail/gate routing.

mod contract;
mod findings;
mod invoker;

pub use contract::{Issue, Level, Report, ReviewOutcome, Severity};
pub use findings::{FindingLedger, FindingStatus, LabeledFinding};
pub use invoker::{AgentInvocation, AgentInvoker, AgentResult, AgentRole, Hail, HailKind, LintRunner, Prompter};

use tracing::{info, instrument, warn};

use crate::config::{GateMode, ReviewStrictness};
use crate::errors::PhaseLoopError;

#[derive(Debug, Clone)]
pub struct PhaseLoopConfig {
    pub max_cycles: u32,
    pub max_budget_usd: f64,
    pub gate: GateMode,
    pub strictness: ReviewStrictness,
}

#[derive(Debug, Clone)]
pub struct CycleLog {
    pub cycle: u32,
    pub coder_cost_usd: f64,
    pub reviewer_cost_usd: f64,
    pub lint_issues: Vec<Issue>,
    pub review: ReviewOutcome,
    pub transitions: Vec<LabeledFinding>,
}

#[derive(Debug, Clone)]
pub struct PhaseLoopOutcome {
    pub report: Report,
    pub total_cost_usd: f64,
    pub cycles: Vec<CycleLog>,
}

async fn route_hail(
    hail: &Hail,
    gate: GateMode,
    prompter: &dyn Prompter,
) -> Result<(), PhaseLoopError> {
    match gate {
        GateMode::Trust => Ok(()),
        GateMode::Watch | GateMode::Review => {
            let _ = prompter.handle_hail(hail).await;
            Ok(())
        }
        GateMode::Approve => {
            let approved = prompter
                .handle_hail(hail)
                .await
                .map_err(PhaseLoopError::Other)?;
            if approved {
                Ok(())
            } else {
                Err(PhaseLoopError::Other(anyhow::anyhow!(
                    "human declined hail: {}",
                    hail.message
                )))
            }
        }
    }
}

/// Run the coder/reviewer cycle to completion for one phase. Returns
/// `Ok` only on `APPROVED:` (or minor-only issues under
/// `ReviewStrictness::AutoApprove`). Callers run the Publisher and mark
/// the phase `done` on success.
#[instrument(skip(invoker, lint, prompter, phase_body), fields(phase_id))]
pub async fn run_phase_loop(
    phase_id: &str,
    phase_body: &str,
    context_prefix: &str,
    config: &PhaseLoopConfig,
    invoker: &dyn AgentInvoker,
    lint: Option<&dyn LintRunner>,
    prompter: &dyn Prompter,
) -> Result<PhaseLoopOutcome, PhaseLoopError> {
    let coder_budget = config.max_budget_usd / (2.0 * config.max_cycles.max(1) as f64);
    let mut total_cost = 0.0_f64;
    let mut ledger = FindingLedger::new();
    let mut prior_findings: Vec<LabeledFinding> = Vec::new();
    let mut cycles: Vec<CycleLog> = Vec::new();

    for cycle in 1..=config.max_cycles {
        let coder_invocation = AgentInvocation {
            role: AgentRole::Coder,
            context_prefix: context_prefix.to_string(),
            findings: prior_findings.clone(),
            phase_body: phase_body.to_string(),
            budget_usd: coder_budget,
        };
        let coder_result = invoker.invoke(&coder_invocation).await.map_err(PhaseLoopError::Other)?;
        total_cost += coder_result.cost_usd;
        if total_cost > config.max_budget_usd {
            return Err(PhaseLoopError::Budget {
                phase: phase_id.to_string(),
                spent: total_cost,
                cap: config.max_budget_usd,
            });
        }
        if let Some(hail) = &coder_result.hail {
            route_hail(hail, config.gate, prompter).await?;
        }

        let lint_issues = if let Some(lint) = lint {
            lint.run().await.map_err(PhaseLoopError::Other)?
        } else {
            Vec::new()
        };
        if !lint_issues.is_empty() {
            warn!(phase = phase_id, count = lint_issues.len(), "lint reported issues");
        }

        let reviewer_invocation = AgentInvocation {
            role: AgentRole::Reviewer,
            context_prefix: context_prefix.to_string(),
            findings: prior_findings.clone(),
            phase_body: phase_body.to_string(),
            budget_usd: coder_budget,
        };
        let reviewer_result = invoker.invoke(&reviewer_invocation).await.map_err(PhaseLoopError::Other)?;
        total_cost += reviewer_result.cost_usd;
        if total_cost > config.max_budget_usd {
            return Err(PhaseLoopError::Budget {
                phase: phase_id.to_string(),
                spent: total_cost,
                cap: config.max_budget_usd,
            });
        }
        if let Some(hail) = &reviewer_result.hail {
            route_hail(hail, config.gate, prompter).await?;
        }

        let review = contract::parse_reviewer_output(&reviewer_result.result_text);

        let classified: Vec<Issue> = match &review {
            ReviewOutcome::Issues { issues, .. } => issues.clone(),
            ReviewOutcome::Approved { .. } => Vec::new(),
        };
        let transitions = ledger.advance(&classified);

        let decision_approved = match &review {
            ReviewOutcome::Approved { .. } => true,
            ReviewOutcome::Issues { issues, .. } => {
                let has_blocking = issues
                    .iter()
                    .any(|i| matches!(i.severity, Severity::Critical | Severity::Major));
                !has_blocking && config.strictness == ReviewStrictness::AutoApprove
            }
        };

        cycles.push(CycleLog {
            cycle,
            coder_cost_usd: coder_result.cost_usd,
            reviewer_cost_usd: reviewer_result.cost_usd,
            lint_issues: lint_issues.clone(),
            review: review.clone(),
            transitions,
        });

        if decision_approved {
            info!(phase = phase_id, cycle, "phase approved");
            return Ok(PhaseLoopOutcome {
                report: review.report().clone(),
                total_cost_usd: total_cost,
                cycles,
            });
        }

        prior_findings = cycles.last().expect("just pushed").transitions.clone();
        prior_findings.extend(lint_issues.into_iter().map(|issue| LabeledFinding {
            description: issue.description,
            severity: issue.severity,
            status: FindingStatus::StillPresent,
        }));
    }

    Err(PhaseLoopError::MaxCycles {
        phase: phase_id.to_string(),
        max_cycles: config.max_cycles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedInvoker {
        coder_calls: AtomicU32,
        reviewer_responses: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(&self, invocation: &AgentInvocation) -> anyhow::Result<AgentResult> {
            match invocation.role {
                AgentRole::Coder => {
                    self.coder_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(AgentResult {
                        result_text: "wrote code".into(),
                        cost_usd: 0.01,
                        duration_ms: 10,
                        session_id: "s1".into(),
                        is_error: false,
                        hail: None,
                    })
                }
                AgentRole::Reviewer => {
                    let mut responses = self.reviewer_responses.lock().unwrap();
                    let text = responses.remove(0);
                    Ok(AgentResult {
                        result_text: text.to_string(),
                        cost_usd: 0.01,
                        duration_ms: 10,
                        session_id: "s1".into(),
                        is_error: false,
                        hail: None,
                    })
                }
            }
        }
    }

    struct NoopPrompter;
    #[async_trait]
    impl Prompter for NoopPrompter {
        async fn handle_hail(&self, _hail: &Hail) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn config() -> PhaseLoopConfig {
        PhaseLoopConfig {
            max_cycles: 3,
            max_budget_usd: 1.0,
            gate: GateMode::Trust,
            strictness: ReviewStrictness::Continue,
        }
    }

    #[tokio::test]
    async fn approves_on_first_cycle_when_reviewer_approves() {
        let invoker = ScriptedInvoker {
            coder_calls: AtomicU32::new(0),
            reviewer_responses: Mutex::new(vec!["APPROVED: looks good\n\nREPORT:\nSATISFACTION: high\nRISK: low\nNEEDS_HUMAN_REVIEW: no\nSUMMARY: done\n"]),
        };
        let outcome = run_phase_loop(
            "01-bootstrap",
            "do the thing",
            "ctx",
            &config(),
            &invoker,
            None,
            &NoopPrompter,
        )
        .await
        .unwrap();
        assert_eq!(outcome.cycles.len(), 1);
        assert_eq!(invoker.coder_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_on_major_issue_then_approves() {
        let invoker = ScriptedInvoker {
            coder_calls: AtomicU32::new(0),
            reviewer_responses: Mutex::new(vec![
                "ISSUE:\nSEVERITY: major\nDESCRIPTION: unchecked error\nREPORT:\nSATISFACTION: low\nRISK: high\nNEEDS_HUMAN_REVIEW: yes\nSUMMARY: fix it\n",
                "APPROVED: fixed\n\nREPORT:\nSATISFACTION: high\nRISK: low\nNEEDS_HUMAN_REVIEW: no\nSUMMARY: done\n",
            ]),
        };
        let outcome = run_phase_loop(
            "01-bootstrap",
            "do the thing",
            "ctx",
            &config(),
            &invoker,
            None,
            &NoopPrompter,
        )
        .await
        .unwrap();
        assert_eq!(outcome.cycles.len(), 2);
        assert_eq!(invoker.coder_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exceeds_max_cycles_fails() {
        let invoker = ScriptedInvoker {
            coder_calls: AtomicU32::new(0),
            reviewer_responses: Mutex::new(vec![
                "ISSUE:\nSEVERITY: major\nDESCRIPTION: still broken\nREPORT:\nSATISFACTION: low\nRISK: high\nNEEDS_HUMAN_REVIEW: yes\nSUMMARY: no\n";
                3
            ]),
        };
        let err = run_phase_loop(
            "01-bootstrap",
            "do the thing",
            "ctx",
            &config(),
            &invoker,
            None,
            &NoopPrompter,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PhaseLoopError::MaxCycles { .. }));
    }

    #[tokio::test]
    async fn minor_only_issue_continues_under_default_strictness() {
        let invoker = ScriptedInvoker {
            coder_calls: AtomicU32::new(0),
            reviewer_responses: Mutex::new(vec![
                "ISSUE:\nSEVERITY: minor\nDESCRIPTION: nit\nREPORT:\nSATISFACTION: medium\nRISK: medium\nNEEDS_HUMAN_REVIEW: no\nSUMMARY: minor only\n",
                "APPROVED: cleaned up\n\nREPORT:\nSATISFACTION: high\nRISK: low\nNEEDS_HUMAN_REVIEW: no\nSUMMARY: done\n",
            ]),
        };
        let outcome = run_phase_loop(
            "01-bootstrap",
            "do the thing",
            "ctx",
            &config(),
            &invoker,
            None,
            &NoopPrompter,
        )
        .await
        .unwrap();
        assert_eq!(outcome.cycles.len(), 2);
    }
}
