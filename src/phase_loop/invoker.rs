//! The seam between the per-phase loop and the LLM CLI subprocess wrapper
//! (`agent::ClaudeInvoker`, built against `src/orchestrator/runner.rs`).
//! The loop only depends on this trait, never on the subprocess details.

use async_trait::async_trait;

use super::contract::Issue;
use super::findings::LabeledFinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Coder,
    Reviewer,
}

/// A structured hail raised mid-invocation: ambiguity the agent could not
/// resolve on its own, or a decision that needs a human call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HailKind {
    Ambiguity,
    DecisionNeeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hail {
    pub kind: HailKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub role: AgentRole,
    pub context_prefix: String,
    pub findings: Vec<LabeledFinding>,
    pub phase_body: String,
    pub budget_usd: f64,
}

#[derive(Debug, Clone)]
pub struct AgentResult {
    pub result_text: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub session_id: String,
    pub is_error: bool,
    pub hail: Option<Hail>,
}

#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, invocation: &AgentInvocation) -> anyhow::Result<AgentResult>;
}

/// Deterministic build/vet/format/test commands run between code and
/// review. Failures become synthetic reviewer issues for the next cycle.
#[async_trait]
pub trait LintRunner: Send + Sync {
    async fn run(&self) -> anyhow::Result<Vec<Issue>>;
}

/// Routes a hail through the configured gate. `Trust` never calls this,
/// `Watch`/`Review` ignore the outcome, `Approve` blocks on it.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn handle_hail(&self, hail: &Hail) -> anyhow::Result<bool>;
}
