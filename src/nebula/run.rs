//! Concrete `worker_pool::PhaseExecutor`: wires the coder/reviewer loop,
//! git snapshotting, and the Publisher together for one phase, the way
//! `run_orchestrator`'s per-phase loop body wired `ClaudeRunner` and
//! `GitTracker` together, generalized from a fixed phase list to whatever
//! phase id the Worker Pool dispatches.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::agent::ClaudeInvoker;
use crate::config::{GateMode, ReviewStrictness};
use crate::fabric::{FabricStore, PhaseReport as FabricPhaseReport, PhaseState, PhaseStatus};
use crate::phase_loop::{self, AgentInvoker, Hail, PhaseLoopConfig, Prompter, Report};
use crate::publisher::Publisher;
use crate::telemetry::TelemetrySink;
use crate::tracker::GitTracker;
use crate::worker_pool::{CheckpointFlags, PhaseExecutor, WorkerOutcome};

use super::lifecycle::ResolvedPhase;

fn report_to_fabric(report: &Report) -> FabricPhaseReport {
    let satisfaction = match report.satisfaction {
        crate::phase_loop::Level::High => 1.0,
        crate::phase_loop::Level::Medium => 0.5,
        crate::phase_loop::Level::Low => 0.0,
    };
    FabricPhaseReport {
        satisfaction: Some(satisfaction),
        risk: Some(format!("{:?}", report.risk).to_lowercase()),
        needs_human_review: report.needs_human_review,
        summary: Some(report.summary.clone()),
    }
}

/// Surfaces hails on the log; under `GateMode::Approve` blocks on a
/// terminal confirmation, everything else auto-proceeds.
struct ConsolePrompter {
    blocking: bool,
}

#[async_trait]
impl Prompter for ConsolePrompter {
    async fn handle_hail(&self, hail: &Hail) -> anyhow::Result<bool> {
        warn!(kind = ?hail.kind, message = %hail.message, "agent raised a hail");
        if !self.blocking {
            return Ok(true);
        }
        let message = hail.message.clone();
        tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(format!("{message}\nProceed?"))
                .default(false)
                .interact()
                .unwrap_or(false)
        })
        .await
        .map_err(|e| anyhow::anyhow!("prompt task panicked: {e}"))
    }
}

/// Ties the coder/reviewer loop, git snapshotting, and the Publisher
/// together for whichever phase id the Worker Pool dispatches.
pub struct NebulaPhaseExecutor {
    project_dir: PathBuf,
    phases: HashMap<String, ResolvedPhase>,
    context_prefix: String,
    agent_cmd: String,
    strictness: ReviewStrictness,
    fabric: Arc<Mutex<FabricStore>>,
    telemetry: Arc<TelemetrySink>,
    epoch: String,
}

impl NebulaPhaseExecutor {
    pub fn new(
        project_dir: PathBuf,
        phases: HashMap<String, ResolvedPhase>,
        context_prefix: String,
        agent_cmd: String,
        strictness: ReviewStrictness,
        fabric: Arc<Mutex<FabricStore>>,
        telemetry: Arc<TelemetrySink>,
        epoch: String,
    ) -> Self {
        Self {
            project_dir,
            phases,
            context_prefix,
            agent_cmd,
            strictness,
            fabric,
            telemetry,
            epoch,
        }
    }

    async fn run_one(&self, phase_id: &str, phase: &ResolvedPhase) -> anyhow::Result<WorkerOutcome> {
        let tracker = GitTracker::new(&self.project_dir)?;
        let base_commit = tracker.snapshot_before(phase_id)?;

        let invoker = ClaudeInvoker::new(self.agent_cmd.clone(), self.project_dir.clone(), phase.model.clone());
        let prompter = ConsolePrompter {
            blocking: phase.gate == GateMode::Approve,
        };
        let config = PhaseLoopConfig {
            max_cycles: phase.max_review_cycles,
            max_budget_usd: phase.max_budget_usd,
            gate: phase.gate,
            strictness: self.strictness,
        };

        let loop_result = phase_loop::run_phase_loop(
            phase_id,
            &phase.body,
            &self.context_prefix,
            &config,
            &invoker as &dyn AgentInvoker,
            None,
            &prompter,
        )
        .await;

        let (success, cost_usd, report) = match &loop_result {
            Ok(outcome) => (true, outcome.total_cost_usd, outcome.report.clone()),
            Err(crate::errors::PhaseLoopError::Budget { spent, .. }) => (false, *spent, Report::default()),
            Err(_) => (false, 0.0, Report::default()),
        };

        let final_commit = if success {
            Some(tracker.snapshot_before(phase_id)?)
        } else {
            None
        };

        if let (true, Some(final_sha)) = (success, final_commit.as_deref()) {
            let mut fabric = self.fabric.lock().await;
            let mut publisher = Publisher::new(&self.project_dir, &mut fabric)?;
            publisher.publish_phase(phase_id, &base_commit, final_sha)?;
        }

        {
            let fabric = self.fabric.lock().await;
            let now = crate::fabric::format_timestamp(chrono::Utc::now());
            fabric.set_phase_state(&PhaseState {
                phase_id: phase_id.to_string(),
                status: if success { PhaseStatus::Done } else { PhaseStatus::Failed },
                bead_id: None,
                cycles_used: loop_result.as_ref().map(|o| o.cycles.len() as u32).unwrap_or(0),
                cost_usd,
                started_at: Some(now.clone()),
                ended_at: Some(now),
                wave_number: None,
                report: report_to_fabric(&report),
                updated_at: crate::fabric::format_timestamp(chrono::Utc::now()),
            })?;
            if !success {
                fabric.release_claims(phase_id)?;
            }
        }

        let _ = self.telemetry.phase_completed(&self.epoch, phase_id, success, cost_usd);

        Ok(WorkerOutcome {
            phase_id: phase_id.to_string(),
            success,
            base_commit,
            final_commit,
            error: loop_result.err().map(|e| e.to_string()),
        })
    }
}

#[async_trait]
impl PhaseExecutor for NebulaPhaseExecutor {
    async fn execute(&self, phase_id: &str, _checkpoint: Arc<CheckpointFlags>) -> WorkerOutcome {
        let _ = self.telemetry.phase_started(&self.epoch, phase_id);

        let Some(phase) = self.phases.get(phase_id).cloned() else {
            return WorkerOutcome {
                phase_id: phase_id.to_string(),
                success: false,
                base_commit: String::new(),
                final_commit: None,
                error: Some(format!("unknown phase '{phase_id}'")),
            };
        };

        match self.run_one(phase_id, &phase).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(phase = phase_id, error = %e, "phase execution failed");
                WorkerOutcome {
                    phase_id: phase_id.to_string(),
                    success: false,
                    base_commit: String::new(),
                    final_commit: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
