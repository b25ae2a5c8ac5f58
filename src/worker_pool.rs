//! Bounded parallel dispatch loop: a semaphore-backed pool of active tasks
//! that asks the scheduler for eligible phase ids, scans them through the
//! fabric, dispatches the proceed-set, and re-evaluates on every completion.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, instrument, warn};

use crate::dag::DagEngine;
use crate::fabric::{FabricStore, PhaseState, PhaseStatus};
use crate::poll::Poller;
use crate::telemetry::TelemetrySink;
use crate::tycho::{PhaseMeta, Scheduler};

/// Control-file names checked between dispatch cycles.
pub(crate) const PAUSE_FILE: &str = "PAUSE";
pub(crate) const STOP_FILE: &str = "STOP";

#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub phase_id: String,
    pub success: bool,
    pub base_commit: String,
    pub final_commit: Option<String>,
    pub error: Option<String>,
}

/// Executes one phase end to end: claim branch/baseline, run the
/// coder/reviewer loop, hand commits to the Publisher, release claims.
/// Implemented by the nebula lifecycle, which has the concrete git/agent
/// wiring this module deliberately does not depend on.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, phase_id: &str, checkpoint: Arc<CheckpointFlags>) -> WorkerOutcome;
}

/// Shared flag set the Intervention Watcher sets when a phase body changes
/// mid-run. A `PhaseExecutor` polls this between sub-steps (never mid-LLM
/// call) and, if set, checkpoints and resumes with a fresh prompt.
#[derive(Debug, Default)]
pub struct CheckpointFlags {
    changed: Mutex<HashSet<String>>,
}

impl CheckpointFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_changed(&self, phase_id: &str) {
        self.changed.lock().await.insert(phase_id.to_string());
    }

    pub async fn take_if_changed(&self, phase_id: &str) -> bool {
        self.changed.lock().await.remove(phase_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOutcome {
    Completed,
    ManualStop,
    Deadlocked,
}

pub struct WorkerPool<'a> {
    max_workers: usize,
    control_dir: PathBuf,
    scheduler: Scheduler,
    dag: &'a DagEngine,
    fabric: &'a FabricStore,
    poller: &'a dyn Poller,
    executor: Arc<dyn PhaseExecutor>,
    checkpoint: Arc<CheckpointFlags>,
    stale_claim_secs: i64,
    stale_task_secs: i64,
    telemetry: Arc<TelemetrySink>,
    epoch: String,
}

impl<'a> WorkerPool<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_workers: usize,
        control_dir: PathBuf,
        phases: HashMap<String, PhaseMeta>,
        max_retries: u32,
        dag: &'a DagEngine,
        fabric: &'a FabricStore,
        poller: &'a dyn Poller,
        executor: Arc<dyn PhaseExecutor>,
        stale_claim_secs: i64,
        stale_task_secs: i64,
        telemetry: Arc<TelemetrySink>,
        epoch: String,
    ) -> Self {
        Self {
            max_workers,
            control_dir,
            scheduler: Scheduler::new(phases, max_retries),
            dag,
            fabric,
            poller,
            executor,
            checkpoint: Arc::new(CheckpointFlags::new()),
            stale_claim_secs,
            stale_task_secs,
            telemetry,
            epoch,
        }
    }

    pub fn checkpoint_flags(&self) -> Arc<CheckpointFlags> {
        self.checkpoint.clone()
    }

    fn is_paused(&self) -> bool {
        self.control_dir.join(PAUSE_FILE).exists()
    }

    fn is_stopped(&self) -> bool {
        self.control_dir.join(STOP_FILE).exists()
    }

    /// Persists `Running` to the fabric before spawning, so `snapshot().in_progress`
    /// reflects in-flight phases for any concurrently scanning worker, not just
    /// this pool's local `statuses` map.
    fn mark_running(&self, phase_id: &str) -> anyhow::Result<()> {
        let now = crate::fabric::format_timestamp(Utc::now());
        let mut state = self.fabric.get_phase_state(phase_id)?.unwrap_or_else(|| PhaseState {
            phase_id: phase_id.to_string(),
            status: PhaseStatus::Pending,
            bead_id: None,
            cycles_used: 0,
            cost_usd: 0.0,
            started_at: None,
            ended_at: None,
            wave_number: None,
            report: Default::default(),
            updated_at: now.clone(),
        });
        state.status = PhaseStatus::Running;
        state.started_at = Some(now.clone());
        state.updated_at = now;
        self.fabric.set_phase_state(&state)?;
        Ok(())
    }

    /// Flags file claims and blocked phases aged past the configured
    /// thresholds and records them to telemetry. Run once per dispatch
    /// cycle so staleness is visible without a separate timer task.
    fn check_stale(&self, running: &HashSet<String>, now: chrono::DateTime<Utc>) -> anyhow::Result<()> {
        let claims = self.fabric.all_claims()?;
        let stale = self
            .scheduler
            .stale(&claims, running, now, self.stale_claim_secs, self.stale_task_secs);
        if stale.is_empty() {
            return Ok(());
        }
        warn!(count = stale.len(), "stale claims or blocked phases detected");
        let payload = json!({
            "items": stale.iter().map(|item| json!({
                "kind": format!("{:?}", item.kind),
                "id": item.id,
                "age_secs": item.age_secs,
                "details": item.details,
            })).collect::<Vec<_>>(),
        });
        self.telemetry.record(&self.epoch, "stale_detected", payload)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run(&mut self) -> anyhow::Result<PoolOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers.max(1)));
        let (result_tx, mut result_rx) = mpsc::channel::<WorkerOutcome>(64);
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut statuses: HashMap<String, PhaseStatus> = self
            .fabric
            .all_phase_states()?
            .into_iter()
            .map(|s| (s.phase_id, s.status))
            .collect();

        loop {
            if self.is_stopped() {
                warn!("STOP file present, cooperative shutdown");
                return Ok(PoolOutcome::ManualStop);
            }

            self.check_stale(&in_flight, Utc::now())?;

            if !self.is_paused() && in_flight.len() < self.max_workers {
                let eligible = self.scheduler.eligible(self.dag, &statuses, &in_flight);
                if !eligible.is_empty() {
                    let snapshot = self.fabric.snapshot()?;
                    let outcome = self
                        .scheduler
                        .scan_flat(&eligible, self.poller, &snapshot, Utc::now())
                        .await?;

                    for phase_id in outcome.proceed {
                        if in_flight.len() >= self.max_workers {
                            break;
                        }
                        if in_flight.contains(&phase_id) {
                            continue;
                        }
                        statuses.insert(phase_id.clone(), PhaseStatus::Running);
                        in_flight.insert(phase_id.clone());
                        self.mark_running(&phase_id)?;
                        info!(phase = phase_id.as_str(), "dispatching worker");

                        let permit = semaphore.clone().acquire_owned().await?;
                        let tx = result_tx.clone();
                        let checkpoint = self.checkpoint.clone();
                        let executor = self.executor.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            let result = executor.execute(&phase_id, checkpoint).await;
                            tx.send(result).await.ok();
                        });
                    }

                    for phase_id in outcome.escalated {
                        statuses.insert(phase_id, PhaseStatus::HumanDecision);
                    }
                }
            }

            if in_flight.is_empty() {
                let blocked_count = self.scheduler.escalate_all_blocked();
                let eligible_now = self.scheduler.eligible(self.dag, &statuses, &in_flight);
                if eligible_now.is_empty() && !blocked_count.is_empty() {
                    for id in &blocked_count {
                        statuses.insert(id.clone(), PhaseStatus::HumanDecision);
                    }
                    warn!(count = blocked_count.len(), "deadlock detected, escalating all blocked phases");
                    return Ok(PoolOutcome::Deadlocked);
                }
                if eligible_now.is_empty() {
                    return Ok(PoolOutcome::Completed);
                }
            }

            if !in_flight.is_empty() {
                match result_rx.recv().await {
                    Some(result) => {
                        in_flight.remove(&result.phase_id);
                        let status = if result.success { PhaseStatus::Done } else { PhaseStatus::Failed };
                        statuses.insert(result.phase_id.clone(), status);
                        info!(phase = result.phase_id.as_str(), success = result.success, "worker completed");
                    }
                    None => return Ok(PoolOutcome::Completed),
                }
            } else {
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            }
        }
    }
}

pub fn ensure_control_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
