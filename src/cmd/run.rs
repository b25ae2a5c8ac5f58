//! `quasar run`: load a nebula, validate it, and dispatch the Worker Pool
//! against the fabric until completion, manual stop, or deadlock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::QuasarConfig;
use crate::fabric::{FabricStore, PhaseState, PhaseStatus};
use crate::nebula::{self, NebulaPhaseExecutor};
use crate::poll::{ContractPoller, PhaseRequirement};
use crate::telemetry::TelemetrySink;
use crate::tycho::PhaseMeta;
use crate::watcher::{InterventionWatcher, NebulaChange};
use crate::worker_pool::{ensure_control_dir, PhaseExecutor, PoolOutcome, WorkerPool};

/// Process exit codes for `quasar run`: 0 on success, nonzero on error,
/// max-cycles/budget exhaustion (surfaced as phase failures), or manual stop.
pub const EXIT_OK: i32 = 0;
pub const EXIT_DEADLOCKED: i32 = 2;
pub const EXIT_MANUAL_STOP: i32 = 3;

pub async fn cmd_run(nebula_dir: &Path, config: &QuasarConfig) -> Result<i32> {
    let loaded = nebula::load(nebula_dir, &config.execution)?;
    let dag = nebula::validate(&loaded)?;

    config.ensure_directories()?;
    ensure_control_dir(nebula_dir)?;

    let poll_store = FabricStore::open(&config.fabric_db_path())?;
    for phase in &loaded.phases {
        if poll_store.get_phase_state(&phase.id)?.is_none() {
            poll_store.set_phase_state(&PhaseState {
                phase_id: phase.id.clone(),
                status: PhaseStatus::Pending,
                bead_id: None,
                cycles_used: 0,
                cost_usd: 0.0,
                started_at: None,
                ended_at: None,
                wave_number: None,
                report: Default::default(),
                updated_at: crate::fabric::format_timestamp(chrono::Utc::now()),
            })?;
        }
    }

    let phase_metas: HashMap<String, PhaseMeta> = loaded
        .phases
        .iter()
        .map(|p| {
            (
                p.id.clone(),
                PhaseMeta {
                    id: p.id.clone(),
                    scope: p.scope.clone(),
                    allow_scope_overlap: p.allow_scope_overlap,
                },
            )
        })
        .collect();

    let requirements: Vec<PhaseRequirement> = loaded
        .phases
        .iter()
        .map(|p| PhaseRequirement {
            phase_id: p.id.clone(),
            depends_on: p.depends_on.clone(),
            scope: p.scope.clone(),
        })
        .collect();
    let poller = ContractPoller::new(requirements);

    let resolved_by_id: HashMap<String, nebula::ResolvedPhase> =
        loaded.phases.iter().map(|p| (p.id.clone(), p.clone())).collect();

    let exec_store = Arc::new(Mutex::new(FabricStore::open(&config.fabric_db_path())?));
    let telemetry = Arc::new(TelemetrySink::new(config.telemetry_path()));
    let epoch = config.project_dir.display().to_string();
    let pool_telemetry = telemetry.clone();
    let pool_epoch = epoch.clone();

    let context_prefix = if loaded.manifest.nebula.description.is_empty() {
        loaded.manifest.nebula.name.clone()
    } else {
        loaded.manifest.nebula.description.clone()
    };

    let executor: Arc<dyn PhaseExecutor> = Arc::new(NebulaPhaseExecutor::new(
        config.project_dir.clone(),
        resolved_by_id,
        context_prefix,
        config.agent_cmd.clone(),
        config.review_strictness,
        exec_store,
        telemetry,
        epoch,
    ));

    let watcher = InterventionWatcher::new(nebula_dir)?;
    let watcher_nebula_dir = nebula_dir.to_path_buf();
    let poll_interval = tokio::time::Duration::from_secs(2);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_interval).await;
            for change in watcher.poll() {
                match change {
                    NebulaChange::PhaseBodyChanged(path) => {
                        info!(path = %path.display(), "phase body changed, next dispatch cycle will pick up the edit");
                    }
                    NebulaChange::Pause(active) => {
                        info!(active, "pause state changed");
                    }
                    NebulaChange::Stop => {
                        info!("stop requested via control file");
                    }
                }
            }
            if !watcher_nebula_dir.exists() {
                break;
            }
        }
    });

    let mut pool = WorkerPool::new(
        config.execution.max_workers,
        nebula_dir.to_path_buf(),
        phase_metas,
        config.execution.max_retries,
        &dag,
        &poll_store,
        &poller,
        executor,
        config.execution.stale_claim_secs as i64,
        config.execution.stale_task_secs as i64,
        pool_telemetry,
        pool_epoch,
    );

    let outcome = pool.run().await?;
    match outcome {
        PoolOutcome::Completed => {
            println!("all phases completed");
            Ok(EXIT_OK)
        }
        PoolOutcome::ManualStop => {
            println!("stopped by STOP control file");
            Ok(EXIT_MANUAL_STOP)
        }
        PoolOutcome::Deadlocked => {
            println!("deadlocked: blocked phases escalated to human decision");
            Ok(EXIT_DEADLOCKED)
        }
    }
}
