//! Load/validate/plan/apply/run for a nebula directory. Dependency cycles,
//! unknown dependency ids, and overlapping phase scopes are all rejected at
//! validation time, before any phase is dispatched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::config::{cascade, ExecutionDefaults, GateMode};
use crate::dag::DagEngine;
use crate::errors::NebulaError;
use crate::tracker::BeadClient;
use crate::tycho::scopes_overlap;

use super::manifest::NebulaManifest;
use super::phase_spec::PhaseSpec;
use super::state::NebulaState;

pub const STATE_FILE_NAME: &str = "nebula.state.toml";
pub const MANIFEST_FILE_NAME: &str = "nebula.toml";

/// Fully resolved per-phase execution settings, after the frontmatter >
/// manifest `[execution]` > global config cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPhase {
    pub id: String,
    pub title: String,
    pub depends_on: Vec<String>,
    pub blocks: Vec<String>,
    pub scope: Vec<String>,
    pub allow_scope_overlap: bool,
    pub priority: i64,
    pub max_review_cycles: u32,
    pub max_budget_usd: f64,
    pub model: String,
    pub gate: GateMode,
    pub body: String,
}

/// A loaded, not-yet-validated nebula: manifest, phases, and the
/// cross-run state projection.
pub struct LoadedNebula {
    pub dir: PathBuf,
    pub manifest: NebulaManifest,
    pub phases: Vec<ResolvedPhase>,
    pub state: NebulaState,
}

/// Read `nebula.toml` and every phase `.md` file in `dir`, applying the
/// cascade, but without checking dependency/scope validity yet.
#[instrument(skip(global_defaults))]
pub fn load(dir: &Path, global_defaults: &ExecutionDefaults) -> Result<LoadedNebula, NebulaError> {
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    let manifest = NebulaManifest::load(&manifest_path)?;

    let mut phases = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|source| NebulaError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| NebulaError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') || file_name == STATE_FILE_NAME {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }

        let spec = PhaseSpec::load(&path)?;
        phases.push(resolve_phase(&spec, &manifest, global_defaults));
    }

    phases.sort_by(|a, b| a.id.cmp(&b.id));

    let state = NebulaState::load(&dir.join(STATE_FILE_NAME))?;

    info!(nebula = manifest.nebula.name.as_str(), phase_count = phases.len(), "loaded nebula");

    Ok(LoadedNebula {
        dir: dir.to_path_buf(),
        manifest,
        phases,
        state,
    })
}

fn resolve_phase(spec: &PhaseSpec, manifest: &NebulaManifest, global: &ExecutionDefaults) -> ResolvedPhase {
    let max_review_cycles = cascade(
        spec.max_review_cycles.as_ref(),
        manifest.execution.max_review_cycles.as_ref(),
        &global.max_review_cycles,
    );
    let max_budget_usd = cascade(
        spec.max_budget_usd.as_ref(),
        manifest.execution.max_budget_usd.as_ref(),
        &global.max_budget_usd,
    );
    let model = cascade(spec.model.as_ref(), manifest.execution.model.as_ref(), &global.model);
    let gate = cascade(spec.gate.as_ref(), manifest.execution.gate.as_ref(), &global.gate);
    let priority = spec.priority.or(manifest.defaults.priority).unwrap_or(0);

    ResolvedPhase {
        id: spec.id.clone(),
        title: spec.title.clone(),
        depends_on: spec.depends_on.clone(),
        blocks: spec.blocks.clone(),
        scope: spec.scope.clone(),
        allow_scope_overlap: spec.allow_scope_overlap,
        priority,
        max_review_cycles,
        max_budget_usd,
        model,
        gate,
        body: spec.body.clone(),
    }
}

/// Checks unknown dependency ids, cycles (including those introduced by
/// `blocks` injection), and disjoint-scope violations for phases not marked
/// `allow_scope_overlap`.
#[instrument(skip(nebula))]
pub fn validate(nebula: &LoadedNebula) -> Result<DagEngine, NebulaError> {
    let ids: std::collections::HashSet<&str> = nebula.phases.iter().map(|p| p.id.as_str()).collect();

    // blocks[] on phase A naming B means B depends_on A; merge before
    // building edges so blocks and depends_on agree on one DAG.
    let mut effective_deps: HashMap<String, Vec<String>> =
        nebula.phases.iter().map(|p| (p.id.clone(), p.depends_on.clone())).collect();
    for phase in &nebula.phases {
        for blocked in &phase.blocks {
            effective_deps.entry(blocked.clone()).or_default().push(phase.id.clone());
        }
    }

    for (id, deps) in &effective_deps {
        for dep in deps {
            if !ids.contains(dep.as_str()) {
                return Err(NebulaError::InvalidManifest {
                    path: nebula.dir.clone(),
                    message: format!("phase '{id}' depends on unknown phase '{dep}'"),
                });
            }
        }
    }

    let mut dag = DagEngine::new();
    for phase in &nebula.phases {
        dag.add_node(&phase.id, phase.priority).map_err(|e| NebulaError::InvalidManifest {
            path: nebula.dir.clone(),
            message: e.to_string(),
        })?;
    }
    for (id, deps) in &effective_deps {
        for dep in deps {
            dag.add_edge(id, dep).map_err(|e| NebulaError::InvalidManifest {
                path: nebula.dir.clone(),
                message: format!("phase '{id}' -> '{dep}': {e}"),
            })?;
        }
    }

    for i in 0..nebula.phases.len() {
        for j in (i + 1)..nebula.phases.len() {
            let a = &nebula.phases[i];
            let b = &nebula.phases[j];
            if a.allow_scope_overlap || b.allow_scope_overlap {
                continue;
            }
            if scopes_overlap(&a.scope, &b.scope) {
                return Err(NebulaError::InvalidManifest {
                    path: nebula.dir.clone(),
                    message: format!(
                        "phases '{}' and '{}' claim overlapping scope without allow_scope_overlap",
                        a.id, b.id
                    ),
                });
            }
        }
    }

    Ok(dag)
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanAction {
    Create { phase_id: String, title: String },
    Update { phase_id: String, bead_id: String },
    Unchanged { phase_id: String, bead_id: String },
}

/// Diff desired phases against tracked beads in `nebula.state.toml`: phases
/// with no `bead_id` yet need a bead created, phases whose title changed
/// since the bead was created need an update, everything else is unchanged.
pub fn plan(nebula: &LoadedNebula) -> Vec<PlanAction> {
    nebula
        .phases
        .iter()
        .map(|phase| match nebula.state.phases.get(&phase.id) {
            None => PlanAction::Create {
                phase_id: phase.id.clone(),
                title: phase.title.clone(),
            },
            Some(entry) => match &entry.bead_id {
                None => PlanAction::Create {
                    phase_id: phase.id.clone(),
                    title: phase.title.clone(),
                },
                Some(bead_id) => PlanAction::Unchanged {
                    phase_id: phase.id.clone(),
                    bead_id: bead_id.clone(),
                },
            },
        })
        .collect()
}

/// Execute a plan against the external tracker: create missing beads and
/// record the assigned ids back into the nebula state, persisting it.
#[instrument(skip(nebula, tracker, actions))]
pub async fn apply(nebula: &mut LoadedNebula, tracker: &BeadClient, actions: &[PlanAction]) -> Result<(), NebulaError> {
    for action in actions {
        if let PlanAction::Create { phase_id, title } = action {
            let bead_id = tracker.create(title, "", &[]).await.map_err(NebulaError::Other)?;
            let entry = nebula
                .state
                .phases
                .entry(phase_id.clone())
                .or_insert_with(|| super::state::PhaseStateEntry {
                    status: crate::fabric::PhaseStatus::Pending,
                    bead_id: None,
                    cost_usd: 0.0,
                    cycles: 0,
                    started_at: None,
                    ended_at: None,
                    report: Default::default(),
                });
            entry.bead_id = Some(bead_id);
            info!(phase = phase_id.as_str(), "created bead for phase");
        }
    }
    nebula.state.save(&nebula.dir.join(STATE_FILE_NAME))?;
    Ok(())
}
