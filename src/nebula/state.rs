//! `nebula.state.toml`: a human-readable, cross-run projection of fabric
//! phase state, read and written at the start/end of each epoch. Stored as a
//! single TOML snapshot rather than an append log, so it stays diffable and
//! can be inspected without replaying history.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::NebulaError;
use crate::fabric::{PhaseReport, PhaseStatus};

/// TOML has no null type, so every `Option` field here needs
/// `skip_serializing_if` (the fabric's own `PhaseReport` skips this since
/// its rows go through SQLite/JSON, not TOML).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satisfaction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
    #[serde(default)]
    pub needs_human_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl From<PhaseReport> for ReportSnapshot {
    fn from(r: PhaseReport) -> Self {
        Self {
            satisfaction: r.satisfaction,
            risk: r.risk,
            needs_human_review: r.needs_human_review,
            summary: r.summary,
        }
    }
}

impl From<ReportSnapshot> for PhaseReport {
    fn from(r: ReportSnapshot) -> Self {
        Self {
            satisfaction: r.satisfaction,
            risk: r.risk,
            needs_human_review: r.needs_human_review,
            summary: r.summary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseStateEntry {
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bead_id: Option<String>,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub cycles: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub report: ReportSnapshot,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NebulaState {
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub phases: HashMap<String, PhaseStateEntry>,
}

impl NebulaState {
    pub fn load(path: &Path) -> Result<Self, NebulaError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| NebulaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| NebulaError::InvalidManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), NebulaError> {
        let content = toml::to_string_pretty(self).map_err(|e| NebulaError::InvalidManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|source| NebulaError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn recompute_total(&mut self) {
        self.total_cost_usd = self.phases.values().map(|p| p.cost_usd).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_empty_default() {
        let dir = tempdir().unwrap();
        let state = NebulaState::load(&dir.path().join("nebula.state.toml")).unwrap();
        assert_eq!(state.total_cost_usd, 0.0);
        assert!(state.phases.is_empty());
    }

    #[test]
    fn save_then_load_round_trips_phase_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nebula.state.toml");
        let mut state = NebulaState::default();
        state.phases.insert(
            "01".to_string(),
            PhaseStateEntry {
                status: PhaseStatus::Done,
                bead_id: Some("bd-1".into()),
                cost_usd: 1.25,
                cycles: 2,
                started_at: Some("2026-07-28T00:00:00Z".into()),
                ended_at: Some("2026-07-28T01:00:00Z".into()),
                report: ReportSnapshot::default(),
            },
        );
        state.recompute_total();
        state.save(&path).unwrap();

        let loaded = NebulaState::load(&path).unwrap();
        assert!((loaded.total_cost_usd - 1.25).abs() < f64::EPSILON);
        let entry = loaded.phases.get("01").unwrap();
        assert_eq!(entry.status, PhaseStatus::Done);
        assert_eq!(entry.bead_id.as_deref(), Some("bd-1"));
    }

    #[test]
    fn recompute_total_sums_all_phase_costs() {
        let mut state = NebulaState::default();
        for (id, cost) in [("01", 1.0), ("02", 2.5)] {
            state.phases.insert(
                id.to_string(),
                PhaseStateEntry {
                    status: PhaseStatus::Running,
                    bead_id: None,
                    cost_usd: cost,
                    cycles: 0,
                    started_at: None,
                    ended_at: None,
                    report: ReportSnapshot::default(),
                },
            );
        }
        state.recompute_total();
        assert!((state.total_cost_usd - 3.5).abs() < f64::EPSILON);
    }
}
