//! Typed error hierarchy for the Quasar orchestrator.
//!
//! One enum per subsystem, matching the component boundaries of the system:
//! - `FabricError` — coordination store failures
//! - `SchedulerError` — eligibility/scan/pushback failures
//! - `PhaseLoopError` — per-phase coder/reviewer cycle failures
//! - `PublisherError` — diff and contract extraction failures
//! - `NebulaError` — manifest/phase-file/lifecycle failures
//! - `ConfigError` — config load and precedence resolution failures

use thiserror::Error;

/// Errors from the fabric coordination store.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("file '{path}' already claimed by phase '{owner}'")]
    FileAlreadyClaimed { path: String, owner: String },

    #[error("fabric busy, exceeded retry deadline after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error("fabric database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("fabric store I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fabric corruption detected: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for FabricError {
    fn from(e: rusqlite::Error) -> Self {
        FabricError::Database(e)
    }
}

/// Errors from the scheduler (eligibility, scanning, pushback).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cycle detected in DAG: {0:?}")]
    Cycle(Vec<String>),

    #[error("unknown dependency '{dependency}' referenced by phase '{phase}'")]
    UnknownDependency { phase: String, dependency: String },

    #[error("duplicate phase id '{0}'")]
    DuplicatePhase(String),

    #[error("scope overlap between phase '{a}' and phase '{b}' on pattern '{pattern}'")]
    ScopeOverlap { a: String, b: String, pattern: String },

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors terminal to a single phase's coder/reviewer cycle.
#[derive(Debug, Error)]
pub enum PhaseLoopError {
    #[error("phase '{phase}' exceeded max review cycles ({max_cycles})")]
    MaxCycles { phase: String, max_cycles: u32 },

    #[error("phase '{phase}' exceeded budget: spent ${spent:.4} of ${cap:.4}")]
    Budget {
        phase: String,
        spent: f64,
        cap: f64,
    },

    #[error("agent process exited with non-zero code {exit_code}")]
    AgentNonZeroExit { exit_code: i32 },

    #[error("failed to spawn agent process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("manual stop requested")]
    ManualStop,

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the publisher (diff enumeration, symbol extraction).
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from nebula manifest/phase-file parsing and lifecycle operations.
#[derive(Debug, Error)]
pub enum NebulaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest at {path}: {message}")]
    InvalidManifest {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("invalid phase file at {path}: {message}")]
    InvalidPhaseFile {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("phase '{0}' missing required field '{1}'")]
    MissingField(String, String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from config loading and precedence resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config at {path}: {source}")]
    Yaml {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid environment variable {name}: {message}")]
    InvalidEnv { name: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_error_file_already_claimed_carries_owner() {
        let err = FabricError::FileAlreadyClaimed {
            path: "pkg/x.go".into(),
            owner: "phase-b".into(),
        };
        assert!(err.to_string().contains("phase-b"));
    }

    #[test]
    fn scheduler_error_cycle_is_matchable() {
        let err = SchedulerError::Cycle(vec!["a".into(), "b".into()]);
        match &err {
            SchedulerError::Cycle(nodes) => assert_eq!(nodes.len(), 2),
            _ => panic!("expected Cycle"),
        }
    }

    #[test]
    fn phase_loop_error_budget_formats_amounts() {
        let err = PhaseLoopError::Budget {
            phase: "01-bootstrap".into(),
            spent: 0.12,
            cap: 0.10,
        };
        let msg = err.to_string();
        assert!(msg.contains("0.12"));
        assert!(msg.contains("0.10"));
    }

    #[test]
    fn phase_loop_error_converts_from_fabric_error() {
        let inner = FabricError::Busy { attempts: 5 };
        let outer: PhaseLoopError = inner.into();
        assert!(matches!(outer, PhaseLoopError::Fabric(FabricError::Busy { attempts: 5 })));
    }

    #[test]
    fn nebula_error_missing_field_is_matchable() {
        let err = NebulaError::MissingField("01".into(), "title".into());
        assert!(matches!(err, NebulaError::MissingField(_, _)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&FabricError::Busy { attempts: 1 });
        assert_std_error(&SchedulerError::DuplicatePhase("x".into()));
        assert_std_error(&PhaseLoopError::ManualStop);
        assert_std_error(&NebulaError::MissingField("a".into(), "b".into()));
        assert_std_error(&ConfigError::InvalidEnv {
            name: "QUASAR_MAX_WORKERS".into(),
            message: "not a number".into(),
        });
    }
}
