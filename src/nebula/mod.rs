//! Nebula Lifecycle: `nebula.toml` manifest + `+++`-frontmatter phase files
//! + `nebula.state.toml`, and the load/validate/plan/apply operations over
//! them.

pub mod lifecycle;
pub mod manifest;
pub mod phase_spec;
pub mod run;
pub mod state;

pub use lifecycle::{apply, load, plan, validate, LoadedNebula, PlanAction, ResolvedPhase, MANIFEST_FILE_NAME, STATE_FILE_NAME};
pub use manifest::NebulaManifest;
pub use phase_spec::PhaseSpec;
pub use run::NebulaPhaseExecutor;
pub use state::{NebulaState, PhaseStateEntry, ReportSnapshot};
