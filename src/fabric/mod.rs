//! Fabric coordination store: phase states, file claims, published
//! contracts, discoveries, and pulses, behind a single SQLite writer with
//! many readers.

mod models;
mod snapshot;
mod store;

pub use models::{
    format_timestamp, parse_flexible_timestamp, Discovery, Entanglement, EntanglementKind,
    EntanglementStatus, FileClaim, PhaseReport, PhaseState, PhaseStatus, Pulse,
};
pub use snapshot::Snapshot;
pub use store::FabricStore;
