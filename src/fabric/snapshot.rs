//! Read-only, point-in-time view of the fabric.

use std::collections::{HashMap, HashSet};

use super::models::{Discovery, Entanglement, PhaseState, PhaseStatus};

/// A consistent snapshot taken under a single read transaction. Callers never
/// mutate it; it is discarded and retaken on the next poll or scan.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub phase_states: HashMap<String, PhaseStatus>,
    pub file_claims: HashMap<String, String>,
    pub entanglements: Vec<Entanglement>,
    pub in_progress: HashSet<String>,
    pub completed: HashSet<String>,
    pub discoveries: Vec<Discovery>,
}

impl Snapshot {
    pub fn status_of(&self, phase_id: &str) -> Option<PhaseStatus> {
        self.phase_states.get(phase_id).copied()
    }

    pub fn owner_of(&self, path: &str) -> Option<&str> {
        self.file_claims.get(path).map(String::as_str)
    }

    pub fn has_fulfilled(&self, kind: &str, name: &str, package: Option<&str>) -> bool {
        self.entanglements.iter().any(|e| {
            e.kind.as_str() == kind
                && e.name == name
                && matches!(e.status, super::models::EntanglementStatus::Fulfilled)
                && package.map(|p| e.package.as_deref() == Some(p)).unwrap_or(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::models::{EntanglementKind, EntanglementStatus};

    fn sample_entanglement() -> Entanglement {
        Entanglement {
            producer: "01-bootstrap".into(),
            kind: EntanglementKind::Function,
            name: "Connect".into(),
            signature: Some("func Connect() error".into()),
            package: Some("db".into()),
            status: EntanglementStatus::Fulfilled,
            created_at: "2026-07-28T00:00:00Z".into(),
        }
    }

    #[test]
    fn has_fulfilled_matches_kind_name_and_package() {
        let snap = Snapshot {
            entanglements: vec![sample_entanglement()],
            ..Default::default()
        };
        assert!(snap.has_fulfilled("function", "Connect", Some("db")));
        assert!(snap.has_fulfilled("function", "Connect", None));
        assert!(!snap.has_fulfilled("function", "Connect", Some("other")));
        assert!(!snap.has_fulfilled("type", "Connect", None));
    }

    #[test]
    fn owner_of_reflects_file_claims() {
        let mut snap = Snapshot::default();
        snap.file_claims.insert("pkg/x.go".into(), "01-bootstrap".into());
        assert_eq!(snap.owner_of("pkg/x.go"), Some("01-bootstrap"));
        assert_eq!(snap.owner_of("pkg/y.go"), None);
    }
}
