//! Dependency-aware DAG engine.
//!
//! Builds a node set with integer priorities, rejects cycles incrementally on
//! `add_edge`, and computes waves, tracks, critical path, and impact scores.
//! Generalizes the wave-computation idiom of a flat phase-dependency graph
//! into the full set of DAG Engine operations the orchestrator needs.

mod engine;

pub use engine::{DagEngine, DagNode, Wave};

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_engine() -> DagEngine {
        let mut g = DagEngine::new();
        g.add_node("a", 0).unwrap();
        g.add_node("b", 0).unwrap();
        g.add_node("c", 0).unwrap();
        g.add_edge("b", "a").unwrap(); // b depends on a
        g.add_edge("c", "b").unwrap(); // c depends on b
        g
    }

    #[test]
    fn waves_respect_dependency_ordering() {
        let g = chain_engine();
        let waves = g.compute_waves().unwrap();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0].node_ids, vec!["a".to_string()]);
        assert_eq!(waves[1].node_ids, vec!["b".to_string()]);
        assert_eq!(waves[2].node_ids, vec!["c".to_string()]);
    }

    #[test]
    fn cycle_is_rejected_on_insert() {
        let mut g = DagEngine::new();
        g.add_node("a", 0).unwrap();
        g.add_node("b", 0).unwrap();
        g.add_edge("a", "b").unwrap(); // a depends on b
        let err = g.add_edge("b", "a").unwrap_err(); // would close a cycle
        assert!(matches!(err, crate::errors::SchedulerError::Cycle(_)));
    }
}
