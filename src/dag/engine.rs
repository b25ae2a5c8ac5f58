use crate::errors::SchedulerError;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A node in the DAG: a phase id with an integer priority (lower = higher
/// priority, matching the dispatch order the worker pool uses when several
/// phases become eligible at once).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub id: String,
    pub priority: i64,
}

/// A computed wave: all nodes whose dependencies are entirely in earlier
/// waves. `node_ids` is sorted priority descending, then lexical ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub number: u32,
    pub node_ids: Vec<String>,
}

/// Dependency-aware graph over phase ids. `add_edge(from, to)` means `from`
/// depends on `to` — `to` must complete before `from`.
#[derive(Debug, Default)]
pub struct DagEngine {
    nodes: HashMap<String, DagNode>,
    insertion_order: Vec<String>,
    /// id -> set of ids it depends on
    depends_on: HashMap<String, BTreeSet<String>>,
    /// id -> set of ids that depend on it
    dependents: HashMap<String, BTreeSet<String>>,
}

impl DagEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str, priority: i64) -> Result<(), SchedulerError> {
        if self.nodes.contains_key(id) {
            return Err(SchedulerError::DuplicatePhase(id.to_string()));
        }
        self.nodes.insert(
            id.to_string(),
            DagNode {
                id: id.to_string(),
                priority,
            },
        );
        self.insertion_order.push(id.to_string());
        self.depends_on.entry(id.to_string()).or_default();
        self.dependents.entry(id.to_string()).or_default();
        Ok(())
    }

    /// `from` depends on `to`. Rejects the edge if it would close a cycle.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), SchedulerError> {
        if !self.nodes.contains_key(from) {
            return Err(SchedulerError::UnknownDependency {
                phase: from.to_string(),
                dependency: to.to_string(),
            });
        }
        if !self.nodes.contains_key(to) {
            return Err(SchedulerError::UnknownDependency {
                phase: from.to_string(),
                dependency: to.to_string(),
            });
        }
        if from == to || self.reaches(to, from) {
            let mut cycle = self.path(to, from).unwrap_or_default();
            cycle.push(from.to_string());
            return Err(SchedulerError::Cycle(cycle));
        }
        self.depends_on
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.dependents
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
        Ok(())
    }

    /// True if `to` can reach `target` by following depends_on edges — i.e.
    /// whether `to` (transitively) depends on `target`.
    fn reaches(&self, to: &str, target: &str) -> bool {
        self.path(to, target).is_some()
    }

    fn path(&self, start: &str, target: &str) -> Option<Vec<String>> {
        let mut stack = vec![vec![start.to_string()]];
        let mut visited = HashSet::new();
        while let Some(path) = stack.pop() {
            let node = path.last().unwrap().clone();
            if node == target {
                return Some(path);
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            if let Some(deps) = self.depends_on.get(&node) {
                for dep in deps {
                    let mut next = path.clone();
                    next.push(dep.clone());
                    stack.push(next);
                }
            }
        }
        None
    }

    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.depends_on
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.dependents
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn sorted_ids(&self, ids: impl Iterator<Item = String>) -> Vec<String> {
        let mut v: Vec<String> = ids.collect();
        v.sort_by(|a, b| {
            let pa = self.nodes[a].priority;
            let pb = self.nodes[b].priority;
            pb.cmp(&pa).then_with(|| a.cmp(b))
        });
        v
    }

    /// Kahn's algorithm with deterministic node ordering within each wave
    /// (priority descending, then lexical id ascending).
    pub fn compute_waves(&self) -> Result<Vec<Wave>, SchedulerError> {
        let mut remaining_in_degree: HashMap<String, usize> = self
            .nodes
            .keys()
            .map(|id| (id.clone(), self.depends_on[id].len()))
            .collect();
        let mut done: HashSet<String> = HashSet::new();
        let mut waves = Vec::new();

        while done.len() < self.nodes.len() {
            let ready: Vec<String> = remaining_in_degree
                .iter()
                .filter(|(id, deg)| !done.contains(*id) && **deg == 0)
                .map(|(id, _)| id.clone())
                .collect();

            if ready.is_empty() {
                let stuck: Vec<String> = self
                    .nodes
                    .keys()
                    .filter(|id| !done.contains(*id))
                    .cloned()
                    .collect();
                return Err(SchedulerError::Cycle(stuck));
            }

            let ordered = self.sorted_ids(ready.into_iter());
            for id in &ordered {
                done.insert(id.clone());
                for dependent in self.dependents(id) {
                    if let Some(deg) = remaining_in_degree.get_mut(&dependent) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
            waves.push(Wave {
                number: waves.len() as u32 + 1,
                node_ids: ordered,
            });
        }

        Ok(waves)
    }

    /// Linear chains: a track starts at a node with != 1 dependency, or
    /// whose sole dependency fans out to more than one dependent, and
    /// extends while the current node has exactly one dependent and that
    /// dependent has exactly one dependency.
    pub fn compute_tracks(&self) -> Vec<Vec<String>> {
        let ids = self.sorted_ids(self.insertion_order.iter().cloned());
        let mut visited: HashSet<String> = HashSet::new();
        let mut tracks = Vec::new();

        for id in &ids {
            if visited.contains(id) {
                continue;
            }
            let deps = self.dependencies(id);
            let is_track_start = match deps.as_slice() {
                [only] => self.dependents(only).len() != 1,
                _ => true,
            };
            if !is_track_start {
                continue;
            }
            let mut chain = vec![id.clone()];
            visited.insert(id.clone());
            let mut cur = id.clone();
            loop {
                let dependents = self.dependents(&cur);
                let next = match dependents.as_slice() {
                    [only] if self.dependencies(only).len() == 1 && !visited.contains(only) => {
                        only.clone()
                    }
                    _ => break,
                };
                chain.push(next.clone());
                visited.insert(next.clone());
                cur = next;
            }
            tracks.push(chain);
        }

        for id in &ids {
            if !visited.contains(id) {
                tracks.push(vec![id.clone()]);
                visited.insert(id.clone());
            }
        }

        tracks
    }

    /// Transitive consumers of `id` (nodes that depend on it, directly or
    /// indirectly).
    pub fn descendants(&self, id: &str) -> HashSet<String> {
        let mut out = HashSet::new();
        let mut stack = self.dependents(id);
        while let Some(n) = stack.pop() {
            if out.insert(n.clone()) {
                stack.extend(self.dependents(&n));
            }
        }
        out
    }

    /// Transitive prerequisites of `id`.
    pub fn ancestors(&self, id: &str) -> HashSet<String> {
        let mut out = HashSet::new();
        let mut stack = self.dependencies(id);
        while let Some(n) = stack.pop() {
            if out.insert(n.clone()) {
                stack.extend(self.dependencies(&n));
            }
        }
        out
    }

    /// Size of `id`'s descendant set — dispatch tie-breaker.
    pub fn impact_score(&self, id: &str) -> usize {
        self.descendants(id).len()
    }

    /// Longest unweighted chain, ties broken by higher priority then
    /// lexical id, both at the end-node level and at each extension step.
    pub fn critical_path(&self) -> Result<Vec<String>, SchedulerError> {
        let waves = self.compute_waves()?;
        let mut longest: HashMap<String, (usize, Vec<String>)> = HashMap::new();

        for wave in &waves {
            for id in &wave.node_ids {
                let deps = self.dependencies(id);
                let best_dep = deps
                    .iter()
                    .map(|d| longest[d].clone())
                    .max_by(|a, b| {
                        a.0.cmp(&b.0)
                            .then_with(|| self.nodes[a.1.last().unwrap()].priority.cmp(&self.nodes[b.1.last().unwrap()].priority).reverse())
                            .then_with(|| b.1.last().unwrap().cmp(a.1.last().unwrap()))
                    });
                let (len, mut path) = match best_dep {
                    Some((len, path)) => (len + 1, path),
                    None => (1, Vec::new()),
                };
                path.push(id.clone());
                longest.insert(id.clone(), (len, path));
            }
        }

        let best = longest
            .values()
            .max_by(|a, b| {
                a.0.cmp(&b.0)
                    .then_with(|| {
                        self.nodes[a.1.last().unwrap()]
                            .priority
                            .cmp(&self.nodes[b.1.last().unwrap()].priority)
                            .reverse()
                    })
                    .then_with(|| b.1.last().unwrap().cmp(a.1.last().unwrap()))
            })
            .cloned()
            .map(|(_, path)| path)
            .unwrap_or_default();

        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn diamond_waves_and_impact_score() {
        let mut g = DagEngine::new();
        for id in ["a", "b", "c", "d"] {
            g.add_node(id, 0).unwrap();
        }
        g.add_edge("b", "a").unwrap();
        g.add_edge("c", "a").unwrap();
        g.add_edge("d", "b").unwrap();
        g.add_edge("d", "c").unwrap();

        let waves = g.compute_waves().unwrap();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0].node_ids, vec!["a"]);
        assert_eq!(waves[1].node_ids, vec!["b", "c"]);
        assert_eq!(waves[2].node_ids, vec!["d"]);

        assert_eq!(g.impact_score("a"), 3);
        assert_eq!(g.impact_score("d"), 0);
        assert!(g.descendants("a").contains("d"));
        assert!(g.ancestors("d").contains("a"));
    }

    #[test]
    fn wave_ordering_breaks_ties_by_priority_then_lexical() {
        let mut g = DagEngine::new();
        g.add_node("zeta", 5).unwrap();
        g.add_node("alpha", 10).unwrap();
        g.add_node("beta", 10).unwrap();
        let waves = g.compute_waves().unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].node_ids, vec!["alpha", "beta", "zeta"]);
    }

    #[test]
    fn critical_path_follows_longest_chain() {
        let mut g = DagEngine::new();
        for id in ["a", "b", "c", "d", "e"] {
            g.add_node(id, 0).unwrap();
        }
        g.add_edge("b", "a").unwrap();
        g.add_edge("c", "b").unwrap();
        g.add_edge("d", "a").unwrap();
        g.add_edge("e", "d").unwrap();
        let path = g.critical_path().unwrap();
        assert_eq!(path.first().unwrap(), "a");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn tracks_partition_linear_chains() {
        let mut g = DagEngine::new();
        for id in ["a", "b", "c", "d"] {
            g.add_node(id, 0).unwrap();
        }
        g.add_edge("b", "a").unwrap();
        g.add_edge("c", "b").unwrap();
        g.add_node("x", 0).ok();
        g.add_node("y", 0).ok();
        let tracks = g.compute_tracks();
        let total: usize = tracks.iter().map(|t| t.len()).sum();
        assert_eq!(total, g.len());
        assert!(tracks.iter().any(|t| t == &vec!["a", "b", "c"]));
    }

    /// Builds a DAG over `n` nodes named `n0..n{n-1}`, wiring an edge `i -> j`
    /// (i depends on j) only for `j < i` so the result is acyclic by
    /// construction regardless of which bits are set.
    fn acyclic_dag_from_bits(n: usize, bits: &[bool]) -> DagEngine {
        let mut g = DagEngine::new();
        let ids: Vec<String> = (0..n).map(|i| format!("n{i}")).collect();
        for id in &ids {
            g.add_node(id, 0).unwrap();
        }
        let mut bit_iter = bits.iter().copied().cycle();
        for i in 0..n {
            for j in 0..i {
                if bit_iter.next().unwrap_or(false) {
                    g.add_edge(&ids[i], &ids[j]).ok();
                }
            }
        }
        g
    }

    proptest! {
        #[test]
        fn waves_conserve_every_node_and_respect_dependency_order(
            n in 1usize..10,
            bits in prop::collection::vec(any::<bool>(), 0..45),
        ) {
            let g = acyclic_dag_from_bits(n, &bits);
            let waves = g.compute_waves().unwrap();

            let total: usize = waves.iter().map(|w| w.node_ids.len()).sum();
            prop_assert_eq!(total, n);

            let mut wave_of: HashMap<String, usize> = HashMap::new();
            for (idx, wave) in waves.iter().enumerate() {
                for id in &wave.node_ids {
                    prop_assert!(wave_of.insert(id.clone(), idx).is_none());
                }
            }

            for id in g.nodes.keys() {
                for dep in g.dependencies(id) {
                    prop_assert!(wave_of[&dep] < wave_of[id]);
                }
            }
        }

        #[test]
        fn tracks_partition_every_node_exactly_once(
            n in 1usize..10,
            bits in prop::collection::vec(any::<bool>(), 0..45),
        ) {
            let g = acyclic_dag_from_bits(n, &bits);
            let tracks = g.compute_tracks();

            let mut seen: HashSet<String> = HashSet::new();
            let mut total = 0usize;
            for track in &tracks {
                for id in track {
                    prop_assert!(seen.insert(id.clone()));
                    total += 1;
                }
            }
            prop_assert_eq!(total, n);
            prop_assert_eq!(seen.len(), g.len());
        }
    }
}
