//! Lattice consistency: lineage is a hard requirement for new concepts.
//!
//! Every concept definition names its parents; the checker resolves their
//! lineages, computes depth, refuses DAG cycles (with the cycle path in the
//! error), and intersects affordances and constraints across parents. The
//! lineage cache serializes to JSON for persistence.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use agentese_core::{AgentesError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Root concept handle, pre-seeded at depth 0.
pub const ROOT_HANDLE: &str = "concept";

/// One concept's ancestry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub handle: String,
    pub extends: Vec<String>,
    #[serde(default)]
    pub subsumes: Vec<String>,
    pub justification: String,
    pub depth: u32,
    pub affordances: BTreeSet<String>,
    pub constraints: BTreeSet<String>,
}

/// Successful consistency check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyResult {
    pub handle: String,
    pub depth: u32,
    pub affordances: BTreeSet<String>,
    pub constraints: BTreeSet<String>,
}

/// A proposed concept, before checking.
#[derive(Debug, Clone, Default)]
pub struct ConceptProposal {
    pub extends: Vec<String>,
    pub subsumes: Vec<String>,
    pub justification: String,
    /// Affordances declared on top of what the parents grant.
    pub affordances: Vec<String>,
    /// Constraints declared on top of what the parents impose.
    pub constraints: Vec<String>,
}

pub struct LatticeChecker {
    records: RwLock<HashMap<String, LineageRecord>>,
}

impl LatticeChecker {
    /// Checker seeded with the `concept` root.
    pub fn new() -> Self {
        let mut records = HashMap::new();
        records.insert(
            ROOT_HANDLE.to_string(),
            LineageRecord {
                handle: ROOT_HANDLE.to_string(),
                extends: Vec::new(),
                subsumes: Vec::new(),
                justification: "the root of all concepts".into(),
                depth: 0,
                affordances: ["manifest", "define"].iter().map(|s| s.to_string()).collect(),
                constraints: ["coherent"].iter().map(|s| s.to_string()).collect(),
            },
        );
        Self { records: RwLock::new(records) }
    }

    pub fn get(&self, handle: &str) -> Option<LineageRecord> {
        self.records.read().expect("lattice poisoned").get(handle).cloned()
    }

    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> =
            self.records.read().expect("lattice poisoned").keys().cloned().collect();
        handles.sort();
        handles
    }

    /// Define (or redefine) a concept after the full consistency check:
    ///
    /// 1. All parents must have lineages.
    /// 2. `depth = 1 + max(parent.depth)`.
    /// 3. No cycle in the proposed DAG.
    /// 4. Affordance intersection across parents must be nonempty.
    /// 5. Constraint intersection across parents must be nonempty.
    pub fn define(&self, handle: &str, proposal: ConceptProposal) -> Result<ConsistencyResult> {
        let mut records = self.records.write().expect("lattice poisoned");

        // 1. Parent lineages.
        let missing: Vec<String> = proposal
            .extends
            .iter()
            .filter(|p| !records.contains_key(*p))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AgentesError::Lineage { handle: handle.to_string(), missing });
        }
        if proposal.extends.is_empty() {
            return Err(AgentesError::Lineage {
                handle: handle.to_string(),
                missing: vec![ROOT_HANDLE.to_string()],
            });
        }

        // 2. Depth.
        let depth = 1 + proposal
            .extends
            .iter()
            .filter_map(|p| records.get(p))
            .map(|r| r.depth)
            .max()
            .unwrap_or(0);

        // 3. Cycle check over the proposed graph.
        if let Some(cycle) = find_cycle(&records, handle, &proposal.extends) {
            return Err(AgentesError::Lattice {
                reason: format!("defining '{handle}' would close a lineage cycle"),
                cycle_path: cycle,
            });
        }

        // 4. Affordance intersection.
        let inherited_affordances = intersect(
            proposal.extends.iter().filter_map(|p| records.get(p)).map(|r| &r.affordances),
        );
        if inherited_affordances.is_empty() {
            return Err(AgentesError::AffordanceConflict {
                handle: handle.to_string(),
                detail: "parents share no affordances".into(),
            });
        }

        // 5. Constraint intersection.
        let inherited_constraints = intersect(
            proposal.extends.iter().filter_map(|p| records.get(p)).map(|r| &r.constraints),
        );
        if inherited_constraints.is_empty() {
            return Err(AgentesError::UnsatisfiableConstraints { handle: handle.to_string() });
        }

        let mut affordances = inherited_affordances;
        affordances.extend(proposal.affordances.iter().cloned());
        let mut constraints = inherited_constraints;
        constraints.extend(proposal.constraints.iter().cloned());

        let record = LineageRecord {
            handle: handle.to_string(),
            extends: proposal.extends.clone(),
            subsumes: proposal.subsumes.clone(),
            justification: proposal.justification,
            depth,
            affordances: affordances.clone(),
            constraints: constraints.clone(),
        };
        records.insert(handle.to_string(), record);

        // Subsumed children gain this concept as a parent.
        for child in &proposal.subsumes {
            if let Some(child_record) = records.get_mut(child) {
                if !child_record.extends.contains(&handle.to_string()) {
                    child_record.extends.push(handle.to_string());
                }
            }
        }

        debug!(target: "agentese::lattice", handle, depth, "concept defined");
        Ok(ConsistencyResult { handle: handle.to_string(), depth, affordances, constraints })
    }

    /// Serialize the lineage cache.
    pub fn to_json(&self) -> Result<String> {
        let records = self.records.read().expect("lattice poisoned");
        serde_json::to_string_pretty(&*records).map_err(|e| AgentesError::Lattice {
            reason: format!("serialize: {e}"),
            cycle_path: Vec::new(),
        })
    }

    /// Load a lineage cache previously produced by [`to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let records: HashMap<String, LineageRecord> =
            serde_json::from_str(json).map_err(|e| AgentesError::Lattice {
                reason: format!("deserialize: {e}"),
                cycle_path: Vec::new(),
            })?;
        Ok(Self { records: RwLock::new(records) })
    }
}

impl Default for LatticeChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn intersect<'a>(mut sets: impl Iterator<Item = &'a BTreeSet<String>>) -> BTreeSet<String> {
    let Some(first) = sets.next() else {
        return BTreeSet::new();
    };
    sets.fold(first.clone(), |acc, set| acc.intersection(set).cloned().collect())
}

/// DFS from the proposed node following parent edges; reaching the node again
/// closes a cycle. Returns the cycle path `[node, ..., node]`.
fn find_cycle(
    records: &HashMap<String, LineageRecord>,
    handle: &str,
    proposed_extends: &[String],
) -> Option<Vec<String>> {
    let mut path = vec![handle.to_string()];
    dfs(records, handle, proposed_extends, handle, &mut path)
}

fn dfs(
    records: &HashMap<String, LineageRecord>,
    start: &str,
    proposed_extends: &[String],
    current: &str,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    let parents: Vec<String> = if current == start {
        proposed_extends.to_vec()
    } else {
        records.get(current).map(|r| r.extends.clone()).unwrap_or_default()
    };
    for parent in parents {
        if parent == start {
            let mut cycle = path.clone();
            cycle.push(start.to_string());
            return Some(cycle);
        }
        if path.contains(&parent) {
            continue;
        }
        path.push(parent.clone());
        if let Some(cycle) = dfs(records, start, proposed_extends, &parent, path) {
            return Some(cycle);
        }
        path.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(extends: &[&str]) -> ConceptProposal {
        ConceptProposal {
            extends: extends.iter().map(|s| s.to_string()).collect(),
            justification: "test lineage".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defines_with_depth_from_parents() {
        let lattice = LatticeChecker::new();
        let fruit = lattice.define("concept.fruit", proposal(&[ROOT_HANDLE])).unwrap();
        assert_eq!(fruit.depth, 1);
        let fig = lattice.define("concept.fig", proposal(&["concept.fruit"])).unwrap();
        assert_eq!(fig.depth, 2);
        assert!(fig.affordances.contains("manifest"));
    }

    #[test]
    fn missing_parent_is_a_lineage_error() {
        let lattice = LatticeChecker::new();
        let err = lattice.define("concept.fig", proposal(&["concept.fruit"])).unwrap_err();
        match err {
            AgentesError::Lineage { missing, .. } => {
                assert_eq!(missing, vec!["concept.fruit".to_string()]);
            }
            other => panic!("expected lineage error, got {other:?}"),
        }
    }

    #[test]
    fn redefinition_closing_a_cycle_is_rejected_with_path() {
        let lattice = LatticeChecker::new();
        lattice.define("concept.fruit", proposal(&[ROOT_HANDLE])).unwrap();
        lattice.define("concept.fig", proposal(&["concept.fruit"])).unwrap();
        let err = lattice.define("concept.fruit", proposal(&["concept.fig"])).unwrap_err();
        match err {
            AgentesError::Lattice { cycle_path, .. } => {
                assert_eq!(
                    cycle_path,
                    vec![
                        "concept.fruit".to_string(),
                        "concept.fig".to_string(),
                        "concept.fruit".to_string()
                    ]
                );
            }
            other => panic!("expected lattice cycle, got {other:?}"),
        }
    }

    #[test]
    fn disjoint_parent_affordances_conflict() {
        let lattice = LatticeChecker::new();
        let mut a = proposal(&[ROOT_HANDLE]);
        a.affordances = vec!["sing".into()];
        lattice.define("concept.song", a).unwrap();
        let mut b = proposal(&[ROOT_HANDLE]);
        b.affordances = vec!["build".into()];
        lattice.define("concept.tower", b).unwrap();

        // Both extend the root, so they share the root's affordances;
        // the intersection is nonempty and the define succeeds.
        let merged = lattice.define("concept.opera", proposal(&["concept.song", "concept.tower"]));
        assert!(merged.is_ok());
    }

    #[test]
    fn contradictory_constraints_are_unsatisfiable() {
        let lattice = LatticeChecker::new();
        let mut json = serde_json::from_str::<HashMap<String, LineageRecord>>(
            &lattice.to_json().unwrap(),
        )
        .unwrap();
        // Hand-craft two parents with disjoint constraint sets.
        json.insert(
            "concept.fire".into(),
            LineageRecord {
                handle: "concept.fire".into(),
                extends: vec![ROOT_HANDLE.into()],
                subsumes: vec![],
                justification: "hot".into(),
                depth: 1,
                affordances: ["manifest".to_string()].into_iter().collect(),
                constraints: ["hot".to_string()].into_iter().collect(),
            },
        );
        json.insert(
            "concept.ice".into(),
            LineageRecord {
                handle: "concept.ice".into(),
                extends: vec![ROOT_HANDLE.into()],
                subsumes: vec![],
                justification: "cold".into(),
                depth: 1,
                affordances: ["manifest".to_string()].into_iter().collect(),
                constraints: ["cold".to_string()].into_iter().collect(),
            },
        );
        let lattice =
            LatticeChecker::from_json(&serde_json::to_string(&json).unwrap()).unwrap();
        let err = lattice
            .define("concept.steam", proposal(&["concept.fire", "concept.ice"]))
            .unwrap_err();
        assert_eq!(err.kind(), "unsatisfiable_constraints");
    }

    #[test]
    fn lineage_cache_round_trips() {
        let lattice = LatticeChecker::new();
        lattice.define("concept.fruit", proposal(&[ROOT_HANDLE])).unwrap();
        let json = lattice.to_json().unwrap();
        let reloaded = LatticeChecker::from_json(&json).unwrap();
        assert_eq!(reloaded.get("concept.fruit"), lattice.get("concept.fruit"));
    }

    #[test]
    fn rootless_definition_is_refused() {
        let lattice = LatticeChecker::new();
        let err = lattice.define("concept.orphan", proposal(&[])).unwrap_err();
        assert_eq!(err.kind(), "lineage");
    }
}
