//! Observers and the archetype registry.
//!
//! An [`Observer`] is a frozen caller identity: an archetype name plus a
//! capability set. Observers never hold state; they are passed to every
//! invocation and the affordance filter decides what they may see. The
//! [`ArchetypeRegistry`] is a DAG of archetype inheritance whose transitive
//! closure yields the default affordance set an archetype seeds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AgentesError, Result};

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Capability-gated caller identity. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observer {
    archetype: String,
    capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl Observer {
    /// Observer with explicit capabilities (in addition to whatever the
    /// archetype seeds at affordance time).
    pub fn new(archetype: impl Into<String>, capabilities: impl IntoIterator<Item = String>) -> Self {
        Self {
            archetype: archetype.into(),
            capabilities: capabilities.into_iter().collect(),
            id: None,
        }
    }

    /// Anonymous guest: empty capability set.
    pub fn guest() -> Self {
        Self::new("guest", [])
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn archetype(&self) -> &str {
        &self.archetype
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

// ---------------------------------------------------------------------------
// Archetype registry
// ---------------------------------------------------------------------------

/// One archetype: parent links plus the affordances it adds on top of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchetypeEntry {
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub additional_affordances: Vec<String>,
}

/// DAG of `archetype -> parents + additional_affordances`. The transitive
/// closure over parents defines an observer's full default affordance set.
#[derive(Debug, Clone, Default)]
pub struct ArchetypeRegistry {
    entries: BTreeMap<String, ArchetypeEntry>,
}

impl ArchetypeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with the standard archetypes.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.insert("guest", &[], &["manifest"]);
        registry.insert("poet", &["guest"], &["refine", "dream"]);
        registry.insert("scientist", &["guest"], &["observe", "measure"]);
        registry.insert("economist", &["guest"], &["ledger", "appraise"]);
        registry.insert("philosopher", &["guest"], &["contemplate", "question"]);
        registry.insert(
            "developer",
            &["scientist"],
            &["compile", "reflect", "audit", "engram", "recall"],
        );
        registry.insert(
            "architect",
            &["developer", "economist"],
            &[
                "tend", "define", "refine", "recognize", "propose", "validate", "germinate",
                "promote", "prune", "rollback",
            ],
        );
        registry.insert("admin", &["architect"], &["clear", "configure"]);
        registry
    }

    pub fn insert(&mut self, name: &str, parents: &[&str], affordances: &[&str]) {
        self.entries.insert(
            name.to_string(),
            ArchetypeEntry {
                parents: parents.iter().map(|s| s.to_string()).collect(),
                additional_affordances: affordances.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Transitive affordance closure for an archetype. Unknown archetypes
    /// yield the empty set; the walk is cycle-safe.
    pub fn affordances_of(&self, archetype: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![archetype.to_string()];
        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(entry) = self.entries.get(&name) {
                out.extend(entry.additional_affordances.iter().cloned());
                stack.extend(entry.parents.iter().cloned());
            }
        }
        out
    }

    /// All ancestors (inclusive) of an archetype, for `requires_archetype`
    /// checks: an observer of archetype `a` satisfies a requirement `r` when
    /// `r` appears in `a`'s ancestry.
    pub fn ancestry_of(&self, archetype: &str) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![archetype.to_string()];
        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(entry) = self.entries.get(&name) {
                stack.extend(entry.parents.iter().cloned());
            }
        }
        visited
    }

    /// Register a new archetype at runtime, refusing DAG cycles.
    pub fn define(&mut self, name: &str, entry: ArchetypeEntry) -> Result<()> {
        self.entries.insert(name.to_string(), entry);
        if let Some(cycle) = self.find_cycle(name) {
            self.entries.remove(name);
            return Err(AgentesError::Lattice {
                reason: format!("archetype '{name}' would create an inheritance cycle"),
                cycle_path: cycle,
            });
        }
        Ok(())
    }

    fn find_cycle(&self, start: &str) -> Option<Vec<String>> {
        let mut path = vec![start.to_string()];
        self.dfs_cycle(start, start, &mut path)
    }

    fn dfs_cycle(&self, start: &str, current: &str, path: &mut Vec<String>) -> Option<Vec<String>> {
        let entry = self.entries.get(current)?;
        for parent in &entry.parents {
            if parent == start {
                let mut cycle = path.clone();
                cycle.push(parent.clone());
                return Some(cycle);
            }
            path.push(parent.clone());
            if let Some(cycle) = self.dfs_cycle(start, parent, path) {
                return Some(cycle);
            }
            path.pop();
        }
        None
    }
}

/// Shared handle; the resolver and affordance filter only ever read.
pub type SharedArchetypes = Arc<std::sync::RwLock<ArchetypeRegistry>>;

pub fn shared_standard_archetypes() -> SharedArchetypes {
    Arc::new(std::sync::RwLock::new(ArchetypeRegistry::standard()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_has_empty_capabilities() {
        let guest = Observer::guest();
        assert_eq!(guest.archetype(), "guest");
        assert!(guest.capabilities().is_empty());
    }

    #[test]
    fn closure_includes_parents() {
        let registry = ArchetypeRegistry::standard();
        let architect = registry.affordances_of("architect");
        // own
        assert!(architect.contains("tend"));
        // via developer
        assert!(architect.contains("compile"));
        // via economist
        assert!(architect.contains("ledger"));
        // via guest at the root
        assert!(architect.contains("manifest"));
    }

    #[test]
    fn unknown_archetype_yields_empty_set() {
        let registry = ArchetypeRegistry::standard();
        assert!(registry.affordances_of("trickster").is_empty());
    }

    #[test]
    fn ancestry_satisfies_requirements() {
        let registry = ArchetypeRegistry::standard();
        let ancestry = registry.ancestry_of("admin");
        assert!(ancestry.contains("architect"));
        assert!(ancestry.contains("developer"));
        assert!(ancestry.contains("guest"));
        assert!(!ancestry.contains("poet"));
    }

    #[test]
    fn define_rejects_cycles() {
        let mut registry = ArchetypeRegistry::standard();
        registry
            .define("gardener", ArchetypeEntry {
                parents: vec!["poet".into()],
                additional_affordances: vec!["tend".into()],
            })
            .unwrap();
        let err = registry
            .define("ouroboros", ArchetypeEntry {
                parents: vec!["ouroboros".into()],
                additional_affordances: vec![],
            })
            .unwrap_err();
        assert_eq!(err.kind(), "lattice");
    }
}
