//! Aspect metadata and the polymorphic affordance filter.
//!
//! An aspect is a named verb on a node. What an observer may *see* of a node
//! is the intersection of the node's declared aspects with the observer's
//! archetype closure and capabilities, minus anything gated behind a missing
//! `required_capability`, in the node's declared order.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observer::{ArchetypeRegistry, Observer};

/// Aspect families; drives rendering defaults and gateway projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectCategory {
    Perception,
    Action,
    Composition,
    Meta,
    Stream,
    Lifecycle,
}

/// Declared side effect on a named resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Reads,
    Writes,
    Emits,
    Consumes,
}

/// Metadata attached to each aspect handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectMeta {
    pub name: String,
    pub category: AspectCategory,
    /// `(effect, resource)` pairs the handler declares up front.
    #[serde(default)]
    pub declared_effects: Vec<(Effect, String)>,
    /// Archetypes (or their descendants) that may invoke this aspect.
    /// Empty means any archetype that carries the affordance.
    #[serde(default)]
    pub requires_archetype: Vec<String>,
    #[serde(default)]
    pub idempotent: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub interactive: bool,
    /// Entropy cost charged as the pre-authorization lease.
    #[serde(default)]
    pub budget_estimate: Option<f64>,
    /// Capability that must be present on the observer.
    #[serde(default)]
    pub required_capability: Option<String>,
    /// Wall-clock bound for the handler; exceeding it voids the lease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Serialize invocations of this aspect through a per-node mutex.
    #[serde(default)]
    pub serial: bool,
}

impl AspectMeta {
    pub fn new(name: impl Into<String>, category: AspectCategory) -> Self {
        Self {
            name: name.into(),
            category,
            declared_effects: Vec::new(),
            requires_archetype: Vec::new(),
            idempotent: false,
            streaming: false,
            interactive: false,
            budget_estimate: None,
            required_capability: None,
            timeout: None,
            serial: false,
        }
    }

    pub fn effect(mut self, effect: Effect, resource: impl Into<String>) -> Self {
        self.declared_effects.push((effect, resource.into()));
        self
    }

    pub fn requires(mut self, archetype: impl Into<String>) -> Self {
        self.requires_archetype.push(archetype.into());
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn cost(mut self, estimate: f64) -> Self {
        self.budget_estimate = Some(estimate);
        self
    }

    pub fn capability(mut self, name: impl Into<String>) -> Self {
        self.required_capability = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Affordance filter
// ---------------------------------------------------------------------------

/// Compute the aspects `observer` may invoke, preserving declared order.
///
/// 1. Base set from node metadata.
/// 2. Intersect with the observer's transitive archetype affordances plus
///    explicit capabilities.
/// 3. Drop aspects whose `requires_archetype` has no match in the observer's
///    ancestry.
/// 4. Drop aspects whose `required_capability` the observer lacks.
pub fn affordances(
    aspects: &[AspectMeta],
    observer: &Observer,
    archetypes: &ArchetypeRegistry,
) -> Vec<String> {
    let seeded = archetypes.affordances_of(observer.archetype());
    let mut allowed: BTreeSet<&str> = seeded.iter().map(String::as_str).collect();
    allowed.extend(observer.capabilities().iter().map(String::as_str));
    let ancestry = archetypes.ancestry_of(observer.archetype());

    aspects
        .iter()
        .filter(|meta| allowed.contains(meta.name.as_str()))
        .filter(|meta| {
            meta.requires_archetype.is_empty()
                || meta.requires_archetype.iter().any(|req| ancestry.contains(req))
        })
        .filter(|meta| match &meta.required_capability {
            Some(cap) => observer.has_capability(cap) || seeded.contains(cap),
            None => true,
        })
        .map(|meta| meta.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn garden_aspects() -> Vec<AspectMeta> {
        vec![
            AspectMeta::new("manifest", AspectCategory::Perception).idempotent().cost(0.1),
            AspectMeta::new("tend", AspectCategory::Action)
                .requires("architect")
                .cost(0.4),
            AspectMeta::new("observe", AspectCategory::Stream).streaming().cost(0.2),
            AspectMeta::new("purge", AspectCategory::Lifecycle)
                .capability("dangerous_ops")
                .cost(0.9),
        ]
    }

    #[test]
    fn guest_sees_manifest_only() {
        let registry = ArchetypeRegistry::standard();
        let list = affordances(&garden_aspects(), &Observer::guest(), &registry);
        assert_eq!(list, vec!["manifest".to_string()]);
    }

    #[test]
    fn architect_sees_tend_in_declared_order() {
        let registry = ArchetypeRegistry::standard();
        let observer = Observer::new("architect", []);
        let list = affordances(&garden_aspects(), &observer, &registry);
        assert_eq!(list, vec!["manifest".to_string(), "tend".to_string(), "observe".to_string()]);
    }

    #[test]
    fn required_capability_gates_even_matching_archetype() {
        let registry = ArchetypeRegistry::standard();
        let bare = Observer::new("admin", ["purge".to_string()]);
        let list = affordances(&garden_aspects(), &bare, &registry);
        assert!(!list.contains(&"purge".to_string()));

        let empowered = Observer::new("admin", ["purge".to_string(), "dangerous_ops".to_string()]);
        let list = affordances(&garden_aspects(), &empowered, &registry);
        assert!(list.contains(&"purge".to_string()));
    }

    #[test]
    fn explicit_capabilities_extend_archetype_set() {
        let registry = ArchetypeRegistry::standard();
        let observer = Observer::new("guest", ["observe".to_string()]);
        let list = affordances(&garden_aspects(), &observer, &registry);
        assert_eq!(list, vec!["manifest".to_string(), "observe".to_string()]);
    }
}
