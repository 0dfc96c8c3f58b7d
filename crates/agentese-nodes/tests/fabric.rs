//! End-to-end fabric behavior over the built-in node set.
//!
//! ## Scenarios
//! 1. Path grammar round-trips with clauses and annotations.
//! 2. Affordance gating refuses the guest, admits the architect.
//! 3. A three-stage composition pipes document → summary → memory; the
//!    Minimal Output Principle rejects a heterogeneous stage.
//! 4. Budget depletion rejects, regeneration readmits.
//! 5. Matching subscriptions see exactly one INVOKED event each.
//! 6. A spec germinates into a live node, earns promotion, and rolls back
//!    bit-for-bit.
//! 7. Concept lineage accepts well-founded definitions and names the cycle
//!    path when a redefinition would close a loop.
//! 8. Observer-dependent renderings select per archetype.

use std::sync::Arc;

use agentese_core::{
    parse, AgentesError, Delivery, EventKind, FabricConfig, Logos, NodeRegistry, Observer,
    Rendering, SubscribeOptions,
};
use agentese_grow::GrowKernel;
use agentese_nodes::bootstrap;
use async_trait::async_trait;
use serde_json::{json, Value};

fn fabric_with(config: FabricConfig) -> (Arc<Logos>, Arc<GrowKernel>) {
    let registry = Arc::new(NodeRegistry::new());
    let logos = Logos::with_registry(config, registry);
    let kernel = bootstrap(&logos).unwrap();
    (logos, kernel)
}

fn fabric() -> (Arc<Logos>, Arc<GrowKernel>) {
    fabric_with(FabricConfig { budget_initial: 50.0, ..Default::default() })
}

// ---------------------------------------------------------------------------
// Scenario 1: grammar round-trip
// ---------------------------------------------------------------------------

#[test]
fn parse_round_trips_with_modifiers() {
    let p = parse("world.garden.manifest?entropy=0.3@law_check=on").unwrap();
    assert_eq!(p.context().as_str(), "world");
    assert_eq!(p.segments(), ["garden", "manifest"]);
    assert_eq!(p.entropy_clause(), Some(0.3));
    assert!(p.annotation_on("law_check"));
    assert_eq!(parse(&p.full_path()).unwrap(), p);
}

// ---------------------------------------------------------------------------
// Scenario 2: affordance gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn guest_is_refused_where_architect_is_admitted() {
    let (logos, _) = fabric();
    let err = logos
        .invoke("world.garden:tend", Some(&Observer::guest()), json!({}))
        .await
        .unwrap_err();
    match err {
        AgentesError::Affordance { aspect, archetype, .. } => {
            assert_eq!(aspect, "tend");
            assert_eq!(archetype, "guest");
        }
        other => panic!("expected affordance refusal, got {other:?}"),
    }

    let architect = Observer::new("architect", []);
    let out = logos.invoke("world.garden:tend", Some(&architect), json!({})).await.unwrap();
    assert_eq!(out.body()["tended"], true);
}

// ---------------------------------------------------------------------------
// Scenario 3: composition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pipeline_document_summary_memory() {
    let (logos, _) = fabric();
    let architect = Observer::new("architect", []);
    let pipeline = logos.compose(
        ["world.document.manifest", "concept.summary.refine", "self.memory.engram"],
        Some(true),
        true,
    );
    let out = pipeline
        .invoke(&logos, &architect, json!("The fig ripens. Patience is the whole of gardening."))
        .await
        .unwrap();
    assert_eq!(out["stored"], true);

    // The engram holds the refined essence, not the raw document.
    let recalled = logos
        .invoke("self.memory:recall", Some(&architect), json!({"limit": 1}))
        .await
        .unwrap();
    let newest = &recalled.body()[0]["content"];
    assert_eq!(newest["essence"], "The fig ripens.");
}

struct HeterogeneousNode;

#[async_trait]
impl agentese_core::Node for HeterogeneousNode {
    fn handle(&self) -> &str {
        "concept.scatter"
    }

    fn aspects(&self) -> Vec<agentese_core::AspectMeta> {
        vec![agentese_core::AspectMeta::new(
            "refine",
            agentese_core::AspectCategory::Composition,
        )
        .idempotent()]
    }

    async fn invoke(
        &self,
        _aspect: &str,
        _observer: &Observer,
        _kwargs: Value,
    ) -> agentese_core::Result<Rendering> {
        Ok(Rendering::basic(json!([1, "two", {"three": 3}])))
    }
}

#[tokio::test]
async fn minimal_output_violation_names_the_stage() {
    let (logos, _) = fabric();
    logos.register_simple("concept.scatter", Arc::new(HeterogeneousNode));
    let architect = Observer::new("architect", []);
    let pipeline = logos.compose(
        ["world.document.manifest", "concept.scatter.refine", "self.memory.engram"],
        Some(true),
        false,
    );
    let err = pipeline.invoke(&logos, &architect, json!("text")).await.unwrap_err();
    match err {
        AgentesError::CompositionViolation { stage, reason } => {
            assert_eq!(stage, 2);
            assert_eq!(reason, "non_minimal_output");
        }
        other => panic!("expected composition violation, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenario 4: budget depletion and regeneration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn budget_rejects_then_regenerates() {
    let (logos, _) = fabric_with(FabricConfig {
        budget_initial: 0.7,
        budget_refill_rate: 1.0,
        ..Default::default()
    });
    let architect = Observer::new("architect", []).with_id("patient-gardener");

    // tend costs 0.4: two quick calls exhaust 0.7.
    logos.invoke("world.garden:tend", Some(&architect), json!({})).await.unwrap();
    let err = logos.invoke("world.garden:tend", Some(&architect), json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "budget_exhausted");

    // At 2 units/s the pool is affordable again within a few hundred ms.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    logos.invoke("world.garden:tend", Some(&architect), json!({})).await.unwrap();
}

#[tokio::test]
async fn failed_invocation_refunds_the_lease() {
    let (logos, _) = fabric();
    let before = logos.budget().entropy_available("guest");
    // recall requires the developer affordance: refused before any charge.
    let _ = logos.invoke("self.memory:recall", None, json!({})).await.unwrap_err();
    let after = logos.budget().entropy_available("guest");
    assert!((before - after).abs() < 1e-6);
}

// ---------------------------------------------------------------------------
// Scenario 5: events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_invoked_event_per_matching_subscription() {
    let (logos, _) = fabric();
    let matching = logos
        .subscriptions()
        .subscribe("world.**:manifest", SubscribeOptions::default())
        .unwrap();
    let wrong_aspect = logos
        .subscriptions()
        .subscribe("world.**:tend", SubscribeOptions::default())
        .unwrap();

    logos.invoke("world.garden.manifest", None, json!({})).await.unwrap();

    let delivered = matching.next().await.unwrap();
    assert_eq!(delivered.event.kind, EventKind::Invoked);
    assert_eq!(delivered.event.path, "world.garden");
    assert_eq!(delivered.event.aspect.as_deref(), Some("manifest"));

    let nothing =
        tokio::time::timeout(std::time::Duration::from_millis(50), wrong_aspect.next()).await;
    assert!(nothing.is_err(), "non-matching subscription must stay silent");
}

#[tokio::test]
async fn errors_emit_error_events() {
    let (logos, _) = fabric();
    let errors = logos
        .subscriptions()
        .subscribe(
            "self.**",
            SubscribeOptions { delivery: Delivery::AtMostOnce, ..Default::default() },
        )
        .unwrap();
    let _ = logos.invoke("self.memory:recall", None, json!({})).await.unwrap_err();
    let delivered = errors.next().await.unwrap();
    assert_eq!(delivered.event.kind, EventKind::Refused);
}

// ---------------------------------------------------------------------------
// Scenario 6: germinate → promote → rollback
// ---------------------------------------------------------------------------

const ORCHARD_SPEC: &str = r#"---
agentese: world.orchard
polynomial:
  positions:
    - dormant
    - fruiting
operad:
  operations:
    - graft
aspects:
  - name: manifest
    category: perception
    cost: 0.05
lineage:
  extends:
    - concept
  justification: an orchard is a world-facing grove of concepts
---
Rows of fruit trees, waiting for their season to come around.
"#;

#[tokio::test]
async fn jit_lifecycle_germinate_promote_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let (logos, kernel) = fabric_with(FabricConfig {
        budget_initial: 50.0,
        spec_root: dir.path().join("spec"),
        impl_root: dir.path().join("impl"),
        ..Default::default()
    });
    let architect = Observer::new("architect", []);

    // Germinate through the fabric; the node hot-mounts.
    let germinated = logos
        .invoke(
            "self.grow:germinate",
            Some(&architect),
            json!({"spec": ORCHARD_SPEC, "motivation": "fruit at scale"}),
        )
        .await
        .unwrap();
    assert_eq!(germinated.body()["mounted"], true);

    // The synthesized node answers like any other.
    for _ in 0..5 {
        let out = logos.invoke("world.orchard.manifest", Some(&architect), json!({})).await.unwrap();
        assert_eq!(out.body()["handle"], "world.orchard");
        kernel.record_usage("world.orchard", true);
    }

    // Promote: spec and impl land under their roots.
    let promoted = logos
        .invoke(
            "self.grow:promote",
            Some(&architect),
            json!({"handle": "world.orchard", "threshold": 5, "success_threshold": 0.8}),
        )
        .await
        .unwrap();
    let spec_path = dir.path().join("spec/world/orchard.md");
    let impl_path = dir.path().join("impl/world.orchard.rs");
    assert!(spec_path.exists());
    assert!(impl_path.exists());
    let token = promoted.body()["rollback_token"].as_str().unwrap().to_string();

    // Rollback restores the empty prior state.
    let rolled = logos
        .invoke("self.grow:rollback", Some(&architect), json!({"token": token}))
        .await
        .unwrap();
    assert_eq!(rolled.body()["rolled_back"], true);
    assert!(!spec_path.exists());
    assert!(!impl_path.exists());
}

// ---------------------------------------------------------------------------
// Scenario 7: lattice lineage through the fabric
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concept_definition_and_cycle_rejection() {
    let (logos, _) = fabric();
    let architect = Observer::new("architect", []);

    let fruit = logos
        .invoke(
            "concept.lattice:define",
            Some(&architect),
            json!({
                "handle": "concept.fruit",
                "extends": ["concept"],
                "justification": "fruit is a kind of concept",
            }),
        )
        .await
        .unwrap();
    assert_eq!(fruit.body()["depth"], 1);

    logos
        .invoke(
            "concept.lattice:define",
            Some(&architect),
            json!({
                "handle": "concept.fig",
                "extends": ["concept.fruit"],
                "justification": "a fig is a fruit",
            }),
        )
        .await
        .unwrap();

    // Redefining fruit under fig closes a cycle; the error names the path.
    let err = logos
        .invoke(
            "concept.lattice:define",
            Some(&architect),
            json!({
                "handle": "concept.fruit",
                "extends": ["concept.fig"],
                "justification": "fruit is figs now",
            }),
        )
        .await
        .unwrap_err();
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

    // Lineage reads back through observe.
    let record = logos
        .invoke(
            "concept.lattice:observe",
            Some(&architect),
            json!({"handle": "concept.fig"}),
        )
        .await
        .unwrap();
    assert_eq!(record.body()["depth"], 2);
}

// ---------------------------------------------------------------------------
// Observer-dependent renderings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn renderings_select_per_archetype() {
    let (logos, _) = fabric();
    let blueprint = logos
        .invoke("world.garden.manifest", Some(&Observer::new("architect", [])), json!({}))
        .await
        .unwrap();
    assert!(matches!(blueprint, Rendering::Blueprint { .. }));

    let poem = logos
        .invoke("world.garden.manifest", Some(&Observer::new("poet", [])), json!({}))
        .await
        .unwrap();
    assert!(matches!(poem, Rendering::Poetic { .. }));

    let fallback = logos
        .invoke("world.garden.manifest", Some(&Observer::new("trickster", ["manifest".to_string()])), json!({}))
        .await
        .unwrap();
    assert!(matches!(fallback, Rendering::Basic { .. }));
}

// ---------------------------------------------------------------------------
// Aliases across the fabric
// ---------------------------------------------------------------------------

#[tokio::test]
async fn alias_surface_registers_expands_and_removes() {
    let (logos, _) = fabric();
    logos.alias("garden", "world.garden").unwrap();
    let out = logos.invoke("garden.manifest", None, json!({})).await.unwrap();
    assert_eq!(out.to_dict()["rendering"], "basic");
    assert_eq!(logos.get_aliases().len(), 1);
    logos.unalias("garden").unwrap();
    assert!(logos.invoke("garden.manifest", None, json!({})).await.is_err());
}
