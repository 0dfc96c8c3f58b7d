//! agentese-nodes: built-in leaf nodes for the five contexts.
//!
//! One module per node, registered into the node registry at startup the way
//! the fabric expects: metadata + contracts + a factory taking resolved
//! dependencies. [`bootstrap`] wires a resolver with the full set plus the
//! grow kernel services.

mod document;
mod garden;
mod grow_node;
mod lattice_node;
mod memory;
mod now;
mod sink;
mod summary;
mod system;

use std::sync::Arc;

use agentese_core::{
    AspectContract, DependencySpec, FabricConfig, Logos, NodeMetadata, NodeRegistry, Result,
    SchemaDescriptor,
};
use agentese_grow::{GrowKernel, JitPromoter, LatticeChecker};

pub use document::DocumentNode;
pub use garden::GardenNode;
pub use grow_node::GrowNode;
pub use lattice_node::LatticeNode;
pub use memory::{Engram, MemoryNode, MemoryStore};
pub use now::NowNode;
pub use sink::SinkNode;
pub use summary::SummaryNode;
pub use system::SystemNode;

/// Register the dependency-free leaves.
pub fn register_leaves(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        NodeMetadata::new("world.garden")
            .contract(AspectContract {
                aspect: "manifest".into(),
                request: None,
                response: SchemaDescriptor::record(
                    "GardenManifest",
                    &[("beds", "list", true), ("season", "string", true), ("tended_count", "u64", true)],
                ),
            })
            .example("world.garden.manifest"),
        |_deps| Ok(GardenNode::new() as Arc<dyn agentese_core::Node>),
    )?;
    registry.register(
        NodeMetadata::new("world.document").example("world.document.manifest?text=..."),
        |_deps| Ok(DocumentNode::new() as Arc<dyn agentese_core::Node>),
    )?;
    registry.register(
        NodeMetadata::new("concept.summary").example("concept.summary.refine"),
        |_deps| Ok(SummaryNode::new() as Arc<dyn agentese_core::Node>),
    )?;
    registry.register(NodeMetadata::new("time.now"), |_deps| Ok(NowNode::new() as Arc<dyn agentese_core::Node>))?;
    registry.register(NodeMetadata::new("void.sink"), |_deps| Ok(SinkNode::new() as Arc<dyn agentese_core::Node>))
}

/// Register `self.memory`; requires a `memory_store` service.
pub fn register_memory(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        NodeMetadata::new("self.memory")
            .dependency(DependencySpec::required("memory_store"))
            .contract(AspectContract {
                aspect: "engram".into(),
                request: Some(SchemaDescriptor::record(
                    "EngramRequest",
                    &[("input", "value", true)],
                )),
                response: SchemaDescriptor::record(
                    "EngramReceipt",
                    &[("engram_id", "uuid", true), ("stored", "bool", true)],
                ),
            }),
        |deps| {
            let store = deps.expect_as::<MemoryStore>("memory_store")?;
            Ok(MemoryNode::new(store) as Arc<dyn agentese_core::Node>)
        },
    )
}

/// Register `self.system`; requires the `fabric_config` service for roots.
pub fn register_system(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        NodeMetadata::new("self.system")
            .dependency(DependencySpec::required("fabric_config")),
        |deps| {
            let config = deps.expect_as::<FabricConfig>("fabric_config")?;
            Ok(SystemNode::new(config.spec_root.clone(), config.impl_root.clone()) as Arc<dyn agentese_core::Node>)
        },
    )
}

/// Register `self.grow`; requires the `grow_kernel` and `logos_weak` services.
pub fn register_grow(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        NodeMetadata::new("self.grow")
            .dependency(DependencySpec::required("grow_kernel"))
            .dependency(DependencySpec::required("logos_weak")),
        |deps| {
            let kernel = deps.expect_as::<GrowKernel>("grow_kernel")?;
            let weak = deps.expect_as::<std::sync::Weak<Logos>>("logos_weak")?;
            Ok(GrowNode::new(kernel, (*weak).clone()) as Arc<dyn agentese_core::Node>)
        },
    )?;
    registry.register(
        NodeMetadata::new("concept.lattice")
            .dependency(DependencySpec::required("grow_kernel"))
            .example("concept.lattice:define"),
        |deps| {
            let kernel = deps.expect_as::<GrowKernel>("grow_kernel")?;
            Ok(LatticeNode::new(kernel) as Arc<dyn agentese_core::Node>)
        },
    )
}

/// Install every built-in node into a registry, recording the registration
/// functions so `clear()`/`repopulate()` keeps working in tests.
pub fn install_all(registry: &NodeRegistry) -> Result<()> {
    registry.install(register_leaves)?;
    registry.install(register_memory)?;
    registry.install(register_system)?;
    registry.install(register_grow)
}

/// Wire a resolver with the full built-in set: container services (memory
/// store, config, grow kernel, a weak resolver link for hot-mounting) plus
/// all node registrations.
pub fn bootstrap(logos: &Arc<Logos>) -> Result<Arc<GrowKernel>> {
    let config = Arc::new(logos.config().clone());
    let kernel = Arc::new(GrowKernel::new(
        Arc::new(LatticeChecker::new()),
        JitPromoter::new(config.spec_root.clone(), config.impl_root.clone()),
    ));

    let container = logos.container();
    container.register_value("memory_store", MemoryStore::new());
    container.register_value("fabric_config", config);
    container.register_value("grow_kernel", kernel.clone());
    container.register_value("logos_weak", Arc::new(Arc::downgrade(logos)));

    install_all(logos.registry())?;
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentese_core::Observer;
    use serde_json::json;

    fn test_logos() -> Arc<Logos> {
        let registry = Arc::new(NodeRegistry::new());
        let logos = Logos::with_registry(FabricConfig::default(), registry);
        bootstrap(&logos).unwrap();
        logos
    }

    #[tokio::test]
    async fn bootstrap_exposes_all_handles() {
        let logos = test_logos();
        let handles = logos.registry().handles();
        for expected in [
            "concept.lattice",
            "concept.summary",
            "self.grow",
            "self.memory",
            "self.system",
            "time.now",
            "void.sink",
            "world.document",
            "world.garden",
        ] {
            assert!(handles.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn memory_node_resolves_through_container() {
        let logos = test_logos();
        let developer = Observer::new("developer", []);
        let stored = logos
            .invoke("self.memory:engram", Some(&developer), json!({"input": {"k": 1}}))
            .await
            .unwrap();
        assert_eq!(stored.body()["stored"], true);
        let recalled = logos
            .invoke("self.memory:recall", Some(&developer), json!({}))
            .await
            .unwrap();
        assert_eq!(recalled.body()[0]["content"]["k"], 1);
    }

    #[tokio::test]
    async fn sink_consumes_with_capability() {
        let logos = test_logos();
        let consumer = Observer::new("guest", ["consume".to_string()]);
        let out = logos
            .invoke("void.sink:consume", Some(&consumer), json!({"payload": "gone"}))
            .await
            .unwrap();
        assert_eq!(out.body()["consumed"], true);
        // Without the capability the aspect is not afforded.
        let err = logos.invoke("void.sink:consume", None, json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "affordance_denied");
    }

    #[tokio::test]
    async fn clear_and_repopulate_preserves_nodes() {
        let logos = test_logos();
        logos.registry().clear();
        assert!(!logos.registry().has("world.garden"));
        logos.registry().repopulate().unwrap();
        assert!(logos.registry().has("world.garden"));
        logos.invoke("world.garden.manifest", None, json!({})).await.unwrap();
    }
}
