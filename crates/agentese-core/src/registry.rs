//! Node registry and typed contracts.
//!
//! Each node type registers once at startup: metadata (path, dependencies,
//! lifecycle flags), typed request/response contracts per aspect, and a
//! factory the registry calls with resolved dependencies. A process-wide
//! registry with `clear()`/`repopulate()` supports test isolation the same
//! way decorator re-scanning would. JIT mounts go through the same write
//! path, serialized by the underlying map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::container::{AnyService, ServiceContainer};
use crate::error::{AgentesError, Result};
use crate::node::Node;
use crate::path::Context;

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// One field of a record schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: String,
    #[serde(default)]
    pub required: bool,
}

/// Record-shaped schema for a request or response. A schema with no declared
/// fields is not a record type and fails contract validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub type_name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl SchemaDescriptor {
    pub fn record(type_name: impl Into<String>, fields: &[(&str, &str, bool)]) -> Self {
        Self {
            type_name: type_name.into(),
            fields: fields
                .iter()
                .map(|(name, ty, required)| FieldDescriptor {
                    name: name.to_string(),
                    ty: ty.to_string(),
                    required: *required,
                })
                .collect(),
        }
    }
}

/// Typed request/response descriptor for one `(path, aspect)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectContract {
    pub aspect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<SchemaDescriptor>,
    pub response: SchemaDescriptor,
}

// ---------------------------------------------------------------------------
// Node metadata
// ---------------------------------------------------------------------------

/// A declared dependency; optional dependencies are skipped silently when the
/// container has no provider for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}

impl DependencySpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: true }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: false }
    }
}

/// Registration-time node metadata, the Rust rendering of decorator metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Canonical registry key (`context.holon[...]`).
    pub path: String,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub contracts: Vec<AspectContract>,
    /// Example invocations for discovery surfaces.
    #[serde(default)]
    pub examples: Vec<String>,
}

impl NodeMetadata {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            dependencies: Vec::new(),
            singleton: true,
            lazy: true,
            contracts: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn dependency(mut self, spec: DependencySpec) -> Self {
        self.dependencies.push(spec);
        self
    }

    pub fn contract(mut self, contract: AspectContract) -> Self {
        self.contracts.push(contract);
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }
}

/// Dependencies resolved for a factory call, keyed by declared name.
pub struct ResolvedDeps {
    services: HashMap<String, AnyService>,
}

impl ResolvedDeps {
    pub fn get(&self, name: &str) -> Option<AnyService> {
        self.services.get(name).cloned()
    }

    /// Typed accessor for a required dependency.
    pub fn expect_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.services
            .get(name)
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
            .ok_or_else(|| AgentesError::DependencyNotFound {
                name: name.to_string(),
                chain: Vec::new(),
            })
    }
}

type NodeFactory = Arc<dyn Fn(ResolvedDeps) -> Result<Arc<dyn Node>> + Send + Sync>;

struct NodeEntry {
    metadata: NodeMetadata,
    factory: NodeFactory,
}

/// A registration function; recorded so `repopulate()` can re-run it.
pub type RegistrationFn = fn(&NodeRegistry) -> Result<()>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct NodeRegistry {
    entries: DashMap<String, NodeEntry>,
    instances: DashMap<String, Arc<dyn Node>>,
    registrations: RwLock<Vec<RegistrationFn>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type. Validates contracts: request/response schemas
    /// must be record types with declared fields.
    pub fn register<F>(&self, metadata: NodeMetadata, factory: F) -> Result<()>
    where
        F: Fn(ResolvedDeps) -> Result<Arc<dyn Node>> + Send + Sync + 'static,
    {
        for contract in &metadata.contracts {
            if contract.response.fields.is_empty() {
                return Err(AgentesError::Contract {
                    path: metadata.path.clone(),
                    aspect: contract.aspect.clone(),
                    reason: "response schema declares no fields".into(),
                });
            }
            if let Some(request) = &contract.request {
                if request.fields.is_empty() {
                    return Err(AgentesError::Contract {
                        path: metadata.path.clone(),
                        aspect: contract.aspect.clone(),
                        reason: "request schema declares no fields".into(),
                    });
                }
            }
        }
        let path = metadata.path.clone();
        self.entries.insert(
            path.clone(),
            NodeEntry { metadata, factory: Arc::new(factory) },
        );
        debug!(target: "agentese::registry", path = %path, "node registered");
        Ok(())
    }

    /// Record and run a registration function so `repopulate()` can replay it.
    pub fn install(&self, registration: RegistrationFn) -> Result<()> {
        self.registrations
            .write()
            .expect("registry registrations poisoned")
            .push(registration);
        registration(self)
    }

    /// Remove a node (JIT unmount or pruning). Drops any cached instance.
    pub fn unmount(&self, path: &str) -> bool {
        self.instances.remove(path);
        self.entries.remove(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<NodeMetadata> {
        self.entries.get(path).map(|e| e.metadata.clone())
    }

    pub fn has(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// All registered paths, optionally filtered by context, sorted.
    pub fn list_paths(&self, context: Option<Context>) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|p| match context {
                Some(ctx) => p.starts_with(&format!("{ctx}.")),
                None => true,
            })
            .collect();
        paths.sort();
        paths
    }

    pub fn get_contracts(&self, path: &str) -> Vec<AspectContract> {
        self.entries
            .get(path)
            .map(|e| e.metadata.contracts.clone())
            .unwrap_or_default()
    }

    /// Instantiate (or fetch the cached singleton for) a registered node.
    ///
    /// Declared dependencies resolve through the container: a missing
    /// required dependency fails, a missing optional one is skipped.
    pub async fn resolve(&self, path: &str, container: &Arc<ServiceContainer>) -> Result<Arc<dyn Node>> {
        if let Some(instance) = self.instances.get(path) {
            return Ok(instance.clone());
        }
        let (metadata, factory) = {
            let entry = self.entries.get(path).ok_or_else(|| AgentesError::PathNotFound {
                path: path.to_string(),
                suggestions: Vec::new(),
            })?;
            (entry.metadata.clone(), entry.factory.clone())
        };

        let mut services = HashMap::new();
        for dep in &metadata.dependencies {
            match container.resolve(&dep.name).await {
                Ok(service) => {
                    services.insert(dep.name.clone(), service);
                }
                Err(err) if dep.required => return Err(err),
                Err(_) => {
                    debug!(
                        target: "agentese::registry",
                        path, dependency = %dep.name,
                        "optional dependency absent, skipped"
                    );
                }
            }
        }

        let node = factory(ResolvedDeps { services })?;
        if metadata.singleton {
            self.instances.insert(path.to_string(), node.clone());
        }
        Ok(node)
    }

    /// All registered handles, for fuzzy not-found suggestions.
    pub fn handles(&self) -> Vec<String> {
        self.list_paths(None)
    }

    /// Drop all entries and cached instances, keeping recorded registrations.
    pub fn clear(&self) {
        self.entries.clear();
        self.instances.clear();
        info!(target: "agentese::registry", "registry cleared");
    }

    /// Re-run every recorded registration function after a `clear()`.
    pub fn repopulate(&self) -> Result<()> {
        let registrations = self
            .registrations
            .read()
            .expect("registry registrations poisoned")
            .clone();
        for registration in registrations {
            registration(self)?;
        }
        Ok(())
    }
}

/// Process-wide registry, a convenience factory atop the explicit handle.
pub static GLOBAL_REGISTRY: Lazy<Arc<NodeRegistry>> = Lazy::new(|| Arc::new(NodeRegistry::new()));
