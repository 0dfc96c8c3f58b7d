//! `concept.lattice`: concept definition and lineage inspection.
//!
//! Fronts the shared lattice checker. `define` is the fabric surface for
//! creating concepts (lineage is a hard requirement and every check in the
//! consistency suite runs); `observe` reads a lineage record back.

use std::sync::Arc;

use agentese_core::{
    unknown_aspect, AgentesError, AspectCategory, AspectMeta, Effect, Node, Observer, Rendering,
    Result,
};
use agentese_grow::{ConceptProposal, GrowKernel};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct LatticeNode {
    kernel: Arc<GrowKernel>,
}

impl LatticeNode {
    pub fn new(kernel: Arc<GrowKernel>) -> Arc<Self> {
        Arc::new(Self { kernel })
    }
}

fn string_list(kwargs: &Value, key: &str) -> Vec<String> {
    kwargs
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items.iter().filter_map(|v| v.as_str()).map(str::to_string).collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Node for LatticeNode {
    fn handle(&self) -> &str {
        "concept.lattice"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![
            AspectMeta::new("manifest", AspectCategory::Perception).idempotent().cost(0.02),
            AspectMeta::new("observe", AspectCategory::Perception).idempotent().cost(0.02),
            AspectMeta::new("define", AspectCategory::Action)
                .requires("architect")
                .cost(0.25)
                .effect(Effect::Writes, "lattice"),
        ]
    }

    async fn invoke(&self, aspect: &str, _observer: &Observer, kwargs: Value) -> Result<Rendering> {
        let lattice = self.kernel.lattice();
        match aspect {
            "manifest" => Ok(Rendering::basic(json!({
                "concepts": lattice.handles(),
            }))),
            "observe" => {
                let handle = kwargs
                    .get("handle")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AgentesError::Handler {
                        path: "concept.lattice".into(),
                        aspect: "observe".into(),
                        inner: "missing 'handle' parameter".into(),
                    })?;
                match lattice.get(handle) {
                    Some(record) => {
                        Ok(Rendering::basic(serde_json::to_value(record).unwrap_or(Value::Null)))
                    }
                    None => Err(AgentesError::PathNotFound {
                        path: handle.to_string(),
                        suggestions: agentese_core::suggest(handle, &lattice.handles(), 3),
                    }),
                }
            }
            "define" => {
                let handle = kwargs
                    .get("handle")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AgentesError::Handler {
                        path: "concept.lattice".into(),
                        aspect: "define".into(),
                        inner: "missing 'handle' parameter".into(),
                    })?;
                let proposal = ConceptProposal {
                    extends: string_list(&kwargs, "extends"),
                    subsumes: string_list(&kwargs, "subsumes"),
                    justification: kwargs
                        .get("justification")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    affordances: string_list(&kwargs, "affordances"),
                    constraints: string_list(&kwargs, "constraints"),
                };
                let result = lattice.define(handle, proposal)?;
                Ok(Rendering::basic(json!({
                    "handle": result.handle,
                    "depth": result.depth,
                    "affordances": result.affordances,
                    "constraints": result.constraints,
                })))
            }
            other => Err(unknown_aspect("concept.lattice", other)),
        }
    }
}
