//! `self.system`: the autopoietic loop: compile spec→impl, reflect
//! impl→spec, audit drift between the two trees.

use std::path::PathBuf;
use std::sync::Arc;

use agentese_core::{
    unknown_aspect, AgentesError, AspectCategory, AspectMeta, Effect, Node, Observer, Rendering,
    Result,
};
use agentese_grow::{full_audit, generate_source, parse_spec, reflect, synthesize};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct SystemNode {
    spec_root: PathBuf,
    impl_root: PathBuf,
}

impl SystemNode {
    pub fn new(spec_root: PathBuf, impl_root: PathBuf) -> Arc<Self> {
        Arc::new(Self { spec_root, impl_root })
    }
}

#[async_trait]
impl Node for SystemNode {
    fn handle(&self) -> &str {
        "self.system"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![
            AspectMeta::new("compile", AspectCategory::Meta)
                .requires("developer")
                .cost(0.3)
                .effect(Effect::Reads, "spec"),
            AspectMeta::new("reflect", AspectCategory::Meta)
                .requires("developer")
                .cost(0.2)
                .effect(Effect::Reads, "impl"),
            AspectMeta::new("audit", AspectCategory::Meta)
                .requires("developer")
                .idempotent()
                .cost(0.2)
                .effect(Effect::Reads, "spec")
                .effect(Effect::Reads, "impl"),
        ]
    }

    async fn invoke(&self, aspect: &str, _observer: &Observer, kwargs: Value) -> Result<Rendering> {
        match aspect {
            "compile" => {
                let text = kwargs
                    .get("spec")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AgentesError::Handler {
                        path: "self.system".into(),
                        aspect: "compile".into(),
                        inner: "missing 'spec' parameter".into(),
                    })?;
                let spec = parse_spec(text).map_err(grow_err("compile"))?;
                let node = synthesize(&spec).map_err(grow_err("compile"))?;
                let source = generate_source(&spec).map_err(grow_err("compile"))?;
                Ok(Rendering::basic(json!({
                    "handle": node.handle(),
                    "aspects": node.aspects().iter().map(|a| a.name.clone()).collect::<Vec<_>>(),
                    "layer_count": spec.layer_count,
                    "source": source,
                })))
            }
            "reflect" => {
                let source = kwargs
                    .get("source")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AgentesError::Handler {
                        path: "self.system".into(),
                        aspect: "reflect".into(),
                        inner: "missing 'source' parameter".into(),
                    })?;
                let spec = reflect(source);
                Ok(Rendering::basic(serde_json::to_value(spec).unwrap_or(Value::Null)))
            }
            "audit" => {
                let (discovery, report) = full_audit(&self.spec_root, &self.impl_root)
                    .map_err(grow_err("audit"))?;
                let aligned = report.aligned();
                let drifted = report.drifted().len();
                Ok(Rendering::basic(json!({
                    "discovery": discovery,
                    "report": report,
                    "aligned": aligned,
                    "drifted": drifted,
                })))
            }
            other => Err(unknown_aspect("self.system", other)),
        }
    }
}

fn grow_err(aspect: &'static str) -> impl Fn(agentese_grow::GrowError) -> AgentesError {
    move |e| AgentesError::Handler {
        path: "self.system".into(),
        aspect: aspect.into(),
        inner: e.to_string(),
    }
}
