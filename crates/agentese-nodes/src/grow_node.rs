//! `self.grow`: the growth pipeline exposed as aspects.
//!
//! Wraps a shared [`GrowKernel`]. The node holds a weak reference to the
//! resolver so `germinate` can hot-mount the synthesized node and `prune`
//! can unmount it; the weak link keeps ownership acyclic.

use std::sync::{Arc, Weak};

use agentese_core::{
    unknown_aspect, AgentesError, AspectCategory, AspectMeta, Effect, Logos, Node, Observer,
    Rendering, Result,
};
use agentese_grow::{GrowKernel, PromotionThresholds};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

pub struct GrowNode {
    kernel: Arc<GrowKernel>,
    logos: Weak<Logos>,
}

impl GrowNode {
    pub fn new(kernel: Arc<GrowKernel>, logos: Weak<Logos>) -> Arc<Self> {
        Arc::new(Self { kernel, logos })
    }

    fn str_param<'a>(kwargs: &'a Value, key: &str, aspect: &str) -> Result<&'a str> {
        kwargs.get(key).and_then(|v| v.as_str()).ok_or_else(|| AgentesError::Handler {
            path: "self.grow".into(),
            aspect: aspect.into(),
            inner: format!("missing '{key}' parameter"),
        })
    }

    fn kernel_err(aspect: &str) -> impl Fn(agentese_grow::GrowError) -> AgentesError + '_ {
        move |e| AgentesError::Handler {
            path: "self.grow".into(),
            aspect: aspect.to_string(),
            inner: e.to_string(),
        }
    }
}

#[async_trait]
impl Node for GrowNode {
    fn handle(&self) -> &str {
        "self.grow"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![
            AspectMeta::new("recognize", AspectCategory::Perception)
                .requires("architect")
                .cost(0.05),
            AspectMeta::new("propose", AspectCategory::Action).requires("architect").cost(0.1),
            AspectMeta::new("validate", AspectCategory::Meta).requires("architect").cost(0.2),
            AspectMeta::new("germinate", AspectCategory::Lifecycle)
                .requires("architect")
                .cost(0.3)
                .effect(Effect::Writes, "nursery"),
            AspectMeta::new("promote", AspectCategory::Lifecycle)
                .requires("architect")
                .cost(0.5)
                .effect(Effect::Writes, "spec_root")
                .effect(Effect::Writes, "impl_root"),
            AspectMeta::new("prune", AspectCategory::Lifecycle)
                .requires("architect")
                .cost(0.05)
                .effect(Effect::Writes, "nursery"),
            AspectMeta::new("rollback", AspectCategory::Lifecycle)
                .requires("architect")
                .cost(0.1)
                .effect(Effect::Writes, "spec_root")
                .effect(Effect::Writes, "impl_root"),
        ]
    }

    async fn invoke(&self, aspect: &str, _observer: &Observer, kwargs: Value) -> Result<Rendering> {
        match aspect {
            "recognize" => {
                let observation = Self::str_param(&kwargs, "observation", aspect)?;
                let candidates =
                    self.kernel.recognize(observation).map_err(Self::kernel_err(aspect))?;
                Ok(Rendering::basic(json!({ "candidates": candidates })))
            }
            "propose" => {
                let spec = Self::str_param(&kwargs, "spec", aspect)?;
                let motivation =
                    kwargs.get("motivation").and_then(|v| v.as_str()).unwrap_or_default();
                let proposal =
                    self.kernel.propose(spec, motivation).map_err(Self::kernel_err(aspect))?;
                Ok(Rendering::basic(json!({
                    "handle": proposal.handle,
                    "proposed": true,
                })))
            }
            "validate" => {
                let spec = Self::str_param(&kwargs, "spec", aspect)?;
                let motivation =
                    kwargs.get("motivation").and_then(|v| v.as_str()).unwrap_or_default();
                let proposal =
                    self.kernel.propose(spec, motivation).map_err(Self::kernel_err(aspect))?;
                let report =
                    self.kernel.validate(&proposal).await.map_err(Self::kernel_err(aspect))?;
                Ok(Rendering::basic(json!({
                    "handle": report.handle,
                    "passed": report.passed(),
                    "gates": report.gates,
                    "fitness": report.fitness,
                })))
            }
            "germinate" => {
                let spec = Self::str_param(&kwargs, "spec", aspect)?;
                let motivation =
                    kwargs.get("motivation").and_then(|v| v.as_str()).unwrap_or_default();
                let proposal =
                    self.kernel.propose(spec, motivation).map_err(Self::kernel_err(aspect))?;
                let node =
                    self.kernel.germinate(&proposal).await.map_err(Self::kernel_err(aspect))?;
                let handle = node.handle().to_string();
                let mounted = match self.logos.upgrade() {
                    Some(logos) => {
                        logos.mount(&handle, node)?;
                        true
                    }
                    None => false,
                };
                Ok(Rendering::basic(json!({
                    "handle": handle,
                    "germinating": true,
                    "mounted": mounted,
                })))
            }
            "promote" => {
                let handle = Self::str_param(&kwargs, "handle", aspect)?;
                let thresholds = PromotionThresholds {
                    min_usage: kwargs.get("threshold").and_then(|v| v.as_u64()).unwrap_or(5),
                    min_success_rate: kwargs
                        .get("success_threshold")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.8),
                };
                let token =
                    self.kernel.promote(handle, thresholds).map_err(Self::kernel_err(aspect))?;
                Ok(Rendering::basic(json!({
                    "handle": handle,
                    "promoted": true,
                    "rollback_token": token.id,
                    "spec_path": token.spec_path,
                    "impl_path": token.impl_path,
                })))
            }
            "prune" => {
                let handle = Self::str_param(&kwargs, "handle", aspect)?;
                self.kernel.prune(handle).map_err(Self::kernel_err(aspect))?;
                if let Some(logos) = self.logos.upgrade() {
                    logos.unmount(handle);
                }
                Ok(Rendering::basic(json!({ "handle": handle, "pruned": true })))
            }
            "rollback" => {
                let raw = Self::str_param(&kwargs, "token", aspect)?;
                let id: Uuid = raw.parse().map_err(|_| AgentesError::Handler {
                    path: "self.grow".into(),
                    aspect: "rollback".into(),
                    inner: format!("'{raw}' is not a token id"),
                })?;
                let token =
                    self.kernel.promoter().load_token(id).map_err(Self::kernel_err(aspect))?;
                self.kernel.rollback(&token).map_err(Self::kernel_err(aspect))?;
                Ok(Rendering::basic(json!({
                    "handle": token.handle,
                    "rolled_back": true,
                })))
            }
            other => Err(unknown_aspect("self.grow", other)),
        }
    }
}
