//! `void.sink`: swallow and acknowledge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agentese_core::{
    unknown_aspect, AspectCategory, AspectMeta, Effect, Node, Observer, Rendering, Result,
};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct SinkNode {
    swallowed: AtomicU64,
}

impl SinkNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { swallowed: AtomicU64::new(0) })
    }
}

#[async_trait]
impl Node for SinkNode {
    fn handle(&self) -> &str {
        "void.sink"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![
            AspectMeta::new("manifest", AspectCategory::Perception).idempotent().cost(0.01),
            // Anything consumed is gone; the count is all that remains.
            AspectMeta::new("consume", AspectCategory::Action)
                .capability("consume")
                .cost(0.02)
                .effect(Effect::Consumes, "payload"),
        ]
    }

    async fn invoke(&self, aspect: &str, _observer: &Observer, _kwargs: Value) -> Result<Rendering> {
        match aspect {
            "manifest" => Ok(Rendering::basic(json!({
                "void": true,
                "swallowed": self.swallowed.load(Ordering::Relaxed),
            }))),
            "consume" => {
                let count = self.swallowed.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(Rendering::basic(json!({ "consumed": true, "swallowed": count })))
            }
            other => Err(unknown_aspect("void.sink", other)),
        }
    }
}
