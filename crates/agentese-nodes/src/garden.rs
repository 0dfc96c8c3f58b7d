//! `world.garden`: the canonical perception/action/stream leaf.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agentese_core::{
    render_for, unknown_aspect, AspectCategory, AspectMeta, Context, Effect, Node, Observer,
    RenderStream, Rendering, Result,
};
use async_trait::async_trait;
use serde_json::{json, Value};

/// A small cultivated world. Beds and seasons are fixed; tending bumps a
/// counter so architects can see their work reflected in the manifest.
pub struct GardenNode {
    tended: AtomicU64,
}

impl GardenNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { tended: AtomicU64::new(0) })
    }

    fn state(&self) -> Value {
        json!({
            "beds": ["herb spiral", "three sisters", "cutting bed"],
            "season": "late summer",
            "tended_count": self.tended.load(Ordering::Relaxed),
        })
    }
}

#[async_trait]
impl Node for GardenNode {
    fn handle(&self) -> &str {
        "world.garden"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![
            AspectMeta::new("manifest", AspectCategory::Perception)
                .idempotent()
                .cost(0.1)
                .effect(Effect::Reads, "garden"),
            AspectMeta::new("tend", AspectCategory::Action)
                .requires("architect")
                .cost(0.4)
                .effect(Effect::Writes, "garden"),
            AspectMeta::new("observe", AspectCategory::Stream)
                .streaming()
                .cost(0.2)
                .effect(Effect::Reads, "garden"),
        ]
    }

    async fn invoke(&self, aspect: &str, observer: &Observer, kwargs: Value) -> Result<Rendering> {
        match aspect {
            "manifest" => Ok(render_for(
                observer.archetype(),
                Context::World,
                "world.garden",
                "manifest",
                self.state(),
            )),
            "tend" => {
                let count = self.tended.fetch_add(1, Ordering::Relaxed) + 1;
                let action = kwargs
                    .get("action")
                    .and_then(|v| v.as_str())
                    .unwrap_or("weeding");
                Ok(render_for(
                    observer.archetype(),
                    Context::World,
                    "world.garden",
                    "tend",
                    json!({ "tended": true, "action": action, "tended_count": count }),
                ))
            }
            "observe" => Ok(Rendering::basic(self.state())),
            other => Err(unknown_aspect("world.garden", other)),
        }
    }

    async fn invoke_stream(
        &self,
        aspect: &str,
        observer: &Observer,
        kwargs: Value,
    ) -> Result<RenderStream> {
        if aspect != "observe" {
            let rendering = self.invoke(aspect, observer, kwargs).await;
            return Ok(Box::pin(futures_util::stream::once(async move { rendering })));
        }
        let state = self.state();
        let beds: Vec<Value> = state["beds"].as_array().cloned().unwrap_or_default();
        Ok(Box::pin(async_stream::stream! {
            for (index, bed) in beds.into_iter().enumerate() {
                yield Ok(Rendering::basic(json!({ "bed": bed, "index": index })));
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn manifest_reflects_tending() {
        let garden = GardenNode::new();
        let architect = Observer::new("architect", []);
        garden.invoke("tend", &architect, json!({"action": "pruning"})).await.unwrap();
        let out = garden.invoke("manifest", &Observer::guest(), json!({})).await.unwrap();
        assert_eq!(out.body()["tended_count"], 1);
    }

    #[tokio::test]
    async fn observe_streams_one_chunk_per_bed() {
        let garden = GardenNode::new();
        let mut stream = garden
            .invoke_stream("observe", &Observer::new("scientist", []), json!({}))
            .await
            .unwrap();
        let mut count = 0;
        while let Some(chunk) = stream.next().await {
            chunk.unwrap();
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
