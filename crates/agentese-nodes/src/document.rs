//! `world.document`: manifest over submitted text.

use std::sync::Arc;

use agentese_core::{
    unknown_aspect, AspectCategory, AspectMeta, Effect, Node, Observer, Rendering, Result,
};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct DocumentNode;

impl DocumentNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Node for DocumentNode {
    fn handle(&self) -> &str {
        "world.document"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![AspectMeta::new("manifest", AspectCategory::Perception)
            .idempotent()
            .cost(0.05)
            .effect(Effect::Reads, "document")]
    }

    async fn invoke(&self, aspect: &str, _observer: &Observer, kwargs: Value) -> Result<Rendering> {
        if aspect != "manifest" {
            return Err(unknown_aspect("world.document", aspect));
        }
        // The document arrives as the stage input (composition) or as `text`.
        let text = kwargs
            .get("input")
            .and_then(|v| v.as_str())
            .or_else(|| kwargs.get("text").and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string();
        let words = text.split_whitespace().count();
        let lines = text.lines().count();
        Ok(Rendering::basic(json!({
            "text": text,
            "words": words,
            "lines": lines,
        })))
    }
}
