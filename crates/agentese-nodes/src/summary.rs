//! `concept.summary`: the refine composition stage.

use std::sync::Arc;

use agentese_core::{
    unknown_aspect, AspectCategory, AspectMeta, Node, Observer, Rendering, Result,
};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct SummaryNode;

impl SummaryNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Node for SummaryNode {
    fn handle(&self) -> &str {
        "concept.summary"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![AspectMeta::new("refine", AspectCategory::Composition).idempotent().cost(0.1)]
    }

    async fn invoke(&self, aspect: &str, _observer: &Observer, kwargs: Value) -> Result<Rendering> {
        if aspect != "refine" {
            return Err(unknown_aspect("concept.summary", aspect));
        }
        let input = kwargs.get("input").cloned().unwrap_or(Value::Null);
        // Distill to a single record: the essence plus a size estimate.
        let essence = match &input {
            Value::Object(map) => map
                .get("text")
                .and_then(|v| v.as_str())
                .map(first_sentence)
                .unwrap_or_else(|| format!("{} fields", map.len())),
            Value::String(text) => first_sentence(text),
            other => other.to_string(),
        };
        Ok(Rendering::basic(json!({
            "essence": essence,
            "source_bytes": input.to_string().len(),
        })))
    }
}

fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find(['.', '!', '?']) {
        Some(idx) => trimmed[..=idx].to_string(),
        None => trimmed.chars().take(120).collect(),
    }
}
