//! `time.now`: the temporal leaf.

use std::sync::Arc;

use agentese_core::{
    unknown_aspect, AspectCategory, AspectMeta, Node, Observer, Rendering, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

pub struct NowNode;

impl NowNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Node for NowNode {
    fn handle(&self) -> &str {
        "time.now"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![AspectMeta::new("manifest", AspectCategory::Perception).cost(0.01)]
    }

    async fn invoke(&self, aspect: &str, _observer: &Observer, _kwargs: Value) -> Result<Rendering> {
        if aspect != "manifest" {
            return Err(unknown_aspect("time.now", aspect));
        }
        let now = Utc::now();
        Ok(Rendering::Temporal {
            at: now.to_rfc3339(),
            body: json!({
                "unix": now.timestamp(),
                "iso": now.to_rfc3339(),
            }),
        })
    }
}
