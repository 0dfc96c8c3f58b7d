//! `self.memory`: engram storage behind an injected store.
//!
//! The node owns nothing; the [`MemoryStore`] arrives through the service
//! container so tests and the gateway decide its lifetime.

use std::sync::{Arc, RwLock};

use agentese_core::{
    render_memory, unknown_aspect, AspectCategory, AspectMeta, Effect, Node, Observer, Rendering,
    Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// One stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engram {
    pub id: Uuid,
    pub content: Value,
    pub observer: String,
    pub at: DateTime<Utc>,
}

/// In-process engram store, registered in the container as `memory_store`.
#[derive(Default)]
pub struct MemoryStore {
    engrams: RwLock<Vec<Engram>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn store(&self, content: Value, observer: &str) -> Engram {
        let engram = Engram {
            id: Uuid::new_v4(),
            content,
            observer: observer.to_string(),
            at: Utc::now(),
        };
        self.engrams.write().expect("memory store poisoned").push(engram.clone());
        engram
    }

    pub fn recall(&self, limit: usize) -> Vec<Engram> {
        let engrams = self.engrams.read().expect("memory store poisoned");
        engrams.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.engrams.read().expect("memory store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemoryNode {
    store: Arc<MemoryStore>,
}

impl MemoryNode {
    pub fn new(store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl Node for MemoryNode {
    fn handle(&self) -> &str {
        "self.memory"
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        vec![
            AspectMeta::new("engram", AspectCategory::Action)
                .cost(0.15)
                .effect(Effect::Writes, "memory"),
            AspectMeta::new("recall", AspectCategory::Perception)
                .idempotent()
                .cost(0.05)
                .effect(Effect::Reads, "memory"),
        ]
    }

    async fn invoke(&self, aspect: &str, observer: &Observer, kwargs: Value) -> Result<Rendering> {
        match aspect {
            "engram" => {
                let content = kwargs.get("input").cloned().unwrap_or(kwargs);
                let engram = self.store.store(content, observer.archetype());
                Ok(Rendering::basic(json!({
                    "engram_id": engram.id,
                    "stored": true,
                })))
            }
            "recall" => {
                let limit = kwargs.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
                let engrams = self.store.recall(limit);
                Ok(render_memory(serde_json::to_value(engrams).unwrap_or(Value::Null)))
            }
            other => Err(unknown_aspect("self.memory", other)),
        }
    }
}
