//! The node contract: a capability bearer addressed by its handle.
//!
//! Nodes own nothing persistently; injected state arrives through the service
//! container at construction. A node must be functionally pure with respect
//! to side effects it did not declare in its aspect metadata.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

use crate::affordance::AspectMeta;
use crate::error::{AgentesError, Result};
use crate::observer::Observer;
use crate::rendering::Rendering;

/// Stream of renderable chunks from a streaming aspect.
pub type RenderStream = Pin<Box<dyn Stream<Item = Result<Rendering>> + Send>>;

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("handle", &self.handle()).finish()
    }
}

/// A capability bearer. `handle()` is the canonical `context.holon` path.
#[async_trait]
pub trait Node: Send + Sync {
    fn handle(&self) -> &str;

    /// Declared aspects, in affordance order.
    fn aspects(&self) -> Vec<AspectMeta>;

    /// Dispatch one aspect. The resolver has already gated affordances and
    /// charged the budget lease by the time this runs.
    async fn invoke(&self, aspect: &str, observer: &Observer, kwargs: Value) -> Result<Rendering>;

    /// Streaming dispatch. The default yields the one-shot result as a single
    /// chunk; nodes with `streaming` aspects override.
    async fn invoke_stream(
        &self,
        aspect: &str,
        observer: &Observer,
        kwargs: Value,
    ) -> Result<RenderStream> {
        let rendering = self.invoke(aspect, observer, kwargs).await;
        Ok(Box::pin(futures_util::stream::once(async move { rendering })))
    }

    fn aspect_meta(&self, name: &str) -> Option<AspectMeta> {
        self.aspects().into_iter().find(|a| a.name == name)
    }
}

/// Error helper for handlers refusing an aspect they do not implement.
/// Reaching this means dispatch and metadata disagree.
pub fn unknown_aspect(handle: &str, aspect: &str) -> AgentesError {
    AgentesError::Handler {
        path: handle.to_string(),
        aspect: aspect.to_string(),
        inner: "aspect not implemented by handler".into(),
    }
}
