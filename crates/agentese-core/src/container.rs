//! Service container: lazy topological dependency injection.
//!
//! Providers are async factories registered by name. `resolve` walks the
//! dependency graph on first use, caches singletons, and reports cycles with
//! the full chain. Handlers never construct their own collaborators; the
//! container is the only owner of instance caches.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{AgentesError, Result};

/// Type-erased service handle.
pub type AnyService = Arc<dyn Any + Send + Sync>;

type ProviderFuture = Pin<Box<dyn Future<Output = Result<AnyService>> + Send>>;
type Provider = Arc<dyn Fn(ResolveCx) -> ProviderFuture + Send + Sync>;

struct ProviderEntry {
    provider: Provider,
    singleton: bool,
    lazy: bool,
}

/// Resolution context handed to providers so they can pull their own
/// dependencies while cycle detection sees the whole chain.
#[derive(Clone)]
pub struct ResolveCx {
    container: Arc<ServiceContainer>,
    chain: Vec<String>,
}

impl ResolveCx {
    pub async fn resolve(&self, name: &str) -> Result<AnyService> {
        self.container.resolve_inner(name, self.chain.clone()).await
    }

    /// Typed resolve: downcasts to the requested service type.
    pub async fn resolve_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let any = self.resolve(name).await?;
        any.downcast::<T>().map_err(|_| AgentesError::DependencyNotFound {
            name: format!("{name} (type mismatch)"),
            chain: self.chain.clone(),
        })
    }
}

/// The container. Shared via `Arc`; all methods take `&self`.
#[derive(Default)]
pub struct ServiceContainer {
    providers: DashMap<String, ProviderEntry>,
    cache: DashMap<String, AnyService>,
}

impl ServiceContainer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an async provider. `singleton` caches the first resolution;
    /// `lazy = false` marks the provider for [`prime`].
    pub fn register<F, Fut>(&self, name: &str, singleton: bool, lazy: bool, provider: F)
    where
        F: Fn(ResolveCx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AnyService>> + Send + 'static,
    {
        self.providers.insert(
            name.to_string(),
            ProviderEntry {
                provider: Arc::new(move |cx| Box::pin(provider(cx))),
                singleton,
                lazy,
            },
        );
    }

    /// Register a ready-made value as a singleton service.
    pub fn register_value<T: Send + Sync + 'static>(&self, name: &str, value: Arc<T>) {
        let any: AnyService = value;
        self.register(name, true, true, move |_cx| {
            let any = any.clone();
            async move { Ok(any) }
        });
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Resolve a service by name, instantiating transitively on first call.
    pub async fn resolve(self: &Arc<Self>, name: &str) -> Result<AnyService> {
        self.resolve_inner(name, Vec::new()).await
    }

    /// Typed resolve from the container root.
    pub async fn resolve_as<T: Send + Sync + 'static>(self: &Arc<Self>, name: &str) -> Result<Arc<T>> {
        ResolveCx { container: self.clone(), chain: Vec::new() }
            .resolve_as(name)
            .await
    }

    fn resolve_inner(
        self: &Arc<Self>,
        name: &str,
        chain: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<AnyService>> + Send>> {
        let container = self.clone();
        let name = name.to_string();
        Box::pin(async move {
            if chain.iter().any(|c| *c == name) {
                let mut cycle = chain.clone();
                cycle.push(name.clone());
                return Err(AgentesError::DependencyNotFound { name, chain: cycle });
            }
            if let Some(cached) = container.cache.get(&name) {
                return Ok(cached.clone());
            }
            let (provider, singleton) = {
                let entry = container.providers.get(&name).ok_or_else(|| {
                    AgentesError::DependencyNotFound { name: name.clone(), chain: chain.clone() }
                })?;
                (entry.provider.clone(), entry.singleton)
            };
            let mut next_chain = chain;
            next_chain.push(name.clone());
            let cx = ResolveCx { container: container.clone(), chain: next_chain };
            let service = provider(cx).await?;
            if singleton {
                container.cache.insert(name.clone(), service.clone());
            }
            debug!(target: "agentese::container", service = %name, "resolved");
            Ok(service)
        })
    }

    /// Resolve every non-lazy provider up front.
    pub async fn prime(self: &Arc<Self>) -> Result<()> {
        let eager: Vec<String> = self
            .providers
            .iter()
            .filter(|e| !e.value().lazy)
            .map(|e| e.key().clone())
            .collect();
        for name in eager {
            self.resolve(&name).await?;
        }
        Ok(())
    }

    /// Drop all cached singletons. Providers stay registered.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
