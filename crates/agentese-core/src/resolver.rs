//! Logos: the resolver.
//!
//! Turns a path string into a gated, metered, observed invocation:
//! alias expansion → parse → registry lookup (with fallbacks) → affordance
//! filter → telemetry span → budget lease → dispatch → settle → curator →
//! INVOKED event. Compositions pipe N such steps with category-law checks
//! between them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, warn, Instrument};

use crate::affordance::{affordances, AspectMeta};
use crate::alias::AliasRegistry;
use crate::budget::impact::{CurrencyLedger, CurrencyTransaction};
use crate::budget::metabolism::MetabolicEngine;
use crate::budget::{BudgetStore, Lease};
use crate::composition::{
    is_minimal_output, structural_equality, verify_laws, AspectAgent, EqualityFn, LawStatus,
    Morphism,
};
use crate::config::FabricConfig;
use crate::container::ServiceContainer;
use crate::error::{AgentesError, Result};
use crate::node::{Node, RenderStream};
use crate::observer::{shared_standard_archetypes, Observer, SharedArchetypes};
use crate::path::{parse_with, ParsedPath, ParserConfig};
use crate::registry::{NodeRegistry, GLOBAL_REGISTRY};
use crate::rendering::Rendering;
use crate::subscription::{EventKind, SubscriptionManager};
use crate::suggest::suggest;
use crate::telemetry::Telemetry;

/// Default verb when a path names a node without an aspect.
pub const DEFAULT_ASPECT: &str = "manifest";

// ---------------------------------------------------------------------------
// Middleware traits
// ---------------------------------------------------------------------------

/// Wundt taste filter. May substitute the result or reject it outright;
/// rejection surfaces as `TastefulnessError` unless the path was annotated
/// `@soft=true`, in which case the original value passes through with a
/// warning event.
pub trait Curator: Send + Sync {
    fn curate(
        &self,
        rendering: Rendering,
        observer: &Observer,
    ) -> std::result::Result<Rendering, String>;
}

/// Per-context fallback used when neither registry knows a path.
#[async_trait]
pub trait ContextResolver: Send + Sync {
    async fn resolve(&self, path: &ParsedPath) -> Option<Arc<dyn Node>>;
}

// ---------------------------------------------------------------------------
// Lease guard: cancellation refunds the authorization
// ---------------------------------------------------------------------------

struct LeaseGuard {
    store: Arc<BudgetStore>,
    lease: Option<Lease>,
}

impl LeaseGuard {
    fn new(store: Arc<BudgetStore>, lease: Lease) -> Self {
        Self { store, lease: Some(lease) }
    }

    fn settle(mut self, actual: f64) -> crate::budget::Settlement {
        let lease = self.lease.take().expect("lease settled twice");
        self.store.settle(&lease, actual)
    }

    fn void(mut self) {
        if let Some(lease) = self.lease.take() {
            self.store.void(&lease);
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        // Dropped without settle: the task was cancelled or panicked.
        if let Some(lease) = self.lease.take() {
            self.store.void(&lease);
        }
    }
}

// ---------------------------------------------------------------------------
// Logos
// ---------------------------------------------------------------------------

pub struct Logos {
    registry: Arc<NodeRegistry>,
    container: Arc<ServiceContainer>,
    aliases: Arc<AliasRegistry>,
    archetypes: SharedArchetypes,
    budget: Arc<BudgetStore>,
    ledger: Arc<CurrencyLedger>,
    metabolism: Arc<MetabolicEngine>,
    subscriptions: Arc<SubscriptionManager>,
    telemetry: Arc<Telemetry>,
    curator: RwLock<Option<Arc<dyn Curator>>>,
    context_resolvers: DashMap<String, Arc<dyn ContextResolver>>,
    /// Fallback registry for plain pre-built instances.
    simple: DashMap<String, Arc<dyn Node>>,
    /// Per-node locks for aspects declared `serial`.
    serial_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    parser_config: ParserConfig,
    config: FabricConfig,
}

impl Logos {
    /// Resolver over the process-wide registry with a fresh container.
    pub fn new(config: FabricConfig) -> Arc<Self> {
        Self::with_registry(config, GLOBAL_REGISTRY.clone())
    }

    pub fn with_registry(config: FabricConfig, registry: Arc<NodeRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            container: ServiceContainer::new(),
            aliases: Arc::new(AliasRegistry::new()),
            archetypes: shared_standard_archetypes(),
            budget: Arc::new(BudgetStore::new(config.budget_initial, config.budget_refill_rate)),
            ledger: Arc::new(CurrencyLedger::new()),
            metabolism: Arc::new(MetabolicEngine::new(100_000.0, 50.0)),
            subscriptions: SubscriptionManager::new(),
            telemetry: Arc::new(Telemetry::new(config.telemetry, config.metrics)),
            curator: RwLock::new(None),
            context_resolvers: DashMap::new(),
            simple: DashMap::new(),
            serial_locks: DashMap::new(),
            parser_config: ParserConfig::default(),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn container(&self) -> &Arc<ServiceContainer> {
        &self.container
    }

    pub fn budget(&self) -> &Arc<BudgetStore> {
        &self.budget
    }

    pub fn ledger(&self) -> &Arc<CurrencyLedger> {
        &self.ledger
    }

    pub fn metabolism(&self) -> &Arc<MetabolicEngine> {
        &self.metabolism
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn archetypes(&self) -> &SharedArchetypes {
        &self.archetypes
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn install_curator(&self, curator: Arc<dyn Curator>) {
        *self.curator.write().expect("curator slot poisoned") = Some(curator);
    }

    pub fn install_context_resolver(&self, context: &str, resolver: Arc<dyn ContextResolver>) {
        self.context_resolvers.insert(context.to_string(), resolver);
    }

    /// Register a pre-built instance in the fallback simple registry.
    pub fn register_simple(&self, path: &str, node: Arc<dyn Node>) {
        self.simple.insert(path.to_string(), node);
    }

    /// Hot-mount a live node (the JIT path). Goes through the real registry
    /// so discovery and contracts see it.
    pub fn mount(&self, path: &str, node: Arc<dyn Node>) -> Result<()> {
        let metadata = crate::registry::NodeMetadata::new(path);
        let mounted = node.clone();
        self.registry.register(metadata, move |_deps| Ok(mounted.clone()))
    }

    pub fn unmount(&self, path: &str) -> bool {
        self.simple.remove(path);
        self.registry.unmount(path)
    }

    // --- alias surface ------------------------------------------------------

    pub fn alias(&self, name: &str, target: &str) -> Result<()> {
        self.aliases.register(name, target)
    }

    pub fn unalias(&self, name: &str) -> Result<()> {
        self.aliases.unregister(name)
    }

    pub fn get_aliases(&self) -> std::collections::BTreeMap<String, String> {
        self.aliases.aliases()
    }

    pub fn aliases_registry(&self) -> &Arc<AliasRegistry> {
        &self.aliases
    }

    // --- lookup -------------------------------------------------------------

    /// Parse an input string through alias expansion.
    pub fn parse_path(&self, input: &str) -> Result<ParsedPath> {
        let expanded = self.aliases.expand(input);
        parse_with(&expanded, self.parser_config)
    }

    async fn locate(&self, parsed: &ParsedPath) -> Result<(Arc<dyn Node>, ParsedPath)> {
        let full = parsed.holon_path();
        if self.registry.has(&full) {
            let node = self.registry.resolve(&full, &self.container).await?;
            return Ok((node, parsed.clone()));
        }
        if let Some(node) = self.simple.get(&full) {
            return Ok((node.clone(), parsed.clone()));
        }
        if let Some(shifted) = parsed.shift_last_segment_to_aspect() {
            let holon = shifted.holon_path();
            if self.registry.has(&holon) {
                let node = self.registry.resolve(&holon, &self.container).await?;
                return Ok((node, shifted));
            }
            if let Some(node) = self.simple.get(&holon) {
                return Ok((node.clone(), shifted));
            }
        }
        if let Some(resolver) = self.context_resolvers.get(parsed.context().as_str()) {
            if let Some(node) = resolver.resolve(parsed).await {
                return Ok((node, parsed.clone()));
            }
        }
        let mut handles = self.registry.handles();
        handles.extend(self.simple.iter().map(|e| e.key().clone()));
        Err(AgentesError::PathNotFound {
            path: full.clone(),
            suggestions: suggest(&full, &handles, 3),
        })
    }

    // --- invocation ---------------------------------------------------------

    /// Invoke a path for an observer. `None` defaults to `Observer::guest()`.
    pub async fn invoke(
        &self,
        path: &str,
        observer: Option<&Observer>,
        kwargs: Value,
    ) -> Result<Rendering> {
        let guest = Observer::guest();
        let observer = observer.unwrap_or(&guest);

        let parsed = self.parse_path(path)?;
        let (node, resolved) = self.locate(&parsed).await?;
        let aspect_name = resolved.aspect().unwrap_or(DEFAULT_ASPECT).to_string();
        let handle = node.handle().to_string();

        // Affordance gate before anything is charged.
        let aspect_list = node.aspects();
        let meta = self.gate_affordance(&node, &aspect_list, &aspect_name, observer).await?;

        let span = self
            .telemetry
            .begin_invoke(&handle, &aspect_name, observer.archetype());

        let account = observer.id().unwrap_or(observer.archetype()).to_string();
        let estimate = meta.budget_estimate.unwrap_or(0.0);
        let lease = match self.budget.authorize(&account, estimate) {
            Ok(lease) => lease,
            Err(err) => {
                span.record_error(&err);
                self.telemetry.increment("invocations.rejected");
                self.publish_error(&handle, &aspect_name, &err).await;
                return Err(err);
            }
        };
        let guard = LeaseGuard::new(self.budget.clone(), lease);

        let tokens_in = estimate_tokens(&kwargs);
        let outcome = self
            .dispatch(&node, &meta, &handle, &aspect_name, observer, kwargs)
            .instrument(span.span().clone())
            .await;

        let rendering = match outcome {
            Ok(rendering) => rendering,
            Err(err) => {
                guard.void();
                span.record_error(&err);
                self.telemetry.increment("invocations.failed");
                self.publish_error(&handle, &aspect_name, &err).await;
                return Err(err);
            }
        };

        // Settle the actual cost (never above the lease), record currency.
        let tokens_out = estimate_tokens(&rendering.to_dict());
        let settlement = guard.settle(estimate);
        self.ledger.record(CurrencyTransaction {
            agent: account.clone(),
            gas: (tokens_in + tokens_out) as f64,
            impact: 0.0,
        });
        self.telemetry.increment("invocations.ok");

        if let Some(fever) = self.metabolism.ingest(tokens_in, tokens_out, &handle) {
            let payload = serde_json::to_value(&fever).unwrap_or(Value::Null);
            let _ = self
                .subscriptions
                .publish(EventKind::Changed, "self.metabolism", Some("fever"), payload)
                .await;
        }

        // Curator (taste filter) sits between dispatch and the event fan-out.
        let rendering = self.curate(rendering, observer, &resolved, &handle, &aspect_name).await?;

        if let Err(publish_err) = self
            .subscriptions
            .publish(
                EventKind::Invoked,
                &handle,
                Some(&aspect_name),
                json!({
                    "archetype": observer.archetype(),
                    "charged": settlement.charged,
                }),
            )
            .await
        {
            warn!(
                target: "agentese::resolver",
                handle, error = %publish_err,
                "INVOKED fan-out hit subscriber backpressure"
            );
        }

        span.finish(true, tokens_in, tokens_out, None);
        Ok(rendering)
    }

    async fn gate_affordance(
        &self,
        node: &Arc<dyn Node>,
        aspect_list: &[AspectMeta],
        aspect_name: &str,
        observer: &Observer,
    ) -> Result<AspectMeta> {
        let afforded = {
            let archetypes = self.archetypes.read().expect("archetype registry poisoned");
            affordances(aspect_list, observer, &archetypes)
        };
        if !afforded.iter().any(|a| a == aspect_name) {
            let err = AgentesError::Affordance {
                path: node.handle().to_string(),
                aspect: aspect_name.to_string(),
                archetype: observer.archetype().to_string(),
            };
            self.telemetry.increment("invocations.refused");
            let _ = self
                .subscriptions
                .publish(
                    EventKind::Refused,
                    node.handle(),
                    Some(aspect_name),
                    json!({ "archetype": observer.archetype() }),
                )
                .await;
            return Err(err);
        }
        aspect_list
            .iter()
            .find(|m| m.name == aspect_name)
            .cloned()
            .ok_or_else(|| AgentesError::Affordance {
                path: node.handle().to_string(),
                aspect: aspect_name.to_string(),
                archetype: observer.archetype().to_string(),
            })
    }

    async fn dispatch(
        &self,
        node: &Arc<dyn Node>,
        meta: &AspectMeta,
        handle: &str,
        aspect: &str,
        observer: &Observer,
        kwargs: Value,
    ) -> Result<Rendering> {
        let _serial_permit = if meta.serial {
            let lock = self
                .serial_locks
                .entry(handle.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone();
            Some(lock.lock_owned().await)
        } else {
            None
        };

        let invocation = node.invoke(aspect, observer, kwargs);
        match meta.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, invocation).await {
                Ok(result) => result,
                Err(_) => Err(AgentesError::AspectTimeout {
                    path: handle.to_string(),
                    aspect: aspect.to_string(),
                    timeout_s: timeout.as_secs_f64(),
                }),
            },
            None => invocation.await,
        }
    }

    async fn curate(
        &self,
        rendering: Rendering,
        observer: &Observer,
        resolved: &ParsedPath,
        handle: &str,
        aspect: &str,
    ) -> Result<Rendering> {
        let curator = self.curator.read().expect("curator slot poisoned").clone();
        let Some(curator) = curator else {
            return Ok(rendering);
        };
        match curator.curate(rendering.clone(), observer) {
            Ok(curated) => Ok(curated),
            Err(reason) if resolved.annotation_on("soft") => {
                warn!(
                    target: "agentese::resolver",
                    handle, aspect, reason,
                    "curator rejection softened; passing original through"
                );
                let _ = self
                    .subscriptions
                    .publish(
                        EventKind::Refused,
                        handle,
                        Some(aspect),
                        json!({ "stage": "curator", "soft": true, "reason": reason }),
                    )
                    .await;
                Ok(rendering)
            }
            Err(reason) => {
                let err = AgentesError::Tastefulness { stage: "curator".into(), reason };
                self.publish_error(handle, aspect, &err).await;
                Err(err)
            }
        }
    }

    async fn publish_error(&self, handle: &str, aspect: &str, err: &AgentesError) {
        let _ = self
            .subscriptions
            .publish(
                EventKind::Error,
                handle,
                Some(aspect),
                serde_json::to_value(err.report()).unwrap_or(Value::Null),
            )
            .await;
    }

    // --- streaming ----------------------------------------------------------

    /// Streaming invocation. Aspects marked `streaming` yield incrementally;
    /// others yield their one-shot result as a single chunk. The lease covers
    /// the whole stream and is settled up front; idle-gap timeouts apply
    /// between chunks.
    pub async fn invoke_stream(
        &self,
        path: &str,
        observer: Option<&Observer>,
        kwargs: Value,
    ) -> Result<RenderStream> {
        let guest = Observer::guest();
        let observer = observer.unwrap_or(&guest).clone();

        let parsed = self.parse_path(path)?;
        let (node, resolved) = self.locate(&parsed).await?;
        let aspect_name = resolved.aspect().unwrap_or(DEFAULT_ASPECT).to_string();
        let handle = node.handle().to_string();

        let aspect_list = node.aspects();
        let meta = self.gate_affordance(&node, &aspect_list, &aspect_name, &observer).await?;

        let account = observer.id().unwrap_or(observer.archetype()).to_string();
        let estimate = meta.budget_estimate.unwrap_or(0.0);
        let lease = self.budget.authorize(&account, estimate)?;
        let guard = LeaseGuard::new(self.budget.clone(), lease);

        let inner = match node.invoke_stream(&aspect_name, &observer, kwargs).await {
            Ok(stream) => stream,
            Err(err) => {
                guard.void();
                self.publish_error(&handle, &aspect_name, &err).await;
                return Err(err);
            }
        };
        guard.settle(estimate);

        let _ = self
            .subscriptions
            .publish(
                EventKind::Invoked,
                &handle,
                Some(&aspect_name),
                json!({ "archetype": observer.archetype(), "streaming": true }),
            )
            .await;

        let idle_timeout = meta.timeout;
        let stream: RenderStream = match idle_timeout {
            Some(gap) => {
                let handle = handle.clone();
                let aspect = aspect_name.clone();
                Box::pin(async_stream::stream! {
                    let mut inner = inner;
                    loop {
                        match tokio::time::timeout(gap, futures_util::StreamExt::next(&mut inner)).await {
                            Ok(Some(item)) => yield item,
                            Ok(None) => break,
                            Err(_) => {
                                // Idle gap exceeded: error chunk, then end.
                                yield Err(AgentesError::AspectTimeout {
                                    path: handle.clone(),
                                    aspect: aspect.clone(),
                                    timeout_s: gap.as_secs_f64(),
                                });
                                break;
                            }
                        }
                    }
                })
            }
            None => inner,
        };
        Ok(stream)
    }

    // --- composition --------------------------------------------------------

    /// The identity morphism: `Id >> p == p == p >> Id` by construction.
    pub fn identity(&self) -> ComposedPath {
        ComposedPath {
            morphism: Morphism::Id,
            enforce_output: self.config.enforce_output,
            emit_law_check: false,
            equality: structural_equality(),
            verified: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Compose paths left to right.
    pub fn compose<I, S>(&self, paths: I, enforce_output: Option<bool>, emit_law_check: bool) -> ComposedPath
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let morphism = paths
            .into_iter()
            .fold(Morphism::Id, |acc, p| acc.then(Morphism::lift(p.into())));
        ComposedPath {
            morphism,
            enforce_output: enforce_output.unwrap_or(self.config.enforce_output),
            emit_law_check,
            equality: structural_equality(),
            verified: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A composable lens on one aspect.
    pub fn lens(&self, path: &str, aspect: &str) -> AspectAgent {
        AspectAgent::new(path, aspect)
    }

    /// True when a stage's aspect is declared idempotent. Law verification
    /// replays stages, so only the idempotent prefix of a pipeline is
    /// eligible for checking; an action stage ends the verifiable region.
    pub(crate) async fn stage_is_idempotent(&self, stage: &str) -> bool {
        let Ok(parsed) = self.parse_path(stage) else {
            return false;
        };
        let Ok((node, resolved)) = self.locate(&parsed).await else {
            return false;
        };
        let aspect = resolved.aspect().unwrap_or(DEFAULT_ASPECT);
        node.aspect_meta(aspect).map(|m| m.idempotent).unwrap_or(false)
    }

    pub(crate) async fn run_stage_list(
        &self,
        stages: &[String],
        observer: &Observer,
        mut value: Value,
        enforce_output: bool,
    ) -> Result<Value> {
        for (index, stage) in stages.iter().enumerate() {
            let rendering = self
                .invoke(stage, Some(observer), json!({ "input": value }))
                .await?;
            value = rendering.body();
            if enforce_output && !is_minimal_output(&value) {
                return Err(AgentesError::CompositionViolation {
                    stage: index + 1,
                    reason: "non_minimal_output".into(),
                });
            }
        }
        Ok(value)
    }

    // --- query --------------------------------------------------------------

    /// Pattern query over the handle space.
    pub async fn query(
        &self,
        pattern: &str,
        options: QueryOptions,
        observer: Option<&Observer>,
    ) -> Result<QueryResult> {
        let guest = Observer::guest();
        let observer = observer.unwrap_or(&guest);
        let compiled = crate::subscription::Pattern::compile(pattern)?;
        let mut handles = self.registry.handles();
        handles.extend(self.simple.iter().map(|e| e.key().clone()));
        handles.sort();
        handles.dedup();

        let mut matched = Vec::new();
        for handle in handles {
            if !compiled.matches(&handle, None) && !compiled.matches(&handle, Some(DEFAULT_ASPECT)) {
                continue;
            }
            if options.capability_check {
                let Ok(parsed) = self.parse_path(&handle) else { continue };
                let Ok((node, _)) = self.locate(&parsed).await else { continue };
                let visible = {
                    let archetypes = self.archetypes.read().expect("archetype registry poisoned");
                    affordances(&node.aspects(), observer, &archetypes)
                };
                if visible.is_empty() {
                    continue;
                }
            }
            matched.push(handle);
        }

        let total = matched.len();
        let paths = if options.dry_run {
            Vec::new()
        } else {
            matched
                .into_iter()
                .skip(options.offset)
                .take(options.limit)
                .collect()
        };
        Ok(QueryResult { total, paths, dry_run: options.dry_run })
    }
}

fn estimate_tokens(value: &Value) -> u64 {
    (value.to_string().len() as u64) / 4
}

// ---------------------------------------------------------------------------
// ComposedPath
// ---------------------------------------------------------------------------

/// Query options for [`Logos::query`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub limit: usize,
    pub offset: usize,
    pub tenant: Option<String>,
    pub capability_check: bool,
    pub dry_run: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { limit: 50, offset: 0, tenant: None, capability_check: false, dry_run: false }
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub total: usize,
    pub paths: Vec<String>,
    pub dry_run: bool,
}

/// An ordered pipeline of aspects with law verification.
#[derive(Clone)]
pub struct ComposedPath {
    morphism: Morphism,
    enforce_output: bool,
    emit_law_check: bool,
    equality: EqualityFn,
    /// Laws verify on first execution unless `emit_law_check` re-runs them.
    verified: Arc<AtomicBool>,
}

impl ComposedPath {
    pub fn stages(&self) -> Vec<String> {
        self.morphism.stages()
    }

    pub fn then(mut self, path: impl Into<String>) -> Self {
        self.morphism = self.morphism.then(Morphism::lift(path.into()));
        self.verified.store(false, Ordering::SeqCst);
        self
    }

    pub fn with_equality(mut self, equality: EqualityFn) -> Self {
        self.equality = equality;
        self
    }

    /// Pipe `initial` through every stage in order.
    pub async fn invoke(&self, logos: &Logos, observer: &Observer, initial: Value) -> Result<Value> {
        let stages = self.stages();
        if stages.is_empty() {
            return Ok(initial);
        }

        let run_checks = self.emit_law_check || !self.verified.load(Ordering::SeqCst);
        if run_checks {
            // Replaying an effectful stage would double its side effects, so
            // only the idempotent prefix is verified.
            let mut verifiable = Vec::new();
            for stage in &stages {
                if logos.stage_is_idempotent(stage).await {
                    verifiable.push(stage.clone());
                } else {
                    break;
                }
            }
            let runner = |sub: Vec<String>, input: Value| async move {
                logos.run_stage_list(&sub, observer, input, false).await
            };
            let reports = verify_laws(&verifiable, initial.clone(), runner, &self.equality).await;
            match reports {
                Ok(reports) => {
                    for report in &reports {
                        logos.telemetry().law_check(report.law, report.status);
                    }
                    self.verified.store(true, Ordering::SeqCst);
                    debug!(
                        target: "agentese::composition",
                        stages = stages.len(),
                        "law checks passed"
                    );
                }
                Err(err) => {
                    if let AgentesError::LawCheckFailed { law, .. } = &err {
                        logos.telemetry().law_check(*law, LawStatus::Fail);
                    }
                    return Err(err);
                }
            }
        }

        logos
            .run_stage_list(&stages, observer, initial, self.enforce_output)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affordance::{AspectCategory, AspectMeta};
    use crate::registry::NodeMetadata;
    use std::time::Duration;

    struct Bloom;

    #[async_trait]
    impl Node for Bloom {
        fn handle(&self) -> &str {
            "world.bloom"
        }

        fn aspects(&self) -> Vec<AspectMeta> {
            vec![
                AspectMeta::new("manifest", AspectCategory::Perception).idempotent().cost(0.1),
                AspectMeta::new("tend", AspectCategory::Action).requires("architect").cost(0.6),
                AspectMeta::new("stall", AspectCategory::Action)
                    .cost(0.1)
                    .timeout(Duration::from_millis(30)),
            ]
        }

        async fn invoke(&self, aspect: &str, _observer: &Observer, kwargs: Value) -> Result<Rendering> {
            match aspect {
                "manifest" => Ok(Rendering::basic(json!({ "petals": 5, "echo": kwargs["input"] }))),
                "tend" => Ok(Rendering::basic(json!({ "tended": true }))),
                "stall" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Rendering::basic(json!({ "late": true })))
                }
                other => Err(crate::node::unknown_aspect("world.bloom", other)),
            }
        }
    }

    fn fresh_logos() -> Arc<Logos> {
        let registry = Arc::new(NodeRegistry::new());
        registry
            .register(NodeMetadata::new("world.bloom"), |_deps| Ok(Arc::new(Bloom) as Arc<dyn Node>))
            .unwrap();
        Logos::with_registry(FabricConfig::default(), registry)
    }

    #[tokio::test]
    async fn invoke_happy_path_with_shifted_aspect() {
        let logos = fresh_logos();
        let out = logos
            .invoke("world.bloom.manifest", None, json!({}))
            .await
            .unwrap();
        assert_eq!(out.body()["petals"], 5);
    }

    #[tokio::test]
    async fn affordance_denied_for_guest() {
        let logos = fresh_logos();
        let err = logos.invoke("world.bloom:tend", None, json!({})).await.unwrap_err();
        match err {
            AgentesError::Affordance { aspect, archetype, .. } => {
                assert_eq!(aspect, "tend");
                assert_eq!(archetype, "guest");
            }
            other => panic!("expected affordance error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn architect_may_tend() {
        let logos = fresh_logos();
        let architect = Observer::new("architect", []);
        let out = logos
            .invoke("world.bloom:tend", Some(&architect), json!({}))
            .await
            .unwrap();
        assert_eq!(out.body()["tended"], true);
    }

    #[tokio::test]
    async fn unknown_path_suggests_neighbors() {
        let logos = fresh_logos();
        let err = logos.invoke("world.blom", None, json!({})).await.unwrap_err();
        match err {
            AgentesError::PathNotFound { suggestions, .. } => {
                assert_eq!(suggestions.first().map(String::as_str), Some("world.bloom"));
            }
            other => panic!("expected not-found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn budget_depletes_and_rejects() {
        let config = FabricConfig { budget_initial: 0.7, budget_refill_rate: 0.0, ..Default::default() };
        let registry = Arc::new(NodeRegistry::new());
        registry
            .register(NodeMetadata::new("world.bloom"), |_deps| Ok(Arc::new(Bloom) as Arc<dyn Node>))
            .unwrap();
        let logos = Logos::with_registry(config, registry);
        let architect = Observer::new("architect", []);
        // 0.6 each; first passes, second rejects.
        logos.invoke("world.bloom:tend", Some(&architect), json!({})).await.unwrap();
        let err = logos.invoke("world.bloom:tend", Some(&architect), json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "budget_exhausted");
    }

    #[tokio::test]
    async fn timeout_voids_lease() {
        let logos = fresh_logos();
        let observer = Observer::new("guest", ["stall".to_string()]);
        let before = logos.budget().entropy_available("guest");
        let err = logos
            .invoke("world.bloom:stall", Some(&observer), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "aspect_timeout");
        let after = logos.budget().entropy_available("guest");
        assert!((before - after).abs() < 1e-6, "timeout must refund the lease");
    }

    #[tokio::test]
    async fn invoked_event_reaches_subscribers() {
        let logos = fresh_logos();
        let sub = logos
            .subscriptions()
            .subscribe("world.**:manifest", Default::default())
            .unwrap();
        logos.invoke("world.bloom.manifest", None, json!({})).await.unwrap();
        let delivered = sub.next().await.unwrap();
        assert_eq!(delivered.event.kind, EventKind::Invoked);
        assert_eq!(delivered.event.path, "world.bloom");
    }

    #[tokio::test]
    async fn composition_pipes_and_identity_holds() {
        let logos = fresh_logos();
        let observer = Observer::guest();
        let pipeline = logos.compose(["world.bloom.manifest"], Some(false), false);
        let direct = logos
            .invoke("world.bloom.manifest", Some(&observer), json!({ "input": {"seed": 1} }))
            .await
            .unwrap()
            .body();
        let composed = pipeline
            .invoke(&logos, &observer, json!({"seed": 1}))
            .await
            .unwrap();
        assert_eq!(direct, composed);

        // Identity passthrough.
        let id = logos.identity();
        let through = id.invoke(&logos, &observer, json!({"x": 9})).await.unwrap();
        assert_eq!(through, json!({"x": 9}));
    }

    struct Scatter;

    #[async_trait]
    impl Node for Scatter {
        fn handle(&self) -> &str {
            "concept.scatter"
        }

        fn aspects(&self) -> Vec<AspectMeta> {
            vec![AspectMeta::new("manifest", AspectCategory::Perception).idempotent()]
        }

        async fn invoke(&self, _aspect: &str, _observer: &Observer, _kwargs: Value) -> Result<Rendering> {
            // Heterogeneous array: violates the Minimal Output Principle.
            Ok(Rendering::basic(json!([1, "two", {"three": 3}])))
        }
    }

    #[tokio::test]
    async fn enforce_output_rejects_heterogeneous_stage() {
        let logos = fresh_logos();
        logos.register_simple("concept.scatter", Arc::new(Scatter));
        let observer = Observer::guest();
        let pipeline = logos.compose(
            ["world.bloom.manifest", "concept.scatter.manifest"],
            Some(true),
            false,
        );
        let err = pipeline.invoke(&logos, &observer, json!({})).await.unwrap_err();
        match err {
            AgentesError::CompositionViolation { stage, reason } => {
                assert_eq!(stage, 2);
                assert_eq!(reason, "non_minimal_output");
            }
            other => panic!("expected composition violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_filters_by_pattern_and_capability() {
        let logos = fresh_logos();
        let result = logos
            .query("world.**", QueryOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.paths, vec!["world.bloom".to_string()]);

        let dry = logos
            .query("world.**", QueryOptions { dry_run: true, ..Default::default() }, None)
            .await
            .unwrap();
        assert_eq!(dry.total, 1);
        assert!(dry.paths.is_empty());
    }

    struct SourCurator;

    impl Curator for SourCurator {
        fn curate(
            &self,
            _rendering: Rendering,
            _observer: &Observer,
        ) -> std::result::Result<Rendering, String> {
            Err("insufficiently tasteful".into())
        }
    }

    #[tokio::test]
    async fn curator_rejection_and_soft_annotation() {
        let logos = fresh_logos();
        logos.install_curator(Arc::new(SourCurator));
        let err = logos.invoke("world.bloom.manifest", None, json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "tastefulness");

        // Soft annotation: original value passes through with a warning.
        let out = logos
            .invoke("world.bloom.manifest@soft=true", None, json!({}))
            .await
            .unwrap();
        assert_eq!(out.body()["petals"], 5);
    }

    #[tokio::test]
    async fn alias_expansion_feeds_invoke() {
        let logos = fresh_logos();
        logos.alias("flower", "world.bloom").unwrap();
        let out = logos.invoke("flower.manifest", None, json!({})).await.unwrap();
        assert_eq!(out.body()["petals"], 5);
    }
}
