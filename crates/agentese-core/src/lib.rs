//! agentese-core: the AGENTESE addressing and invocation fabric.
//!
//! Every capability is a verb-first path (`world.garden.manifest`,
//! `self.memory:engram`) resolved to a node, filtered by the observer's
//! archetype and capabilities, metered against entropy and economic budgets,
//! and fanned out to pattern subscriptions. Compositions pipe aspects with
//! category-law verification. Leaf domain nodes live in `agentese-nodes`;
//! the autopoietic kernel lives in `agentese-grow`.

mod affordance;
mod alias;
mod budget;
mod composition;
mod config;
mod container;
mod error;
mod node;
mod observer;
mod path;
mod registry;
mod rendering;
mod replay;
mod resolver;
mod subscription;
mod suggest;
mod telemetry;

// Path grammar + signifiers
pub use path::{
    parse, parse_signifiers, parse_with, strip_signifiers, Context, Inducer, ParsedPath,
    ParsedSignifier, ParserConfig, KNOWN_ANNOTATIONS, KNOWN_CLAUSES,
};

// Aliases
pub use alias::AliasRegistry;

// Errors
pub use error::{AgentesError, CostReport, ErrorReport, Law, Locus, Result};

// Observer + archetypes
pub use observer::{
    shared_standard_archetypes, ArchetypeEntry, ArchetypeRegistry, Observer, SharedArchetypes,
};

// Affordances + nodes
pub use affordance::{affordances, AspectCategory, AspectMeta, Effect};
pub use node::{unknown_aspect, Node, RenderStream};

// Renderings
pub use rendering::{render_for, render_memory, Rendering};

// Registry + container
pub use container::{AnyService, ResolveCx, ServiceContainer};
pub use registry::{
    AspectContract, DependencySpec, FieldDescriptor, NodeMetadata, NodeRegistry, RegistrationFn,
    ResolvedDeps, SchemaDescriptor, GLOBAL_REGISTRY,
};

// Composition algebra
pub use composition::{
    is_minimal_output, structural_equality, verify_laws, AspectAgent, ComposedAspectAgent,
    EqualityFn, LawReport, LawStatus, Morphism,
};

// Budgets, currency, metabolism
pub use budget::impact::{
    complexity_score, gas_cost, realized_impact, yield_band, ArtifactValidator, CurrencyLedger,
    CurrencyTransaction, ImpactModifier, ImpactTier, Observation, YieldBand,
};
pub use budget::metabolism::{FeverEvent, MetabolicEngine, MetabolicState};
pub use budget::{
    vickrey_auction, Account, AuctionOutcome, BudgetStore, EntropyBudget, Lease, Settlement,
    SinkingFund, SINKING_FUND_TAX,
};

// Subscriptions
pub use replay::JsonlEventJournal;
pub use subscription::{
    Delivered, Delivery, Event, EventJournal, EventKind, OrderingMode, Pattern, ReplayLog,
    SubscribeOptions, Subscription, SubscriptionManager, DEFAULT_BACKPRESSURE_EXPIRY,
};

// Telemetry
pub use telemetry::{InvokeSpan, Telemetry};

// Resolver
pub use resolver::{
    ComposedPath, ContextResolver, Curator, Logos, QueryOptions, QueryResult, DEFAULT_ASPECT,
};

// Configuration
pub use config::FabricConfig;

// Fuzzy suggestions (shared with grow's drift reports)
pub use suggest::suggest;
