//! agentese-grow: the autopoietic kernel.
//!
//! Spec files become live nodes (`specfile` → `synth`), implementations
//! reflect back into specs (`reflector`), and the drift auditor keeps the two
//! trees honest. The promoter tracks JIT usage and performs reversible,
//! hashed promotions; the lattice checker enforces lineage for every new
//! concept; the nursery runs the grow pipeline
//! (`recognize → propose → validate → germinate → promote ∨ prune`)
//! under a growth budget.

pub mod drift;
pub mod lattice;
pub mod nursery;
pub mod promoter;
pub mod reflector;
pub mod specfile;
pub mod synth;

use std::path::PathBuf;

use thiserror::Error;

/// Failures local to the grow kernel. Fabric-level failures (lineage,
/// lattice, affordance conflicts) use the core taxonomy instead.
#[derive(Debug, Error)]
pub enum GrowError {
    #[error("spec parse failed: {0}")]
    SpecParse(String),

    #[error("io failure at {0}: {1}")]
    Io(PathBuf, String),

    #[error("'{handle}' not eligible for promotion (usage {usage}, success rate {success_rate:.2})")]
    NotEligible {
        handle: String,
        usage: u64,
        success_rate: f64,
    },

    #[error("rollback token {0} has expired")]
    TokenExpired(String),

    #[error("rollback token {0} not found")]
    TokenMissing(String),

    #[error("growth budget exhausted at {0}")]
    BudgetExhausted(String),

    #[error("'{0}' declares no lineage; lineage is a hard requirement")]
    LineageRequired(String),

    #[error("'{0}' failed validation gates")]
    ValidationFailed(String),

    #[error("'{0}' is not germinating in the nursery")]
    NotGerminating(String),

    #[error("lattice rejected the concept: {0}")]
    Lattice(String),
}

pub use drift::{AuditEntry, AuditReport, DiscoveryReport, DriftStatus, full_audit};
pub use lattice::{
    ConceptProposal, ConsistencyResult, LatticeChecker, LineageRecord, ROOT_HANDLE,
};
pub use nursery::{
    FitnessReport, GateKind, GateReport, GerminatingHolon, GrowKernel, GrowthBudget, GrowthOp,
    Proposal, ProposalStage, ValidationReport,
};
pub use promoter::{
    JitPromoter, PromotionThresholds, RollbackToken, UsageStats, DEFAULT_TOKEN_TTL_SECS,
};
pub use reflector::reflect;
pub use specfile::{
    emit_spec, parse_spec, LineageSection, OperadSection, ParsedSpec, PolynomialSection,
    ServiceSection, SpecAspect,
};
pub use synth::{generate_source, synthesize, SynthNode};
