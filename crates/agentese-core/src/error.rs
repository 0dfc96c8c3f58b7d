//! AGENTESE error taxonomy.
//!
//! One closed enum for every failure the fabric can surface, grouped the way
//! callers triage them: address errors (parse, not-found, alias conflict),
//! access errors (affordance, observer), economic errors (budget, minimal
//! output), law errors (category law, lineage, lattice), handler errors, and
//! infrastructure errors (overflow, timeout). Projections for CLI and HTTP
//! callers live on [`ErrorReport`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Byte/column pair locating a syntax failure inside the offending string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locus {
    pub byte: usize,
    pub column: usize,
}

impl Locus {
    pub fn at(byte: usize) -> Self {
        // Paths are single-line; column is 1-based over the same offset.
        Self { byte, column: byte + 1 }
    }
}

impl std::fmt::Display for Locus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "byte {}, column {}", self.byte, self.column)
    }
}

/// Category law identifiers for [`AgentesError::LawCheckFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Law {
    LeftIdentity,
    RightIdentity,
    Associativity,
}

impl std::fmt::Display for Law {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Law::LeftIdentity => write!(f, "left_identity"),
            Law::RightIdentity => write!(f, "right_identity"),
            Law::Associativity => write!(f, "associativity"),
        }
    }
}

/// Cost report attached to economic errors so callers see what was charged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub requested: f64,
    pub available: f64,
    pub settled: f64,
}

// ---------------------------------------------------------------------------
// The taxonomy
// ---------------------------------------------------------------------------

/// Every error the AGENTESE fabric surfaces to callers.
#[derive(Debug, Error)]
pub enum AgentesError {
    // --- Address errors: the caller named something wrong -------------------
    #[error("path syntax error at {locus}: {reason}")]
    PathSyntax { locus: Locus, reason: String },

    #[error("clause syntax error at {locus}: {reason}")]
    ClauseSyntax { locus: Locus, reason: String },

    #[error("annotation syntax error at {locus}: {reason}")]
    AnnotationSyntax { locus: Locus, reason: String },

    #[error("path not found: {path}")]
    PathNotFound {
        path: String,
        /// Fuzzy-matched handles the caller may have meant.
        suggestions: Vec<String>,
    },

    #[error("alias '{alias}' shadows a reserved context root")]
    AliasShadow { alias: String },

    #[error("alias '{alias}' would recurse: {}", chain.join(" -> "))]
    AliasRecursion { alias: String, chain: Vec<String> },

    #[error("alias not found: {alias}")]
    AliasNotFound { alias: String },

    // --- Access errors: the observer may not do that ------------------------
    #[error("aspect '{aspect}' is not afforded to archetype '{archetype}' on {path}")]
    Affordance {
        path: String,
        aspect: String,
        archetype: String,
    },

    #[error("an observer is required to invoke {path}")]
    ObserverRequired { path: String },

    #[error("curator rejected the result at stage '{stage}': {reason}")]
    Tastefulness { stage: String, reason: String },

    // --- Economic errors ----------------------------------------------------
    #[error("budget exhausted for '{account}': requested {}, available {}", cost.requested, cost.available)]
    BudgetExhausted { account: String, cost: CostReport },

    #[error("composition violation at stage {stage}: {reason}")]
    CompositionViolation { stage: usize, reason: String },

    // --- Law errors: surfaced with the full counter-example -----------------
    #[error("category law {law} failed at {locus}")]
    LawCheckFailed {
        law: Law,
        locus: String,
        left: Value,
        right: Value,
    },

    #[error("lineage error for '{handle}': missing parents {}", missing.join(", "))]
    Lineage { handle: String, missing: Vec<String> },

    #[error("lattice error: {reason}")]
    Lattice {
        reason: String,
        cycle_path: Vec<String>,
    },

    #[error("affordance conflict for '{handle}': {detail}")]
    AffordanceConflict { handle: String, detail: String },

    #[error("constraint intersection for '{handle}' is empty")]
    UnsatisfiableConstraints { handle: String },

    // --- Registry / container ----------------------------------------------
    #[error("dependency '{name}' not found (chain: {})", chain.join(" -> "))]
    DependencyNotFound { name: String, chain: Vec<String> },

    #[error("invalid contract for {path}:{aspect}: {reason}")]
    Contract {
        path: String,
        aspect: String,
        reason: String,
    },

    // --- Handler errors: captured and wrapped -------------------------------
    #[error("handler for {path}:{aspect} failed: {inner}")]
    Handler {
        path: String,
        aspect: String,
        inner: String,
    },

    // --- Infrastructure -----------------------------------------------------
    #[error("aspect {path}:{aspect} exceeded its {timeout_s}s timeout")]
    AspectTimeout {
        path: String,
        aspect: String,
        timeout_s: f64,
    },

    #[error("subscription {subscription} buffer overflowed ({capacity} events)")]
    BufferOverflow {
        subscription: String,
        capacity: usize,
    },
}

pub type Result<T> = std::result::Result<T, AgentesError>;

impl AgentesError {
    /// Stable machine-readable kind tag, shared by CLI and HTTP projections.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentesError::PathSyntax { .. } => "path_syntax",
            AgentesError::ClauseSyntax { .. } => "clause_syntax",
            AgentesError::AnnotationSyntax { .. } => "annotation_syntax",
            AgentesError::PathNotFound { .. } => "path_not_found",
            AgentesError::AliasShadow { .. } => "alias_shadow",
            AgentesError::AliasRecursion { .. } => "alias_recursion",
            AgentesError::AliasNotFound { .. } => "alias_not_found",
            AgentesError::Affordance { .. } => "affordance_denied",
            AgentesError::ObserverRequired { .. } => "observer_required",
            AgentesError::Tastefulness { .. } => "tastefulness",
            AgentesError::BudgetExhausted { .. } => "budget_exhausted",
            AgentesError::CompositionViolation { .. } => "composition_violation",
            AgentesError::LawCheckFailed { .. } => "law_check_failed",
            AgentesError::Lineage { .. } => "lineage",
            AgentesError::Lattice { .. } => "lattice",
            AgentesError::AffordanceConflict { .. } => "affordance_conflict",
            AgentesError::UnsatisfiableConstraints { .. } => "unsatisfiable_constraints",
            AgentesError::DependencyNotFound { .. } => "dependency_not_found",
            AgentesError::Contract { .. } => "contract_violation",
            AgentesError::Handler { .. } => "handler_failure",
            AgentesError::AspectTimeout { .. } => "aspect_timeout",
            AgentesError::BufferOverflow { .. } => "buffer_overflow",
        }
    }

    /// HTTP status the gateway maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            AgentesError::PathNotFound { .. } | AgentesError::AliasNotFound { .. } => 404,
            AgentesError::Affordance { .. }
            | AgentesError::ObserverRequired { .. }
            | AgentesError::Tastefulness { .. } => 403,
            AgentesError::BudgetExhausted { .. } => 429,
            AgentesError::CompositionViolation { .. } => 409,
            AgentesError::PathSyntax { .. }
            | AgentesError::ClauseSyntax { .. }
            | AgentesError::AnnotationSyntax { .. }
            | AgentesError::AliasShadow { .. }
            | AgentesError::AliasRecursion { .. }
            | AgentesError::Contract { .. }
            | AgentesError::Lineage { .. }
            | AgentesError::Lattice { .. }
            | AgentesError::AffordanceConflict { .. }
            | AgentesError::UnsatisfiableConstraints { .. } => 400,
            _ => 500,
        }
    }

    /// Structured projection for user-visible failure surfaces.
    pub fn report(&self) -> ErrorReport {
        let mut report = ErrorReport {
            kind: self.kind().to_string(),
            message: self.to_string(),
            ..ErrorReport::default()
        };
        match self {
            AgentesError::PathSyntax { locus, .. }
            | AgentesError::ClauseSyntax { locus, .. }
            | AgentesError::AnnotationSyntax { locus, .. } => report.locus = Some(*locus),
            AgentesError::PathNotFound { path, suggestions } => {
                report.path = Some(path.clone());
                report.suggestions = suggestions.clone();
            }
            AgentesError::Affordance { path, aspect, .. } => {
                report.path = Some(path.clone());
                report.aspect = Some(aspect.clone());
            }
            AgentesError::BudgetExhausted { cost, .. } => report.cost = Some(cost.clone()),
            AgentesError::Handler { path, aspect, .. }
            | AgentesError::AspectTimeout { path, aspect, .. } => {
                report.path = Some(path.clone());
                report.aspect = Some(aspect.clone());
            }
            _ => {}
        }
        report
    }
}

/// CLI/HTTP projection: `{kind, locus?, path?, aspect?, suggestions?}` plus a
/// human-readable message and the cost report for economic errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locus: Option<Locus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_carry_locus() {
        let err = AgentesError::PathSyntax {
            locus: Locus::at(7),
            reason: "empty segment".into(),
        };
        let report = err.report();
        assert_eq!(report.kind, "path_syntax");
        assert_eq!(report.locus, Some(Locus { byte: 7, column: 8 }));
    }

    #[test]
    fn not_found_keeps_suggestions() {
        let err = AgentesError::PathNotFound {
            path: "world.gardn".into(),
            suggestions: vec!["world.garden".into()],
        };
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.report().suggestions, vec!["world.garden".to_string()]);
    }

    #[test]
    fn status_mapping_matches_gateway_contract() {
        let budget = AgentesError::BudgetExhausted {
            account: "guest".into(),
            cost: CostReport { requested: 1.0, available: 0.2, settled: 0.0 },
        };
        assert_eq!(budget.http_status(), 429);
        let comp = AgentesError::CompositionViolation { stage: 2, reason: "non_minimal_output".into() };
        assert_eq!(comp.http_status(), 409);
    }
}
