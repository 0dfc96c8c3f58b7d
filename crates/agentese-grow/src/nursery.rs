//! The self.grow kernel: proposal → validation → nursery → promotion.
//!
//! Every transition is charged against a [`GrowthBudget`] and gated:
//! category laws first, then abuse heuristics, duplication, and fitness
//! against the seven principles. Germinating holons live in the nursery
//! until usage earns promotion or they are pruned.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use agentese_core::{is_minimal_output, EntropyBudget, Node, Observer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::lattice::{ConceptProposal, LatticeChecker};
use crate::promoter::{JitPromoter, PromotionThresholds, RollbackToken};
use crate::specfile::{parse_spec, ParsedSpec};
use crate::synth::{synthesize, SynthNode};
use crate::GrowError;

// ---------------------------------------------------------------------------
// Growth budget
// ---------------------------------------------------------------------------

/// Pipeline operations, each with a fixed entropy cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthOp {
    Recognize,
    Propose,
    Validate,
    Germinate,
    Promote,
    Prune,
}

impl GrowthOp {
    fn cost(&self) -> f64 {
        match self {
            GrowthOp::Recognize => 0.05,
            GrowthOp::Propose => 0.1,
            GrowthOp::Validate => 0.2,
            GrowthOp::Germinate => 0.3,
            GrowthOp::Promote => 0.5,
            GrowthOp::Prune => 0.05,
        }
    }
}

/// Entropy variant with per-operation costs and time regeneration.
pub struct GrowthBudget {
    inner: Mutex<EntropyBudget>,
}

impl GrowthBudget {
    pub fn new(initial: f64, max: f64, regen_rate: f64) -> Self {
        Self { inner: Mutex::new(EntropyBudget::new(initial, max, regen_rate)) }
    }

    pub fn charge(&self, op: GrowthOp) -> Result<f64, GrowError> {
        self.inner
            .lock()
            .expect("growth budget poisoned")
            .spend(op.cost())
            .map_err(|_| GrowError::BudgetExhausted(format!("{op:?}")))
    }

    pub fn available(&self) -> f64 {
        self.inner.lock().expect("growth budget poisoned").available()
    }
}

impl Default for GrowthBudget {
    fn default() -> Self {
        Self::new(5.0, 5.0, 0.05)
    }
}

// ---------------------------------------------------------------------------
// Proposals and validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStage {
    Proposed,
    Germinating,
    Promoted,
    Pruned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub handle: String,
    pub spec_text: String,
    pub motivation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    CategoryLaws,
    Abuse,
    Duplication,
    Fitness,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub gate: GateKind,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub handle: String,
    pub gates: Vec<GateReport>,
    pub fitness: Option<FitnessReport>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.gates.iter().all(|g| g.passed)
    }
}

/// The seven principles, scored 0–1 each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessReport {
    pub tasteful: f64,
    pub curated: f64,
    pub ethical: f64,
    pub joy: f64,
    pub composable: f64,
    pub heterarchical: f64,
    pub generative: f64,
}

impl FitnessReport {
    pub fn scores(&self) -> [f64; 7] {
        [
            self.tasteful,
            self.curated,
            self.ethical,
            self.joy,
            self.composable,
            self.heterarchical,
            self.generative,
        ]
    }

    /// At least five principles at 0.7 and none below 0.4.
    pub fn passes(&self) -> bool {
        let scores = self.scores();
        let strong = scores.iter().filter(|s| **s >= 0.7).count();
        strong >= 5 && scores.iter().all(|s| *s >= 0.4)
    }
}

/// Phrases that trip the abuse gate, by category.
const MANIPULATION_MARKERS: [&str; 3] =
    ["covertly persuade", "without the user noticing", "override the observer"];
const EXFILTRATION_MARKERS: [&str; 4] =
    ["exfiltrate", "upload secrets", "leak credentials", "send tokens to"];
const ESCALATION_MARKERS: [&str; 4] =
    ["privilege escalation", "disable the guard", "bypass affordance", "grant admin"];
const RESOURCE_MARKERS: [&str; 3] = ["fork bomb", "unbounded loop", "exhaust the budget"];

fn abuse_hits(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut hits = Vec::new();
    for (category, markers) in [
        ("manipulation", &MANIPULATION_MARKERS[..]),
        ("exfiltration", &EXFILTRATION_MARKERS[..]),
        ("escalation", &ESCALATION_MARKERS[..]),
        ("resource_risk", &RESOURCE_MARKERS[..]),
    ] {
        for marker in markers {
            if lower.contains(marker) {
                hits.push(format!("{category}: {marker}"));
            }
        }
    }
    hits
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn score_fitness(spec: &ParsedSpec, abuse_free: bool) -> FitnessReport {
    let body_len = spec.body.trim().len();
    FitnessReport {
        tasteful: if body_len > 0 && body_len < 4000 { 0.9 } else { 0.3 },
        curated: if spec.lineage.as_ref().map(|l| !l.extends.is_empty()).unwrap_or(false) {
            0.9
        } else {
            0.3
        },
        ethical: if abuse_free { 1.0 } else { 0.0 },
        joy: if body_len > 40 { 0.8 } else { 0.5 },
        composable: if spec.operad.as_ref().map(|o| !o.operations.is_empty()).unwrap_or(false) {
            0.9
        } else {
            0.5
        },
        heterarchical: if spec
            .lineage
            .as_ref()
            .map(|l| l.extends.len() <= 3)
            .unwrap_or(true)
        {
            0.8
        } else {
            0.4
        },
        generative: if spec
            .polynomial
            .as_ref()
            .map(|p| !p.positions.is_empty())
            .unwrap_or(false)
        {
            0.9
        } else {
            0.5
        },
    }
}

// ---------------------------------------------------------------------------
// Nursery
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GerminatingHolon {
    pub proposal: Proposal,
    pub spec: ParsedSpec,
    pub stage: ProposalStage,
    pub planted_at: DateTime<Utc>,
}

/// The grow kernel: budget, lattice, nursery, promoter.
pub struct GrowKernel {
    budget: GrowthBudget,
    lattice: Arc<LatticeChecker>,
    promoter: JitPromoter,
    holons: RwLock<HashMap<String, GerminatingHolon>>,
}

impl GrowKernel {
    pub fn new(lattice: Arc<LatticeChecker>, promoter: JitPromoter) -> Self {
        Self {
            budget: GrowthBudget::default(),
            lattice,
            promoter,
            holons: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_budget(mut self, budget: GrowthBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> &GrowthBudget {
        &self.budget
    }

    pub fn lattice(&self) -> &Arc<LatticeChecker> {
        &self.lattice
    }

    pub fn promoter(&self) -> &JitPromoter {
        &self.promoter
    }

    pub fn nursery_handles(&self) -> Vec<String> {
        let mut handles: Vec<String> =
            self.holons.read().expect("nursery poisoned").keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn holon(&self, handle: &str) -> Option<GerminatingHolon> {
        self.holons.read().expect("nursery poisoned").get(handle).cloned()
    }

    /// Recognize candidate handles in free observation text.
    pub fn recognize(&self, observation: &str) -> Result<Vec<String>, GrowError> {
        self.budget.charge(GrowthOp::Recognize)?;
        let re = regex::Regex::new(r"\b(world|self|concept|void|time)\.[a-z][a-z0-9_.]*")
            .expect("recognition regex");
        let mut found: Vec<String> =
            re.find_iter(observation).map(|m| m.as_str().trim_end_matches('.').to_string()).collect();
        found.sort();
        found.dedup();
        Ok(found)
    }

    /// Parse a spec into a proposal. Lineage is a hard requirement.
    pub fn propose(&self, spec_text: &str, motivation: &str) -> Result<Proposal, GrowError> {
        self.budget.charge(GrowthOp::Propose)?;
        let spec = parse_spec(spec_text)?;
        let handle = spec
            .path
            .clone()
            .ok_or_else(|| GrowError::SpecParse("proposal spec declares no agentese path".into()))?;
        if spec.lineage.as_ref().map(|l| l.extends.is_empty()).unwrap_or(true) {
            return Err(GrowError::LineageRequired(handle));
        }
        Ok(Proposal {
            handle,
            spec_text: spec_text.to_string(),
            motivation: motivation.to_string(),
        })
    }

    /// Run the four validation gates in order.
    pub async fn validate(&self, proposal: &Proposal) -> Result<ValidationReport, GrowError> {
        self.budget.charge(GrowthOp::Validate)?;
        let spec = parse_spec(&proposal.spec_text)?;
        let mut gates = Vec::new();

        // Gate 1: category laws (identity + compositional closure).
        gates.push(self.law_gate(&spec).await);

        // Gate 2: abuse heuristics.
        let hits = abuse_hits(&proposal.spec_text);
        gates.push(GateReport {
            gate: GateKind::Abuse,
            passed: hits.is_empty(),
            detail: if hits.is_empty() { "clean".into() } else { hits.join("; ") },
        });
        let abuse_free = hits.is_empty();

        // Gate 3: duplication (name + affordance-set Jaccard).
        gates.push(self.duplication_gate(&proposal.handle, &spec));

        // Gate 4: fitness against the seven principles.
        let fitness = score_fitness(&spec, abuse_free);
        gates.push(GateReport {
            gate: GateKind::Fitness,
            passed: fitness.passes(),
            detail: format!("scores: {:?}", fitness.scores()),
        });

        let report = ValidationReport {
            handle: proposal.handle.clone(),
            gates,
            fitness: Some(fitness),
        };
        if !report.passed() {
            warn!(
                target: "agentese::grow",
                handle = %proposal.handle,
                "proposal failed validation"
            );
        }
        Ok(report)
    }

    async fn law_gate(&self, spec: &ParsedSpec) -> GateReport {
        let node = match synthesize(spec) {
            Ok(node) => node,
            Err(e) => {
                return GateReport {
                    gate: GateKind::CategoryLaws,
                    passed: false,
                    detail: format!("synthesis failed: {e}"),
                }
            }
        };
        let observer = Observer::guest();
        for aspect in &spec.aspects {
            let input = json!({ "input": {"probe": 1} });
            let first = node.invoke(&aspect.name, &observer, input.clone()).await;
            let second = node.invoke(&aspect.name, &observer, input).await;
            match (first, second) {
                (Ok(a), Ok(b)) => {
                    if a.to_dict() != b.to_dict() {
                        return GateReport {
                            gate: GateKind::CategoryLaws,
                            passed: false,
                            detail: format!("aspect '{}' is not referentially pure", aspect.name),
                        };
                    }
                    if !is_minimal_output(&a.body()) {
                        return GateReport {
                            gate: GateKind::CategoryLaws,
                            passed: false,
                            detail: format!("aspect '{}' breaks compositional closure", aspect.name),
                        };
                    }
                }
                _ => {
                    return GateReport {
                        gate: GateKind::CategoryLaws,
                        passed: false,
                        detail: format!("aspect '{}' failed under probe input", aspect.name),
                    }
                }
            }
        }
        GateReport { gate: GateKind::CategoryLaws, passed: true, detail: "laws hold".into() }
    }

    fn duplication_gate(&self, handle: &str, spec: &ParsedSpec) -> GateReport {
        if self.lattice.get(handle).is_some() {
            return GateReport {
                gate: GateKind::Duplication,
                passed: false,
                detail: format!("'{handle}' already exists in the lattice"),
            };
        }
        let holons = self.holons.read().expect("nursery poisoned");
        if holons.contains_key(handle) {
            return GateReport {
                gate: GateKind::Duplication,
                passed: false,
                detail: format!("'{handle}' is already germinating"),
            };
        }
        let proposed: BTreeSet<String> = spec.aspects.iter().map(|a| a.name.clone()).collect();
        for (existing_handle, holon) in holons.iter() {
            let existing: BTreeSet<String> =
                holon.spec.aspects.iter().map(|a| a.name.clone()).collect();
            let similarity = jaccard(&proposed, &existing);
            if similarity > 0.8 {
                return GateReport {
                    gate: GateKind::Duplication,
                    passed: false,
                    detail: format!(
                        "affordance overlap {similarity:.2} with '{existing_handle}'"
                    ),
                };
            }
        }
        GateReport { gate: GateKind::Duplication, passed: true, detail: "novel".into() }
    }

    /// Plant a validated proposal: define its concept lineage, synthesize the
    /// node, and retain it in the nursery. The caller hot-mounts the node.
    pub async fn germinate(&self, proposal: &Proposal) -> Result<Arc<SynthNode>, GrowError> {
        self.budget.charge(GrowthOp::Germinate)?;
        let report = self.validate(proposal).await?;
        if !report.passed() {
            return Err(GrowError::ValidationFailed(proposal.handle.clone()));
        }
        let spec = parse_spec(&proposal.spec_text)?;

        if let Some(lineage) = &spec.lineage {
            self.lattice
                .define(
                    &proposal.handle,
                    ConceptProposal {
                        extends: lineage.extends.clone(),
                        subsumes: Vec::new(),
                        justification: lineage.justification.clone(),
                        affordances: spec.aspects.iter().map(|a| a.name.clone()).collect(),
                        constraints: lineage.constraints.clone(),
                    },
                )
                .map_err(|e| GrowError::Lattice(e.to_string()))?;
        }

        let node = synthesize(&spec)?;
        self.holons.write().expect("nursery poisoned").insert(
            proposal.handle.clone(),
            GerminatingHolon {
                proposal: proposal.clone(),
                spec,
                stage: ProposalStage::Germinating,
                planted_at: Utc::now(),
            },
        );
        info!(target: "agentese::grow", handle = %proposal.handle, "holon germinating");
        Ok(node)
    }

    /// Record a usage outcome for a germinating holon.
    pub fn record_usage(&self, handle: &str, ok: bool) {
        self.promoter.record_invocation(handle, ok);
    }

    /// Promote a germinating holon once thresholds are met.
    pub fn promote(
        &self,
        handle: &str,
        thresholds: PromotionThresholds,
    ) -> Result<RollbackToken, GrowError> {
        self.budget.charge(GrowthOp::Promote)?;
        let spec = {
            let holons = self.holons.read().expect("nursery poisoned");
            holons
                .get(handle)
                .map(|h| h.spec.clone())
                .ok_or_else(|| GrowError::NotGerminating(handle.to_string()))?
        };
        let token = self.promoter.promote(&spec, thresholds)?;
        if let Some(holon) = self.holons.write().expect("nursery poisoned").get_mut(handle) {
            holon.stage = ProposalStage::Promoted;
        }
        Ok(token)
    }

    /// Prune a germinating holon. The caller unmounts the node.
    pub fn prune(&self, handle: &str) -> Result<(), GrowError> {
        self.budget.charge(GrowthOp::Prune)?;
        let removed = self.holons.write().expect("nursery poisoned").remove(handle);
        match removed {
            Some(_) => {
                info!(target: "agentese::grow", handle, "holon pruned");
                Ok(())
            }
            None => Err(GrowError::NotGerminating(handle.to_string())),
        }
    }

    /// Roll a promotion back and return the holon to germinating.
    pub fn rollback(&self, token: &RollbackToken) -> Result<(), GrowError> {
        self.promoter.rollback(token)?;
        if let Some(holon) =
            self.holons.write().expect("nursery poisoned").get_mut(&token.handle)
        {
            holon.stage = ProposalStage::Germinating;
        }
        Ok(())
    }
}
