//! Dual-currency accounting: Gas spent versus Impact and epistemic value
//! created, plus the complexity oracle and per-agent yield ratios.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Gas
// ---------------------------------------------------------------------------

/// Observed token spend scaled by the model's price multiplier.
pub fn gas_cost(tokens: u64, model_multiplier: f64) -> f64 {
    tokens as f64 * model_multiplier
}

// ---------------------------------------------------------------------------
// Impact
// ---------------------------------------------------------------------------

/// Impact tiers; base values are additive per realized outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactTier {
    Syntactic,
    Functional,
    Deployment,
}

impl ImpactTier {
    pub fn base_value(&self) -> f64 {
        match self {
            ImpactTier::Syntactic => 10.0,
            ImpactTier::Functional => 100.0,
            ImpactTier::Deployment => 1000.0,
        }
    }
}

/// Multiplicative modifiers: sin taxes shrink realized value, virtue
/// subsidies grow it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactModifier {
    Ethical,
    SinSecurity,
    SinOpacity,
    VirtueReadability,
    VirtueReuse,
}

impl ImpactModifier {
    pub fn factor(&self) -> f64 {
        match self {
            ImpactModifier::Ethical => 1.2,
            ImpactModifier::SinSecurity => 0.33,
            ImpactModifier::SinOpacity => 0.5,
            ImpactModifier::VirtueReadability => 1.3,
            ImpactModifier::VirtueReuse => 1.15,
        }
    }
}

/// Base tier value times the product of all modifiers.
pub fn realized_impact(tier: ImpactTier, modifiers: &[ImpactModifier]) -> f64 {
    modifiers
        .iter()
        .fold(tier.base_value(), |value, modifier| value * modifier.factor())
}

// ---------------------------------------------------------------------------
// Epistemic capital
// ---------------------------------------------------------------------------

/// One recorded observation: value of disaster prevented minus the fatigue
/// cost of crying wolf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub agent: String,
    pub description: String,
    pub disaster_prevented: f64,
    pub false_positive_fatigue: f64,
    /// Gas spent making the observation.
    pub observation_gas: f64,
}

impl Observation {
    pub fn value(&self) -> f64 {
        self.disaster_prevented - self.false_positive_fatigue
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// One settled transaction in the dual-currency ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyTransaction {
    pub agent: String,
    pub gas: f64,
    pub impact: f64,
}

#[derive(Debug, Default)]
struct AgentTotals {
    gas: f64,
    impact: f64,
    voi: f64,
    observation_gas: f64,
}

/// Per-agent accumulation of Gas, Impact, and Value-of-Information.
#[derive(Default)]
pub struct CurrencyLedger {
    totals: Mutex<HashMap<String, AgentTotals>>,
}

/// Yield banding for RoC / RoVI ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldBand {
    BankruptcyWarning,
    BreakEven,
    Profitable,
    HighYield,
}

pub fn yield_band(ratio: f64) -> YieldBand {
    if ratio < 0.5 {
        YieldBand::BankruptcyWarning
    } else if ratio < 1.0 {
        YieldBand::BreakEven
    } else if ratio < 2.0 {
        YieldBand::Profitable
    } else {
        YieldBand::HighYield
    }
}

impl CurrencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tx: CurrencyTransaction) {
        let mut totals = self.totals.lock().expect("currency ledger poisoned");
        let entry = totals.entry(tx.agent).or_default();
        entry.gas += tx.gas;
        entry.impact += tx.impact;
    }

    pub fn record_observation(&self, observation: Observation) {
        let mut totals = self.totals.lock().expect("currency ledger poisoned");
        let entry = totals.entry(observation.agent.clone()).or_default();
        entry.voi += observation.value();
        entry.observation_gas += observation.observation_gas;
    }

    /// Return on Compute: `ΣImpact / ΣGas`. Zero gas reads as zero yield.
    pub fn roc(&self, agent: &str) -> f64 {
        let totals = self.totals.lock().expect("currency ledger poisoned");
        totals
            .get(agent)
            .filter(|t| t.gas > 0.0)
            .map(|t| t.impact / t.gas)
            .unwrap_or(0.0)
    }

    /// Return on Vigilant Information: `ΣVoI / ΣObservationGas`.
    pub fn rovi(&self, agent: &str) -> f64 {
        let totals = self.totals.lock().expect("currency ledger poisoned");
        totals
            .get(agent)
            .filter(|t| t.observation_gas > 0.0)
            .map(|t| t.voi / t.observation_gas)
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Complexity oracle
// ---------------------------------------------------------------------------

/// Optional validators that vouch for a produced artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactValidator {
    SyntacticParse,
    TestsPass,
    TypeCheck,
}

/// Heuristic Kolmogorov proxy via compression ratio.
///
/// `(1 − compressed/original) * min(1, size/100)`, plus +0.25 per passing
/// validator, capped at 2.0.
pub fn complexity_score(artifact: &str, validators: &[ArtifactValidator]) -> f64 {
    let original = artifact.len();
    let base = if original == 0 {
        0.0
    } else {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        let compressed = encoder
            .write_all(artifact.as_bytes())
            .and_then(|_| encoder.finish())
            .map(|out| out.len())
            .unwrap_or(original);
        let ratio = 1.0 - (compressed as f64 / original as f64);
        ratio.max(0.0) * (original as f64 / 100.0).min(1.0)
    };
    (base + 0.25 * validators.len() as f64).min(2.0)
}
