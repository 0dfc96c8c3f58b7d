//! Typed composition algebra over paths.
//!
//! Algebraic values are `Id`, `Lift(path)`, and `Compose(f, g)`. Identity is
//! absorbed structurally (`Id >> f == f == f >> Id` by construction) and
//! associativity is verified at runtime against a representative input under
//! a pluggable equality relation (default: deep structural equality of the
//! `to_dict()` projection).

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{AgentesError, Law, Result};

// ---------------------------------------------------------------------------
// Morphisms
// ---------------------------------------------------------------------------

/// A composition-algebra value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Morphism {
    Id,
    Lift(String),
    Compose(Box<Morphism>, Box<Morphism>),
}

impl Morphism {
    pub fn lift(path: impl Into<String>) -> Self {
        Morphism::Lift(path.into())
    }

    /// `self >> other`, with identity absorbed.
    pub fn then(self, other: Morphism) -> Morphism {
        match (self, other) {
            (Morphism::Id, g) => g,
            (f, Morphism::Id) => f,
            (f, g) => Morphism::Compose(Box::new(f), Box::new(g)),
        }
    }

    /// Flattened stage list, left to right. `Id` contributes nothing, which
    /// is exactly the left/right identity law in structural form.
    pub fn stages(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_stages(&mut out);
        out
    }

    fn collect_stages(&self, out: &mut Vec<String>) {
        match self {
            Morphism::Id => {}
            Morphism::Lift(path) => out.push(path.clone()),
            Morphism::Compose(f, g) => {
                f.collect_stages(out);
                g.collect_stages(out);
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        self.stages().is_empty()
    }
}

impl std::ops::Shr for Morphism {
    type Output = Morphism;

    fn shr(self, rhs: Morphism) -> Morphism {
        self.then(rhs)
    }
}

// ---------------------------------------------------------------------------
// Aspect agents: the lens-level monoid
// ---------------------------------------------------------------------------

/// A single liftable aspect, named `path:aspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectAgent {
    pub name: String,
}

impl AspectAgent {
    pub fn new(path: &str, aspect: &str) -> Self {
        Self { name: format!("{path}:{aspect}") }
    }

    pub fn morphism(&self) -> Morphism {
        Morphism::lift(self.name.clone())
    }
}

/// Composition of aspect agents; a monoid with the empty composition as the
/// two-sided identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposedAspectAgent {
    pub agents: Vec<AspectAgent>,
}

impl ComposedAspectAgent {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn morphism(&self) -> Morphism {
        self.agents
            .iter()
            .fold(Morphism::Id, |acc, agent| acc.then(agent.morphism()))
    }
}

impl std::ops::Shr for AspectAgent {
    type Output = ComposedAspectAgent;

    fn shr(self, rhs: AspectAgent) -> ComposedAspectAgent {
        ComposedAspectAgent { agents: vec![self, rhs] }
    }
}

impl std::ops::Shr<AspectAgent> for ComposedAspectAgent {
    type Output = ComposedAspectAgent;

    fn shr(mut self, rhs: AspectAgent) -> ComposedAspectAgent {
        self.agents.push(rhs);
        self
    }
}

impl std::ops::Shr<ComposedAspectAgent> for AspectAgent {
    type Output = ComposedAspectAgent;

    fn shr(self, mut rhs: ComposedAspectAgent) -> ComposedAspectAgent {
        rhs.agents.insert(0, self);
        rhs
    }
}

impl std::ops::Shr for ComposedAspectAgent {
    type Output = ComposedAspectAgent;

    fn shr(mut self, mut rhs: ComposedAspectAgent) -> ComposedAspectAgent {
        self.agents.append(&mut rhs.agents);
        self
    }
}

// ---------------------------------------------------------------------------
// Equality + minimal output
// ---------------------------------------------------------------------------

/// Pluggable equality over dictionary projections.
pub type EqualityFn = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Default: deep structural equality.
pub fn structural_equality() -> EqualityFn {
    Arc::new(|left, right| left == right)
}

/// The Minimal Output Principle: a stage result must be one logical unit: a
/// scalar, a record, or a homogeneous collection: never a heterogeneous
/// array. Applies per chunk for streaming stages.
pub fn is_minimal_output(value: &Value) -> bool {
    match value {
        Value::Array(items) => {
            let mut kinds = items.iter().map(json_kind);
            match kinds.next() {
                None => true,
                Some(first) => kinds.all(|k| k == first),
            }
        }
        _ => true,
    }
}

fn json_kind(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

// ---------------------------------------------------------------------------
// Law verification
// ---------------------------------------------------------------------------

/// Outcome of one law check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LawStatus {
    Ok,
    Fail,
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct LawReport {
    pub law: Law,
    pub status: LawStatus,
}

/// Verify the category laws for a flattened stage list against a
/// representative input.
///
/// `run(stages, input)` executes a sub-pipeline and returns its dictionary
/// projection. Identity laws compare `Id ∘ f` / `f ∘ Id` (structurally the
/// same stage list: the check catches impure stages whose reruns diverge).
/// Associativity re-groups the pipeline at two split points and compares the
/// final projections; pipelines with fewer than three stages skip it.
pub async fn verify_laws<F, Fut>(
    stages: &[String],
    input: Value,
    run: F,
    equality: &EqualityFn,
) -> Result<Vec<LawReport>>
where
    F: Fn(Vec<String>, Value) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut reports = Vec::new();

    if stages.is_empty() {
        return Ok(vec![
            LawReport { law: Law::LeftIdentity, status: LawStatus::Skip },
            LawReport { law: Law::RightIdentity, status: LawStatus::Skip },
            LawReport { law: Law::Associativity, status: LawStatus::Skip },
        ]);
    }

    let reference = run(stages.to_vec(), input.clone()).await?;

    for law in [Law::LeftIdentity, Law::RightIdentity] {
        let replay = run(stages.to_vec(), input.clone()).await?;
        if equality(&reference, &replay) {
            reports.push(LawReport { law, status: LawStatus::Ok });
        } else {
            reports.push(LawReport { law, status: LawStatus::Fail });
            return Err(AgentesError::LawCheckFailed {
                law,
                locus: stages.join(" >> "),
                left: reference,
                right: replay,
            });
        }
    }

    if stages.len() < 3 {
        reports.push(LawReport { law: Law::Associativity, status: LawStatus::Skip });
        return Ok(reports);
    }

    // (f ∘ g) ∘ h: run the first two stages, then the rest.
    let fg = run(stages[..2].to_vec(), input.clone()).await?;
    let left = run(stages[2..].to_vec(), fg).await?;
    // f ∘ (g ∘ h): run the first stage, then the rest.
    let f = run(stages[..1].to_vec(), input.clone()).await?;
    let right = run(stages[1..].to_vec(), f).await?;

    if equality(&left, &right) {
        reports.push(LawReport { law: Law::Associativity, status: LawStatus::Ok });
        Ok(reports)
    } else {
        reports.push(LawReport { law: Law::Associativity, status: LawStatus::Fail });
        Err(AgentesError::LawCheckFailed {
            law: Law::Associativity,
            locus: stages.join(" >> "),
            left,
            right,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_is_absorbed_by_construction() {
        let f = Morphism::lift("world.garden:manifest");
        assert_eq!(Morphism::Id.then(f.clone()), f);
        assert_eq!(f.clone().then(Morphism::Id), f);
        assert!(Morphism::Id.is_identity());
    }

    #[test]
    fn stages_flatten_regardless_of_grouping() {
        let f = Morphism::lift("a");
        let g = Morphism::lift("b");
        let h = Morphism::lift("c");
        let left = (f.clone() >> g.clone()) >> h.clone();
        let right = f >> (g >> h);
        assert_eq!(left.stages(), right.stages());
        assert_eq!(left.stages(), vec!["a", "b", "c"]);
    }

    #[test]
    fn aspect_agents_form_a_monoid() {
        let a = AspectAgent::new("world.document", "manifest");
        let b = AspectAgent::new("concept.summary", "refine");
        let c = AspectAgent::new("self.memory", "engram");
        let left = (a.clone() >> b.clone()) >> c.clone();
        let right = a.clone() >> (b >> c);
        assert_eq!(left, right);
        // Identity on both sides.
        let id = ComposedAspectAgent::identity();
        assert_eq!((id.clone() >> left.clone()), left);
        assert_eq!((left.clone() >> id), left);
        assert_eq!(a.name, "world.document:manifest");
    }

    #[test]
    fn minimal_output_rejects_heterogeneous_arrays() {
        assert!(is_minimal_output(&json!(42)));
        assert!(is_minimal_output(&json!({"record": true})));
        assert!(is_minimal_output(&json!([1, 2, 3])));
        assert!(is_minimal_output(&json!([])));
        assert!(!is_minimal_output(&json!([1, "two", {"three": 3}])));
    }

    #[tokio::test]
    async fn laws_hold_for_pure_stages() {
        let eq = structural_equality();
        let run = |stages: Vec<String>, input: Value| async move {
            // Pure stage: append the stage name to a trail.
            let mut trail: Vec<Value> =
                input.get("trail").and_then(|t| t.as_array()).cloned().unwrap_or_default();
            for stage in stages {
                trail.push(Value::String(stage));
            }
            Ok(json!({ "trail": trail }))
        };
        let stages = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let reports = verify_laws(&stages, json!({}), run, &eq).await.unwrap();
        assert!(reports.iter().all(|r| r.status == LawStatus::Ok));
    }

    #[tokio::test]
    async fn impure_stage_fails_identity_law() {
        use std::sync::atomic::{AtomicU64, Ordering};
        let eq = structural_equality();
        let counter = Arc::new(AtomicU64::new(0));
        let run = {
            let counter = counter.clone();
            move |_stages: Vec<String>, _input: Value| {
                let counter = counter.clone();
                async move { Ok(json!({ "calls": counter.fetch_add(1, Ordering::SeqCst) })) }
            }
        };
        let err = verify_laws(&["a".to_string()], json!({}), run, &eq).await.unwrap_err();
        match err {
            AgentesError::LawCheckFailed { law, left, right, .. } => {
                assert_eq!(law, Law::LeftIdentity);
                assert_ne!(left, right);
            }
            other => panic!("expected law failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_pipelines_skip_associativity() {
        let eq = structural_equality();
        let run = |_stages: Vec<String>, input: Value| async move { Ok(input) };
        let reports = verify_laws(&["a".to_string()], json!(1), run, &eq).await.unwrap();
        let assoc = reports.iter().find(|r| r.law == Law::Associativity).unwrap();
        assert_eq!(assoc.status, LawStatus::Skip);
    }
}
