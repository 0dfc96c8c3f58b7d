//! Metabolic engine: cumulative token pressure becomes "fever".
//!
//! Temperature is a decaying moving sum of tokens per unit time. Crossing the
//! critical threshold emits exactly one [`FeverEvent`] (an oblique-strategy
//! prompt plus context) and resets the accumulator, so temperature never sits
//! above threshold for more than one tick. Single writer: the engine; readers
//! snapshot.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Threshold-crossing event handed to whoever is listening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeverEvent {
    pub at: DateTime<Utc>,
    pub oblique_strategy: String,
    pub context: String,
    pub temperature: f64,
}

/// Snapshot of the metabolic accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetabolicState {
    pub tokens_ingested: u64,
    pub temperature: f64,
    pub last_fever_at: Option<DateTime<Utc>>,
    pub fever_count: u64,
}

const OBLIQUE_STRATEGIES: [&str; 8] = [
    "Honor thy error as a hidden intention",
    "Use an old idea",
    "Work at a different speed",
    "Ask your body",
    "Gardening, not architecture",
    "Repetition is a form of change",
    "What would your closest friend do?",
    "Disconnect from desire",
];

struct Inner {
    tokens_ingested: u64,
    temperature: f64,
    last_tick: Instant,
    last_fever_at: Option<DateTime<Utc>>,
    fever_count: u64,
}

/// The engine. `ingest` is the single write path.
pub struct MetabolicEngine {
    inner: Mutex<Inner>,
    decay_rate: f64,
    critical_threshold: f64,
}

impl MetabolicEngine {
    pub fn new(critical_threshold: f64, decay_rate: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tokens_ingested: 0,
                temperature: 0.0,
                last_tick: Instant::now(),
                last_fever_at: None,
                fever_count: 0,
            }),
            decay_rate,
            critical_threshold,
        }
    }

    /// Feed one invocation's token counts. Returns the fever event when this
    /// ingestion crosses the critical threshold.
    pub fn ingest(&self, tokens_in: u64, tokens_out: u64, context: &str) -> Option<FeverEvent> {
        let mut inner = self.inner.lock().expect("metabolic state poisoned");
        let now = Instant::now();
        let dt = now.saturating_duration_since(inner.last_tick).as_secs_f64();
        inner.last_tick = now;

        let total = tokens_in + tokens_out;
        inner.tokens_ingested += total;
        inner.temperature = (inner.temperature - self.decay_rate * dt).max(0.0) + total as f64;

        if inner.temperature < self.critical_threshold {
            return None;
        }

        let at = Utc::now();
        let strategy =
            OBLIQUE_STRATEGIES[(inner.fever_count as usize) % OBLIQUE_STRATEGIES.len()];
        let event = FeverEvent {
            at,
            oblique_strategy: strategy.to_string(),
            context: context.to_string(),
            temperature: inner.temperature,
        };
        inner.temperature = 0.0;
        inner.fever_count += 1;
        inner.last_fever_at = Some(at);
        info!(
            target: "agentese::metabolism",
            fever_count = inner.fever_count,
            strategy,
            "fever threshold crossed; accumulator reset"
        );
        Some(event)
    }

    /// Voluntarily shed temperature (paid for in entropy by the caller).
    pub fn tithe(&self, amount: f64) {
        let mut inner = self.inner.lock().expect("metabolic state poisoned");
        inner.temperature = (inner.temperature - amount).max(0.0);
    }

    pub fn snapshot(&self) -> MetabolicState {
        let inner = self.inner.lock().expect("metabolic state poisoned");
        MetabolicState {
            tokens_ingested: inner.tokens_ingested,
            temperature: inner.temperature,
            last_fever_at: inner.last_fever_at,
            fever_count: inner.fever_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_emits_exactly_one_fever_and_resets() {
        let engine = MetabolicEngine::new(100.0, 0.0);
        assert!(engine.ingest(30, 30, "warmup").is_none());
        let fever = engine.ingest(30, 30, "over the top").expect("fever expected");
        assert!(fever.temperature >= 100.0);
        let state = engine.snapshot();
        assert_eq!(state.fever_count, 1);
        assert_eq!(state.temperature, 0.0, "accumulator reset after fever");
        // Next small ingestion stays calm.
        assert!(engine.ingest(1, 1, "calm").is_none());
    }

    #[test]
    fn strategies_rotate() {
        let engine = MetabolicEngine::new(10.0, 0.0);
        let first = engine.ingest(10, 0, "a").unwrap();
        let second = engine.ingest(10, 0, "b").unwrap();
        assert_ne!(first.oblique_strategy, second.oblique_strategy);
    }

    #[test]
    fn tithe_sheds_temperature() {
        let engine = MetabolicEngine::new(1000.0, 0.0);
        engine.ingest(50, 0, "load");
        engine.tithe(30.0);
        assert!((engine.snapshot().temperature - 20.0).abs() < 1e-9);
        engine.tithe(100.0);
        assert_eq!(engine.snapshot().temperature, 0.0);
    }

    #[test]
    fn tokens_accumulate() {
        let engine = MetabolicEngine::new(1_000_000.0, 0.0);
        engine.ingest(10, 5, "x");
        engine.ingest(1, 2, "y");
        assert_eq!(engine.snapshot().tokens_ingested, 18);
    }
}
