//! Telemetry middleware: spans and counters per invocation.
//!
//! Every invocation is wrapped in an `agentese.invoke` span carrying
//! `{path, aspect, archetype, ok, duration_s, tokens_in, tokens_out,
//! law_check_status}`. Errors add the exception type and message. Counters
//! are plain atomics; transport to an exporter is someone else's job: the
//! core only emits structured events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tracing::{error, info, info_span, Span};

use crate::composition::LawStatus;
use crate::error::{AgentesError, Law};

/// Counter + span sink. Disabled instances keep the API but do nothing.
pub struct Telemetry {
    spans_enabled: bool,
    metrics_enabled: bool,
    counters: DashMap<String, AtomicU64>,
}

impl Telemetry {
    pub fn new(spans_enabled: bool, metrics_enabled: bool) -> Self {
        Self {
            spans_enabled,
            metrics_enabled,
            counters: DashMap::new(),
        }
    }

    /// Open the invocation span. Outermost layer of the middleware stack:
    /// telemetry → curator → law-check → dispatch.
    pub fn begin_invoke(&self, path: &str, aspect: &str, archetype: &str) -> InvokeSpan {
        let span = if self.spans_enabled {
            info_span!(
                "agentese.invoke",
                path,
                aspect,
                archetype,
                ok = tracing::field::Empty,
                duration_s = tracing::field::Empty,
                tokens_in = tracing::field::Empty,
                tokens_out = tracing::field::Empty,
                law_check_status = tracing::field::Empty,
            )
        } else {
            Span::none()
        };
        InvokeSpan { span, started: Instant::now() }
    }

    pub fn increment(&self, counter: &str) {
        if !self.metrics_enabled {
            return;
        }
        self.counters
            .entry(counter.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn counter(&self, counter: &str) -> u64 {
        self.counters
            .get(counter)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All counters, for the gateway's admin surface.
    pub fn counters(&self) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        out.sort();
        out
    }

    /// Emit one `law_check` event.
    pub fn law_check(&self, law: Law, status: LawStatus) {
        let status_str = match status {
            LawStatus::Ok => "ok",
            LawStatus::Fail => "fail",
            LawStatus::Skip => "skip",
        };
        info!(
            target: "agentese.law_check",
            law = %law,
            status = status_str,
            "law_check"
        );
        self.increment(&format!("law_check.{status_str}"));
    }
}

/// An open invocation span; finish it exactly once.
pub struct InvokeSpan {
    span: Span,
    started: Instant,
}

impl InvokeSpan {
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_error(&self, err: &AgentesError) {
        self.span.record("ok", false);
        error!(
            target: "agentese.invoke",
            parent: &self.span,
            exception_kind = err.kind(),
            exception_message = %err,
            "invocation failed"
        );
    }

    pub fn finish(self, ok: bool, tokens_in: u64, tokens_out: u64, law_check_status: Option<&str>) {
        self.span.record("ok", ok);
        self.span.record("duration_s", self.started.elapsed().as_secs_f64());
        self.span.record("tokens_in", tokens_in);
        self.span.record("tokens_out", tokens_out);
        if let Some(status) = law_check_status {
            self.span.record("law_check_status", status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let telemetry = Telemetry::new(false, true);
        telemetry.increment("invocations");
        telemetry.increment("invocations");
        telemetry.increment("errors");
        assert_eq!(telemetry.counter("invocations"), 2);
        assert_eq!(telemetry.counter("errors"), 1);
        assert_eq!(telemetry.counter("unknown"), 0);
    }

    #[test]
    fn disabled_metrics_record_nothing() {
        let telemetry = Telemetry::new(false, false);
        telemetry.increment("invocations");
        assert_eq!(telemetry.counter("invocations"), 0);
    }

    #[test]
    fn law_check_bumps_status_counter() {
        let telemetry = Telemetry::new(false, true);
        telemetry.law_check(Law::Associativity, LawStatus::Ok);
        telemetry.law_check(Law::LeftIdentity, LawStatus::Skip);
        assert_eq!(telemetry.counter("law_check.ok"), 1);
        assert_eq!(telemetry.counter("law_check.skip"), 1);
    }
}
