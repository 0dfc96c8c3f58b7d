//! Fabric configuration loaded from `AGENTESE_*` environment variables.
//!
//! Unset or malformed values fall back to defaults; nothing here panics on a
//! bad environment. Change runtime behavior without code edits.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Recognized environment set.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | AGENTESE_SPEC_ROOT | `spec/` | SpecGraph spec directory. |
/// | AGENTESE_IMPL_ROOT | `impl/` | Promoted implementation directory. |
/// | AGENTESE_TELEMETRY | on | Wrap invocations in telemetry spans. |
/// | AGENTESE_TELEMETRY_ENDPOINT | unset | OTLP endpoint handed to the exporter. |
/// | AGENTESE_BUDGET_INITIAL | 1.0 | Initial entropy budget per account. |
/// | AGENTESE_BUDGET_REFILL_RATE | 0.01 | Entropy regeneration, units/second. |
/// | AGENTESE_ENFORCE_OUTPUT | off | Compose default for the Minimal Output Principle. |
/// | AGENTESE_METRICS | on | Record counter metrics per invocation. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    pub spec_root: PathBuf,
    pub impl_root: PathBuf,
    #[serde(default = "default_true")]
    pub telemetry: bool,
    #[serde(default)]
    pub telemetry_endpoint: Option<String>,
    pub budget_initial: f64,
    pub budget_refill_rate: f64,
    #[serde(default)]
    pub enforce_output: bool,
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            spec_root: PathBuf::from("spec"),
            impl_root: PathBuf::from("impl"),
            telemetry: true,
            telemetry_endpoint: None,
            budget_initial: 1.0,
            budget_refill_rate: 0.01,
            enforce_output: false,
            metrics: true,
        }
    }
}

impl FabricConfig {
    /// Load from environment. Unset or invalid => defaults (see table).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            spec_root: env_path("AGENTESE_SPEC_ROOT", defaults.spec_root),
            impl_root: env_path("AGENTESE_IMPL_ROOT", defaults.impl_root),
            telemetry: env_switch("AGENTESE_TELEMETRY", true),
            telemetry_endpoint: env_opt_string("AGENTESE_TELEMETRY_ENDPOINT"),
            budget_initial: env_f64("AGENTESE_BUDGET_INITIAL", 1.0),
            budget_refill_rate: env_f64("AGENTESE_BUDGET_REFILL_RATE", 0.01),
            enforce_output: env_switch("AGENTESE_ENFORCE_OUTPUT", false),
            metrics: env_switch("AGENTESE_METRICS", true),
        }
    }
}

/// `on`/`true` => true, `off`/`false` => false, anything else => default.
fn env_switch(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => true,
            "off" | "false" | "0" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => default,
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = FabricConfig::default();
        assert_eq!(cfg.spec_root, PathBuf::from("spec"));
        assert_eq!(cfg.impl_root, PathBuf::from("impl"));
        assert!(cfg.telemetry);
        assert!(!cfg.enforce_output);
        assert!((cfg.budget_refill_rate - 0.01).abs() < f64::EPSILON);
    }
}
