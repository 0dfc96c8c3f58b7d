//! JIT promotion with reversible, hashed snapshots.
//!
//! A synthesized node earns promotion by use: once `usage >= N` and
//! `success_rate >= sigma`, its spec is written under the spec root and its
//! generated implementation under the impl root. Every promotion emits a
//! [`RollbackToken`] carrying hashes of the written state plus byte-exact
//! snapshots of whatever the files held before, so `rollback` restores the
//! prior file set bit-for-bit. File writes are write-swap-rename; a crash
//! mid-promotion leaves the old state intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::specfile::{emit_spec, ParsedSpec};
use crate::synth::generate_source;
use crate::GrowError;

/// Default rollback window.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Promotion gates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PromotionThresholds {
    pub min_usage: u64,
    pub min_success_rate: f64,
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        Self { min_usage: 5, min_success_rate: 0.8 }
    }
}

/// Usage counters per JIT handle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub usage: u64,
    pub successes: u64,
}

impl UsageStats {
    pub fn success_rate(&self) -> f64 {
        if self.usage == 0 {
            0.0
        } else {
            self.successes as f64 / self.usage as f64
        }
    }
}

/// Hashed pre-state snapshot enabling reversible promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackToken {
    pub id: Uuid,
    pub handle: String,
    pub spec_path: PathBuf,
    pub impl_path: PathBuf,
    /// Hashes of the state written by the promotion.
    pub spec_hash: String,
    pub impl_hash: String,
    /// Byte-exact prior contents; `None` means the file did not exist.
    pub spec_prev: Option<String>,
    pub impl_prev: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl RollbackToken {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + Duration::seconds(self.ttl_secs)
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Write-swap-rename: the destination is never observed half-written.
fn atomic_write(path: &Path, contents: &str) -> Result<(), GrowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| GrowError::Io(parent.to_path_buf(), e.to_string()))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents).map_err(|e| GrowError::Io(tmp.clone(), e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| GrowError::Io(path.to_path_buf(), e.to_string()))
}

fn restore(path: &Path, prev: &Option<String>) -> Result<(), GrowError> {
    match prev {
        Some(contents) => atomic_write(path, contents),
        None => match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GrowError::Io(path.to_path_buf(), e.to_string())),
        },
    }
}

/// Tracks JIT usage and performs threshold-gated promotion.
pub struct JitPromoter {
    spec_root: PathBuf,
    impl_root: PathBuf,
    token_dir: PathBuf,
    stats: RwLock<HashMap<String, UsageStats>>,
}

impl JitPromoter {
    pub fn new(spec_root: impl Into<PathBuf>, impl_root: impl Into<PathBuf>) -> Self {
        let spec_root = spec_root.into();
        let token_dir = spec_root.join(".rollback");
        Self {
            spec_root,
            impl_root: impl_root.into(),
            token_dir,
            stats: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_token_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.token_dir = dir.into();
        self
    }

    /// Record one invocation outcome for a JIT handle.
    pub fn record_invocation(&self, handle: &str, ok: bool) {
        let mut stats = self.stats.write().expect("promoter stats poisoned");
        let entry = stats.entry(handle.to_string()).or_default();
        entry.usage += 1;
        if ok {
            entry.successes += 1;
        }
    }

    pub fn stats(&self, handle: &str) -> UsageStats {
        self.stats
            .read()
            .expect("promoter stats poisoned")
            .get(handle)
            .copied()
            .unwrap_or_default()
    }

    pub fn eligible(&self, handle: &str, thresholds: PromotionThresholds) -> bool {
        let stats = self.stats(handle);
        stats.usage >= thresholds.min_usage && stats.success_rate() >= thresholds.min_success_rate
    }

    /// Promote a spec: write spec + impl files, return the rollback token.
    pub fn promote(
        &self,
        spec: &ParsedSpec,
        thresholds: PromotionThresholds,
    ) -> Result<RollbackToken, GrowError> {
        let handle = spec
            .path
            .clone()
            .ok_or_else(|| GrowError::SpecParse("spec declares no agentese path".into()))?;
        let stats = self.stats(&handle);
        if !self.eligible(&handle, thresholds) {
            return Err(GrowError::NotEligible {
                handle,
                usage: stats.usage,
                success_rate: stats.success_rate(),
            });
        }

        let context = spec.context().unwrap_or("world");
        let entity = spec.entity().unwrap_or("node");
        let spec_path = self.spec_root.join(context).join(format!("{entity}.md"));
        let impl_path = self.impl_root.join(format!("{handle}.rs"));

        let spec_prev = std::fs::read_to_string(&spec_path).ok();
        let impl_prev = std::fs::read_to_string(&impl_path).ok();

        let spec_text = emit_spec(spec)?;
        let impl_text = generate_source(spec)?;
        atomic_write(&spec_path, &spec_text)?;
        atomic_write(&impl_path, &impl_text)?;

        let token = RollbackToken {
            id: Uuid::new_v4(),
            handle: handle.clone(),
            spec_path,
            impl_path,
            spec_hash: sha256_hex(&spec_text),
            impl_hash: sha256_hex(&impl_text),
            spec_prev,
            impl_prev,
            created_at: Utc::now(),
            ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        };
        self.persist_token(&token)?;
        info!(
            target: "agentese::promoter",
            handle = %handle,
            token = %token.id,
            usage = stats.usage,
            "JIT node promoted"
        );
        Ok(token)
    }

    fn token_path(&self, id: Uuid) -> PathBuf {
        self.token_dir.join(format!("{id}.json"))
    }

    fn persist_token(&self, token: &RollbackToken) -> Result<(), GrowError> {
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| GrowError::SpecParse(format!("token serialize: {e}")))?;
        atomic_write(&self.token_path(token.id), &json)
    }

    pub fn load_token(&self, id: Uuid) -> Result<RollbackToken, GrowError> {
        let path = self.token_path(id);
        let text = std::fs::read_to_string(&path)
            .map_err(|_| GrowError::TokenMissing(id.to_string()))?;
        serde_json::from_str(&text).map_err(|e| GrowError::SpecParse(format!("token parse: {e}")))
    }

    pub fn list_tokens(&self) -> Vec<RollbackToken> {
        let Ok(entries) = std::fs::read_dir(&self.token_dir) else {
            return Vec::new();
        };
        let mut tokens: Vec<RollbackToken> = entries
            .flatten()
            .filter_map(|e| std::fs::read_to_string(e.path()).ok())
            .filter_map(|text| serde_json::from_str(&text).ok())
            .collect();
        tokens.sort_by_key(|t: &RollbackToken| t.created_at);
        tokens
    }

    /// Restore the pre-promotion file set bit-for-bit. The token is consumed.
    pub fn rollback(&self, token: &RollbackToken) -> Result<(), GrowError> {
        if token.expired(Utc::now()) {
            warn!(
                target: "agentese::promoter",
                handle = %token.handle,
                token = %token.id,
                "rollback refused: token expired"
            );
            return Err(GrowError::TokenExpired(token.id.to_string()));
        }
        restore(&token.spec_path, &token.spec_prev)?;
        restore(&token.impl_path, &token.impl_prev)?;
        let _ = std::fs::remove_file(self.token_path(token.id));
        info!(
            target: "agentese::promoter",
            handle = %token.handle,
            token = %token.id,
            "promotion rolled back"
        );
        Ok(())
    }
}
