//! User-defined path aliases with persistence and shadowing rules.
//!
//! An alias binds a prefix to a target prefix (`me -> self`); expansion is
//! longest-prefix on segment boundaries and never rewrites aspects. Reserved
//! context roots cannot be shadowed, and an alias whose expansion chain loops
//! is rejected at registration. The on-disk format is a human-editable YAML
//! mapping.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::{AgentesError, Result};
use crate::path::Context;

/// Alias bindings plus optional backing file.
pub struct AliasRegistry {
    bindings: RwLock<BTreeMap<String, String>>,
    file: Option<PathBuf>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(BTreeMap::new()),
            file: None,
        }
    }

    /// Registry backed by a YAML file. Loads existing bindings when present.
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self> {
        let registry = Self {
            bindings: RwLock::new(BTreeMap::new()),
            file: Some(path.as_ref().to_path_buf()),
        };
        if path.as_ref().exists() {
            registry.load()?;
        }
        Ok(registry)
    }

    /// Bind `alias -> target`. Rejects reserved roots and expansion cycles.
    pub fn register(&self, alias: &str, target: &str) -> Result<()> {
        if Context::is_reserved(alias) {
            return Err(AgentesError::AliasShadow { alias: alias.to_string() });
        }
        {
            let mut bindings = self.bindings.write().expect("alias registry poisoned");
            bindings.insert(alias.to_string(), target.to_string());
            // Walk the chain from the new alias; reaching it again means recursion.
            let mut chain = vec![alias.to_string()];
            let mut head = first_segment(target).to_string();
            loop {
                if head == alias {
                    chain.push(head);
                    bindings.remove(alias);
                    return Err(AgentesError::AliasRecursion { alias: alias.to_string(), chain });
                }
                if chain.contains(&head) {
                    break;
                }
                let Some(next) = bindings.get(&head).cloned() else {
                    break;
                };
                chain.push(head);
                head = first_segment(&next).to_string();
            }
        }
        debug!(target: "agentese::alias", alias, target, "alias registered");
        Ok(())
    }

    pub fn unregister(&self, alias: &str) -> Result<()> {
        let mut bindings = self.bindings.write().expect("alias registry poisoned");
        bindings
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| AgentesError::AliasNotFound { alias: alias.to_string() })
    }

    /// Expand the leading alias prefix, longest match first. Idempotent:
    /// `expand(expand(x)) == expand(x)`.
    pub fn expand(&self, path: &str) -> String {
        let bindings = self.bindings.read().expect("alias registry poisoned");
        let mut current = path.to_string();
        // Bounded walk: each hop consumes one alias; cycles are rejected at
        // registration, the bound is a corruption guard.
        for _ in 0..bindings.len() + 1 {
            let Some((alias, target)) = longest_prefix_match(&bindings, &current) else {
                break;
            };
            let rest = &current[alias.len()..];
            current = format!("{target}{rest}");
        }
        current
    }

    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.bindings.read().expect("alias registry poisoned").clone()
    }

    /// Write bindings to the backing YAML file.
    pub fn save(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let bindings = self.bindings.read().expect("alias registry poisoned");
        let yaml = serde_yml::to_string(&*bindings).map_err(|e| AgentesError::Handler {
            path: "alias".into(),
            aspect: "save".into(),
            inner: e.to_string(),
        })?;
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).map_err(io_err("save"))?;
        }
        std::fs::write(file, yaml).map_err(io_err("save"))?;
        info!(target: "agentese::alias", file = %file.display(), "aliases saved");
        Ok(())
    }

    /// Re-read the backing file. Idempotent; existing in-memory bindings with
    /// the same keys are overwritten.
    pub fn load(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let text = std::fs::read_to_string(file).map_err(io_err("load"))?;
        let loaded: BTreeMap<String, String> =
            serde_yml::from_str(&text).map_err(|e| AgentesError::Handler {
                path: "alias".into(),
                aspect: "load".into(),
                inner: e.to_string(),
            })?;
        let mut bindings = self.bindings.write().expect("alias registry poisoned");
        for (alias, target) in loaded {
            if Context::is_reserved(&alias) {
                return Err(AgentesError::AliasShadow { alias });
            }
            bindings.insert(alias, target);
        }
        Ok(())
    }
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn io_err(op: &'static str) -> impl Fn(std::io::Error) -> AgentesError {
    move |e| AgentesError::Handler {
        path: "alias".into(),
        aspect: op.into(),
        inner: e.to_string(),
    }
}

fn first_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Longest alias that matches a leading run of whole segments.
fn longest_prefix_match<'a>(
    bindings: &'a BTreeMap<String, String>,
    path: &str,
) -> Option<(&'a str, &'a str)> {
    let mut best: Option<(&str, &str)> = None;
    for (alias, target) in bindings {
        let matches = path == alias
            || (path.starts_with(alias)
                && matches!(path.as_bytes().get(alias.len()), Some(b'.') | Some(b':')));
        if matches && best.map(|(a, _)| alias.len() > a.len()).unwrap_or(true) {
            best = Some((alias, target));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_prefix_only() {
        let reg = AliasRegistry::new();
        reg.register("me", "self").unwrap();
        assert_eq!(reg.expand("me.memory.engram"), "self.memory.engram");
        assert_eq!(reg.expand("me:manifest"), "self:manifest");
        // Not a segment boundary: untouched.
        assert_eq!(reg.expand("memory.me"), "memory.me");
    }

    #[test]
    fn longest_prefix_wins() {
        let reg = AliasRegistry::new();
        reg.register("g", "world.garden").unwrap();
        reg.register("g.inner", "world.garden.greenhouse").unwrap();
        assert_eq!(reg.expand("g.inner.rows"), "world.garden.greenhouse.rows");
        assert_eq!(reg.expand("g.rows"), "world.garden.rows");
    }

    #[test]
    fn expansion_is_idempotent() {
        let reg = AliasRegistry::new();
        reg.register("me", "self").unwrap();
        reg.register("garden", "world.garden").unwrap();
        for p in ["me.memory", "garden.manifest", "void.sink"] {
            let once = reg.expand(p);
            assert_eq!(reg.expand(&once), once);
        }
    }

    #[test]
    fn reserved_roots_cannot_be_shadowed() {
        let reg = AliasRegistry::new();
        for root in ["world", "self", "concept", "void", "time"] {
            let err = reg.register(root, "world.other").unwrap_err();
            assert_eq!(err.kind(), "alias_shadow");
        }
    }

    #[test]
    fn recursion_rejected() {
        let reg = AliasRegistry::new();
        reg.register("a", "b.x").unwrap();
        let err = reg.register("b", "a.y").unwrap_err();
        assert_eq!(err.kind(), "alias_recursion");
        // The failed registration must not leave the cycle behind.
        assert_eq!(reg.expand("b.z"), "b.z");
    }

    #[test]
    fn self_recursion_rejected() {
        let reg = AliasRegistry::new();
        let err = reg.register("loop", "loop.deeper").unwrap_err();
        assert_eq!(err.kind(), "alias_recursion");
    }

    #[test]
    fn unregister_unknown_fails() {
        let reg = AliasRegistry::new();
        assert_eq!(reg.unregister("ghost").unwrap_err().kind(), "alias_not_found");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("aliases.yaml");
        let reg = AliasRegistry::with_file(&file).unwrap();
        reg.register("me", "self").unwrap();
        reg.register("garden", "world.garden").unwrap();
        reg.save().unwrap();

        let reloaded = AliasRegistry::with_file(&file).unwrap();
        assert_eq!(reloaded.expand("me.memory"), "self.memory");
        // load is idempotent
        reloaded.load().unwrap();
        assert_eq!(reloaded.aliases().len(), 2);
    }
}
