//! Drift audit: do the spec tree and the impl tree still agree?
//!
//! Walks `spec_root` for `*.md` and `impl_root` for `*.rs`, pairs files by
//! their declared AGENTESE path, and compares section signatures. Reports are
//! sorted by handle so `full_audit` is deterministic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reflector::reflect;
use crate::specfile::{parse_spec, ParsedSpec};
use crate::GrowError;

/// Pairing status for one handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftStatus {
    Aligned,
    SpecOnly,
    ImplOnly,
    Mismatch,
}

/// One audited handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub handle: String,
    pub status: DriftStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatched_sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impl_path: Option<PathBuf>,
}

/// What was found on disk before pairing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub spec_files: usize,
    pub impl_files: usize,
    pub unparseable_specs: Vec<PathBuf>,
}

/// The full audit result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub entries: Vec<AuditEntry>,
}

impl AuditReport {
    pub fn aligned(&self) -> usize {
        self.entries.iter().filter(|e| e.status == DriftStatus::Aligned).count()
    }

    pub fn drifted(&self) -> Vec<&AuditEntry> {
        self.entries.iter().filter(|e| e.status != DriftStatus::Aligned).collect()
    }
}

/// Compare the signature sections of a spec and a reflected impl.
/// Returns the names of the sections that disagree.
pub fn compare_sections(spec: &ParsedSpec, reflected: &ParsedSpec) -> Vec<String> {
    let mut mismatched = Vec::new();
    if spec.polynomial != reflected.polynomial {
        mismatched.push("polynomial".to_string());
    }
    if spec.operad != reflected.operad {
        mismatched.push("operad".to_string());
    }
    if spec.service != reflected.service {
        mismatched.push("service".to_string());
    }
    let spec_aspects: Vec<_> = spec.aspects.iter().map(|a| (&a.name, &a.category, &a.effects)).collect();
    let impl_aspects: Vec<_> =
        reflected.aspects.iter().map(|a| (&a.name, &a.category, &a.effects)).collect();
    if spec_aspects != impl_aspects {
        mismatched.push("aspects".to_string());
    }
    mismatched
}

fn walk_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// Walk both roots and audit every discovered handle.
pub fn full_audit(spec_root: &Path, impl_root: &Path) -> Result<(DiscoveryReport, AuditReport), GrowError> {
    let spec_files = walk_files(spec_root, "md");
    let impl_files = walk_files(impl_root, "rs");

    let mut discovery = DiscoveryReport {
        spec_files: spec_files.len(),
        impl_files: impl_files.len(),
        unparseable_specs: Vec::new(),
    };

    let mut specs: BTreeMap<String, (PathBuf, ParsedSpec)> = BTreeMap::new();
    for file in spec_files {
        let text = std::fs::read_to_string(&file)
            .map_err(|e| GrowError::Io(file.clone(), e.to_string()))?;
        match parse_spec(&text) {
            Ok(spec) => {
                if let Some(path) = spec.path.clone() {
                    specs.insert(path, (file, spec));
                } else {
                    discovery.unparseable_specs.push(file);
                }
            }
            Err(_) => discovery.unparseable_specs.push(file),
        }
    }

    let mut impls: BTreeMap<String, (PathBuf, ParsedSpec)> = BTreeMap::new();
    for file in impl_files {
        let text = std::fs::read_to_string(&file)
            .map_err(|e| GrowError::Io(file.clone(), e.to_string()))?;
        let reflected = reflect(&text);
        if let Some(path) = reflected.path.clone() {
            impls.insert(path, (file, reflected));
        }
    }

    let mut handles: Vec<String> = specs.keys().chain(impls.keys()).cloned().collect();
    handles.sort();
    handles.dedup();

    let mut entries = Vec::new();
    for handle in handles {
        let entry = match (specs.get(&handle), impls.get(&handle)) {
            (Some((spec_file, spec)), Some((impl_file, reflected))) => {
                let mismatched = compare_sections(spec, reflected);
                AuditEntry {
                    handle: handle.clone(),
                    status: if mismatched.is_empty() {
                        DriftStatus::Aligned
                    } else {
                        DriftStatus::Mismatch
                    },
                    mismatched_sections: mismatched,
                    spec_path: Some(spec_file.clone()),
                    impl_path: Some(impl_file.clone()),
                }
            }
            (Some((spec_file, _)), None) => AuditEntry {
                handle: handle.clone(),
                status: DriftStatus::SpecOnly,
                mismatched_sections: Vec::new(),
                spec_path: Some(spec_file.clone()),
                impl_path: None,
            },
            (None, Some((impl_file, _))) => AuditEntry {
                handle: handle.clone(),
                status: DriftStatus::ImplOnly,
                mismatched_sections: Vec::new(),
                spec_path: None,
                impl_path: Some(impl_file.clone()),
            },
            (None, None) => continue,
        };
        debug!(
            target: "agentese::drift",
            handle = %entry.handle,
            status = ?entry.status,
            "audited"
        );
        entries.push(entry);
    }

    Ok((discovery, AuditReport { entries }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specfile::parse_spec;
    use crate::synth::generate_source;

    fn write(path: &Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    const ORCHARD_SPEC: &str = "---\nagentese: world.orchard\noperad:\n  operations:\n    - graft\naspects:\n  - name: manifest\n    category: perception\n---\n";
    const GROVE_SPEC: &str = "---\nagentese: world.grove\naspects:\n  - name: manifest\n    category: perception\n---\n";

    #[test]
    fn full_audit_classifies_all_four_states() {
        let dir = tempfile::tempdir().unwrap();
        let spec_root = dir.path().join("spec");
        let impl_root = dir.path().join("impl");

        // Aligned pair.
        let orchard = parse_spec(ORCHARD_SPEC).unwrap();
        write(&spec_root.join("world/orchard.md"), ORCHARD_SPEC);
        write(&impl_root.join("world.orchard.rs"), &generate_source(&orchard).unwrap());

        // Spec-only.
        write(&spec_root.join("world/grove.md"), GROVE_SPEC);

        // Impl-only.
        write(
            &impl_root.join("void.sink.rs"),
            "// agentese: void.sink\n// aspect: manifest category=perception\n",
        );

        // Mismatch: same handle, different operad.
        write(
            &spec_root.join("self/memory.md"),
            "---\nagentese: self.memory\noperad:\n  operations:\n    - remember\naspects:\n  - name: engram\n    category: action\n---\n",
        );
        write(
            &impl_root.join("self.memory.rs"),
            "// agentese: self.memory\n// operad.operations: forget\n// aspect: engram category=action\n",
        );

        let (discovery, report) = full_audit(&spec_root, &impl_root).unwrap();
        assert_eq!(discovery.spec_files, 3);
        assert_eq!(discovery.impl_files, 3);

        let by_handle: BTreeMap<_, _> =
            report.entries.iter().map(|e| (e.handle.as_str(), e)).collect();
        assert_eq!(by_handle["world.orchard"].status, DriftStatus::Aligned);
        assert_eq!(by_handle["world.grove"].status, DriftStatus::SpecOnly);
        assert_eq!(by_handle["void.sink"].status, DriftStatus::ImplOnly);
        assert_eq!(by_handle["self.memory"].status, DriftStatus::Mismatch);
        assert_eq!(by_handle["self.memory"].mismatched_sections, vec!["operad"]);
    }

    #[test]
    fn audit_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let spec_root = dir.path().join("spec");
        let impl_root = dir.path().join("impl");
        write(&spec_root.join("world/orchard.md"), ORCHARD_SPEC);
        write(&spec_root.join("world/grove.md"), GROVE_SPEC);

        let first = full_audit(&spec_root, &impl_root).unwrap();
        let second = full_audit(&spec_root, &impl_root).unwrap();
        assert_eq!(first, second);
    }
}
