//! SpecGraph file parsing: markdown with YAML frontmatter.
//!
//! A spec file opens with a `---` fenced YAML block carrying up to six
//! sections (`polynomial`, `operad`, `aspects`, `agentese`, `service`,
//! `lineage`) followed by free markdown. Missing sections are tolerated;
//! `layer_count` records how many were present so drift audits can tell a
//! thin spec from a rich one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::GrowError;

/// Polynomial functor shape: positions and their directions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolynomialSection {
    #[serde(default)]
    pub positions: Vec<String>,
    #[serde(default)]
    pub directions: BTreeMap<String, Vec<String>>,
}

/// Operad: operations plus the laws they satisfy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperadSection {
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub laws: Vec<String>,
}

/// One declared aspect: name, category, declared effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecAspect {
    pub name: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub effects: Vec<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub requires_archetype: Vec<String>,
}

fn default_category() -> String {
    "perception".to_string()
}

/// Service wiring: declared dependencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSection {
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Lineage declaration for the lattice checker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageSection {
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Raw frontmatter shape.
#[derive(Debug, Clone, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    polynomial: Option<PolynomialSection>,
    #[serde(default)]
    operad: Option<OperadSection>,
    #[serde(default)]
    aspects: Option<Vec<SpecAspect>>,
    #[serde(default)]
    agentese: Option<String>,
    #[serde(default)]
    service: Option<ServiceSection>,
    #[serde(default)]
    lineage: Option<LineageSection>,
}

/// A fully parsed spec file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSpec {
    /// AGENTESE path (`context.holon`), when declared.
    pub path: Option<String>,
    pub polynomial: Option<PolynomialSection>,
    pub operad: Option<OperadSection>,
    pub aspects: Vec<SpecAspect>,
    pub service: Option<ServiceSection>,
    pub lineage: Option<LineageSection>,
    /// Markdown body after the frontmatter fence.
    pub body: String,
    /// Number of frontmatter sections present (0–6).
    pub layer_count: u8,
}

impl ParsedSpec {
    /// The holon name (last path segment), for file naming.
    pub fn entity(&self) -> Option<&str> {
        self.path.as_deref().and_then(|p| p.rsplit('.').next())
    }

    /// The context root, for spec-root subdirectories.
    pub fn context(&self) -> Option<&str> {
        self.path.as_deref().and_then(|p| p.split('.').next())
    }
}

/// Parse a spec file's full text.
pub fn parse_spec(text: &str) -> Result<ParsedSpec, GrowError> {
    let (frontmatter, body) = split_frontmatter(text)?;
    let raw: Frontmatter = match frontmatter {
        Some(yaml) => serde_yml::from_str(&yaml)
            .map_err(|e| GrowError::SpecParse(format!("frontmatter: {e}")))?,
        None => Frontmatter::default(),
    };

    let mut layer_count = 0u8;
    for present in [
        raw.polynomial.is_some(),
        raw.operad.is_some(),
        raw.aspects.is_some(),
        raw.agentese.is_some(),
        raw.service.is_some(),
        raw.lineage.is_some(),
    ] {
        if present {
            layer_count += 1;
        }
    }

    Ok(ParsedSpec {
        path: raw.agentese,
        polynomial: raw.polynomial,
        operad: raw.operad,
        aspects: raw.aspects.unwrap_or_default(),
        service: raw.service,
        lineage: raw.lineage,
        body: body.to_string(),
        layer_count,
    })
}

/// Render a spec back to file form (frontmatter + body). Round-trips through
/// [`parse_spec`].
pub fn emit_spec(spec: &ParsedSpec) -> Result<String, GrowError> {
    #[derive(Serialize)]
    struct Out {
        #[serde(skip_serializing_if = "Option::is_none")]
        polynomial: Option<PolynomialSection>,
        #[serde(skip_serializing_if = "Option::is_none")]
        operad: Option<OperadSection>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        aspects: Vec<SpecAspect>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agentese: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        service: Option<ServiceSection>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lineage: Option<LineageSection>,
    }
    let yaml = serde_yml::to_string(&Out {
        polynomial: spec.polynomial.clone(),
        operad: spec.operad.clone(),
        aspects: spec.aspects.clone(),
        agentese: spec.path.clone(),
        service: spec.service.clone(),
        lineage: spec.lineage.clone(),
    })
    .map_err(|e| GrowError::SpecParse(format!("emit: {e}")))?;
    Ok(format!("---\n{yaml}---\n{}", spec.body))
}

fn split_frontmatter(text: &str) -> Result<(Option<String>, &str), GrowError> {
    let trimmed = text.trim_start_matches('\u{feff}');
    let Some(rest) = trimmed.strip_prefix("---\n") else {
        return Ok((None, trimmed));
    };
    match rest.find("\n---") {
        Some(end) => {
            let yaml = &rest[..end + 1];
            let after = &rest[end + 4..];
            let body = after.strip_prefix('\n').unwrap_or(after);
            Ok((Some(yaml.to_string()), body))
        }
        None => Err(GrowError::SpecParse("unterminated frontmatter fence".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORCHARD: &str = r#"---
agentese: world.orchard
polynomial:
  positions:
    - dormant
    - fruiting
  directions:
    dormant:
      - wait
      - prune
    fruiting:
      - harvest
operad:
  operations:
    - graft
    - harvest
  laws:
    - "graft . harvest = harvest . graft"
aspects:
  - name: manifest
    category: perception
    cost: 0.1
  - name: harvest
    category: action
    effects:
      - "writes:basket"
    requires_archetype:
      - architect
service:
  dependencies:
    - memory_store
lineage:
  extends:
    - concept.grove
  justification: an orchard is a cultivated grove
---
# Orchard

Trees in rows.
"#;

    #[test]
    fn parses_all_sections() {
        let spec = parse_spec(ORCHARD).unwrap();
        assert_eq!(spec.path.as_deref(), Some("world.orchard"));
        assert_eq!(spec.layer_count, 6);
        assert_eq!(spec.entity(), Some("orchard"));
        assert_eq!(spec.context(), Some("world"));
        assert_eq!(spec.polynomial.as_ref().unwrap().positions.len(), 2);
        assert_eq!(spec.operad.as_ref().unwrap().operations, vec!["graft", "harvest"]);
        assert_eq!(spec.aspects.len(), 2);
        assert_eq!(spec.aspects[1].requires_archetype, vec!["architect"]);
        assert_eq!(spec.service.as_ref().unwrap().dependencies, vec!["memory_store"]);
        assert!(spec.body.contains("Trees in rows"));
    }

    #[test]
    fn missing_sections_lower_layer_count() {
        let thin = "---\nagentese: void.sink\n---\nNothing much.\n";
        let spec = parse_spec(thin).unwrap();
        assert_eq!(spec.layer_count, 1);
        assert!(spec.aspects.is_empty());
        assert!(spec.polynomial.is_none());
    }

    #[test]
    fn no_frontmatter_is_tolerated() {
        let spec = parse_spec("just prose\n").unwrap();
        assert_eq!(spec.layer_count, 0);
        assert_eq!(spec.body, "just prose\n");
    }

    #[test]
    fn unterminated_fence_is_an_error() {
        assert!(parse_spec("---\nagentese: world.x\n").is_err());
    }

    #[test]
    fn emit_round_trips() {
        let spec = parse_spec(ORCHARD).unwrap();
        let emitted = emit_spec(&spec).unwrap();
        let reparsed = parse_spec(&emitted).unwrap();
        assert_eq!(spec, reparsed);
    }
}
