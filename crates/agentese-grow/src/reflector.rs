//! Reflection: read an implementation file back into a best-effort spec.
//!
//! Promoted implementations carry a machine-readable signature header (see
//! `synth::generate_source`); the reflector scans it with regular expressions
//! and reconstructs the polynomial/operad/aspect/path sections. Used by the
//! drift auditor and for reverse-engineering specs from hand-edited impls.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::specfile::{
    OperadSection, ParsedSpec, PolynomialSection, ServiceSection, SpecAspect,
};

static PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^//\s*agentese:\s*(\S+)").expect("path regex"));
static POSITIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^//\s*polynomial\.positions:\s*(.+)$").expect("positions regex"));
static DIRECTIONS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^//\s*polynomial\.directions:\s*(\S+)\s*->\s*(.+)$").expect("directions regex")
});
static OPERATIONS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^//\s*operad\.operations:\s*(.+)$").expect("operations regex"));
static LAWS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^//\s*operad\.laws:\s*(.+)$").expect("laws regex"));
static SERVICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^//\s*service\.dependencies:\s*(.+)$").expect("service regex")
});
static ASPECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^//\s*aspect:\s*(\S+)\s*(.*)$").expect("aspect regex"));
static ASPECT_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+)=(\S+)").expect("aspect attr regex"));

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Extract a best-effort spec from implementation source text.
pub fn reflect(source: &str) -> ParsedSpec {
    let path = PATH_RE.captures(source).map(|c| c[1].to_string());

    let positions = POSITIONS_RE
        .captures(source)
        .map(|c| comma_list(&c[1]))
        .unwrap_or_default();
    let mut directions = BTreeMap::new();
    for caps in DIRECTIONS_RE.captures_iter(source) {
        directions.insert(
            caps[1].to_string(),
            caps[2].split('|').map(str::trim).map(str::to_string).collect(),
        );
    }
    let polynomial = if positions.is_empty() && directions.is_empty() {
        None
    } else {
        Some(PolynomialSection { positions, directions })
    };

    let operations = OPERATIONS_RE
        .captures(source)
        .map(|c| comma_list(&c[1]))
        .unwrap_or_default();
    let laws: Vec<String> = LAWS_RE
        .captures_iter(source)
        .map(|c| c[1].trim().to_string())
        .collect();
    let operad = if operations.is_empty() && laws.is_empty() {
        None
    } else {
        Some(OperadSection { operations, laws })
    };

    let service = SERVICE_RE
        .captures(source)
        .map(|c| ServiceSection { dependencies: comma_list(&c[1]) });

    let mut aspects = Vec::new();
    for caps in ASPECT_RE.captures_iter(source) {
        let mut aspect = SpecAspect {
            name: caps[1].to_string(),
            category: "perception".into(),
            effects: Vec::new(),
            cost: None,
            requires_archetype: Vec::new(),
        };
        for attr in ASPECT_ATTR_RE.captures_iter(&caps[2]) {
            match &attr[1] {
                "category" => aspect.category = attr[2].to_string(),
                "cost" => aspect.cost = attr[2].parse().ok(),
                "effects" => aspect.effects = comma_list(&attr[2]),
                "requires" => aspect.requires_archetype = comma_list(&attr[2]),
                _ => {}
            }
        }
        aspects.push(aspect);
    }

    let mut layer_count = 0u8;
    for present in [
        polynomial.is_some(),
        operad.is_some(),
        !aspects.is_empty(),
        path.is_some(),
        service.is_some(),
        false, // lineage never survives into the impl
    ] {
        if present {
            layer_count += 1;
        }
    }

    ParsedSpec {
        path,
        polynomial,
        operad,
        aspects,
        service,
        lineage: None,
        body: String::new(),
        layer_count,
    }
}
