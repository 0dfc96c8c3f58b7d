//! Path grammar: `context.holon[.sub…][:aspect][?clause=…][@annotation=…]`.
//!
//! Exactly one context root (`world`, `self`, `concept`, `void`, `time`), one
//! or zero aspects, any number of `?clause=value` operational modifiers and
//! `@annotation=value` metadata markers. Parsed paths are immutable; clause
//! and annotation maps are ordered so `full_path()` is canonical and
//! `parse(p.full_path()) == p` round-trips.
//!
//! Signifiers (`⟿[PHASE]`, `⟂[PHASE:reason]`) are a separate sentinel grammar
//! over *trailing output text*, never part of the path itself. See
//! [`strip_signifiers`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AgentesError, Locus, Result};

// ---------------------------------------------------------------------------
// Context roots
// ---------------------------------------------------------------------------

/// The five context roots. `Selfhood` serializes as `self` (a Rust keyword).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    World,
    #[serde(rename = "self")]
    Selfhood,
    Concept,
    Void,
    Time,
}

impl Context {
    pub const ALL: [Context; 5] = [
        Context::World,
        Context::Selfhood,
        Context::Concept,
        Context::Void,
        Context::Time,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Context::World => "world",
            Context::Selfhood => "self",
            Context::Concept => "concept",
            Context::Void => "void",
            Context::Time => "time",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "world" => Some(Context::World),
            "self" => Some(Context::Selfhood),
            "concept" => Some(Context::Concept),
            "void" => Some(Context::Void),
            "time" => Some(Context::Time),
            _ => None,
        }
    }

    /// True when `s` names a reserved context root (cannot be aliased over).
    pub fn is_reserved(s: &str) -> bool {
        Self::parse(s).is_some()
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parser configuration
// ---------------------------------------------------------------------------

/// Clause names the fabric understands.
pub const KNOWN_CLAUSES: [&str; 3] = ["phase", "entropy", "span"];
/// Annotation names the fabric understands.
pub const KNOWN_ANNOTATIONS: [&str; 5] =
    ["locus", "law_check", "rollback", "minimal_output", "soft"];

/// Validation options for [`parse_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserConfig {
    /// Disallow unknown clause/annotation names and duplicate clauses.
    pub strict: bool,
    /// Reject a numeric `entropy` clause outside `[0, ∞)`.
    pub validate_entropy: bool,
}

// ---------------------------------------------------------------------------
// ParsedPath
// ---------------------------------------------------------------------------

/// An immutable parsed path. Construct via [`parse`] or [`parse_with`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPath {
    context: Context,
    segments: Vec<String>,
    aspect: Option<String>,
    clauses: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl ParsedPath {
    pub fn context(&self) -> Context {
        self.context
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn aspect(&self) -> Option<&str> {
        self.aspect.as_deref()
    }

    pub fn clauses(&self) -> &BTreeMap<String, String> {
        &self.clauses
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// The `entropy` clause as a float, if present and well-formed.
    pub fn entropy_clause(&self) -> Option<f64> {
        self.clauses.get("entropy").and_then(|v| v.parse().ok())
    }

    /// True when the annotation is present with value `on` or `true`.
    pub fn annotation_on(&self, name: &str) -> bool {
        matches!(
            self.annotations.get(name).map(String::as_str),
            Some("on") | Some("true")
        )
    }

    /// `context.holon`: the canonical node handle.
    pub fn node_path(&self) -> String {
        format!("{}.{}", self.context, self.segments[0])
    }

    /// Context plus all segments, no aspect or modifiers.
    pub fn holon_path(&self) -> String {
        let mut out = self.context.as_str().to_string();
        for seg in &self.segments {
            out.push('.');
            out.push_str(seg);
        }
        out
    }

    /// Path with aspect but without clause/annotation modifiers.
    pub fn base_path(&self) -> String {
        let mut out = self.holon_path();
        if let Some(aspect) = &self.aspect {
            out.push(':');
            out.push_str(aspect);
        }
        out
    }

    /// Canonical printable form; round-trips through [`parse`].
    pub fn full_path(&self) -> String {
        let mut out = self.base_path();
        for (k, v) in &self.clauses {
            out.push('?');
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        for (k, v) in &self.annotations {
            out.push('@');
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    /// Copy of this path with the trailing segment reinterpreted as the
    /// aspect. Used by the resolver when a dotted path like
    /// `world.garden.manifest` names `world.garden`'s `manifest` verb.
    pub fn shift_last_segment_to_aspect(&self) -> Option<ParsedPath> {
        if self.aspect.is_some() || self.segments.len() < 2 {
            return None;
        }
        let mut shifted = self.clone();
        shifted.aspect = shifted.segments.pop();
        Some(shifted)
    }
}

impl std::fmt::Display for ParsedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_path())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse with default options.
pub fn parse(input: &str) -> Result<ParsedPath> {
    parse_with(input, ParserConfig::default())
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

/// Parse with explicit [`ParserConfig`].
pub fn parse_with(input: &str, config: ParserConfig) -> Result<ParsedPath> {
    if input.trim().is_empty() {
        return Err(AgentesError::PathSyntax {
            locus: Locus::at(0),
            reason: "empty path".into(),
        });
    }

    // Head runs until the first modifier sigil.
    let head_end = input.find(['?', '@']).unwrap_or(input.len());
    let (head, tail) = input.split_at(head_end);

    // Aspect split: at most one ':'.
    let (dotted, aspect) = match head.find(':') {
        Some(idx) => {
            let aspect = &head[idx + 1..];
            if aspect.contains(':') {
                return Err(AgentesError::PathSyntax {
                    locus: Locus::at(idx + 1 + aspect.find(':').unwrap_or(0)),
                    reason: "a path carries at most one aspect".into(),
                });
            }
            if !is_identifier(aspect) {
                return Err(AgentesError::PathSyntax {
                    locus: Locus::at(idx + 1),
                    reason: format!("invalid aspect '{aspect}'"),
                });
            }
            (&head[..idx], Some(aspect.to_string()))
        }
        None => (head, None),
    };

    // Context + segments.
    let mut parts = dotted.split('.');
    let context_str = parts.next().unwrap_or_default();
    let context = Context::parse(context_str).ok_or_else(|| AgentesError::PathSyntax {
        locus: Locus::at(0),
        reason: format!(
            "unknown context '{context_str}' (expected one of world, self, concept, void, time)"
        ),
    })?;

    let mut segments = Vec::new();
    let mut offset = context_str.len();
    for part in parts {
        offset += 1; // the dot
        if !is_identifier(part) {
            return Err(AgentesError::PathSyntax {
                locus: Locus::at(offset),
                reason: if part.is_empty() {
                    "empty segment".into()
                } else {
                    format!("invalid segment '{part}'")
                },
            });
        }
        segments.push(part.to_string());
        offset += part.len();
    }
    if segments.is_empty() {
        return Err(AgentesError::PathSyntax {
            locus: Locus::at(context_str.len()),
            reason: "a path needs at least one holon segment".into(),
        });
    }

    // Modifiers: `?k=v` clauses and `@k=v` annotations, in any order.
    let mut clauses = BTreeMap::new();
    let mut annotations = BTreeMap::new();
    let mut rest = tail;
    let mut cursor = head_end;
    while !rest.is_empty() {
        let sigil = rest.chars().next().unwrap_or('?');
        let body = &rest[sigil.len_utf8()..];
        let end = body.find(['?', '@']).unwrap_or(body.len());
        let token = &body[..end];
        let eq = token.find('=').ok_or_else(|| syntax_for_sigil(sigil, cursor, "missing '='"))?;
        let (name, value) = (&token[..eq], &token[eq + 1..]);
        if !is_identifier(name) {
            return Err(syntax_for_sigil(sigil, cursor, &format!("invalid name '{name}'")));
        }
        if value.is_empty() {
            return Err(syntax_for_sigil(sigil, cursor, "empty value"));
        }
        match sigil {
            '?' => {
                if config.strict && !KNOWN_CLAUSES.contains(&name) {
                    return Err(AgentesError::ClauseSyntax {
                        locus: Locus::at(cursor),
                        reason: format!("unknown clause '{name}'"),
                    });
                }
                // Duplicate: last wins, but strict mode refuses.
                if clauses.insert(name.to_string(), value.to_string()).is_some() && config.strict {
                    return Err(AgentesError::ClauseSyntax {
                        locus: Locus::at(cursor),
                        reason: format!("duplicate clause '{name}'"),
                    });
                }
            }
            _ => {
                if config.strict && !KNOWN_ANNOTATIONS.contains(&name) {
                    return Err(AgentesError::AnnotationSyntax {
                        locus: Locus::at(cursor),
                        reason: format!("unknown annotation '{name}'"),
                    });
                }
                annotations.insert(name.to_string(), value.to_string());
            }
        }
        cursor += sigil.len_utf8() + end;
        rest = &body[end..];
    }

    if config.validate_entropy {
        if let Some(raw) = clauses.get("entropy") {
            let parsed: std::result::Result<f64, _> = raw.parse();
            match parsed {
                Ok(v) if v >= 0.0 && v.is_finite() => {}
                _ => {
                    return Err(AgentesError::ClauseSyntax {
                        locus: Locus::at(head_end),
                        reason: format!("entropy clause '{raw}' must be a finite float >= 0"),
                    })
                }
            }
        }
    }

    Ok(ParsedPath {
        context,
        segments,
        aspect,
        clauses,
        annotations,
    })
}

fn syntax_for_sigil(sigil: char, at: usize, reason: &str) -> AgentesError {
    if sigil == '?' {
        AgentesError::ClauseSyntax { locus: Locus::at(at), reason: reason.into() }
    } else {
        AgentesError::AnnotationSyntax { locus: Locus::at(at), reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// Signifiers: N-phase control markers in trailing output text
// ---------------------------------------------------------------------------

/// Continue-to-phase (`⟿`) or halt-with-reason (`⟂`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inducer {
    Continue,
    Halt,
}

/// A parsed N-phase marker. `payload` carries `k=v` arguments for Continue
/// and the halt reason under `reason` for Halt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSignifier {
    pub inducer: Inducer,
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: BTreeMap<String, String>,
}

impl ParsedSignifier {
    pub fn halt_reason(&self) -> Option<&str> {
        match self.inducer {
            Inducer::Halt => self.payload.get("reason").map(String::as_str),
            Inducer::Continue => None,
        }
    }

    /// Wire form; round-trips through [`parse_signifiers`].
    pub fn to_text(&self) -> String {
        match self.inducer {
            Inducer::Continue => {
                if self.payload.is_empty() {
                    format!("\u{27FF}[{}]", self.target)
                } else {
                    let args: Vec<String> =
                        self.payload.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    format!("\u{27FF}[{}, {}]", self.target, args.join(", "))
                }
            }
            Inducer::Halt => format!(
                "\u{27C2}[{}:{}]",
                self.target,
                self.payload.get("reason").map(String::as_str).unwrap_or("")
            ),
        }
    }
}

static CONTINUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\u{27FF}\[([A-Za-z_][A-Za-z0-9_-]*)((?:,\s*[A-Za-z_][A-Za-z0-9_-]*=[^,\]]+)*)\]")
        .expect("continue signifier regex")
});
static HALT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\u{27C2}\[([A-Za-z_][A-Za-z0-9_-]*):([^\]]*)\]").expect("halt signifier regex")
});

/// Parse all signifiers from the trailing line of free text.
pub fn parse_signifiers(text: &str) -> Vec<ParsedSignifier> {
    let last_line = match text.trim_end().lines().last() {
        Some(line) => line,
        None => return Vec::new(),
    };
    let mut found: Vec<(usize, ParsedSignifier)> = Vec::new();
    for caps in CONTINUE_RE.captures_iter(last_line) {
        let whole = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let mut payload = BTreeMap::new();
        if let Some(args) = caps.get(2) {
            for arg in args.as_str().split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if let Some((k, v)) = arg.split_once('=') {
                    payload.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }
        found.push((
            whole,
            ParsedSignifier {
                inducer: Inducer::Continue,
                target: caps[1].to_string(),
                payload,
            },
        ));
    }
    for caps in HALT_RE.captures_iter(last_line) {
        let whole = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let mut payload = BTreeMap::new();
        payload.insert("reason".to_string(), caps[2].to_string());
        found.push((
            whole,
            ParsedSignifier {
                inducer: Inducer::Halt,
                target: caps[1].to_string(),
                payload,
            },
        ));
    }
    found.sort_by_key(|(at, _)| *at);
    found.into_iter().map(|(_, s)| s).collect()
}

/// Remove the trailing signifier line and return `(clean_text, markers)`.
/// Text without markers is returned untouched.
pub fn strip_signifiers(text: &str) -> (String, Vec<ParsedSignifier>) {
    let markers = parse_signifiers(text);
    if markers.is_empty() {
        return (text.to_string(), markers);
    }
    let trimmed = text.trim_end();
    let clean = match trimmed.rfind('\n') {
        Some(idx) => trimmed[..idx].trim_end().to_string(),
        None => String::new(),
    };
    (clean, markers)
}
