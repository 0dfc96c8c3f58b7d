//! Observer-dependent renderings.
//!
//! Every aspect returns a [`Rendering`]: a closed sum selected by the
//! observer's archetype (and sometimes the context). Each variant projects to
//! a dictionary (`to_dict`) and to display text (`to_text`). Unknown
//! archetypes fall back to [`Rendering::Basic`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
#[cfg(test)]
use serde_json::json;

use crate::path::Context;

/// The closed set of observer renderings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rendering", rename_all = "snake_case")]
pub enum Rendering {
    /// Structural view: components and their relations.
    Blueprint {
        title: String,
        components: Vec<String>,
        body: Value,
    },
    /// Imagistic view for poets.
    Poetic { verse: String, body: Value },
    /// Costs, balances, and yields.
    Economic {
        summary: String,
        gas: f64,
        impact: f64,
        body: Value,
    },
    /// Measurements and uncertainty.
    Scientific {
        hypothesis: String,
        observations: Value,
    },
    /// Raw payload plus handler metadata.
    Developer {
        handle: String,
        aspect: String,
        body: Value,
    },
    /// Operational counters for admins.
    Admin { status: String, body: Value },
    /// The question behind the answer.
    Philosopher { question: String, body: Value },
    /// Engram-shaped view of stored memory.
    Memory { engrams: Value },
    /// Budget/entropy framing of the same payload.
    Entropy { remaining: f64, body: Value },
    /// Timestamped view for the time context.
    Temporal { at: String, body: Value },
    /// Fallback for unknown archetypes.
    Basic { body: Value },
}

impl Rendering {
    /// Wrap an arbitrary payload in the fallback variant.
    pub fn basic(body: Value) -> Self {
        Rendering::Basic { body }
    }

    /// Dictionary projection used by structural equality in law checks.
    pub fn to_dict(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Human-readable projection.
    pub fn to_text(&self) -> String {
        match self {
            Rendering::Blueprint { title, components, .. } => {
                format!("[blueprint] {} ({} components)", title, components.len())
            }
            Rendering::Poetic { verse, .. } => verse.clone(),
            Rendering::Economic { summary, gas, impact, .. } => {
                format!("{summary} (gas {gas:.3}, impact {impact:.1})")
            }
            Rendering::Scientific { hypothesis, .. } => format!("H: {hypothesis}"),
            Rendering::Developer { handle, aspect, body } => {
                format!("{handle}:{aspect} => {body}")
            }
            Rendering::Admin { status, .. } => status.clone(),
            Rendering::Philosopher { question, .. } => question.clone(),
            Rendering::Memory { engrams } => format!("engrams: {engrams}"),
            Rendering::Entropy { remaining, body } => {
                format!("entropy {remaining:.3} remaining; {body}")
            }
            Rendering::Temporal { at, body } => format!("[{at}] {body}"),
            Rendering::Basic { body } => body.to_string(),
        }
    }

    /// The payload most variants carry; used when piping through compositions.
    pub fn body(&self) -> Value {
        match self {
            Rendering::Blueprint { body, .. }
            | Rendering::Poetic { body, .. }
            | Rendering::Economic { body, .. }
            | Rendering::Developer { body, .. }
            | Rendering::Admin { body, .. }
            | Rendering::Philosopher { body, .. }
            | Rendering::Entropy { body, .. }
            | Rendering::Temporal { body, .. }
            | Rendering::Basic { body } => body.clone(),
            Rendering::Scientific { observations, .. } => observations.clone(),
            Rendering::Memory { engrams } => engrams.clone(),
        }
    }
}

/// Pick the rendering shape for `(archetype, context)`. Handlers that do not
/// care about observer framing call this on their raw payload.
pub fn render_for(archetype: &str, context: Context, handle: &str, aspect: &str, body: Value) -> Rendering {
    match archetype {
        "architect" => Rendering::Blueprint {
            title: format!("{handle}:{aspect}"),
            components: body
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default(),
            body,
        },
        "poet" => Rendering::Poetic {
            verse: format!("{aspect} upon {handle}"),
            body,
        },
        "economist" => Rendering::Economic {
            summary: format!("{handle}:{aspect}"),
            gas: 0.0,
            impact: 0.0,
            body,
        },
        "scientist" => Rendering::Scientific {
            hypothesis: format!("{handle} affords {aspect}"),
            observations: body,
        },
        "developer" => Rendering::Developer {
            handle: handle.to_string(),
            aspect: aspect.to_string(),
            body,
        },
        "admin" => Rendering::Admin {
            status: format!("{handle}:{aspect} ok"),
            body,
        },
        "philosopher" => Rendering::Philosopher {
            question: format!("what does {aspect} reveal of {handle}?"),
            body,
        },
        _ => match context {
            Context::Time => Rendering::Temporal {
                at: chrono::Utc::now().to_rfc3339(),
                body,
            },
            _ => Rendering::Basic { body },
        },
    }
}

/// Convenience for memory-shaped payloads.
pub fn render_memory(engrams: Value) -> Rendering {
    Rendering::Memory { engrams }
}
