//! Spec-to-implementation synthesis.
//!
//! [`synthesize`] turns a [`ParsedSpec`] into a live [`SynthNode`] that can be
//! hot-mounted into the resolver, plus [`generate_source`] emits the
//! implementation file written to the impl root on promotion. Generated
//! handlers are referentially pure: output depends only on the aspect, the
//! spec, and the kwargs, so the category laws hold by construction (and are
//! verified on first composition anyway).

use std::sync::Arc;

use agentese_core::{
    render_for, AspectCategory, AspectMeta, Context, Node, Observer, Rendering,
};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::specfile::ParsedSpec;
use crate::GrowError;

/// Map a spec category string onto the fabric's aspect categories.
pub fn parse_category(raw: &str) -> AspectCategory {
    match raw {
        "action" => AspectCategory::Action,
        "composition" => AspectCategory::Composition,
        "meta" => AspectCategory::Meta,
        "stream" => AspectCategory::Stream,
        "lifecycle" => AspectCategory::Lifecycle,
        _ => AspectCategory::Perception,
    }
}

fn category_str(category: AspectCategory) -> &'static str {
    match category {
        AspectCategory::Perception => "perception",
        AspectCategory::Action => "action",
        AspectCategory::Composition => "composition",
        AspectCategory::Meta => "meta",
        AspectCategory::Stream => "stream",
        AspectCategory::Lifecycle => "lifecycle",
    }
}

/// A node synthesized from a spec at runtime.
#[derive(Debug)]
pub struct SynthNode {
    handle: String,
    context: Context,
    aspects: Vec<AspectMeta>,
    spec: ParsedSpec,
}

impl SynthNode {
    pub fn spec(&self) -> &ParsedSpec {
        &self.spec
    }
}

#[async_trait]
impl Node for SynthNode {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn aspects(&self) -> Vec<AspectMeta> {
        self.aspects.clone()
    }

    async fn invoke(
        &self,
        aspect: &str,
        observer: &Observer,
        kwargs: Value,
    ) -> agentese_core::Result<Rendering> {
        let declared = self
            .spec
            .aspects
            .iter()
            .find(|a| a.name == aspect)
            .ok_or_else(|| agentese_core::unknown_aspect(&self.handle, aspect))?;

        let positions: Vec<&str> = self
            .spec
            .polynomial
            .as_ref()
            .map(|p| p.positions.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let operations: Vec<&str> = self
            .spec
            .operad
            .as_ref()
            .map(|o| o.operations.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let body = json!({
            "handle": self.handle,
            "aspect": aspect,
            "category": declared.category,
            "effects": declared.effects,
            "positions": positions,
            "operations": operations,
            "input": kwargs.get("input").cloned().unwrap_or(Value::Null),
        });
        Ok(render_for(observer.archetype(), self.context, &self.handle, aspect, body))
    }
}

/// Build a live node from a parsed spec. The spec must declare an AGENTESE
/// path and at least one aspect.
pub fn synthesize(spec: &ParsedSpec) -> Result<Arc<SynthNode>, GrowError> {
    let path = spec
        .path
        .clone()
        .ok_or_else(|| GrowError::SpecParse("spec declares no agentese path".into()))?;
    let context_str = path.split('.').next().unwrap_or_default();
    let context = Context::parse(context_str)
        .ok_or_else(|| GrowError::SpecParse(format!("unknown context '{context_str}'")))?;
    if spec.aspects.is_empty() {
        return Err(GrowError::SpecParse(format!("spec for {path} declares no aspects")));
    }

    let aspects = spec
        .aspects
        .iter()
        .map(|a| {
            let mut meta = AspectMeta::new(&a.name, parse_category(&a.category));
            if let Some(cost) = a.cost {
                meta = meta.cost(cost);
            }
            for req in &a.requires_archetype {
                meta = meta.requires(req.clone());
            }
            meta
        })
        .collect();

    Ok(Arc::new(SynthNode { handle: path, context, aspects, spec: spec.clone() }))
}

/// Emit the implementation source written to the impl root. The header
/// comments are the machine-readable signature the reflector reads back.
pub fn generate_source(spec: &ParsedSpec) -> Result<String, GrowError> {
    let path = spec
        .path
        .as_deref()
        .ok_or_else(|| GrowError::SpecParse("spec declares no agentese path".into()))?;
    let entity = spec.entity().unwrap_or("node");
    let type_name = format!("{}Node", camel(entity));

    let mut out = String::new();
    out.push_str(&format!("//! Generated implementation for `{path}`.\n//\n"));
    out.push_str(&format!("// agentese: {path}\n"));
    if let Some(poly) = &spec.polynomial {
        out.push_str(&format!("// polynomial.positions: {}\n", poly.positions.join(", ")));
        for (position, directions) in &poly.directions {
            out.push_str(&format!(
                "// polynomial.directions: {position} -> {}\n",
                directions.join("|")
            ));
        }
    }
    if let Some(operad) = &spec.operad {
        out.push_str(&format!("// operad.operations: {}\n", operad.operations.join(", ")));
        for law in &operad.laws {
            out.push_str(&format!("// operad.laws: {law}\n"));
        }
    }
    if let Some(service) = &spec.service {
        if !service.dependencies.is_empty() {
            out.push_str(&format!("// service.dependencies: {}\n", service.dependencies.join(", ")));
        }
    }
    for aspect in &spec.aspects {
        let mut line = format!(
            "// aspect: {} category={}",
            aspect.name,
            category_str(parse_category(&aspect.category))
        );
        if let Some(cost) = aspect.cost {
            line.push_str(&format!(" cost={cost}"));
        }
        if !aspect.effects.is_empty() {
            line.push_str(&format!(" effects={}", aspect.effects.join(",")));
        }
        if !aspect.requires_archetype.is_empty() {
            line.push_str(&format!(" requires={}", aspect.requires_archetype.join(",")));
        }
        out.push_str(&line);
        out.push('\n');
    }

    out.push_str(&format!(
        "\npub struct {type_name};\n\nimpl {type_name} {{\n    pub fn handle(&self) -> &'static str {{\n        \"{path}\"\n    }}\n"
    ));
    for aspect in &spec.aspects {
        out.push_str(&format!(
            "\n    pub fn {}(&self, input: serde_json::Value) -> serde_json::Value {{\n        serde_json::json!({{ \"handle\": \"{path}\", \"aspect\": \"{}\", \"input\": input }})\n    }}\n",
            sanitize_fn(&aspect.name),
            aspect.name
        ));
    }
    out.push_str("}\n");
    Ok(out)
}

fn camel(s: &str) -> String {
    s.split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn sanitize_fn(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specfile::parse_spec;
    use serde_json::json;

    const SPEC: &str = r#"---
agentese: world.orchard
polynomial:
  positions:
    - dormant
    - fruiting
operad:
  operations:
    - graft
aspects:
  - name: manifest
    category: perception
    cost: 0.1
  - name: harvest
    category: action
    effects:
      - "writes:basket"
---
Body.
"#;

    #[tokio::test]
    async fn synthesized_node_dispatches_declared_aspects() {
        let spec = parse_spec(SPEC).unwrap();
        let node = synthesize(&spec).unwrap();
        assert_eq!(node.handle(), "world.orchard");
        assert_eq!(node.aspects().len(), 2);

        let out = node
            .invoke("manifest", &Observer::guest(), json!({"input": {"q": 1}}))
            .await
            .unwrap();
        let body = out.body();
        assert_eq!(body["handle"], "world.orchard");
        assert_eq!(body["positions"][0], "dormant");
        assert_eq!(body["input"]["q"], 1);
    }

    #[tokio::test]
    async fn synthesized_node_is_pure() {
        let spec = parse_spec(SPEC).unwrap();
        let node = synthesize(&spec).unwrap();
        let a = node.invoke("harvest", &Observer::guest(), json!({"input": 3})).await.unwrap();
        let b = node.invoke("harvest", &Observer::guest(), json!({"input": 3})).await.unwrap();
        assert_eq!(a.to_dict(), b.to_dict());
    }

    #[test]
    fn rejects_spec_without_path_or_aspects() {
        let no_path = parse_spec("---\naspects:\n  - name: x\n---\n").unwrap();
        assert!(synthesize(&no_path).is_err());
        let no_aspects = parse_spec("---\nagentese: world.empty\n---\n").unwrap();
        assert!(synthesize(&no_aspects).is_err());
    }

    #[test]
    fn generated_source_carries_signature_header() {
        let spec = parse_spec(SPEC).unwrap();
        let source = generate_source(&spec).unwrap();
        assert!(source.contains("// agentese: world.orchard"));
        assert!(source.contains("// polynomial.positions: dormant, fruiting"));
        assert!(source.contains("// operad.operations: graft"));
        assert!(source.contains("// aspect: harvest category=action effects=writes:basket"));
        assert!(source.contains("pub struct OrchardNode;"));
    }
}
