//! Input binding and template resolution against the execution context.
//!
//! Bindings that start with `$` are dot paths into the context map; anything
//! else is a literal. Templates use `{{name}}` (or `{{ name }}`) placeholders
//! that are filled from resolved bindings.

use std::collections::HashMap;

use serde_json::Value;

use super::condition::resolve_path;

/// Marker that turns a binding into a context lookup.
pub const CONTEXT_BINDING_PREFIX: char = '$';

/// Context key under which a completed step's output is stored.
pub fn step_context_key(step_id: &str) -> String {
    format!("step_{step_id}")
}

/// Resolve a single binding.
///
/// A `$path` that resolves to nothing becomes an empty string.
pub fn resolve_binding(binding: &str, context: &HashMap<String, Value>) -> String {
    match binding.strip_prefix(CONTEXT_BINDING_PREFIX) {
        Some(path) => match resolve_path(context, path) {
            Some(value) => value_to_string(value),
            None => {
                tracing::warn!(path, "context binding did not resolve");
                String::new()
            }
        },
        None => binding.to_string(),
    }
}

/// Resolve every binding in an input map.
pub fn resolve_inputs(
    inputs: &HashMap<String, String>,
    context: &HashMap<String, Value>,
) -> HashMap<String, String> {
    inputs
        .iter()
        .map(|(name, binding)| (name.clone(), resolve_binding(binding, context)))
        .collect()
}

/// Substitute `{{name}}` and `{{ name }}` placeholders in one left-to-right
/// pass. Unknown placeholders are left as-is and substituted text is never
/// rescanned.
pub fn render_template(template: &str, values: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            break;
        };
        result.push_str(&rest[..open]);
        match values.get(after_open[..close].trim()) {
            Some(value) => result.push_str(value),
            None => result.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }
    result.push_str(rest);
    result
}

/// Convert a JSON value to display text for payloads and documents.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> HashMap<String, Value> {
        let mut c = HashMap::new();
        c.insert("project".to_string(), json!("billing"));
        c.insert(
            "step_brief".to_string(),
            json!({"output": "A short brief", "meta": {"pages": 2}}),
        );
        c
    }

    #[test]
    fn test_literal_and_context_bindings() {
        let c = ctx();
        assert_eq!(resolve_binding("plain text", &c), "plain text");
        assert_eq!(resolve_binding("$project", &c), "billing");
        assert_eq!(resolve_binding("$step_brief.output", &c), "A short brief");
        assert_eq!(resolve_binding("$step_brief.meta.pages", &c), "2");
        assert_eq!(resolve_binding("$step_brief.meta", &c), r#"{"pages":2}"#);
        assert_eq!(resolve_binding("$missing.path", &c), "");
    }

    #[test]
    fn test_render_template_both_placeholder_styles() {
        let mut values = HashMap::new();
        values.insert("name".to_string(), "billing".to_string());
        values.insert("brief".to_string(), "short".to_string());
        let out = render_template("Project {{name}}: {{ brief }} ({{unknown}})", &values);
        assert_eq!(out, "Project billing: short ({{unknown}})");
    }

    #[test]
    fn test_render_template_inserts_values_literally() {
        let mut values = HashMap::new();
        values.insert("a".to_string(), "{{b}}".to_string());
        values.insert("b".to_string(), "B".to_string());
        for _ in 0..20 {
            assert_eq!(render_template("{{a}}/{{b}}", &values), "{{b}}/B");
        }
    }

    #[test]
    fn test_render_template_unclosed_placeholder() {
        let mut values = HashMap::new();
        values.insert("a".to_string(), "x".to_string());
        assert_eq!(render_template("{{a}} and {{a", &values), "x and {{a");
        assert_eq!(render_template("{{ missing }}", &values), "{{ missing }}");
    }

    #[test]
    fn test_resolve_inputs_then_render() {
        let c = ctx();
        let mut inputs = HashMap::new();
        inputs.insert("p".to_string(), "$project".to_string());
        inputs.insert("lang".to_string(), "rust".to_string());
        let resolved = resolve_inputs(&inputs, &c);
        assert_eq!(render_template("{{p}} in {{lang}}", &resolved), "billing in rust");
    }

    #[test]
    fn test_step_context_key() {
        assert_eq!(step_context_key("s1"), "step_s1");
    }
}
