//! Template rendering for element parameters.
//!
//! Templates are minijinja strings rendered against the element's resolved
//! inputs, with run-scoped data available under `run`, `constants` and
//! `metadata`:
//! ```json
//! { "url": "https://api.example.com/users/{{ user_id }}", "prompt": "Hello {{ name | title }}" }
//! ```

use flowcore::{ElementContext, ElementError, Map, Value};
use minijinja::Environment;

/// Build the rendering context for an element
pub fn context_for(ctx: &ElementContext) -> Value {
    let mut map: Map = ctx
        .inputs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut run = Map::new();
    run.insert("run_id".into(), Value::String(ctx.run.run_id.to_string()));
    run.insert("flow_id".into(), Value::String(ctx.run.flow_id.clone()));
    run.insert("element_id".into(), Value::String(ctx.element_id.clone()));

    // Inputs win over run-scoped names
    map.entry("run").or_insert(Value::Object(run));
    map.entry("constants")
        .or_insert_with(|| Value::Object(ctx.run.constants.clone()));
    map.entry("metadata")
        .or_insert_with(|| Value::Object(ctx.run.metadata.clone()));

    Value::Object(map)
}

/// Render one template string
pub fn render(template: &str, context: &Value) -> Result<String, ElementError> {
    let env = Environment::new();
    env.render_str(template, minijinja::Value::from_serialize(context))
        .map_err(|e| ElementError::Configuration(format!("Template error: {}", e)))
}

/// Render every string inside a JSON value, keeping its shape
pub fn render_value(value: &Value, context: &Value) -> Result<Value, ElementError> {
    match value {
        Value::String(s) => render_leaf(s, context),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = Map::new();
            for (k, v) in map {
                rendered.insert(k.clone(), render_value(v, context)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

/// A leaf that is exactly `{{ name }}` keeps the referenced value's type
fn render_leaf(template: &str, context: &Value) -> Result<Value, ElementError> {
    if let Some(path) = pure_reference(template) {
        if let Some(found) = lookup(context, path) {
            return Ok(found.clone());
        }
    }
    render(template, context).map(Value::String)
}

fn pure_reference(template: &str) -> Option<&str> {
    let inner = template
        .trim()
        .strip_prefix("{{")?
        .strip_suffix("}}")?
        .trim();
    let simple = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    simple.then_some(inner)
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, segment| current.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_strings() {
        let context = json!({"name": "ada", "count": 3});
        assert_eq!(render("Hi {{ name }} x{{ count }}", &context).unwrap(), "Hi ada x3");
    }

    #[test]
    fn pure_references_keep_types() {
        let context = json!({"user": {"id": 7, "tags": ["a"]}});
        let template = json!({
            "id": "{{ user.id }}",
            "tags": "{{ user.tags }}",
            "label": "user-{{ user.id }}",
            "fixed": true
        });
        assert_eq!(
            render_value(&template, &context).unwrap(),
            json!({"id": 7, "tags": ["a"], "label": "user-7", "fixed": true})
        );
    }

    #[test]
    fn syntax_errors_are_configuration_errors() {
        assert!(matches!(
            render("{{ broken", &json!({})),
            Err(ElementError::Configuration(_))
        ));
    }
}
