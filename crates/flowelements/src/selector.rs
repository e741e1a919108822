use async_trait::async_trait;
use flowcore::{Element, ElementContext, ElementError, ElementOutput, FlowEvent, Map, PortType, Value};
use flowruntime::{ElementFactory, ElementMetadata, PortDefinition};
use std::sync::Arc;

/// Tries candidate paths against a document and returns the first hit
///
/// Paths are dotted; numeric segments index lists. A JSON `null` counts as
/// unresolved. A total miss yields the `default` parameter with
/// `found = false`.
pub struct Selector;

/// Resolve one dotted path
pub fn select<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let resolved = path
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(document, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })?;
    (!resolved.is_null()).then_some(resolved)
}

fn candidate_paths(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(path)) => vec![path.clone()],
        Some(Value::Array(paths)) => paths
            .iter()
            .filter_map(|p| p.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Element for Selector {
    fn element_type(&self) -> &str {
        "selector"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let document = match ctx.inputs.get("document") {
            // Text documents are parsed when they hold JSON
            Some(Value::String(text)) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
            Some(other) => other.clone(),
            None => Value::Null,
        };

        let mut paths = candidate_paths(ctx.inputs.get("paths"));
        if paths.is_empty() {
            paths = candidate_paths(ctx.parameters.get("paths"));
        }

        let mut paths_tried = Vec::with_capacity(paths.len());
        let mut hit = None;
        for path in &paths {
            paths_tried.push(path.clone());
            if let Some(value) = select(&document, path) {
                hit = Some((path.clone(), value.clone()));
                break;
            }
        }

        let found = hit.is_some();
        let (path_used, value) = match hit {
            Some((path, value)) => (Some(path), value),
            None => (None, ctx.parameter_or("default", Value::Null)),
        };

        ctx.events.emit(FlowEvent::Selector {
            element_id: ctx.element_id.clone(),
            found,
            path_used: path_used.clone(),
            paths_tried: paths_tried.clone(),
        });

        Ok(ElementOutput::new()
            .with_output("value", value)
            .with_output("found", found)
            .with_output("path_used", path_used.map(Value::String).unwrap_or(Value::Null))
            .with_output("paths_tried", paths_tried))
    }
}

pub struct SelectorFactory;

impl ElementFactory for SelectorFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(Selector))
    }

    fn element_type(&self) -> &str {
        "selector"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("First value found among candidate paths", "data")
            .input(PortDefinition::optional("document", PortType::Json))
            .input(PortDefinition::optional("paths", PortType::List))
            .output(PortDefinition::required("value", PortType::Any))
            .output(PortDefinition::required("found", PortType::Boolean))
            .output(PortDefinition::required("path_used", PortType::Any))
            .output(PortDefinition::required("paths_tried", PortType::List))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_paths_and_indexes() {
        let doc = json!({"a": {"items": [{"name": "x"}, {"name": "y"}]}});
        assert_eq!(select(&doc, "a.items.1.name"), Some(&json!("y")));
        assert_eq!(select(&doc, "a.items.9.name"), None);
        assert_eq!(select(&doc, "a.missing"), None);
    }

    #[test]
    fn null_is_unresolved() {
        let doc = json!({"a": null});
        assert_eq!(select(&doc, "a"), None);
    }
}
