use async_trait::async_trait;
use flowcore::{Element, ElementContext, ElementError, ElementOutput, FlowEvent, Map, PortType, Value};
use flowruntime::{ElementFactory, ElementMetadata, PortDefinition};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeMode {
    /// One key per input port
    Object,
    /// Object inputs contribute their keys; other inputs keep their port name
    Flatten,
}

/// Composes its named inputs into one object
pub struct Merger {
    mode: MergeMode,
    required: Vec<String>,
}

#[async_trait]
impl Element for Merger {
    fn element_type(&self) -> &str {
        "merger"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let required: BTreeSet<&str> = ctx
            .input_schema
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .chain(self.required.iter().map(String::as_str))
            .collect();

        for name in required {
            match ctx.inputs.get(name) {
                Some(value) if !value.is_null() => {}
                _ => return Err(ElementError::MissingInput(name.to_string())),
            }
        }

        // Sorted for a stable merge order
        let ports: BTreeSet<&String> = ctx.inputs.keys().collect();
        let mut merged = Map::new();
        for port in ports {
            let value = &ctx.inputs[port];
            match (self.mode, value) {
                (MergeMode::Flatten, Value::Object(fields)) => {
                    merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                _ => {
                    merged.insert(port.clone(), value.clone());
                }
            }
        }

        let keys: Vec<String> = merged.keys().cloned().collect();
        ctx.events.emit(FlowEvent::Merger {
            element_id: ctx.element_id.clone(),
            keys,
        });

        Ok(ElementOutput::new().with_output("merged", Value::Object(merged)))
    }
}

pub struct MergerFactory;

impl ElementFactory for MergerFactory {
    fn create(&self, parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        let mode = match parameters.get("mode").and_then(Value::as_str) {
            None | Some("object") => MergeMode::Object,
            Some("flatten") => MergeMode::Flatten,
            Some(other) => {
                return Err(ElementError::Configuration(format!(
                    "Unknown merge mode: {}",
                    other
                )))
            }
        };
        let required = match parameters.get("required") {
            None => Vec::new(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str().map(str::to_string).ok_or_else(|| {
                        ElementError::Configuration("'required' must list port names".into())
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ElementError::Configuration(
                    "'required' must list port names".into(),
                ))
            }
        };
        Ok(Arc::new(Merger { mode, required }))
    }

    fn element_type(&self) -> &str {
        "merger"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Combine named inputs into one object", "data")
            .output(PortDefinition::required("merged", PortType::Object))
    }
}
