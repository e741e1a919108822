use async_trait::async_trait;
use flowcore::{Element, ElementContext, ElementError, ElementOutput, Map, PortType, Value};
use flowruntime::{ElementFactory, ElementMetadata, PortDefinition};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::sync::Arc;

/// What the random generator produces
#[derive(Debug, Clone, PartialEq)]
enum RandomKind {
    Integer { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Boolean,
    Uuid,
    Choice(Vec<Value>),
}

impl RandomKind {
    fn from_parameters(parameters: &Map) -> Result<Self, ElementError> {
        let kind = parameters
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("integer");

        let kind = match kind {
            "integer" => {
                let min = parameters.get("min").and_then(Value::as_i64).unwrap_or(0);
                let max = parameters.get("max").and_then(Value::as_i64).unwrap_or(100);
                RandomKind::Integer { min, max }
            }
            "float" => {
                let min = parameters.get("min").and_then(Value::as_f64).unwrap_or(0.0);
                let max = parameters.get("max").and_then(Value::as_f64).unwrap_or(1.0);
                RandomKind::Float { min, max }
            }
            "boolean" => RandomKind::Boolean,
            "uuid" => RandomKind::Uuid,
            "choice" => match parameters.get("choices") {
                Some(Value::Array(choices)) if !choices.is_empty() => {
                    RandomKind::Choice(choices.clone())
                }
                _ => {
                    return Err(ElementError::Configuration(
                        "choice requires a non-empty 'choices' list".into(),
                    ))
                }
            },
            other => {
                return Err(ElementError::Configuration(format!(
                    "Unknown random kind: {}",
                    other
                )))
            }
        };

        match &kind {
            RandomKind::Integer { min, max } if min > max => Err(ElementError::Configuration(
                format!("min ({}) exceeds max ({})", min, max),
            )),
            RandomKind::Float { min, max } if min > max => Err(ElementError::Configuration(
                format!("min ({}) exceeds max ({})", min, max),
            )),
            RandomKind::Float { min, max } if !(max - min).is_finite() => {
                Err(ElementError::Configuration(format!(
                    "Range {}..{} is too wide to sample",
                    min, max
                )))
            }
            _ => Ok(kind),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RandomKind::Integer { .. } => "integer",
            RandomKind::Float { .. } => "float",
            RandomKind::Boolean => "boolean",
            RandomKind::Uuid => "uuid",
            RandomKind::Choice(_) => "choice",
        }
    }

    fn sample(&self) -> Value {
        let mut rng = rand::rng();
        match self {
            RandomKind::Integer { min, max } => Value::from(rng.random_range(*min..=*max)),
            RandomKind::Float { min, max } if min == max => Value::from(*min),
            RandomKind::Float { min, max } => Value::from(rng.random_range(*min..*max)),
            RandomKind::Boolean => Value::Bool(rng.random_bool(0.5)),
            RandomKind::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
            RandomKind::Choice(choices) => choices.choose(&mut rng).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Random integer, float, boolean, uuid or choice
pub struct RandomGenerator {
    kind: RandomKind,
}

#[async_trait]
impl Element for RandomGenerator {
    fn element_type(&self) -> &str {
        "generator.random"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let value = self.kind.sample();
        ctx.events.random(self.kind.name(), value.clone());
        Ok(ElementOutput::new().with_output("value", value))
    }
}

pub struct RandomGeneratorFactory;

impl ElementFactory for RandomGeneratorFactory {
    fn create(&self, parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(RandomGenerator {
            kind: RandomKind::from_parameters(parameters)?,
        }))
    }

    fn element_type(&self) -> &str {
        "generator.random"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Random integer, float, boolean, uuid or choice", "generator")
            .output(PortDefinition::required("value", PortType::Any))
    }
}

/// Static data block from the `data` parameter
pub struct DataBlockGenerator;

#[async_trait]
impl Element for DataBlockGenerator {
    fn element_type(&self) -> &str {
        "generator.datablock"
    }

    fn validate_parameters(&self, parameters: &Map) -> Result<(), ElementError> {
        if !parameters.contains_key("data") {
            return Err(ElementError::Configuration("Missing parameter: data".into()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let data = ctx.require_parameter("data")?.clone();
        Ok(ElementOutput::new()
            .with_object_ports(&data)
            .with_output("data", data))
    }
}

pub struct DataBlockGeneratorFactory;

impl ElementFactory for DataBlockGeneratorFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(DataBlockGenerator))
    }

    fn element_type(&self) -> &str {
        "generator.datablock"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Static data; object keys become ports", "generator")
            .output(PortDefinition::required("data", PortType::Json))
    }
}

/// Run constants overlaid with the `values` parameter
pub struct ConstantsGenerator;

#[async_trait]
impl Element for ConstantsGenerator {
    fn element_type(&self) -> &str {
        "generator.constants"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let mut values = ctx.run.constants.clone();
        if let Some(Value::Object(overrides)) = ctx.parameters.get("values") {
            values.extend(overrides.clone());
        }

        ctx.events.constants(values.clone());

        let values = Value::Object(values);
        Ok(ElementOutput::new()
            .with_object_ports(&values)
            .with_output("constants", values))
    }
}

pub struct ConstantsGeneratorFactory;

impl ElementFactory for ConstantsGeneratorFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(ConstantsGenerator))
    }

    fn element_type(&self) -> &str {
        "generator.constants"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Run constants; keys become ports", "generator")
            .output(PortDefinition::required("constants", PortType::Object))
    }
}

/// Run metadata plus run and flow identifiers
pub struct MetadataGenerator;

#[async_trait]
impl Element for MetadataGenerator {
    fn element_type(&self) -> &str {
        "generator.metadata"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let mut values = ctx.run.metadata.clone();
        values.insert("run_id".into(), Value::String(ctx.run.run_id.to_string()));
        values.insert("flow_id".into(), Value::String(ctx.run.flow_id.clone()));

        ctx.events.metadata(values.clone());

        let values = Value::Object(values);
        Ok(ElementOutput::new()
            .with_object_ports(&values)
            .with_output("metadata", values))
    }
}

pub struct MetadataGeneratorFactory;

impl ElementFactory for MetadataGeneratorFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(MetadataGenerator))
    }

    fn element_type(&self) -> &str {
        "generator.metadata"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Run metadata with run_id and flow_id", "generator")
            .output(PortDefinition::required("metadata", PortType::Object))
            .output(PortDefinition::required("run_id", PortType::String))
            .output(PortDefinition::required("flow_id", PortType::String))
    }
}

/// Conversation history from the run scope
pub struct HistoryGenerator;

#[async_trait]
impl Element for HistoryGenerator {
    fn element_type(&self) -> &str {
        "generator.history"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let history = &ctx.run.history;
        let limit = ctx
            .parameter_u64("limit")
            .map(|l| l as usize)
            .unwrap_or(history.len());
        let recent = &history[history.len().saturating_sub(limit)..];

        let text = recent
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n");
        let turns = serde_json::to_value(recent)
            .map_err(|e| ElementError::ExecutionFailed(e.to_string()))?;

        Ok(ElementOutput::new()
            .with_output("history", turns)
            .with_output("text", text)
            .with_output("count", recent.len()))
    }
}

pub struct HistoryGeneratorFactory;

impl ElementFactory for HistoryGeneratorFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(HistoryGenerator))
    }

    fn element_type(&self) -> &str {
        "generator.history"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Most recent conversation turns", "generator")
            .output(PortDefinition::required("history", PortType::List))
            .output(PortDefinition::required("text", PortType::String))
            .output(PortDefinition::required("count", PortType::Number))
    }
}
