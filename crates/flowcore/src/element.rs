use crate::{
    events::EventEmitter, type_name, ConversationTurn, ElementError, Map, PortSchema, RunId, Value,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable elements implement
#[async_trait]
pub trait Element: Send + Sync {
    /// Unique type identifier (e.g., "selector", "llm.generate")
    fn element_type(&self) -> &str;

    /// Execute the element with given context
    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError>;

    /// Optional: Validate parameters at flow validation time
    fn validate_parameters(&self, _parameters: &Map) -> Result<(), ElementError> {
        Ok(())
    }
}

/// Run-scoped, read-only data shared by every element of one run
#[derive(Debug, Clone, Default)]
pub struct RunScope {
    pub run_id: RunId,
    pub flow_id: String,
    pub inputs: Map,
    pub constants: Map,
    pub metadata: Map,
    pub history: Vec<ConversationTurn>,
}

impl RunScope {
    pub fn new(run_id: RunId, flow_id: impl Into<String>) -> Self {
        Self {
            run_id,
            flow_id: flow_id.into(),
            ..Self::default()
        }
    }
}

/// Execution context passed to each element
#[derive(Clone)]
pub struct ElementContext {
    pub element_id: String,

    /// Resolved values for the element's input ports
    pub inputs: HashMap<String, Value>,

    pub parameters: Map,

    pub hyperparameters: Map,

    /// Effective input schema (type defaults overlaid with declared ports)
    pub input_schema: PortSchema,

    pub run: Arc<RunScope>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Run cancellation, observed at every suspension point
    pub cancellation: CancellationToken,
}

impl ElementContext {
    pub fn new(element_id: impl Into<String>, events: EventEmitter) -> Self {
        Self {
            element_id: element_id.into(),
            inputs: HashMap::new(),
            parameters: Map::new(),
            hyperparameters: Map::new(),
            input_schema: PortSchema::new(),
            run: Arc::new(RunScope::default()),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(port.into(), value.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, ElementError> {
        self.inputs
            .get(name)
            .ok_or_else(|| ElementError::MissingInput(name.to_string()))
    }

    pub fn require_str_input(&self, name: &str) -> Result<&str, ElementError> {
        let value = self.require_input(name)?;
        value.as_str().ok_or_else(|| ElementError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: type_name(value).to_string(),
        })
    }

    /// Get parameter value or return error
    pub fn require_parameter(&self, name: &str) -> Result<&Value, ElementError> {
        self.parameters
            .get(name)
            .ok_or_else(|| ElementError::Configuration(format!("Missing parameter: {}", name)))
    }

    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }

    pub fn parameter_bool(&self, name: &str, default: bool) -> bool {
        self.parameters
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn parameter_u64(&self, name: &str) -> Option<u64> {
        self.parameters.get(name).and_then(Value::as_u64)
    }

    /// Get parameter with default
    pub fn parameter_or(&self, name: &str, default: Value) -> Value {
        self.parameters.get(name).cloned().unwrap_or(default)
    }

    pub fn hyperparameter_f64(&self, name: &str, default: f64) -> f64 {
        self.hyperparameters
            .get(name)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    /// Inputs as one JSON object, the context templates render against
    pub fn inputs_object(&self) -> Value {
        let map: Map = self
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

/// Output from element execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,
}

impl ElementOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    /// Expose every top-level key of an object as its own port
    pub fn with_object_ports(mut self, value: &Value) -> Self {
        if let Value::Object(map) = value {
            for (k, v) in map {
                self.outputs.insert(k.clone(), v.clone());
            }
        }
        self
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.outputs.get(port)
    }
}

