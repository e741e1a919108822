use crate::{Map, PortType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ElementId = String;

/// Ports of an element keyed by name, in name order
pub type PortSchema = BTreeMap<String, PortSpec>;

/// Complete flow definition as submitted by a client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub elements: Vec<ElementSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Element whose successful completion makes the run Completed
    #[serde(default)]
    pub output_element: Option<ElementId>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn add_element(&mut self, element: ElementSpec) -> ElementId {
        let id = element.id.clone();
        self.elements.push(element);
        id
    }

    pub fn connect(
        &mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) {
        self.connections.push(Connection {
            source_element_id: source.into(),
            source_port: source_port.into(),
            target_element_id: target.into(),
            target_port: target_port.into(),
            branch: None,
        });
    }

    /// Connect as a flow_control alternative labelled `branch`.
    pub fn connect_branch(
        &mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
        branch: impl Into<String>,
    ) {
        self.connections.push(Connection {
            source_element_id: source.into(),
            source_port: source_port.into(),
            target_element_id: target.into(),
            target_port: target_port.into(),
            branch: Some(branch.into()),
        });
    }

    pub fn with_output_element(mut self, id: impl Into<String>) -> Self {
        self.output_element = Some(id.into());
        self
    }

    pub fn find_element(&self, id: &str) -> Option<&ElementSpec> {
        self.elements.iter().find(|e| e.id == id)
    }
}

/// Element specification in a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementSpec {
    pub id: ElementId,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input_schema: PortSchema,
    #[serde(default)]
    pub output_schema: PortSchema,
    #[serde(default)]
    pub parameters: Map,
    #[serde(default)]
    pub hyperparameters: Map,
    #[serde(default)]
    pub flow_control: Option<FlowControl>,
    /// A hard fault in an optional element does not halt the run
    #[serde(default)]
    pub optional: bool,
}

impl ElementSpec {
    pub fn new(id: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            element_type: element_type.into(),
            name: None,
            input_schema: PortSchema::new(),
            output_schema: PortSchema::new(),
            parameters: Map::new(),
            hyperparameters: Map::new(),
            flow_control: None,
            optional: false,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.hyperparameters.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, port: impl Into<String>, spec: PortSpec) -> Self {
        self.input_schema.insert(port.into(), spec);
        self
    }

    pub fn with_output(mut self, port: impl Into<String>, port_type: PortType) -> Self {
        self.output_schema.insert(port.into(), PortSpec::new(port_type));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_flow_control(mut self, decision_port: impl Into<String>) -> Self {
        self.flow_control = Some(FlowControl {
            decision_port: decision_port.into(),
            default_branch: None,
        });
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Declared port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    #[serde(rename = "type", default)]
    pub port_type: PortType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl PortSpec {
    pub fn new(port_type: PortType) -> Self {
        Self {
            port_type,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(port_type: PortType) -> Self {
        Self {
            required: false,
            ..Self::new(port_type)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Connection between element ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source_element_id: ElementId,
    pub source_port: String,
    pub target_element_id: ElementId,
    pub target_port: String,
    /// Branch label; only set on alternatives leaving a flow_control element
    #[serde(default)]
    pub branch: Option<String>,
}

/// Lets an element's output pick which labelled successor connections activate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowControl {
    pub decision_port: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Per-run configuration sent by the client after the initial inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_concurrency: usize,
    pub element_timeout_ms: Option<u64>,
    pub output_element: Option<ElementId>,
    pub constants: Map,
    pub metadata: Map,
    pub history: Vec<ConversationTurn>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            element_timeout_ms: None,
            output_element: None,
            constants: Map::new(),
            metadata: Map::new(),
            history: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_constant(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.insert(key.into(), value.into());
        self
    }
}

/// One turn of a prior conversation, readable by history generators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_client_definition() {
        let raw = json!({
            "elements": [
                {"id": "a", "type": "generator.datablock", "parameters": {"data": {"x": 1}}},
                {
                    "id": "b",
                    "type": "selector",
                    "input_schema": {"document": {"type": "json"}},
                    "optional": true
                }
            ],
            "connections": [
                {"source_element_id": "a", "source_port": "data",
                 "target_element_id": "b", "target_port": "document"}
            ]
        });

        let flow: FlowDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(flow.elements.len(), 2);
        assert_eq!(flow.elements[0].element_type, "generator.datablock");
        let port = &flow.elements[1].input_schema["document"];
        assert_eq!(port.port_type, PortType::Json);
        assert!(port.required);
        assert!(flow.elements[1].optional);
        assert_eq!(flow.connections[0].branch, None);
    }

    #[test]
    fn run_config_defaults_fill_missing_fields() {
        let config: RunConfig = serde_json::from_value(json!({"element_timeout_ms": 500})).unwrap();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.element_timeout_ms, Some(500));
        assert!(config.history.is_empty());
    }
}
