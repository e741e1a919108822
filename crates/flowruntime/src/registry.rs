use flowcore::{Element, ElementError, Map, PortSchema, PortSpec, PortType};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating element instances
pub trait ElementFactory: Send + Sync {
    /// Create a new instance of the element with given parameters
    fn create(&self, parameters: &Map) -> Result<Arc<dyn Element>, ElementError>;

    /// Get element type identifier
    fn element_type(&self) -> &str;

    /// Optional: Get element metadata (description, default ports)
    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::default()
    }
}

/// Metadata about an element type
#[derive(Debug, Clone, Serialize)]
pub struct ElementMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for ElementMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl ElementMetadata {
    pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, port: PortDefinition) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: PortDefinition) -> Self {
        self.outputs.push(port);
        self
    }
}

/// Default port an element type exposes without it being declared
#[derive(Debug, Clone, Serialize)]
pub struct PortDefinition {
    pub name: String,
    pub port_type: PortType,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            description: String::new(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            required: false,
            ..Self::required(name, port_type)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn to_spec(&self) -> PortSpec {
        PortSpec {
            port_type: self.port_type,
            required: self.required,
            default: None,
            description: (!self.description.is_empty()).then(|| self.description.clone()),
        }
    }
}

/// Overlay declared ports on a type's default ports
pub(crate) fn effective_schema(defaults: &[PortDefinition], declared: &PortSchema) -> PortSchema {
    let mut schema: PortSchema = defaults
        .iter()
        .map(|p| (p.name.clone(), p.to_spec()))
        .collect();
    for (name, spec) in declared {
        schema.insert(name.clone(), spec.clone());
    }
    schema
}

/// Registry of available element types
pub struct ElementRegistry {
    factories: HashMap<String, Arc<dyn ElementFactory>>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register an element factory
    pub fn register(&mut self, factory: Arc<dyn ElementFactory>) {
        let element_type = factory.element_type().to_string();
        tracing::info!("Registering element type: {}", element_type);
        self.factories.insert(element_type, factory);
    }

    pub fn contains(&self, element_type: &str) -> bool {
        self.factories.contains_key(element_type)
    }

    /// Create an element instance from a type and parameters
    ///
    /// Returns `None` when the type is unknown.
    pub fn create_element(
        &self,
        element_type: &str,
        parameters: &Map,
    ) -> Option<Result<Arc<dyn Element>, ElementError>> {
        let factory = self.factories.get(element_type)?;
        Some(factory.create(parameters).and_then(|element| {
            element.validate_parameters(parameters)?;
            Ok(element)
        }))
    }

    /// Get all registered element types, sorted
    pub fn list_element_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for an element type
    pub fn get_metadata(&self, element_type: &str) -> Option<ElementMetadata> {
        self.factories.get(element_type).map(|f| f.metadata())
    }
}

impl Default for ElementRegistry {
    fn default() -> Self {
        Self::new()
    }
}
