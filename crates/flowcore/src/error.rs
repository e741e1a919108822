use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Element '{element_id}' failed: {source}")]
    Element {
        element_id: String,
        #[source]
        source: ElementError,
    },

    #[error("Output element '{0}' did not complete")]
    OutputMissing(String),

    #[error("No terminal element completed")]
    NoOutput,

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ElementError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Model provider error: {0}")]
    Provider(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Flow has no elements")]
    EmptyFlow,

    #[error("Element id must not be empty")]
    EmptyElementId,

    #[error("Duplicate element id: {0}")]
    DuplicateElementId(String),

    #[error("Unknown element type '{element_type}' for element '{element_id}'")]
    UnknownElementType {
        element_id: String,
        element_type: String,
    },

    #[error("Invalid parameters for element '{element_id}': {reason}")]
    InvalidParameters { element_id: String, reason: String },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element '{element_id}' has no {direction} port '{port}'")]
    UnknownPort {
        element_id: String,
        port: String,
        direction: &'static str,
    },

    #[error("Incompatible connection {source_element}.{source_port} ({source_type}) -> {target_element}.{target_port} ({target_type})")]
    IncompatiblePorts {
        source_element: String,
        source_port: String,
        source_type: String,
        target_element: String,
        target_port: String,
        target_type: String,
    },

    #[error("Invalid flow control on '{element_id}': {reason}")]
    InvalidFlowControl { element_id: String, reason: String },

    #[error("Cyclic dependency detected at element '{0}'")]
    CyclicDependency(String),

    #[error("Branch connection {source_element} -> {target_element} forms a back-edge")]
    BranchBackEdge {
        source_element: String,
        target_element: String,
    },

    #[error("Unknown output element: {0}")]
    UnknownOutputElement(String),
}
