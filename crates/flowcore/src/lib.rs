//! Core abstractions for the flow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: flow definitions, the element contract, the event
//! envelope, the error taxonomy and the model provider capability. It has no
//! scheduling logic of its own.

mod element;
mod error;
pub mod events;
mod fault;
mod flow;
mod provider;
pub mod structured;
mod value;

pub use element::{Element, ElementContext, ElementOutput, RunScope};
pub use error::{ElementError, FlowError, ValidationError};
pub use events::*;
pub use fault::Disposition;
pub use flow::{
    Connection, ConversationTurn, ElementId, ElementSpec, FlowControl, FlowDefinition, PortSchema,
    PortSpec, RunConfig,
};
pub use provider::{GenerationRequest, ModelProvider, ProviderError, ProviderRegistry, TextStream};
pub use value::{coerce_for_port, type_name, Map, PortType, Value};

/// Identifier of a single run of a flow
pub type RunId = uuid::Uuid;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
