//! Standard element library
//!
//! Collection of built-in elements: generators, data shaping, HTTP calls,
//! model invocation and output rendering.

mod generators;
mod http;
mod merger;
mod model;
mod output;
mod selector;
pub mod template;
mod time;
mod validate;

pub use generators::{
    ConstantsGenerator, DataBlockGenerator, HistoryGenerator, MetadataGenerator, RandomGenerator,
};
pub use http::{HttpRequestElement, WebhookAckElement};
pub use merger::Merger;
pub use model::{EchoProvider, GenerateElement, OrchestratorElement};
pub use output::TextOutput;
pub use selector::{select, Selector};
pub use time::{DelayElement, TimeGenerator};
pub use validate::Validator;

use flowcore::ProviderRegistry;
use flowruntime::ElementRegistry;
use std::sync::Arc;

/// Register all standard elements with a registry
pub fn register_all(registry: &mut ElementRegistry, providers: Arc<ProviderRegistry>) {
    registry.register(Arc::new(time::TimeGeneratorFactory));
    registry.register(Arc::new(time::DelayElementFactory));
    registry.register(Arc::new(generators::RandomGeneratorFactory));
    registry.register(Arc::new(generators::DataBlockGeneratorFactory));
    registry.register(Arc::new(generators::ConstantsGeneratorFactory));
    registry.register(Arc::new(generators::MetadataGeneratorFactory));
    registry.register(Arc::new(generators::HistoryGeneratorFactory));
    registry.register(Arc::new(selector::SelectorFactory));
    registry.register(Arc::new(merger::MergerFactory));
    registry.register(Arc::new(validate::ValidatorFactory));
    registry.register(Arc::new(http::HttpRequestElementFactory));
    registry.register(Arc::new(http::WebhookAckElementFactory));
    registry.register(Arc::new(model::GenerateElementFactory::new(providers.clone())));
    registry.register(Arc::new(model::OrchestratorElementFactory::new(providers)));
    registry.register(Arc::new(output::TextOutputFactory));
}

/// Provider registry holding only [`EchoProvider`]
pub fn default_providers() -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(EchoProvider));
    providers
}

/// Registry with every standard element, backed by `providers`
pub fn standard_registry(providers: Arc<ProviderRegistry>) -> ElementRegistry {
    let mut registry = ElementRegistry::new();
    register_all(&mut registry, providers);
    registry
}
