use crate::{structured, Value};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Lazy, finite, non-restartable sequence of text fragments in arrival order
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Response is not a structured document: {reason}")]
    Parse { raw: String, reason: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Prompt plus sampling settings for one model call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Model provider capability consumed by model-invocation elements
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_text(&self, request: &GenerationRequest) -> Result<String, ProviderError>;

    async fn generate_text_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, ProviderError>;

    /// Structured generation through the text endpoint.
    ///
    /// Providers with a native structured mode override this. A response that
    /// cannot be parsed is returned as [`ProviderError::Parse`] carrying the
    /// raw text.
    async fn generate_structured_output(
        &self,
        request: &GenerationRequest,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let mut prompted = request.clone();
        prompted.prompt = structured::with_schema_instructions(&request.prompt, schema);
        let raw = self.generate_text(&prompted).await?;
        structured::parse_structured(&raw).map_err(|reason| ProviderError::Parse { raw, reason })
    }
}

/// Named model providers with an optional default
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    default: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; the first one registered becomes the default
    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        let name = provider.name().to_string();
        tracing::info!("Registering model provider: {}", name);
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default = Some(name.into());
    }

    /// Look up by name, or the default when `name` is `None`
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let name = match name {
            Some(n) => n,
            None => self
                .default
                .as_deref()
                .ok_or_else(|| ProviderError::UnknownProvider("<default>".to_string()))?,
        };
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}
