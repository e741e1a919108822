use crate::template;
use async_trait::async_trait;
use flowcore::structured::{fallback_document, parse_structured};
use flowcore::{
    Element, ElementContext, ElementError, ElementOutput, GenerationRequest, Map, ModelProvider,
    PortType, ProviderError, ProviderRegistry, TextStream, Value,
};
use flowruntime::{ElementFactory, ElementMetadata, PortDefinition};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

fn provider_error(error: ProviderError) -> ElementError {
    match error {
        ProviderError::Unavailable(message) => ElementError::Connectivity(message),
        other => ElementError::Provider(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenerationMode {
    Text,
    Stream,
    Structured,
}

impl GenerationMode {
    fn from_parameters(parameters: &Map) -> Result<Self, ElementError> {
        match parameters.get("mode").and_then(Value::as_str) {
            None | Some("text") => Ok(GenerationMode::Text),
            Some("stream") => Ok(GenerationMode::Stream),
            Some("structured") => {
                if !parameters.get("schema").is_some_and(Value::is_object) {
                    return Err(ElementError::Configuration(
                        "structured mode requires an object 'schema'".into(),
                    ));
                }
                Ok(GenerationMode::Structured)
            }
            Some(other) => Err(ElementError::Configuration(format!(
                "Unknown generation mode: {}",
                other
            ))),
        }
    }
}

/// Prompt and sampling settings rendered from an element's parameters
fn build_request(ctx: &ElementContext, default_prompt: &str) -> Result<GenerationRequest, ElementError> {
    let context = template::context_for(ctx);
    let prompt = template::render(ctx.parameter_str("prompt").unwrap_or(default_prompt), &context)?;

    let mut request = GenerationRequest::new(prompt)
        .with_temperature(ctx.hyperparameter_f64("temperature", 0.7))
        .with_max_tokens(ctx.hyperparameter_f64("max_tokens", 1024.0) as u32);
    if let Some(system) = ctx.parameter_str("system") {
        request = request.with_system(template::render(system, &context)?);
    }
    Ok(request)
}

/// Structured generation with the soft fallback to `{"response": raw}`
async fn generate_structured(
    provider: &dyn ModelProvider,
    ctx: &ElementContext,
    request: &GenerationRequest,
    schema: &Value,
) -> Result<Value, ElementError> {
    match provider.generate_structured_output(request, schema).await {
        Ok(document) => Ok(document),
        Err(ProviderError::Parse { raw, reason }) => {
            tracing::warn!(element_id = %ctx.element_id, "Structured output fell back to raw text: {}", reason);
            ctx.events.llm_warning(
                format!("Could not parse structured output ({}); using raw response", reason),
                raw.clone(),
            );
            Ok(fallback_document(&raw))
        }
        Err(e) => Err(provider_error(e)),
    }
}

/// Model invocation: plain text, streamed text or a structured document
pub struct GenerateElement {
    providers: Arc<ProviderRegistry>,
    mode: GenerationMode,
}

impl GenerateElement {
    async fn stream_text(
        &self,
        provider: &dyn ModelProvider,
        ctx: &ElementContext,
        request: &GenerationRequest,
    ) -> Result<String, ElementError> {
        let mut stream = provider
            .generate_text_stream(request)
            .await
            .map_err(provider_error)?;

        let mut text = String::new();
        loop {
            let next = tokio::select! {
                _ = ctx.cancellation.cancelled() => return Err(ElementError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    ctx.events.llm_chunk(chunk.as_str());
                    text.push_str(&chunk);
                }
                Some(Err(e)) => return Err(provider_error(e)),
                None => break,
            }
        }
        Ok(text)
    }
}

#[async_trait]
impl Element for GenerateElement {
    fn element_type(&self) -> &str {
        "llm.generate"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let provider = self
            .providers
            .resolve(ctx.parameter_str("provider"))
            .map_err(provider_error)?;
        let request = build_request(&ctx, "{{ prompt }}")?;

        ctx.events
            .processing(format!("Generating with {}", provider.name()));

        match self.mode {
            GenerationMode::Text => {
                let text = provider
                    .generate_text(&request)
                    .await
                    .map_err(provider_error)?;
                Ok(ElementOutput::new().with_output("response", text))
            }
            GenerationMode::Stream => {
                let text = self.stream_text(provider.as_ref(), &ctx, &request).await?;
                Ok(ElementOutput::new().with_output("response", text))
            }
            GenerationMode::Structured => {
                let schema = ctx.require_parameter("schema")?.clone();
                let document = generate_structured(provider.as_ref(), &ctx, &request, &schema).await?;
                let response = match document.get("response") {
                    Some(Value::String(text)) => text.clone(),
                    _ => document.to_string(),
                };
                Ok(ElementOutput::new()
                    .with_object_ports(&document)
                    .with_output("response", response)
                    .with_output("output", document))
            }
        }
    }
}

pub struct GenerateElementFactory {
    providers: Arc<ProviderRegistry>,
}

impl GenerateElementFactory {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

impl ElementFactory for GenerateElementFactory {
    fn create(&self, parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(GenerateElement {
            providers: self.providers.clone(),
            mode: GenerationMode::from_parameters(parameters)?,
        }))
    }

    fn element_type(&self) -> &str {
        "llm.generate"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Generate text or structured output with a model", "llm")
            .input(PortDefinition::optional("prompt", PortType::String))
            .input(PortDefinition::optional("context", PortType::Any))
            .output(PortDefinition::required("response", PortType::String))
            .output(PortDefinition::optional("output", PortType::Json))
    }
}

fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "execution_plan": {"type": "array", "items": {"type": "string"}},
            "next_step": {"type": "string"},
            "priority": {"type": "string", "enum": ["low", "medium", "high"]},
            "resource_allocation": {"type": "object"},
            "risk_level": {"type": "string", "enum": ["low", "medium", "high"]},
            "reasoning": {"type": "string"}
        },
        "required": ["execution_plan", "next_step"]
    })
}

/// Model-driven planner whose `next_step` usually steers branch selection
pub struct OrchestratorElement {
    providers: Arc<ProviderRegistry>,
    steps: Vec<String>,
}

impl OrchestratorElement {
    /// Fill plan fields the model left out or got wrong
    fn complete_plan(&self, ctx: &ElementContext, document: &Value) -> Map {
        let field = |name: &str| document.get(name).filter(|v| !v.is_null());
        let level = |name: &str, default: &str| -> Value {
            match field(name).and_then(Value::as_str) {
                Some(l @ ("low" | "medium" | "high")) => Value::String(l.to_string()),
                _ => Value::String(default.to_string()),
            }
        };

        let default_step = ctx.parameters.get("default_step").cloned().unwrap_or(Value::Null);
        let next_step = match field("next_step").and_then(Value::as_str) {
            Some(step) if self.steps.is_empty() || self.steps.iter().any(|s| s == step) => {
                Value::String(step.to_string())
            }
            Some(step) => {
                ctx.events.llm_warning(
                    format!("Unknown next_step '{}'; using default", step),
                    document.to_string(),
                );
                default_step
            }
            None => default_step,
        };

        let reasoning = field("reasoning")
            .or_else(|| field("response"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut plan = Map::new();
        plan.insert(
            "execution_plan".into(),
            field("execution_plan")
                .filter(|v| v.is_array())
                .cloned()
                .unwrap_or_else(|| json!([])),
        );
        plan.insert("next_step".into(), next_step);
        plan.insert("priority".into(), level("priority", "medium"));
        plan.insert(
            "resource_allocation".into(),
            field("resource_allocation")
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| json!({})),
        );
        plan.insert("risk_level".into(), level("risk_level", "low"));
        plan.insert("reasoning".into(), Value::String(reasoning.to_string()));
        plan
    }
}

#[async_trait]
impl Element for OrchestratorElement {
    fn element_type(&self) -> &str {
        "llm.orchestrator"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let provider = self
            .providers
            .resolve(ctx.parameter_str("provider"))
            .map_err(provider_error)?;

        let mut request = build_request(&ctx, "{{ task }}")?;
        if !self.steps.is_empty() {
            request.prompt = format!(
                "{}\n\nChoose next_step from: {}",
                request.prompt,
                self.steps.join(", ")
            );
        }

        ctx.events
            .processing(format!("Planning with {}", provider.name()));

        let document = generate_structured(provider.as_ref(), &ctx, &request, &plan_schema()).await?;
        let plan = self.complete_plan(&ctx, &document);
        let plan = Value::Object(plan);

        Ok(ElementOutput::new()
            .with_object_ports(&plan)
            .with_output("output", plan))
    }
}

pub struct OrchestratorElementFactory {
    providers: Arc<ProviderRegistry>,
}

impl OrchestratorElementFactory {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

impl ElementFactory for OrchestratorElementFactory {
    fn create(&self, parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        let steps = match parameters.get("steps") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect(),
            Some(_) => {
                return Err(ElementError::Configuration(
                    "'steps' must be a list of step names".into(),
                ))
            }
        };
        Ok(Arc::new(OrchestratorElement {
            providers: self.providers.clone(),
            steps,
        }))
    }

    fn element_type(&self) -> &str {
        "llm.orchestrator"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Plan the next step of a flow with a model", "llm")
            .input(PortDefinition::optional("task", PortType::String))
            .input(PortDefinition::optional("context", PortType::Any))
            .output(PortDefinition::required("execution_plan", PortType::List))
            .output(PortDefinition::required("next_step", PortType::Any))
            .output(PortDefinition::required("priority", PortType::String))
            .output(PortDefinition::required("resource_allocation", PortType::Object))
            .output(PortDefinition::required("risk_level", PortType::String))
            .output(PortDefinition::required("reasoning", PortType::String))
            .output(PortDefinition::required("output", PortType::Object))
    }
}

/// Deterministic provider that answers with the prompt itself
///
/// Structured requests return the prompt when it already is a JSON document
/// and report a parse failure otherwise.
#[derive(Debug, Default)]
pub struct EchoProvider;

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        Ok(request.prompt.clone())
    }

    async fn generate_text_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, ProviderError> {
        let chunks: Vec<Result<String, ProviderError>> = request
            .prompt
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn generate_structured_output(
        &self,
        request: &GenerationRequest,
        _schema: &Value,
    ) -> Result<Value, ProviderError> {
        parse_structured(&request.prompt).map_err(|reason| ProviderError::Parse {
            raw: request.prompt.clone(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::EventEmitter;

    fn providers() -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider));
        Arc::new(registry)
    }

    #[test]
    fn structured_mode_needs_schema() {
        let mut params = Map::new();
        params.insert("mode".into(), json!("structured"));
        assert!(GenerationMode::from_parameters(&params).is_err());
        params.insert("schema".into(), json!({"type": "object"}));
        assert_eq!(
            GenerationMode::from_parameters(&params).unwrap(),
            GenerationMode::Structured
        );
    }

    #[tokio::test]
    async fn echo_stream_reassembles_prompt() {
        let element = GenerateElement {
            providers: providers(),
            mode: GenerationMode::Stream,
        };
        let ctx = ElementContext::new("gen", EventEmitter::detached("gen"))
            .with_input("prompt", "one two three");
        let output = element.execute(ctx).await.unwrap();
        assert_eq!(output.get("response"), Some(&json!("one two three")));
    }

    #[tokio::test]
    async fn orchestrator_fills_defaults() {
        let element = OrchestratorElement {
            providers: providers(),
            steps: vec!["search".into(), "answer".into()],
        };
        let ctx = ElementContext::new("plan", EventEmitter::detached("plan"))
            .with_input("task", "what next?")
            .with_parameter("default_step", "answer");
        let output = element.execute(ctx).await.unwrap();

        assert_eq!(output.get("next_step"), Some(&json!("answer")));
        assert_eq!(output.get("priority"), Some(&json!("medium")));
        assert_eq!(output.get("risk_level"), Some(&json!("low")));
        assert_eq!(output.get("execution_plan"), Some(&json!([])));
    }
}
