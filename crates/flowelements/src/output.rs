use crate::template;
use async_trait::async_trait;
use flowcore::{Element, ElementContext, ElementError, ElementOutput, Map, PortType, Value};
use flowruntime::{ElementFactory, ElementMetadata, PortDefinition};
use std::sync::Arc;

/// Renders the final text of a flow
pub struct TextOutput;

#[async_trait]
impl Element for TextOutput {
    fn element_type(&self) -> &str {
        "output.text"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let text = match ctx.parameter_str("template") {
            Some(source) => template::render(source, &template::context_for(&ctx))?,
            None => match ctx.inputs.get("text") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
        };
        Ok(ElementOutput::new().with_output("text_output", text))
    }
}

pub struct TextOutputFactory;

impl ElementFactory for TextOutputFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(TextOutput))
    }

    fn element_type(&self) -> &str {
        "output.text"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Final text of a flow", "output")
            .input(PortDefinition::optional("text", PortType::Any))
            .output(PortDefinition::required("text_output", PortType::String))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::EventEmitter;
    use serde_json::json;

    #[tokio::test]
    async fn renders_template_over_inputs() {
        let ctx = ElementContext::new("out", EventEmitter::detached("out"))
            .with_input("name", "Ada")
            .with_parameter("template", "Hello {{ name }}");
        let output = TextOutput.execute(ctx).await.unwrap();
        assert_eq!(output.get("text_output"), Some(&json!("Hello Ada")));
    }

    #[tokio::test]
    async fn structured_text_is_serialized() {
        let ctx = ElementContext::new("out", EventEmitter::detached("out"))
            .with_input("text", json!({"a": 1}));
        let output = TextOutput.execute(ctx).await.unwrap();
        assert_eq!(output.get("text_output"), Some(&json!("{\"a\":1}")));
    }
}
