use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{FixedOffset, Offset, Utc};
use flowcore::{Element, ElementContext, ElementError, ElementOutput, FlowEvent, Map, PortType, Value};
use flowruntime::{ElementFactory, ElementMetadata, PortDefinition};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current time in several renderings
pub struct TimeGenerator;

fn check_format(format: &str) -> Result<(), ElementError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ElementError::Configuration(format!(
            "Invalid time format: {}",
            format
        )));
    }
    Ok(())
}

fn offset_from_minutes(minutes: Option<&Value>) -> Result<FixedOffset, ElementError> {
    let Some(minutes) = minutes else {
        return Ok(Utc.fix());
    };
    minutes
        .as_i64()
        .and_then(|m| m.checked_mul(60))
        .and_then(|seconds| i32::try_from(seconds).ok())
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            ElementError::Configuration(format!("Invalid utc_offset_minutes: {}", minutes))
        })
}

#[async_trait]
impl Element for TimeGenerator {
    fn element_type(&self) -> &str {
        "generator.time"
    }

    fn validate_parameters(&self, parameters: &Map) -> Result<(), ElementError> {
        if let Some(format) = parameters.get("format").and_then(Value::as_str) {
            check_format(format)?;
        }
        offset_from_minutes(parameters.get("utc_offset_minutes"))?;
        Ok(())
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let format = ctx.parameter_str("format").unwrap_or(DEFAULT_FORMAT);
        check_format(format)?;

        let offset = offset_from_minutes(ctx.parameters.get("utc_offset_minutes"))?;

        let now = Utc::now().with_timezone(&offset);
        let timestamp = now.to_rfc3339();
        let formatted = now.format_with_items(StrftimeItems::new(format)).to_string();

        ctx.events.emit(FlowEvent::TimeBlock {
            element_id: ctx.element_id.clone(),
            timestamp: timestamp.clone(),
            unix: now.timestamp(),
            formatted: formatted.clone(),
        });

        Ok(ElementOutput::new()
            .with_output("timestamp", timestamp)
            .with_output("unix", now.timestamp())
            .with_output("formatted", formatted)
            .with_output("date", now.format("%Y-%m-%d").to_string())
            .with_output("time", now.format("%H:%M:%S").to_string())
            .with_output("weekday", now.format("%A").to_string()))
    }
}

pub struct TimeGeneratorFactory;

impl ElementFactory for TimeGeneratorFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(TimeGenerator))
    }

    fn element_type(&self) -> &str {
        "generator.time"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Current date and time", "generator")
            .output(PortDefinition::required("timestamp", PortType::String).describe("RFC 3339"))
            .output(PortDefinition::required("unix", PortType::Number))
            .output(PortDefinition::required("formatted", PortType::String))
            .output(PortDefinition::required("date", PortType::String))
            .output(PortDefinition::required("time", PortType::String))
            .output(PortDefinition::required("weekday", PortType::String))
    }
}

/// Delay execution for a specified duration
pub struct DelayElement;

#[async_trait]
impl Element for DelayElement {
    fn element_type(&self) -> &str {
        "flow.delay"
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let delay_ms = ctx.parameter_u64("delay_ms").unwrap_or(1000); // Default to 1 second if not specified

        ctx.events.processing(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(ElementError::Cancelled),
        }

        // Pass through any inputs
        Ok(ElementOutput {
            outputs: ctx.inputs.clone(),
        })
    }
}

pub struct DelayElementFactory;

impl ElementFactory for DelayElementFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(DelayElement))
    }

    fn element_type(&self) -> &str {
        "flow.delay"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Delay execution for specified milliseconds", "flow")
            .input(PortDefinition::optional("value", PortType::Any))
            .output(PortDefinition::optional("value", PortType::Any))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::EventEmitter;

    #[tokio::test]
    async fn time_generator_respects_offset_and_format() {
        let ctx = ElementContext::new("clock", EventEmitter::detached("clock"))
            .with_parameter("format", "%Y")
            .with_parameter("utc_offset_minutes", 120);
        let output = TimeGenerator.execute(ctx).await.unwrap();

        let timestamp = output.get("timestamp").and_then(Value::as_str).unwrap();
        assert!(timestamp.ends_with("+02:00"));
        assert_eq!(output.get("formatted").and_then(Value::as_str).unwrap().len(), 4);
    }

    #[test]
    fn rejects_bad_format() {
        let mut params = Map::new();
        params.insert("format".into(), Value::String("%Q%".into()));
        assert!(TimeGenerator.validate_parameters(&params).is_err());
    }

    #[tokio::test]
    async fn rejects_overflowing_offset() {
        let mut params = Map::new();
        params.insert("utc_offset_minutes".into(), Value::from(i64::MAX / 2));
        assert!(matches!(
            TimeGenerator.validate_parameters(&params),
            Err(ElementError::Configuration(_))
        ));

        let ctx = ElementContext::new("clock", EventEmitter::detached("clock"))
            .with_parameter("utc_offset_minutes", i64::MAX / 2);
        assert!(matches!(
            TimeGenerator.execute(ctx).await,
            Err(ElementError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn delay_passes_inputs_through() {
        let ctx = ElementContext::new("wait", EventEmitter::detached("wait"))
            .with_parameter("delay_ms", 1)
            .with_input("value", "kept");
        let output = DelayElement.execute(ctx).await.unwrap();
        assert_eq!(output.get("value"), Some(&Value::String("kept".into())));
    }

    #[tokio::test]
    async fn delay_observes_cancellation() {
        let ctx = ElementContext::new("wait", EventEmitter::detached("wait"))
            .with_parameter("delay_ms", 10_000);
        ctx.cancellation.cancel();
        assert_eq!(
            DelayElement.execute(ctx).await,
            Err(ElementError::Cancelled)
        );
    }
}
