use crate::template;
use async_trait::async_trait;
use flowcore::{Element, ElementContext, ElementError, ElementOutput, Map, PortType, Value};
use flowruntime::{ElementFactory, ElementMetadata, PortDefinition};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// One outbound call, fully rendered
struct Call {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Duration,
    /// A non-2xx status fails the element instead of being reported softly
    required: bool,
}

fn parse_method(raw: &str) -> Result<Method, ElementError> {
    match raw.to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        _ => Err(ElementError::Configuration(format!("Unsupported method: {}", raw))),
    }
}

fn render_headers(ctx: &ElementContext, context: &Value) -> Result<Vec<(String, String)>, ElementError> {
    let mut headers = Vec::new();
    if let Some(Value::Object(raw)) = ctx.parameters.get("headers") {
        for (key, value) in raw {
            let rendered = match value {
                Value::String(s) => template::render(s, context)?,
                other => other.to_string(),
            };
            headers.push((key.clone(), rendered));
        }
    }
    Ok(headers)
}

fn timeout_of(ctx: &ElementContext) -> Duration {
    Duration::from_millis(ctx.parameter_u64("timeout_ms").unwrap_or(DEFAULT_TIMEOUT_MS))
}

/// Issue a call, reporting through the element's events
///
/// Transport failures are [`ElementError::Connectivity`]; a non-2xx status
/// is reported through `api_error` and only fails the element when the call
/// is required.
async fn send(
    client: &reqwest::Client,
    ctx: &ElementContext,
    call: Call,
) -> Result<ElementOutput, ElementError> {
    ctx.events.api_request(&call.url, call.method.as_str());
    tracing::debug!(element_id = %ctx.element_id, "{} {}", call.method, call.url);

    let mut request = client
        .request(call.method.clone(), &call.url)
        .timeout(call.timeout);
    for (key, value) in &call.headers {
        request = request.header(key, value);
    }
    match &call.body {
        Some(Value::String(text)) => request = request.body(text.clone()),
        Some(json) => request = request.json(json),
        None => {}
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let message = if e.is_timeout() {
                format!("Request to {} timed out", call.url)
            } else {
                format!("HTTP request failed: {}", e)
            };
            ctx.events.api_error(&message);
            return Err(ElementError::Connectivity(message));
        }
    };

    let status = response.status();
    let headers_map: Map = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
        .collect();

    let body_text = response.text().await.map_err(|e| {
        ctx.events.api_error(format!("Failed to read response: {}", e));
        ElementError::Connectivity(format!("Failed to read response: {}", e))
    })?;

    ctx.events.api_response(status.as_u16());

    if !status.is_success() {
        let message = format!("{} {} returned {}", call.method, call.url, status);
        ctx.events.api_error(&message);
        if call.required {
            return Err(ElementError::HttpStatus {
                status: status.as_u16(),
                body: body_text,
            });
        }
        tracing::warn!(element_id = %ctx.element_id, "{}", message);
    }

    let body = serde_json::from_str::<Value>(&body_text).unwrap_or(Value::String(body_text));

    Ok(ElementOutput::new()
        .with_output("status", status.as_u16())
        .with_output("ok", status.is_success())
        .with_output("body", body)
        .with_output("headers", Value::Object(headers_map)))
}

/// HTTP request element
pub struct HttpRequestElement {
    client: reqwest::Client,
}

impl HttpRequestElement {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestElement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Element for HttpRequestElement {
    fn element_type(&self) -> &str {
        "http.request"
    }

    fn validate_parameters(&self, parameters: &Map) -> Result<(), ElementError> {
        if !parameters.get("url").is_some_and(Value::is_string) {
            return Err(ElementError::Configuration("Missing parameter: url".into()));
        }
        if let Some(method) = parameters.get("method").and_then(Value::as_str) {
            parse_method(method)?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let context = template::context_for(&ctx);

        let url_template = ctx
            .require_parameter("url")?
            .as_str()
            .ok_or_else(|| ElementError::Configuration("url must be a string".into()))?;
        let url = template::render(url_template, &context)?;
        let method = parse_method(ctx.parameter_str("method").unwrap_or("GET"))?;

        let body = match ctx.parameters.get("body") {
            Some(raw) => Some(template::render_value(raw, &context)?),
            None => ctx.inputs.get("body").cloned(),
        };
        let body = body.filter(|_| method != Method::GET && method != Method::HEAD);

        let call = Call {
            method,
            url,
            headers: render_headers(&ctx, &context)?,
            body,
            timeout: timeout_of(&ctx),
            required: ctx.parameter_bool("required", false),
        };
        send(&self.client, &ctx, call).await
    }
}

pub struct HttpRequestElementFactory;

impl ElementFactory for HttpRequestElementFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(HttpRequestElement::new()))
    }

    fn element_type(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Make HTTP requests", "http")
            .input(PortDefinition::optional("body", PortType::Any))
            .output(PortDefinition::required("status", PortType::Number))
            .output(PortDefinition::required("ok", PortType::Boolean))
            .output(PortDefinition::required("body", PortType::Any))
            .output(PortDefinition::required("headers", PortType::Object))
    }
}

/// Posts an acknowledgement of the run to a webhook
pub struct WebhookAckElement {
    client: reqwest::Client,
}

#[async_trait]
impl Element for WebhookAckElement {
    fn element_type(&self) -> &str {
        "http.webhook_ack"
    }

    fn validate_parameters(&self, parameters: &Map) -> Result<(), ElementError> {
        if !parameters.get("url").is_some_and(Value::is_string) {
            return Err(ElementError::Configuration("Missing parameter: url".into()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: ElementContext) -> Result<ElementOutput, ElementError> {
        let context = template::context_for(&ctx);
        let url = template::render(
            ctx.parameter_str("url")
                .ok_or_else(|| ElementError::Configuration("Missing parameter: url".into()))?,
            &context,
        )?;

        let payload = ctx.inputs.get("payload").cloned().unwrap_or(Value::Null);
        let body = json!({
            "run_id": ctx.run.run_id.to_string(),
            "element_id": ctx.element_id,
            "status": ctx.parameter_str("status").unwrap_or("received"),
            "payload": payload,
        });

        let call = Call {
            method: Method::POST,
            url,
            headers: render_headers(&ctx, &context)?,
            body: Some(body),
            timeout: timeout_of(&ctx),
            required: ctx.parameter_bool("required", false),
        };
        send(&self.client, &ctx, call).await
    }
}

pub struct WebhookAckElementFactory;

impl ElementFactory for WebhookAckElementFactory {
    fn create(&self, _parameters: &Map) -> Result<Arc<dyn Element>, ElementError> {
        Ok(Arc::new(WebhookAckElement {
            client: reqwest::Client::new(),
        }))
    }

    fn element_type(&self) -> &str {
        "http.webhook_ack"
    }

    fn metadata(&self) -> ElementMetadata {
        ElementMetadata::new("Acknowledge a run to a webhook", "http")
            .input(PortDefinition::optional("payload", PortType::Any))
            .output(PortDefinition::required("status", PortType::Number))
            .output(PortDefinition::required("ok", PortType::Boolean))
            .output(PortDefinition::required("body", PortType::Any))
            .output(PortDefinition::required("headers", PortType::Object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_case_insensitive() {
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert!(parse_method("BREW").is_err());
    }

    #[test]
    fn url_is_required() {
        let element = HttpRequestElement::new();
        assert!(element.validate_parameters(&Map::new()).is_err());
        let mut params = Map::new();
        params.insert("url".into(), Value::String("http://localhost".into()));
        params.insert("method".into(), Value::String("TRACE".into()));
        assert!(element.validate_parameters(&params).is_err());
    }
}
