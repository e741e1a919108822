use async_trait::async_trait;
use flowcore::{
    Element, ElementContext, ElementError, EventBus, EventReceiver, FlowEvent, GenerationRequest,
    Map, ModelProvider, PortSpec, PortType, ProviderError, ProviderRegistry, TextStream, Value,
};
use flowelements::standard_registry;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Provider replaying a fixed answer, streamed in fixed chunks
struct ScriptedProvider {
    answer: String,
    chunks: Vec<String>,
}

impl ScriptedProvider {
    fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            chunks: Vec::new(),
        }
    }

    fn streaming(chunks: &[&str]) -> Self {
        Self {
            answer: chunks.concat(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_text(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        Ok(self.answer.clone())
    }

    async fn generate_text_stream(
        &self,
        _request: &GenerationRequest,
    ) -> Result<TextStream, ProviderError> {
        let chunks: Vec<Result<String, ProviderError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

fn providers(provider: ScriptedProvider) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(provider));
    Arc::new(registry)
}

/// Instantiate a standard element the way the validator does
fn element(element_type: &str, parameters: Value, provider: ScriptedProvider) -> Arc<dyn Element> {
    let registry = standard_registry(providers(provider));
    let parameters: Map = parameters.as_object().cloned().unwrap_or_default();
    registry
        .create_element(element_type, &parameters)
        .expect("registered type")
        .expect("valid parameters")
}

fn context(id: &str, parameters: Value) -> (ElementContext, EventReceiver) {
    let (bus, receiver) = EventBus::channel();
    let mut ctx = ElementContext::new(id, bus.create_emitter(id));
    ctx.parameters = parameters.as_object().cloned().unwrap_or_default();
    (ctx, receiver)
}

fn drain(receiver: &mut EventReceiver) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Serve one HTTP response on an ephemeral port; yields the raw request
async fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        body.len(),
        body
    );

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&request).to_string()
    });

    (url, handle)
}

#[tokio::test]
async fn test_selector_returns_first_resolved_path() {
    let selector = element("selector", json!({}), ScriptedProvider::answering(""));
    let (mut ctx, mut receiver) = context("pick", json!({
        "paths": ["user.nickname", "user.name", "user.email"]
    }));
    ctx.inputs.insert(
        "document".into(),
        json!({"user": {"nickname": null, "name": "Ada", "email": "ada@example.org"}}),
    );

    let output = selector.execute(ctx).await.unwrap();

    assert_eq!(output.get("value"), Some(&json!("Ada")));
    assert_eq!(output.get("found"), Some(&json!(true)));
    assert_eq!(output.get("path_used"), Some(&json!("user.name")));
    assert_eq!(
        output.get("paths_tried"),
        Some(&json!(["user.nickname", "user.name"]))
    );
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [FlowEvent::Selector { found: true, .. }]
    ));
}

#[tokio::test]
async fn test_selector_miss_is_soft() {
    let selector = element("selector", json!({}), ScriptedProvider::answering(""));
    let (mut ctx, _receiver) = context("pick", json!({"paths": ["a", "b"], "default": "n/a"}));
    ctx.inputs.insert("document".into(), json!("{\"c\": 1}"));

    let output = selector.execute(ctx).await.unwrap();

    assert_eq!(output.get("value"), Some(&json!("n/a")));
    assert_eq!(output.get("found"), Some(&json!(false)));
    assert_eq!(output.get("path_used"), Some(&Value::Null));
    assert_eq!(output.get("paths_tried"), Some(&json!(["a", "b"])));
}

#[tokio::test]
async fn test_merger_requires_declared_inputs() {
    let merger = element(
        "merger",
        json!({"required": ["profile"]}),
        ScriptedProvider::answering(""),
    );
    let (mut ctx, _receiver) = context("merge", json!({"required": ["profile"]}));
    ctx.inputs.insert("orders".into(), json!([1, 2]));

    assert_eq!(
        merger.execute(ctx).await,
        Err(ElementError::MissingInput("profile".into()))
    );
}

#[tokio::test]
async fn test_merger_flatten_and_object_modes() {
    let flatten = element("merger", json!({"mode": "flatten"}), ScriptedProvider::answering(""));
    let (mut ctx, mut receiver) = context("merge", json!({"mode": "flatten"}));
    ctx.inputs.insert("profile".into(), json!({"name": "Ada", "age": 36}));
    ctx.inputs.insert("orders".into(), json!([1, 2]));

    let output = flatten.execute(ctx).await.unwrap();
    assert_eq!(
        output.get("merged"),
        Some(&json!({"name": "Ada", "age": 36, "orders": [1, 2]}))
    );
    match drain(&mut receiver).as_slice() {
        [FlowEvent::Merger { keys, .. }] => assert_eq!(keys.len(), 3),
        other => panic!("unexpected events: {:?}", other),
    }

    let object = element("merger", json!({}), ScriptedProvider::answering(""));
    let (mut ctx, _receiver) = context("merge", json!({}));
    ctx.inputs.insert("profile".into(), json!({"name": "Ada"}));
    let output = object.execute(ctx).await.unwrap();
    assert_eq!(output.get("merged"), Some(&json!({"profile": {"name": "Ada"}})));
}

#[tokio::test]
async fn test_merger_schema_required_port() {
    let merger = element("merger", json!({}), ScriptedProvider::answering(""));
    let (mut ctx, _receiver) = context("merge", json!({}));
    ctx.input_schema
        .insert("summary".into(), PortSpec::new(PortType::String));

    assert_eq!(
        merger.execute(ctx).await,
        Err(ElementError::MissingInput("summary".into()))
    );
}

#[tokio::test]
async fn test_validator_reports_every_check() {
    let checks = json!({"checks": [
        {"name": "has_email", "input": "email", "rule": "email"},
        {"name": "adult", "input": "age", "rule": "min", "value": 18},
        {"name": "short_bio", "input": "bio", "rule": "max_length", "value": 5, "advisory": true}
    ]});
    let validator = element("validator", checks.clone(), ScriptedProvider::answering(""));
    let (mut ctx, mut receiver) = context("check", checks);
    ctx.inputs.insert("email".into(), json!("ada@example.org"));
    ctx.inputs.insert("age".into(), json!(36));
    ctx.inputs.insert("bio".into(), json!("mathematician"));

    let output = validator.execute(ctx).await.unwrap();

    assert_eq!(output.get("is_valid"), Some(&json!(true)));
    assert_eq!(output.get("failed_checks"), Some(&json!(["short_bio"])));
    assert_eq!(output.get("checks").and_then(Value::as_array).map(Vec::len), Some(3));
    assert!(matches!(
        drain(&mut receiver).as_slice(),
        [FlowEvent::Validation { is_valid: true, .. }]
    ));
}

#[tokio::test]
async fn test_validator_failure_is_not_an_error() {
    let checks = json!({"checks": [{"name": "adult", "input": "age", "rule": "min", "value": 18}]});
    let validator = element("validator", checks.clone(), ScriptedProvider::answering(""));
    let (mut ctx, _receiver) = context("check", checks);
    ctx.inputs.insert("age".into(), json!(12));

    let output = validator.execute(ctx).await.unwrap();
    assert_eq!(output.get("is_valid"), Some(&json!(false)));
}

#[test]
fn test_validator_rejects_unknown_rule() {
    let registry = standard_registry(providers(ScriptedProvider::answering("")));
    let parameters = json!({"checks": [{"name": "x", "input": "y", "rule": "psychic"}]});
    let result = registry
        .create_element("validator", parameters.as_object().unwrap())
        .unwrap();
    assert!(matches!(result, Err(ElementError::Configuration(_))));
}

#[tokio::test]
async fn test_structured_output_strips_fences() {
    let params = json!({"mode": "structured", "schema": {"type": "object"}, "prompt": "classify"});
    let generate = element(
        "llm.generate",
        params.clone(),
        ScriptedProvider::answering("```json\n{\"intent\": \"refund\"}\n```"),
    );
    let (ctx, mut receiver) = context("classify", params);

    let output = generate.execute(ctx).await.unwrap();

    assert_eq!(output.get("intent"), Some(&json!("refund")));
    assert_eq!(output.get("output"), Some(&json!({"intent": "refund"})));
    assert!(!drain(&mut receiver)
        .iter()
        .any(|e| matches!(e, FlowEvent::LlmWarning { .. })));
}

#[tokio::test]
async fn test_structured_output_falls_back_to_raw_text() {
    let params = json!({"mode": "structured", "schema": {"type": "object"}, "prompt": "classify"});
    let generate = element(
        "llm.generate",
        params.clone(),
        ScriptedProvider::answering("I think this is a refund request."),
    );
    let (ctx, mut receiver) = context("classify", params);

    let output = generate.execute(ctx).await.unwrap();

    assert_eq!(
        output.get("output"),
        Some(&json!({"response": "I think this is a refund request."}))
    );
    assert_eq!(
        output.get("response"),
        Some(&json!("I think this is a refund request."))
    );
    let events = drain(&mut receiver);
    assert!(events.iter().any(|e| matches!(
        e,
        FlowEvent::LlmWarning { raw_response, .. } if raw_response == "I think this is a refund request."
    )));
}

#[tokio::test]
async fn test_stream_chunks_arrive_in_order() {
    let params = json!({"mode": "stream", "prompt": "tell me"});
    let generate = element(
        "llm.generate",
        params.clone(),
        ScriptedProvider::streaming(&["Once ", "upon ", "a ", "time"]),
    );
    let (ctx, mut receiver) = context("story", params);

    let output = generate.execute(ctx).await.unwrap();
    assert_eq!(output.get("response"), Some(&json!("Once upon a time")));

    let chunks: Vec<String> = drain(&mut receiver)
        .into_iter()
        .filter_map(|e| match e {
            FlowEvent::LlmChunk { content, .. } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["Once ", "upon ", "a ", "time"]);
}

#[tokio::test]
async fn test_http_connectivity_error_is_hard() {
    let params = json!({"url": "http://127.0.0.1:1/unreachable", "timeout_ms": 2000});
    let request = element("http.request", params.clone(), ScriptedProvider::answering(""));
    let (ctx, mut receiver) = context("call", params);

    let result = request.execute(ctx).await;

    assert!(matches!(result, Err(ElementError::Connectivity(_))));
    let events = drain(&mut receiver);
    assert!(matches!(events.first(), Some(FlowEvent::ApiRequest { .. })));
    assert!(matches!(events.last(), Some(FlowEvent::ApiError { .. })));
}

#[tokio::test]
async fn test_http_non_2xx_is_soft_by_default() {
    let (url, server) = serve_once("500 Internal Server Error", "{\"error\":\"boom\"}").await;
    let params = json!({"url": format!("{}/orders/{{{{ order_id }}}}", url)});
    let request = element("http.request", params.clone(), ScriptedProvider::answering(""));
    let (mut ctx, mut receiver) = context("call", params);
    ctx.inputs.insert("order_id".into(), json!(42));

    let output = request.execute(ctx).await.unwrap();

    assert_eq!(output.get("status"), Some(&json!(500)));
    assert_eq!(output.get("ok"), Some(&json!(false)));
    assert_eq!(output.get("body"), Some(&json!({"error": "boom"})));
    assert!(server.await.unwrap().starts_with("GET /orders/42 "));

    let events = drain(&mut receiver);
    assert!(events
        .iter()
        .any(|e| matches!(e, FlowEvent::ApiResponse { status_code: 500, .. })));
    assert!(events.iter().any(|e| matches!(e, FlowEvent::ApiError { .. })));
}

#[tokio::test]
async fn test_http_non_2xx_fails_when_required() {
    let (url, _server) = serve_once("404 Not Found", "{}").await;
    let params = json!({"url": url, "required": true});
    let request = element("http.request", params.clone(), ScriptedProvider::answering(""));
    let (ctx, _receiver) = context("call", params);

    assert!(matches!(
        request.execute(ctx).await,
        Err(ElementError::HttpStatus { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_webhook_ack_posts_acknowledgement() {
    let (url, server) = serve_once("200 OK", "{\"received\":true}").await;
    let params = json!({"url": url, "status": "accepted"});
    let ack = element("http.webhook_ack", params.clone(), ScriptedProvider::answering(""));
    let (mut ctx, _receiver) = context("ack", params);
    ctx.inputs.insert("payload".into(), json!({"ticket": 7}));

    let output = ack.execute(ctx).await.unwrap();
    assert_eq!(output.get("ok"), Some(&json!(true)));

    let request = server.await.unwrap();
    assert!(request.starts_with("POST / "));
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let sent: Value = serde_json::from_str(body).unwrap();
    assert_eq!(sent["status"], "accepted");
    assert_eq!(sent["element_id"], "ack");
    assert_eq!(sent["payload"], json!({"ticket": 7}));
}
