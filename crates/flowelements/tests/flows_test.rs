use async_trait::async_trait;
use flowcore::{
    ElementSpec, EventBus, FlowDefinition, FlowEvent, GenerationRequest, ModelProvider,
    ProviderError, ProviderRegistry, TextStream,
};
use flowelements::{default_providers, standard_registry};
use flowruntime::{
    ElementRunState, FlowRuntime, MemoryTranscriptStore, RunOutcome, RunReport, RunRequest,
    TranscriptStore,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Provider that always plans the same structured answer
struct PlanningProvider(String);

#[async_trait]
impl ModelProvider for PlanningProvider {
    fn name(&self) -> &str {
        "planner"
    }

    async fn generate_text(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        Ok(self.0.clone())
    }

    async fn generate_text_stream(
        &self,
        _request: &GenerationRequest,
    ) -> Result<TextStream, ProviderError> {
        Ok(futures::stream::iter(vec![Ok(self.0.clone())]).boxed())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn echo_runtime() -> FlowRuntime {
    FlowRuntime::new(standard_registry(Arc::new(default_providers())))
}

async fn run(runtime: &FlowRuntime, request: RunRequest) -> (RunReport, Vec<FlowEvent>) {
    init_tracing();
    let (bus, mut receiver) = EventBus::channel();
    let report = runtime.run(request, &bus, CancellationToken::new()).await;
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    (report, events)
}

fn greeting_flow() -> FlowDefinition {
    let mut flow = FlowDefinition::new("greeting");
    flow.add_element(
        ElementSpec::new("profile", "generator.datablock")
            .with_parameter("data", json!({"user": {"nickname": null, "name": "Ada"}})),
    );
    flow.add_element(
        ElementSpec::new("pick", "selector")
            .with_parameter("paths", json!(["user.nickname", "user.name"])),
    );
    flow.add_element(
        ElementSpec::new("render", "output.text").with_parameter("template", "Hello {{ text }}"),
    );
    flow.connect("profile", "data", "pick", "document");
    flow.connect("pick", "value", "render", "text");
    flow
}

#[tokio::test]
async fn test_datablock_selector_output_flow() {
    let (report, events) = run(&echo_runtime(), RunRequest::new("greet", greeting_flow())).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Completed {
            final_output: "Hello Ada".into()
        }
    );
    assert!(events.iter().any(|e| matches!(
        e,
        FlowEvent::Selector { path_used: Some(path), .. } if path == "user.name"
    )));
    let tail: Vec<&FlowEvent> = events.iter().rev().take(2).collect();
    assert!(matches!(tail[0], FlowEvent::FlowCompleted { .. }));
    assert!(matches!(
        tail[1],
        FlowEvent::FinalOutput { text_output } if text_output == "Hello Ada"
    ));
}

#[tokio::test]
async fn test_orchestrator_selects_branch() {
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(PlanningProvider(
        r#"{"execution_plan": ["refund"], "next_step": "refund", "reasoning": "customer asked"}"#
            .into(),
    )));
    let runtime = FlowRuntime::new(standard_registry(Arc::new(providers)));

    let mut flow = FlowDefinition::new("triage");
    flow.add_element(
        ElementSpec::new("plan", "llm.orchestrator")
            .with_parameter("steps", json!(["refund", "support"]))
            .with_flow_control("next_step"),
    );
    flow.add_element(
        ElementSpec::new("refund", "output.text").with_parameter("template", "Refund: {{ text }}"),
    );
    flow.add_element(
        ElementSpec::new("support", "output.text").with_parameter("template", "Support"),
    );
    flow.connect_branch("plan", "reasoning", "refund", "text", "refund");
    flow.connect_branch("plan", "reasoning", "support", "text", "support");

    let request = RunRequest::new("triage", flow).with_input("task", "Where is my money?");
    let (report, events) = run(&runtime, request).await;

    assert_eq!(report.final_output(), Some("Refund: customer asked"));
    assert_eq!(report.state("support"), Some(ElementRunState::Skipped));
    assert_eq!(
        report.output("plan", "priority"),
        Some(&json!("medium"))
    );
    assert!(events.iter().any(|e| matches!(
        e,
        FlowEvent::BranchSelected { branches, .. } if branches == &vec!["refund".to_string()]
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        FlowEvent::ElementSkipped { element_id, .. } if element_id == "support"
    )));
}

#[tokio::test]
async fn test_streamed_generation_feeds_output() {
    let mut flow = FlowDefinition::new("echo");
    flow.add_element(ElementSpec::new("say", "llm.generate").with_parameter("mode", "stream"));
    flow.add_element(ElementSpec::new("render", "output.text"));
    flow.connect("say", "response", "render", "text");

    let request = RunRequest::new("echo", flow).with_input("prompt", "hello there");
    let (report, events) = run(&echo_runtime(), request).await;

    assert_eq!(report.final_output(), Some("hello there"));

    let chunks: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            FlowEvent::LlmChunk { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["hello ", "there"]);

    let last_chunk = events
        .iter()
        .rposition(|e| matches!(e, FlowEvent::LlmChunk { .. }))
        .unwrap();
    let say_done = events
        .iter()
        .position(|e| matches!(e, FlowEvent::ElementCompleted { element_id, .. } if element_id == "say"))
        .unwrap();
    assert!(last_chunk < say_done);
}

#[tokio::test]
async fn test_unreachable_api_halts_run() {
    let mut flow = FlowDefinition::new("lookup");
    flow.add_element(
        ElementSpec::new("fetch", "http.request")
            .with_parameter("url", "http://127.0.0.1:1/orders")
            .with_parameter("timeout_ms", 2000),
    );
    flow.add_element(ElementSpec::new("render", "output.text"));
    flow.connect("fetch", "body", "render", "text");

    let (report, events) = run(&echo_runtime(), RunRequest::new("lookup", flow)).await;

    assert!(matches!(report.outcome, RunOutcome::Failed { .. }));
    assert_eq!(report.state("fetch"), Some(ElementRunState::Failed));
    assert_eq!(report.state("render"), Some(ElementRunState::Skipped));
    assert!(matches!(events.last(), Some(FlowEvent::FlowError { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, FlowEvent::ApiError { .. })));
}

#[tokio::test]
async fn test_completed_runs_are_transcribed() {
    let store = Arc::new(MemoryTranscriptStore::new());
    let runtime = echo_runtime().with_transcripts(store.clone());

    let (report, _) = run(&runtime, RunRequest::new("greet", greeting_flow())).await;
    assert!(report.is_completed());

    let records = store.records("greet").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].run_id, report.run_id);
    assert_eq!(records[0].final_output, "Hello Ada");
}

#[tokio::test]
async fn test_identical_runs_emit_identical_events() {
    let runtime = echo_runtime();
    let shape = |events: Vec<FlowEvent>| -> Vec<(String, Option<String>)> {
        events
            .into_iter()
            .filter(|e| !matches!(e, FlowEvent::FlowStarted { .. } | FlowEvent::FlowCompleted { .. }))
            .map(|e| {
                let kind = serde_json::to_value(&e).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string();
                (kind, e.element_id().map(str::to_string))
            })
            .collect()
    };

    let completed_frames = |events: &[FlowEvent]| -> Vec<String> {
        events
            .iter()
            .filter(|e| matches!(e, FlowEvent::ElementCompleted { .. }))
            .map(|e| e.to_json().unwrap())
            .collect()
    };

    let (_, first) = run(&runtime, RunRequest::new("greet", greeting_flow())).await;
    let (_, second) = run(&runtime, RunRequest::new("greet", greeting_flow())).await;
    assert_eq!(completed_frames(&first), completed_frames(&second));
    assert_eq!(shape(first), shape(second));
}

#[tokio::test]
async fn test_structured_prose_falls_back_with_warning() {
    let mut flow = FlowDefinition::new("classify");
    flow.add_element(
        ElementSpec::new("classify", "llm.generate")
            .with_parameter("mode", "structured")
            .with_parameter("schema", json!({"type": "object"})),
    );
    flow.add_element(ElementSpec::new("render", "output.text"));
    flow.connect("classify", "response", "render", "text");

    let prose = "I think the customer wants a refund.";
    let request = RunRequest::new("classify", flow).with_input("prompt", prose);
    let (report, events) = run(&echo_runtime(), request).await;

    assert_eq!(report.final_output(), Some(prose));
    assert_eq!(report.output("classify", "output"), Some(&json!({"response": prose})));
    assert!(events.iter().any(|e| matches!(
        e,
        FlowEvent::LlmWarning { element_id, raw_response, .. }
            if element_id == "classify" && raw_response == prose
    )));
}
