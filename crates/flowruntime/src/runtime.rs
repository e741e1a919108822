use crate::registry::ElementRegistry;
use crate::scheduler::{RunOutcome, RunReport, Scheduler};
use crate::transcript::{JsonlTranscriptStore, TranscriptRecord, TranscriptStore};
use crate::validator::{validate, FlowGraph};
use flowcore::{
    EventBus, FlowDefinition, FlowError, FlowEvent, Map, RunConfig, RunId, RunScope,
    ValidationError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Main runtime for executing flows
pub struct FlowRuntime {
    registry: Arc<ElementRegistry>,
    config: RuntimeConfig,
    transcripts: Option<Arc<dyn TranscriptStore>>,
}

impl FlowRuntime {
    /// Create a runtime with default settings
    pub fn new(registry: ElementRegistry) -> Self {
        Self::with_config(Arc::new(registry), RuntimeConfig::default())
    }

    /// Create a runtime with custom configuration. A configured transcript
    /// path attaches a JSON lines store.
    pub fn with_config(registry: Arc<ElementRegistry>, config: RuntimeConfig) -> Self {
        let transcripts = config
            .transcript_path
            .as_ref()
            .map(|path| Arc::new(JsonlTranscriptStore::new(path)) as Arc<dyn TranscriptStore>);
        Self {
            registry,
            config,
            transcripts,
        }
    }

    pub fn with_transcripts(mut self, store: Arc<dyn TranscriptStore>) -> Self {
        self.transcripts = Some(store);
        self
    }

    /// Get access to the element registry
    pub fn registry(&self) -> &Arc<ElementRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn transcripts(&self) -> Option<&Arc<dyn TranscriptStore>> {
        self.transcripts.as_ref()
    }

    /// Validate a definition without running it
    pub fn validate(&self, definition: &FlowDefinition) -> Result<FlowGraph, ValidationError> {
        validate(definition, &self.registry)
    }

    /// Execute one run, streaming its events into `events`
    ///
    /// Never returns an error: validation failures and hard faults end in a
    /// `flow_error` event and a failed report.
    pub async fn run(
        &self,
        request: RunRequest,
        events: &EventBus,
        cancel: CancellationToken,
    ) -> RunReport {
        let run_id = RunId::new_v4();
        let RunRequest {
            flow_id,
            definition,
            inputs,
            config,
        } = request;

        let graph = match self.prepare(&definition, &config) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::warn!(flow_id = %flow_id, "Rejected flow: {}", e);
                events.emit(FlowEvent::FlowError {
                    error: e.to_string(),
                });
                return RunReport {
                    run_id,
                    outcome: RunOutcome::Failed {
                        error: e.to_string(),
                    },
                    states: HashMap::new(),
                    outputs: HashMap::new(),
                    duration_ms: 0,
                };
            }
        };

        let effective = RunConfig {
            max_concurrency: config.max_concurrency.min(self.config.max_concurrency),
            element_timeout_ms: config.element_timeout_ms.or(self.config.element_timeout_ms),
            ..config
        };

        let scope = Arc::new(RunScope {
            run_id,
            flow_id: flow_id.clone(),
            inputs: inputs.clone(),
            constants: effective.constants.clone(),
            metadata: effective.metadata.clone(),
            history: effective.history.clone(),
        });

        tracing::info!(
            run_id = %run_id,
            flow_id = %flow_id,
            elements = graph.len(),
            max_concurrency = effective.max_concurrency,
            "Starting run"
        );
        events.emit(FlowEvent::FlowStarted {
            flow_id: flow_id.clone(),
            run_id,
        });

        let report = Scheduler::from_config(&effective)
            .run(
                &graph,
                scope,
                effective.output_element.clone(),
                events,
                cancel,
            )
            .await;

        if let (RunOutcome::Completed { final_output }, Some(store)) =
            (&report.outcome, &self.transcripts)
        {
            let record = TranscriptRecord {
                run_id,
                flow_id,
                inputs,
                final_output: final_output.clone(),
                completed_at: chrono::Utc::now(),
            };
            if let Err(e) = store.append(record).await {
                tracing::warn!(run_id = %run_id, "Failed to record transcript: {}", e);
            }
        }

        report
    }

    fn prepare(&self, definition: &FlowDefinition, config: &RunConfig) -> Result<FlowGraph, FlowError> {
        let graph = self.validate(definition)?;
        if let Some(output) = &config.output_element {
            if !graph.contains(output) {
                return Err(ValidationError::UnknownOutputElement(output.clone()).into());
            }
        }
        Ok(graph)
    }
}

/// Everything the client supplies for one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub flow_id: String,
    pub definition: FlowDefinition,
    pub inputs: Map,
    pub config: RunConfig,
}

impl RunRequest {
    pub fn new(flow_id: impl Into<String>, definition: FlowDefinition) -> Self {
        Self {
            flow_id: flow_id.into(),
            definition,
            inputs: Map::new(),
            config: RunConfig::default(),
        }
    }

    pub fn with_inputs(mut self, inputs: Map) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<flowcore::Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on per-run concurrency
    pub max_concurrency: usize,
    /// Default element timeout when a run does not set one
    pub element_timeout_ms: Option<u64>,
    pub transcript_path: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            element_timeout_ms: None,
            transcript_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Read `FLOW_MAX_CONCURRENCY`, `FLOW_ELEMENT_TIMEOUT_MS` and
    /// `FLOW_TRANSCRIPT_PATH`, keeping defaults for unset or invalid values
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("FLOW_MAX_CONCURRENCY") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.max_concurrency = n,
                _ => tracing::warn!("Ignoring invalid FLOW_MAX_CONCURRENCY: {}", raw),
            }
        }
        if let Some(raw) = lookup("FLOW_ELEMENT_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.element_timeout_ms = Some(ms),
                Err(_) => tracing::warn!("Ignoring invalid FLOW_ELEMENT_TIMEOUT_MS: {}", raw),
            }
        }
        config.transcript_path = lookup("FLOW_TRANSCRIPT_PATH").filter(|p| !p.is_empty());

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_defaults() {
        let config = RuntimeConfig::from_lookup(|key| match key {
            "FLOW_MAX_CONCURRENCY" => Some("4".into()),
            "FLOW_ELEMENT_TIMEOUT_MS" => Some("250".into()),
            "FLOW_TRANSCRIPT_PATH" => Some("/tmp/runs.jsonl".into()),
            _ => None,
        });
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.element_timeout_ms, Some(250));
        assert_eq!(config.transcript_path.as_deref(), Some("/tmp/runs.jsonl"));
    }

    #[test]
    fn invalid_env_keeps_defaults() {
        let config = RuntimeConfig::from_lookup(|key| match key {
            "FLOW_MAX_CONCURRENCY" => Some("0".into()),
            "FLOW_ELEMENT_TIMEOUT_MS" => Some("soon".into()),
            _ => None,
        });
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.element_timeout_ms, None);
        assert!(config.transcript_path.is_none());
    }

    #[tokio::test]
    async fn invalid_definition_reports_flow_error() {
        let runtime = FlowRuntime::new(ElementRegistry::new());
        let (bus, mut receiver) = EventBus::channel();
        let report = runtime
            .run(
                RunRequest::new("empty", FlowDefinition::new("empty")),
                &bus,
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(report.outcome, RunOutcome::Failed { .. }));
        assert!(matches!(
            receiver.recv().await,
            Some(FlowEvent::FlowError { .. })
        ));
    }
}
