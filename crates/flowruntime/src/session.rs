use crate::runtime::{FlowRuntime, RunRequest};
use crate::scheduler::{RunOutcome, RunReport};
use crate::stream::{EventSink, EventStreamManager, StreamOutcome};
use async_trait::async_trait;
use flowcore::{AckStage, EventBus, FlowDefinition, FlowEvent, Map, RunConfig, ServerMessage, Value};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Inbound half of a client connection
#[async_trait]
pub trait MessageSource: Send {
    /// Next text frame; `None` once the connection is closed
    async fn next_text(&mut self) -> Option<String>;
}

/// Control messages a client may send while a run streams
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Abort,
}

/// How a session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// The run went to completion or failure and its terminal event was sent
    Finished(RunReport),
    /// The run was aborted or the client left mid-run
    Aborted(RunReport),
    /// The client sent something that is not part of the protocol
    Rejected(String),
    /// The client left before the run started
    Disconnected,
    /// The run task died before finishing; `flow_error` was sent in its place
    Crashed(String),
}

/// One client connection driving one run of a flow
///
/// Handshake: `ready` → definition → `ack` → inputs → `ack` → config →
/// `ack`, then the run's events until a terminal event or disconnect.
pub struct FlowSession {
    runtime: Arc<FlowRuntime>,
    flow_id: String,
}

impl FlowSession {
    pub fn new(runtime: Arc<FlowRuntime>, flow_id: impl Into<String>) -> Self {
        Self {
            runtime,
            flow_id: flow_id.into(),
        }
    }

    pub async fn serve<S, M>(self, mut sink: S, mut source: M) -> SessionEnd
    where
        S: EventSink,
        M: MessageSource,
    {
        tracing::info!(flow_id = %self.flow_id, "Session opened");

        let ready = ServerMessage::Ready {
            flow_id: self.flow_id.clone(),
        };
        if sink.send_message(&ready).await.is_err() {
            return SessionEnd::Disconnected;
        }

        let definition = match receive(&mut source, &mut sink, AckStage::FlowDefinition, parse_definition).await {
            Ok(definition) => definition,
            Err(end) => return end,
        };
        let inputs = match receive(&mut source, &mut sink, AckStage::Inputs, parse_inputs).await {
            Ok(inputs) => inputs,
            Err(end) => return end,
        };
        let config = match receive(&mut source, &mut sink, AckStage::Config, parse_config).await {
            Ok(config) => config,
            Err(end) => return end,
        };

        let request = RunRequest::new(self.flow_id.clone(), definition)
            .with_inputs(inputs)
            .with_config(config);

        let (bus, receiver) = EventBus::channel();
        let cancel = CancellationToken::new();
        let runtime = self.runtime.clone();
        let run_cancel = cancel.clone();
        let run = tokio::spawn(async move { runtime.run(request, &bus, run_cancel).await });

        let mut stream = EventStreamManager::new(receiver, cancel.clone());
        let outcome = {
            let pump = stream.pump(&mut sink);
            tokio::pin!(pump);
            let mut source_open = true;
            loop {
                tokio::select! {
                    outcome = &mut pump => break outcome,
                    message = source.next_text(), if source_open => match message {
                        None => {
                            tracing::info!(flow_id = %self.flow_id, "Client disconnected mid-run");
                            source_open = false;
                            cancel.cancel();
                        }
                        Some(text) if serde_json::from_str::<ClientMessage>(&text).is_ok() => {
                            tracing::info!(flow_id = %self.flow_id, "Client requested abort");
                            cancel.cancel();
                        }
                        Some(_) => {
                            tracing::debug!(flow_id = %self.flow_id, "Ignoring client message during run");
                        }
                    },
                }
            }
        };

        let report = match run.await {
            Ok(report) => report,
            Err(e) => {
                let error = format!("Run task failed: {}", e);
                tracing::error!(flow_id = %self.flow_id, "{}", error);
                if outcome == StreamOutcome::Exhausted {
                    let _ = sink.send_event(&FlowEvent::FlowError { error: error.clone() }).await;
                }
                return SessionEnd::Crashed(error);
            }
        };

        tracing::info!(flow_id = %self.flow_id, run_id = %report.run_id, ?outcome, "Session closed");
        match outcome {
            StreamOutcome::Finished => SessionEnd::Finished(report),
            StreamOutcome::Exhausted => {
                let error = match &report.outcome {
                    RunOutcome::Failed { error } => error.clone(),
                    _ => "Run ended without a terminal event".to_string(),
                };
                tracing::warn!(flow_id = %self.flow_id, "{}", error);
                let _ = sink.send_event(&FlowEvent::FlowError { error: error.clone() }).await;
                SessionEnd::Crashed(error)
            }
            StreamOutcome::Disconnected | StreamOutcome::Cancelled => SessionEnd::Aborted(report),
        }
    }
}

/// Read one handshake frame, parse it and acknowledge it
async fn receive<S, M, T>(
    source: &mut M,
    sink: &mut S,
    stage: AckStage,
    parse: fn(&str) -> Result<T, String>,
) -> Result<T, SessionEnd>
where
    S: EventSink,
    M: MessageSource,
{
    let Some(text) = source.next_text().await else {
        tracing::info!(?stage, "Client disconnected during handshake");
        return Err(SessionEnd::Disconnected);
    };

    let value = match parse(&text) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(?stage, "Rejecting client message: {}", error);
            let _ = sink
                .send_event(&FlowEvent::FlowError {
                    error: error.clone(),
                })
                .await;
            return Err(SessionEnd::Rejected(error));
        }
    };

    if sink.send_message(&ServerMessage::Ack { stage }).await.is_err() {
        return Err(SessionEnd::Disconnected);
    }
    Ok(value)
}

fn parse_definition(text: &str) -> Result<FlowDefinition, String> {
    serde_json::from_str(text).map_err(|e| format!("Invalid flow definition: {}", e))
}

fn parse_inputs(text: &str) -> Result<Map, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(format!(
            "Invalid inputs: expected an object, got {}",
            flowcore::type_name(&other)
        )),
        Err(e) => Err(format!("Invalid inputs: {}", e)),
    }
}

fn parse_config(text: &str) -> Result<RunConfig, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) => Ok(RunConfig::default()),
        Ok(value @ Value::Object(_)) => {
            serde_json::from_value(value).map_err(|e| format!("Invalid run configuration: {}", e))
        }
        Ok(other) => Err(format!(
            "Invalid run configuration: expected an object or null, got {}",
            flowcore::type_name(&other)
        )),
        Err(e) => Err(format!("Invalid run configuration: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_inputs_and_config_use_defaults() {
        assert!(parse_inputs("null").unwrap().is_empty());
        assert_eq!(parse_config("null").unwrap().max_concurrency, 10);
        assert_eq!(
            parse_config(r#"{"max_concurrency": 2}"#).unwrap().max_concurrency,
            2
        );
    }

    #[test]
    fn rejects_non_object_inputs() {
        assert!(parse_inputs("[1, 2]").is_err());
        assert!(parse_config("\"fast\"").is_err());
        assert!(parse_definition("{not json").is_err());
    }

    #[test]
    fn recognises_abort() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"abort"}"#).is_ok());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"pause"}"#).is_err());
    }
}
