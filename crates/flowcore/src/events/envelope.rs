use crate::{Map, RunId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Events emitted during a run, serialized as `{"type": ..., "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FlowEvent {
    FlowStarted {
        flow_id: String,
        run_id: RunId,
    },
    ElementStarted {
        element_id: String,
        element_type: String,
    },
    Processing {
        element_id: String,
        message: String,
    },
    LlmChunk {
        element_id: String,
        content: String,
    },
    LlmWarning {
        element_id: String,
        warning: String,
        raw_response: String,
    },
    ApiRequest {
        element_id: String,
        url: String,
        method: String,
    },
    ApiResponse {
        element_id: String,
        status_code: u16,
    },
    ApiError {
        element_id: String,
        error: String,
    },
    Selector {
        element_id: String,
        found: bool,
        path_used: Option<String>,
        paths_tried: Vec<String>,
    },
    Merger {
        element_id: String,
        keys: Vec<String>,
    },
    Validation {
        element_id: String,
        is_valid: bool,
        checks: Vec<Value>,
    },
    Constants {
        element_id: String,
        values: Map,
    },
    Metadata {
        element_id: String,
        values: Map,
    },
    TimeBlock {
        element_id: String,
        timestamp: String,
        unix: i64,
        formatted: String,
    },
    RandomGenerator {
        element_id: String,
        kind: String,
        value: Value,
    },
    BranchSelected {
        element_id: String,
        branches: Vec<String>,
    },
    ElementCompleted {
        element_id: String,
        outputs: BTreeMap<String, Value>,
    },
    ElementFailed {
        element_id: String,
        error: String,
        hard: bool,
    },
    ElementSkipped {
        element_id: String,
        reason: String,
    },
    FinalOutput {
        text_output: String,
    },
    FlowCompleted {
        run_id: RunId,
        duration_ms: u64,
    },
    FlowError {
        error: String,
    },
}

impl FlowEvent {
    /// Element the event belongs to, if any
    pub fn element_id(&self) -> Option<&str> {
        match self {
            FlowEvent::ElementStarted { element_id, .. }
            | FlowEvent::Processing { element_id, .. }
            | FlowEvent::LlmChunk { element_id, .. }
            | FlowEvent::LlmWarning { element_id, .. }
            | FlowEvent::ApiRequest { element_id, .. }
            | FlowEvent::ApiResponse { element_id, .. }
            | FlowEvent::ApiError { element_id, .. }
            | FlowEvent::Selector { element_id, .. }
            | FlowEvent::Merger { element_id, .. }
            | FlowEvent::Validation { element_id, .. }
            | FlowEvent::Constants { element_id, .. }
            | FlowEvent::Metadata { element_id, .. }
            | FlowEvent::TimeBlock { element_id, .. }
            | FlowEvent::RandomGenerator { element_id, .. }
            | FlowEvent::BranchSelected { element_id, .. }
            | FlowEvent::ElementCompleted { element_id, .. }
            | FlowEvent::ElementFailed { element_id, .. }
            | FlowEvent::ElementSkipped { element_id, .. } => Some(element_id),
            FlowEvent::FlowStarted { .. }
            | FlowEvent::FinalOutput { .. }
            | FlowEvent::FlowCompleted { .. }
            | FlowEvent::FlowError { .. } => None,
        }
    }

    /// `completed`, `failed` or `skipped` for an element
    pub fn is_element_terminal(&self) -> bool {
        matches!(
            self,
            FlowEvent::ElementCompleted { .. }
                | FlowEvent::ElementFailed { .. }
                | FlowEvent::ElementSkipped { .. }
        )
    }

    /// Last event a client receives for a run
    pub fn is_flow_terminal(&self) -> bool {
        matches!(self, FlowEvent::FlowCompleted { .. } | FlowEvent::FlowError { .. })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Handshake stage being acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStage {
    FlowDefinition,
    Inputs,
    Config,
}

/// Protocol messages that are not part of a run's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Ready { flow_id: String },
    Ack { stage: AckStage },
}
