use super::FlowEvent;
use crate::{Map, Value};
use tokio::sync::mpsc;

/// Receiving half of a run's event channel
pub type EventReceiver = mpsc::UnboundedReceiver<FlowEvent>;

/// Event emitter for elements to send real-time updates
///
/// Every event it sends carries the owning element's id. Sending never
/// blocks; once the receiver is gone events are dropped.
#[derive(Clone)]
pub struct EventEmitter {
    element_id: String,
    sender: mpsc::UnboundedSender<FlowEvent>,
}

impl EventEmitter {
    pub fn new(element_id: impl Into<String>, sender: mpsc::UnboundedSender<FlowEvent>) -> Self {
        Self {
            element_id: element_id.into(),
            sender,
        }
    }

    /// Emitter whose events go nowhere
    pub fn detached(element_id: impl Into<String>) -> Self {
        let (sender, _) = mpsc::unbounded_channel();
        Self::new(element_id, sender)
    }

    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    /// Emit a progress message
    pub fn processing(&self, message: impl Into<String>) {
        self.emit(FlowEvent::Processing {
            element_id: self.element_id.clone(),
            message: message.into(),
        });
    }

    pub fn llm_chunk(&self, content: impl Into<String>) {
        self.emit(FlowEvent::LlmChunk {
            element_id: self.element_id.clone(),
            content: content.into(),
        });
    }

    pub fn llm_warning(&self, warning: impl Into<String>, raw_response: impl Into<String>) {
        self.emit(FlowEvent::LlmWarning {
            element_id: self.element_id.clone(),
            warning: warning.into(),
            raw_response: raw_response.into(),
        });
    }

    pub fn api_request(&self, url: impl Into<String>, method: impl Into<String>) {
        self.emit(FlowEvent::ApiRequest {
            element_id: self.element_id.clone(),
            url: url.into(),
            method: method.into(),
        });
    }

    pub fn api_response(&self, status_code: u16) {
        self.emit(FlowEvent::ApiResponse {
            element_id: self.element_id.clone(),
            status_code,
        });
    }

    pub fn api_error(&self, error: impl Into<String>) {
        self.emit(FlowEvent::ApiError {
            element_id: self.element_id.clone(),
            error: error.into(),
        });
    }

    pub fn constants(&self, values: Map) {
        self.emit(FlowEvent::Constants {
            element_id: self.element_id.clone(),
            values,
        });
    }

    pub fn metadata(&self, values: Map) {
        self.emit(FlowEvent::Metadata {
            element_id: self.element_id.clone(),
            values,
        });
    }

    pub fn random(&self, kind: impl Into<String>, value: Value) {
        self.emit(FlowEvent::RandomGenerator {
            element_id: self.element_id.clone(),
            kind: kind.into(),
            value,
        });
    }
}

/// Per-run event channel
///
/// Created once per run and handed explicitly to the scheduler; the matching
/// [`EventReceiver`] has exactly one consumer.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<FlowEvent>,
}

impl EventBus {
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, element_id: impl Into<String>) -> EventEmitter {
        EventEmitter::new(element_id, self.sender.clone())
    }

    /// True once the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
