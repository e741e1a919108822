use async_trait::async_trait;
use flowcore::{EventReceiver, FlowEvent, ServerMessage};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The client went away while a frame was being written
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Client disconnected: {0}")]
pub struct SinkClosed(pub String);

/// Outbound half of a client connection
#[async_trait]
pub trait EventSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SinkClosed>;

    async fn send_event(&mut self, event: &FlowEvent) -> Result<(), SinkClosed> {
        let text = event.to_json().map_err(|e| SinkClosed(e.to_string()))?;
        self.send_text(text).await
    }

    async fn send_message(&mut self, message: &ServerMessage) -> Result<(), SinkClosed> {
        let text = serde_json::to_string(message).map_err(|e| SinkClosed(e.to_string()))?;
        self.send_text(text).await
    }
}

#[async_trait]
impl<T: EventSink + ?Sized> EventSink for &mut T {
    async fn send_text(&mut self, text: String) -> Result<(), SinkClosed> {
        (**self).send_text(text).await
    }
}

/// Why the stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `flow_completed` or `flow_error` was delivered
    Finished,
    /// Writing to the client failed; the run has been cancelled
    Disconnected,
    /// The run was cancelled before a terminal event
    Cancelled,
    /// Every sender is gone without a terminal event
    Exhausted,
}

/// Single consumer of a run's event channel, forwarding envelopes to one client
pub struct EventStreamManager {
    receiver: EventReceiver,
    cancel: CancellationToken,
}

impl EventStreamManager {
    pub fn new(receiver: EventReceiver, cancel: CancellationToken) -> Self {
        Self { receiver, cancel }
    }

    /// Forward events in channel order until the run is over
    pub async fn pump<S>(&mut self, sink: &mut S) -> StreamOutcome
    where
        S: EventSink + ?Sized,
    {
        let mut forwarded = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!(forwarded, "Event stream cancelled");
                    return StreamOutcome::Cancelled;
                }
                event = self.receiver.recv() => {
                    let Some(event) = event else {
                        return StreamOutcome::Exhausted;
                    };
                    if let Err(e) = sink.send_event(&event).await {
                        tracing::info!("{}; cancelling run", e);
                        self.cancel.cancel();
                        return StreamOutcome::Disconnected;
                    }
                    forwarded += 1;
                    if event.is_flow_terminal() {
                        tracing::debug!(forwarded, "Event stream finished");
                        return StreamOutcome::Finished;
                    }
                }
            }
        }
    }
}

/// Sink collecting frames in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    pub frames: Vec<String>,
    /// Fail once this many frames were accepted
    pub fail_after: Option<usize>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(frames: usize) -> Self {
        Self {
            frames: Vec::new(),
            fail_after: Some(frames),
        }
    }

    /// Frames decoded back to JSON
    pub fn values(&self) -> Vec<serde_json::Value> {
        self.frames
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// `type` of every frame, in order
    pub fn types(&self) -> Vec<String> {
        self.values()
            .iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl EventSink for BufferSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkClosed> {
        if self.fail_after.is_some_and(|limit| self.frames.len() >= limit) {
            return Err(SinkClosed("buffer closed".to_string()));
        }
        self.frames.push(text);
        Ok(())
    }
}
