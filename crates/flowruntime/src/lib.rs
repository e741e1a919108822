//! Flow execution runtime
//!
//! This crate provides the engine that runs flows: the element registry, the
//! validator that turns a definition into a graph, the scheduler that drives
//! a run with bounded parallelism, and the event stream and session protocol
//! that carry a run to one client.

mod context;
mod registry;
mod runtime;
mod scheduler;
mod session;
mod stream;
mod transcript;
mod validator;

pub use context::ExecutionContext;
pub use registry::{ElementFactory, ElementMetadata, ElementRegistry, PortDefinition};
pub use runtime::{FlowRuntime, RunRequest, RuntimeConfig};
pub use scheduler::{ElementRunState, RunOutcome, RunReport, Scheduler};
pub use session::{FlowSession, MessageSource, SessionEnd};
pub use stream::{BufferSink, EventSink, EventStreamManager, SinkClosed, StreamOutcome};
pub use transcript::{JsonlTranscriptStore, MemoryTranscriptStore, TranscriptRecord, TranscriptStore};
pub use validator::{validate, FlowGraph};
