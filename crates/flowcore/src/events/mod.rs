mod emitter;
mod envelope;

pub use emitter::{EventBus, EventEmitter, EventReceiver};
pub use envelope::{AckStage, FlowEvent, ServerMessage};
