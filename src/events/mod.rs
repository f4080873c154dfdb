mod bus;
mod handlers;
mod types;

pub use bus::{EventBus, EventReceiver};
pub use handlers::TranscriptEventHandler;
pub use types::{EventSequence, ProcessingEvent, ProcessingEventPayload};
