use super::types::{EventSequence, ProcessingEvent, ProcessingEventPayload};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<ProcessingEvent>;
pub type EventSender = broadcast::Sender<ProcessingEvent>;

/// Event bus for distributing processing events
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: EventSender,
    sequence: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event (returns sequence number). Publishing with no
    /// subscribers is not an error; the event is simply dropped.
    pub fn publish(&self, chat_id: &str, payload: ProcessingEventPayload) -> EventSequence {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let event = ProcessingEvent {
            sequence,
            timestamp: Utc::now(),
            chat_id: chat_id.to_string(),
            payload,
        };

        let _ = self.sender.send(event);
        sequence
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn current_sequence(&self) -> EventSequence {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(error: &str) -> ProcessingEventPayload {
        ProcessingEventPayload::BatchFailed {
            error: error.to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let seq = bus.publish("chat-1", failed("boom"));
        assert_eq!(seq, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.chat_id, "chat-1");
        assert_eq!(event.payload_type(), "batch_failed");
        assert!(event.is_terminal());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(
            "chat-2",
            ProcessingEventPayload::StatusFetchFailed {
                error: "timeout".into(),
            },
        );

        let event1 = rx1.recv().await.unwrap();
        let event2 = rx2.recv().await.unwrap();
        assert_eq!(event1.sequence, event2.sequence);
        assert!(!event1.is_terminal());
    }

    #[test]
    fn test_sequence_ordering_without_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish("a", failed("x")), 1);
        assert_eq!(bus.publish("b", failed("y")), 2);
        assert_eq!(bus.current_sequence(), 3);
        assert_eq!(bus.receiver_count(), 0);
    }
}
