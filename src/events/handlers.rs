use super::{EventBus, ProcessingEvent, ProcessingEventPayload};
use crate::chat::{ChatHistory, Message};
use crate::logging::{log_debug, log_error, log_info, log_warn, log_with_details};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Handler that narrates a chat's indexing run into its transcript
pub struct TranscriptEventHandler {
    event_bus: EventBus,
    history: Arc<ChatHistory>,
    shutdown: ShutdownCoordinator,
}

impl TranscriptEventHandler {
    pub fn new(event_bus: EventBus, history: Arc<ChatHistory>, shutdown: ShutdownCoordinator) -> Self {
        Self {
            event_bus,
            history,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        // Subscribe before spawning so nothing published after start() is missed
        let mut rx = self.event_bus.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            if self.shutdown.is_shutdown() {
                return;
            }
            let chat_id = self.history.chat_id().await;
            log_debug("events", &format!("Transcript handler started for chat {}", chat_id))
                .unwrap_or_default();

            loop {
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(event) => self.handle_event(&event).await,
                            Err(broadcast::error::RecvError::Closed) => {
                                log_info("events", "Transcript handler stopped (event bus closed)")
                                    .unwrap_or_default();
                                break;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log_warn("events", &format!("Transcript handler lagged {} events", n))
                                    .unwrap_or_default();
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        log_info("events", "Transcript handler gracefully shutting down")
                            .unwrap_or_default();
                        break;
                    }
                }
            }
        })
    }

    async fn handle_event(&self, event: &ProcessingEvent) {
        if event.chat_id != self.history.chat_id().await {
            return;
        }

        let Some(text) = transcript_line(&event.payload) else {
            return;
        };

        if !self.history.add_message(Message::system_info(text)).await {
            let reason = self.history.last_error().await.unwrap_or_default();
            log_error(
                "events",
                &format!("Failed to record {} event: {}", event.payload_type(), reason),
            )
            .unwrap_or_default();
        } else if event.is_terminal() {
            log_with_details(
                "events",
                "INFO",
                "Batch outcome recorded",
                serde_json::json!({
                    "chatId": event.chat_id,
                    "sequence": event.sequence,
                    "type": event.payload_type(),
                }),
            )
            .unwrap_or_default();
        }
    }
}

/// Chat line for an event, if it deserves one
pub fn transcript_line(payload: &ProcessingEventPayload) -> Option<String> {
    match payload {
        ProcessingEventPayload::VideoCompleted { name, .. } => Some(format!("{} indexed", name)),
        ProcessingEventPayload::BatchCompleted {
            total,
            completed,
            failed,
        } => {
            if *failed == 0 {
                Some(format!("All {} videos processed", completed))
            } else {
                Some(format!(
                    "{} of {} videos processed, {} failed",
                    completed, total, failed
                ))
            }
        }
        ProcessingEventPayload::BatchFailed { error } => {
            Some(format!("Processing failed: {}", error))
        }
        ProcessingEventPayload::StatusFetchFailed { .. }
        | ProcessingEventPayload::StateChanged { .. } => None,
    }
}
