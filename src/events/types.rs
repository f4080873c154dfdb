use crate::batch::BatchStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequence number for ordering events
pub type EventSequence = u64;

/// Everything the batch poller reports about one chat's indexing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub chat_id: String,
    pub payload: ProcessingEventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessingEventPayload {
    /// A local video moved to completed
    VideoCompleted {
        video_id: String,
        name: String,
        path: String,
    },

    /// Whole batch reached completed (fires once per run)
    BatchCompleted {
        total: usize,
        completed: usize,
        failed: usize,
    },

    BatchFailed {
        error: String,
    },

    /// The status request itself failed; polling continues
    StatusFetchFailed {
        error: String,
    },

    StateChanged {
        completed: usize,
        failed: usize,
        total: usize,
        overall_progress: u8,
        status: BatchStatus,
        current_video: Option<String>,
    },
}

impl ProcessingEvent {
    pub fn payload_type(&self) -> &str {
        match &self.payload {
            ProcessingEventPayload::VideoCompleted { .. } => "video_completed",
            ProcessingEventPayload::BatchCompleted { .. } => "batch_completed",
            ProcessingEventPayload::BatchFailed { .. } => "batch_failed",
            ProcessingEventPayload::StatusFetchFailed { .. } => "status_fetch_failed",
            ProcessingEventPayload::StateChanged { .. } => "state_changed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            ProcessingEventPayload::BatchCompleted { .. } | ProcessingEventPayload::BatchFailed { .. }
        )
    }
}
