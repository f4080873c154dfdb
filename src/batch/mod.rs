//! Batch indexing: per-video state, the status poller and submission helpers.

mod poller;
pub mod stages;
mod state;
mod submit;

pub use poller::{BatchStatusPoller, PollerPhase, TickOutcome};
pub use stages::{
    calculate_stage_progress, calculate_success_rate, estimate_remaining_time,
    format_processing_time, ProcessingStage, PROCESSING_STAGES,
};
pub use state::{
    video_name_for, BatchProcessingState, BatchStatus, Reconciliation, VideoProcessingItem,
    PROCESSING_FAILED_TEXT, TERMINATED_TEXT,
};
pub use submit::{retry_failed, submit_batch};
