use super::stages::{calculate_stage_progress, estimate_remaining_time, stage_by_key};
use crate::api::types::{IndexingStatus, RemoteStatus, VideoDetail, VideoStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Batch error shown when the server gives no reason
pub const PROCESSING_FAILED_TEXT: &str = "Processing failed";
pub const TERMINATED_TEXT: &str = "Processing was terminated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Uploading,
    Processing,
    Completed,
    Error,
    Paused,
}

/// One video in a submitted batch, as the client tracks it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProcessingItem {
    pub id: String,
    /// Matches the backend's key for this video (file stem)
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub duration: Option<f64>,
    pub status: VideoStatus,
    pub current_stage: Option<String>,
    pub progress: u8,
    pub start_time: Option<DateTime<Utc>>,
    pub completed_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl VideoProcessingItem {
    pub fn new(name: impl Into<String>, path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            path: path.into(),
            size_bytes,
            duration: None,
            status: VideoStatus::Pending,
            current_stage: None,
            progress: 0,
            start_time: None,
            completed_time: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Item named the way the backend names uploads: file name up to the first dot
    pub fn from_path(path: &Path, size_bytes: u64) -> Self {
        Self::new(video_name_for(path), path.to_string_lossy(), size_bytes)
    }

    fn apply_detail(&mut self, detail: &VideoDetail) {
        if let Some(status) = detail.status {
            self.status = status;
        }
        self.current_stage = detail.stage.clone();
        self.error = detail.error.clone();

        let server_progress = detail
            .progress
            .map(|p| p.clamp(0.0, 100.0).round() as u8);
        self.progress = if self.status == VideoStatus::Completed {
            100
        } else {
            match detail.stage.as_deref() {
                Some(stage) if stage_by_key(stage).is_some() => calculate_stage_progress(stage),
                _ => server_progress.unwrap_or(0),
            }
        };

        if let Some(start) = detail.start_time {
            self.start_time = Some(start);
        }
        if let Some(done) = detail.completed_time {
            self.completed_time = Some(done);
        }
    }
}

pub fn video_name_for(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProcessingState {
    pub total_videos: usize,
    pub completed_videos: usize,
    pub failed_videos: usize,
    pub current_processing_video: Option<String>,
    pub overall_progress: u8,
    pub status: BatchStatus,
    /// Seconds
    pub estimated_time_remaining: u64,
    /// Seconds per completed video
    pub average_processing_time: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub current_step: Option<String>,
    pub videos: Vec<VideoProcessingItem>,
    pub last_error: Option<String>,
}

/// What changed in one reconciliation, for event publication
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub newly_completed: Vec<VideoProcessingItem>,
    pub batch_completed: bool,
    pub batch_failed: Option<String>,
}

impl Default for BatchProcessingState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl BatchProcessingState {
    pub fn new(videos: Vec<VideoProcessingItem>) -> Self {
        let mut state = Self {
            total_videos: 0,
            completed_videos: 0,
            failed_videos: 0,
            current_processing_video: None,
            overall_progress: 0,
            status: BatchStatus::Processing,
            estimated_time_remaining: 0,
            average_processing_time: None,
            start_time: None,
            end_time: None,
            current_step: None,
            videos,
            last_error: None,
        };
        state.recompute_counts();
        state
    }

    /// Fresh batch with the clock started
    pub fn started(videos: Vec<VideoProcessingItem>, now: DateTime<Utc>) -> Self {
        let mut state = Self::new(videos);
        state.start_time = Some(now);
        state
    }

    pub fn recompute_counts(&mut self) {
        self.total_videos = self.videos.len();
        self.completed_videos = self
            .videos
            .iter()
            .filter(|v| v.status == VideoStatus::Completed)
            .count();
        self.failed_videos = self
            .videos
            .iter()
            .filter(|v| v.status == VideoStatus::Error)
            .count();
        self.overall_progress = if self.total_videos > 0 {
            ((self.completed_videos as f64 / self.total_videos as f64) * 100.0).round() as u8
        } else {
            0
        };
    }

    /// Fold a server report into local state. Only local videos are touched;
    /// videos the server reports but the client never submitted are ignored.
    pub fn reconcile(&mut self, status: &IndexingStatus, now: DateTime<Utc>) -> Reconciliation {
        let previous_batch = self.status;
        let previously_completed: Vec<bool> = self
            .videos
            .iter()
            .map(|v| v.status == VideoStatus::Completed)
            .collect();

        for video in &mut self.videos {
            if let Some(detail) = status.video_details.get(&video.name) {
                video.apply_detail(detail);
            } else if video.status != VideoStatus::Completed
                && status
                    .indexed_videos
                    .iter()
                    .any(|p| p == &video.path || p == &video.name)
            {
                // Path-only report: the server lists finished files without details
                video.status = VideoStatus::Completed;
                video.progress = 100;
                video.error = None;
                video.completed_time.get_or_insert(now);
            }
        }

        self.recompute_counts();

        self.status = match status.status {
            RemoteStatus::Processing => BatchStatus::Processing,
            RemoteStatus::Completed => BatchStatus::Completed,
            RemoteStatus::Error | RemoteStatus::Terminated => BatchStatus::Error,
            RemoteStatus::Unknown => self.status,
        };
        self.current_step = status.current_step.clone().or(self.current_step.take());
        self.current_processing_video = status.current_video.clone().or_else(|| {
            self.videos
                .iter()
                .find(|v| v.status == VideoStatus::Processing)
                .map(|v| v.name.clone())
        });

        let elapsed = self
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        let remaining_pool = self.total_videos.saturating_sub(self.failed_videos);
        self.estimated_time_remaining =
            estimate_remaining_time(self.completed_videos, remaining_pool, elapsed);
        self.average_processing_time = self.average_from_timestamps().or_else(|| {
            (self.completed_videos > 0 && elapsed > 0.0)
                .then(|| elapsed / self.completed_videos as f64)
        });

        let mut outcome = Reconciliation::default();
        for (video, was_completed) in self.videos.iter().zip(previously_completed) {
            if video.status == VideoStatus::Completed && !was_completed {
                outcome.newly_completed.push(video.clone());
            }
        }

        if self.status == BatchStatus::Completed && previous_batch != BatchStatus::Completed {
            self.end_time = Some(now);
            self.estimated_time_remaining = 0;
            outcome.batch_completed = true;
        }

        if self.status == BatchStatus::Error {
            let message = match status.failure_message() {
                Some(message) => message.to_string(),
                None if status.status == RemoteStatus::Terminated => TERMINATED_TEXT.to_string(),
                None => PROCESSING_FAILED_TEXT.to_string(),
            };
            if previous_batch != BatchStatus::Error {
                outcome.batch_failed = Some(message.clone());
            }
            self.last_error = Some(message);
            self.end_time.get_or_insert(now);
        }

        outcome
    }

    fn average_from_timestamps(&self) -> Option<f64> {
        let durations: Vec<f64> = self
            .videos
            .iter()
            .filter(|v| v.status == VideoStatus::Completed)
            .filter_map(|v| match (v.start_time, v.completed_time) {
                (Some(start), Some(done)) if done >= start => {
                    Some((done - start).num_milliseconds() as f64 / 1000.0)
                }
                _ => None,
            })
            .collect();
        if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        }
    }

    /// Reset one video for another attempt. Local only; resubmission is the
    /// caller's job.
    pub fn retry_video(&mut self, video_id: &str) -> bool {
        let Some(video) = self.videos.iter_mut().find(|v| v.id == video_id) else {
            return false;
        };
        video.status = VideoStatus::Pending;
        video.error = None;
        video.progress = 0;
        video.current_stage = None;
        video.completed_time = None;
        video.retry_count += 1;
        self.recompute_counts();
        true
    }

    pub fn remove_video(&mut self, video_id: &str) -> bool {
        let before = self.videos.len();
        self.videos.retain(|v| v.id != video_id);
        if self.videos.len() == before {
            return false;
        }
        self.recompute_counts();
        true
    }

    pub fn replace_videos(&mut self, videos: Vec<VideoProcessingItem>) {
        self.videos = videos;
        self.recompute_counts();
    }

    pub fn failed_videos(&self) -> Vec<VideoProcessingItem> {
        self.videos
            .iter()
            .filter(|v| v.status == VideoStatus::Error)
            .cloned()
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, BatchStatus::Completed | BatchStatus::Error)
    }
}
