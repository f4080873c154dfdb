//! Typed payloads for the processing backend.
//!
//! The backend is loose about optional fields, so nearly everything here
//! defaults when absent; unknown status strings map to `Unknown` instead of
//! failing the whole response.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a server-side job (indexing or query)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Processing,
    Completed,
    Error,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl Default for RemoteStatus {
    fn default() -> Self {
        RemoteStatus::Unknown
    }
}

/// Per-video status vocabulary shared by the server report and local batch items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Indexing,
    Query,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Indexing => "indexing",
            StatusKind::Query => "query",
        }
    }
}

/// Timestamps arrive as RFC 3339 strings, epoch seconds (server) or epoch
/// milliseconds (browser-era records).
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<f64>().ok().and_then(from_epoch)),
        serde_json::Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    // Anything below 10^11 cannot be milliseconds of a plausible date
    let millis = if raw < 1e11 { raw * 1000.0 } else { raw };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

fn lenient_video_status<'de, D>(deserializer: D) -> Result<Option<VideoStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VideoDurationInfo {
    pub duration: f64,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct SystemStatus {
    #[serde(default)]
    pub global_config_set: bool,
    #[serde(default)]
    pub imagebind_initialized: bool,
    #[serde(default)]
    pub imagebind_loaded: bool,
    #[serde(default)]
    pub total_sessions: u64,
    #[serde(default)]
    pub total_indexed_videos: u64,
    #[serde(default)]
    pub running_processes: serde_json::Value,
    #[serde(default)]
    pub sessions: Vec<String>,
}

/// Defaults the backend derives from its own environment
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BackendDefaults {
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub processing_model: Option<String>,
    #[serde(default)]
    pub analysis_model: Option<String>,
    #[serde(default)]
    pub dashscope_api_key: Option<String>,
    #[serde(default)]
    pub dashscope_base_url: Option<String>,
    #[serde(default)]
    pub caption_model: Option<String>,
    #[serde(default)]
    pub asr_model: Option<String>,
    #[serde(default)]
    pub store_directory: Option<String>,
    #[serde(default)]
    pub imagebind_model_directory: Option<String>,
    #[serde(default)]
    pub selected_imagebind_model: Option<String>,
}

/// Body of `/api/initialize` and `/api/config/update`. Field casing is the
/// backend's, mixed as it is.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VideoRagConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub ali_dashscope_api_key: String,
    pub ali_dashscope_base_url: String,
    #[serde(rename = "analysisModel")]
    pub analysis_model: String,
    #[serde(rename = "processingModel")]
    pub processing_model: String,
    pub caption_model: String,
    pub asr_model: String,
    pub image_bind_model_path: String,
    pub base_storage_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoItemKind {
    File,
    Directory,
}

/// One node of the backend's video library tree
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VideoItem {
    #[serde(rename = "type")]
    pub kind: VideoItemKind,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub size_mb: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub children: Vec<VideoItem>,
    #[serde(default)]
    pub total_files: Option<u64>,
    #[serde(default)]
    pub total_size: Option<u64>,
    #[serde(default)]
    pub total_size_mb: Option<f64>,
}

impl VideoItem {
    /// All file nodes below (and including) this one, depth first
    pub fn files(&self) -> Vec<&VideoItem> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(item) = stack.pop() {
            match item.kind {
                VideoItemKind::File => out.push(item),
                VideoItemKind::Directory => stack.extend(item.children.iter().rev()),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VideoLibrary {
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default)]
    pub items: Vec<VideoItem>,
    #[serde(default)]
    pub total_items: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AvailableVideosResponse {
    pub structure: VideoLibrary,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UploadResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub video_names: Vec<String>,
    #[serde(default)]
    pub video_count: usize,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Server view of a single video inside an indexing job
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct VideoDetail {
    #[serde(default, deserialize_with = "lenient_video_status")]
    pub status: Option<VideoStatus>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub completed_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct IndexingStatus {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub total_videos: Option<u64>,
    #[serde(default)]
    pub completed_videos: Option<u64>,
    #[serde(default)]
    pub indexed_videos: Vec<String>,
    #[serde(default)]
    pub current_video: Option<String>,
    #[serde(default)]
    pub video_details: BTreeMap<String, VideoDetail>,
    #[serde(default)]
    pub error: Option<String>,
}

impl IndexingStatus {
    /// Failure text when the job is in error: the explicit error, else the message
    pub fn failure_message(&self) -> Option<&str> {
        if self.status != RemoteStatus::Error {
            return None;
        }
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct QueryStatus {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Indexing(IndexingStatus),
    Query(QueryStatus),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IndexedVideos {
    #[serde(default)]
    pub indexed_videos: Vec<String>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QueryStarted {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ImageBindStatus {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub loaded: bool,
    #[serde(default)]
    pub total_usage_count: u64,
    #[serde(default)]
    pub model_config: serde_json::Value,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImageBindStatusResponse {
    #[serde(default)]
    pub status: ImageBindStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DefaultsResponse {
    #[serde(default)]
    pub defaults: BackendDefaults,
}

/// Body-less acknowledgement returned by the mutating endpoints
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Acknowledgement {
    #[serde(default)]
    pub message: Option<String>,
}
