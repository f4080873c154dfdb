use crate::api::types::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";
const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    UserQuery,
    AssistantResponse,
    SystemInfo,
    AnalysisStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Active,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    #[default]
    None,
    Analyzing,
    Completed,
    Error,
}

/// Unparseable timestamps are treated as "now" rather than failing the record
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_timestamp(&value).unwrap_or_else(Utc::now))
}

/// Attached videos were sometimes stored as objects; keep their name or path
fn video_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values
        .into_iter()
        .filter_map(|value| match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("name")
                .or_else(|| map.get("path"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub message: String,
    pub status: StepStatus,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now", deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    #[serde(default, rename = "messageCategory", skip_serializing_if = "Option::is_none")]
    pub category: Option<MessageCategory>,
    #[serde(default, deserialize_with = "video_names", skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_progress_bar: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analysis_steps: Vec<AnalysisStep>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_query_analyzing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_status: Option<StepStatus>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            status: None,
            category: None,
            videos: Vec::new(),
            is_progress_bar: false,
            analysis_steps: Vec::new(),
            is_query_analyzing: false,
            query_step: None,
            query_message: None,
            query_status: None,
        }
    }

    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_category(mut self, category: MessageCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_videos(mut self, videos: Vec<String>) -> Self {
        self.videos = videos;
        self
    }

    /// Assistant-side informational line (indexing progress, failures)
    pub fn system_info(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
            .with_status(DeliveryStatus::Sent)
            .with_category(MessageCategory::SystemInfo)
    }

    /// Progress markers are persisted but never displayed
    pub fn is_transient(&self) -> bool {
        self.is_progress_bar || self.is_query_analyzing
    }

    pub fn default_category(&self) -> MessageCategory {
        match self.role {
            Role::User => MessageCategory::UserQuery,
            Role::Assistant => MessageCategory::AssistantResponse,
        }
    }
}

/// Partial update merged into an existing message; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub status: Option<DeliveryStatus>,
    pub category: Option<MessageCategory>,
    pub timestamp: Option<DateTime<Utc>>,
    pub videos: Option<Vec<String>>,
    pub analysis_steps: Option<Vec<AnalysisStep>>,
    pub is_query_analyzing: Option<bool>,
    pub query_step: Option<String>,
    pub query_message: Option<String>,
    pub query_status: Option<StepStatus>,
}

impl MessageUpdate {
    pub fn content_and_status(content: impl Into<String>, status: DeliveryStatus) -> Self {
        Self {
            content: Some(content.into()),
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content = content.clone();
        }
        if let Some(status) = self.status {
            message.status = Some(status);
        }
        if let Some(category) = self.category {
            message.category = Some(category);
        }
        if let Some(timestamp) = self.timestamp {
            message.timestamp = timestamp;
        }
        if let Some(videos) = &self.videos {
            message.videos = videos.clone();
        }
        if let Some(steps) = &self.analysis_steps {
            message.analysis_steps = steps.clone();
        }
        if let Some(flag) = self.is_query_analyzing {
            message.is_query_analyzing = flag;
        }
        if let Some(step) = &self.query_step {
            message.query_step = Some(step.clone());
        }
        if let Some(text) = &self.query_message {
            message.query_message = Some(text.clone());
        }
        if let Some(status) = self.query_status {
            message.query_status = Some(status);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "Utc::now", deserialize_with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "flexible_timestamp")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, deserialize_with = "video_names")]
    pub videos: Vec<String>,
    #[serde(default)]
    pub analysis_state: AnalysisState,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub video_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

fn default_title() -> String {
    DEFAULT_SESSION_TITLE.to_string()
}

impl ConversationSession {
    pub fn empty(chat_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: chat_id.to_string(),
            title: default_title(),
            created_at: now,
            last_updated: now,
            videos: Vec::new(),
            analysis_state: AnalysisState::None,
            messages: Vec::new(),
            last_message: String::new(),
            video_count: 0,
            analysis_progress: None,
            current_step: None,
        }
    }

    /// Messages shown to the user: everything except progress markers
    pub fn display_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| !m.is_transient())
            .cloned()
            .collect()
    }
}

/// Sidebar preview: first 50 characters, ellipsised when longer
pub fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}
