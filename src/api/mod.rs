//! HTTP client for the local processing backend.
//!
//! One method per endpoint. Every response is checked for the backend's
//! `success` flag and parsed into a typed payload here, so nothing past this
//! module sees raw JSON. No retries happen at this layer.

pub mod classify;
pub mod types;

use crate::config::ClientConfig;
use crate::error::VimoError;
use crate::validation::validate_chat_id;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use types::{
    Acknowledgement, AvailableVideosResponse, BackendDefaults, DefaultsResponse, HealthStatus,
    ImageBindStatus, ImageBindStatusResponse, IndexedVideos, IndexingStatus, QueryStarted,
    QueryStatus, SessionStatus, StatusKind, SystemStatus, UploadResponse, VideoDurationInfo,
    VideoLibrary, VideoRagConfig,
};

/// The slice of the backend that batch processing and conversations depend on.
pub trait SessionBackend: Send + Sync {
    fn upload_videos(
        &self,
        chat_id: &str,
        video_paths: &[String],
    ) -> impl Future<Output = Result<UploadResponse, VimoError>> + Send;

    fn indexing_status(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<IndexingStatus, VimoError>> + Send;

    fn submit_query(
        &self,
        chat_id: &str,
        query: &str,
    ) -> impl Future<Output = Result<QueryStarted, VimoError>> + Send;

    fn query_status(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<QueryStatus, VimoError>> + Send;
}

#[derive(Debug, Clone)]
pub struct VimoApi {
    client: Client,
    base_url: String,
}

impl VimoApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, VimoError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VimoError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, VimoError> {
        Self::new(&config.server_url()?, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_endpoint(&self, chat_id: &str, suffix: &str) -> Result<String, VimoError> {
        validate_chat_id(chat_id)?;
        Ok(format!(
            "{}/api/sessions/{}/{}",
            self.base_url,
            urlencoding::encode(chat_id),
            suffix
        ))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> Result<T, VimoError> {
        debug!(operation = operation, "backend request");

        let result = execute::<T>(request).await;
        if let Err(e) = &result {
            warn!(operation = operation, error = %e, "backend request failed");
        }
        result
    }

    /// `GET /api/health`; answers without a `success` field.
    pub async fn health_check(&self) -> Result<HealthStatus, VimoError> {
        self.send(self.client.get(self.endpoint("/api/health")), "health_check")
            .await
    }

    pub async fn get_system_status(&self) -> Result<SystemStatus, VimoError> {
        self.send(
            self.client.get(self.endpoint("/api/system/status")),
            "get_system_status",
        )
        .await
    }

    pub async fn get_default_config(&self) -> Result<BackendDefaults, VimoError> {
        let response: DefaultsResponse = self
            .send(
                self.client.get(self.endpoint("/api/videorag/defaults")),
                "get_default_config",
            )
            .await?;
        Ok(response.defaults)
    }

    pub async fn initialize_system(
        &self,
        config: &VideoRagConfig,
    ) -> Result<Acknowledgement, VimoError> {
        self.send(
            self.client.post(self.endpoint("/api/initialize")).json(config),
            "initialize_system",
        )
        .await
    }

    pub async fn update_system_config(
        &self,
        config: &VideoRagConfig,
    ) -> Result<Acknowledgement, VimoError> {
        self.send(
            self.client.post(self.endpoint("/api/config/update")).json(config),
            "update_system_config",
        )
        .await
    }

    /// Initialize when the backend has no global config yet (or its status is
    /// unknown), update otherwise. Returns true when initialize was used.
    pub async fn apply_config(&self, config: &VideoRagConfig) -> Result<bool, VimoError> {
        let initialized = match self.get_system_status().await {
            Ok(status) => status.global_config_set,
            Err(_) => false,
        };

        if initialized {
            self.update_system_config(config).await?;
            Ok(false)
        } else {
            self.initialize_system(config).await?;
            Ok(true)
        }
    }

    pub async fn get_available_videos(&self) -> Result<VideoLibrary, VimoError> {
        let response: AvailableVideosResponse = self
            .send(
                self.client.get(self.endpoint("/api/videos/available")),
                "get_available_videos",
            )
            .await?;
        Ok(response.structure)
    }

    pub async fn get_video_duration(&self, video_path: &str) -> Result<VideoDurationInfo, VimoError> {
        self.send(
            self.client
                .post(self.endpoint("/api/video/duration"))
                .json(&json!({ "video_path": video_path })),
            "get_video_duration",
        )
        .await
    }

    pub async fn upload_videos(
        &self,
        chat_id: &str,
        video_paths: &[String],
    ) -> Result<UploadResponse, VimoError> {
        if video_paths.is_empty() {
            return Err(VimoError::Validation("No videos to upload".to_string()));
        }
        let url = self.session_endpoint(chat_id, "videos/upload")?;
        self.send(
            self.client
                .post(url)
                .json(&json!({ "video_path_list": video_paths })),
            "upload_videos",
        )
        .await
    }

    /// Upload variant for files staged by a browser-style picker
    pub async fn upload_videos_web(
        &self,
        chat_id: &str,
        file_paths: &[String],
    ) -> Result<UploadResponse, VimoError> {
        if file_paths.is_empty() {
            return Err(VimoError::Validation("No videos to upload".to_string()));
        }
        let url = self.session_endpoint(chat_id, "videos/upload-web")?;
        let uploaded: Vec<Value> = file_paths
            .iter()
            .map(|p| json!({ "file_path": p }))
            .collect();
        self.send(
            self.client
                .post(url)
                .json(&json!({ "uploaded_files": uploaded })),
            "upload_videos_web",
        )
        .await
    }

    pub async fn get_session_status(
        &self,
        chat_id: &str,
        kind: StatusKind,
    ) -> Result<SessionStatus, VimoError> {
        let url = self.session_endpoint(chat_id, "status")?;
        let request = self.client.get(url).query(&[("type", kind.as_str())]);
        match kind {
            StatusKind::Indexing => self
                .send(request, "get_indexing_status")
                .await
                .map(SessionStatus::Indexing),
            StatusKind::Query => self
                .send(request, "get_query_status")
                .await
                .map(SessionStatus::Query),
        }
    }

    pub async fn get_indexing_status(&self, chat_id: &str) -> Result<IndexingStatus, VimoError> {
        match self.get_session_status(chat_id, StatusKind::Indexing).await? {
            SessionStatus::Indexing(status) => Ok(status),
            SessionStatus::Query(_) => Err(VimoError::Other("Unexpected query status".into())),
        }
    }

    pub async fn get_query_status(&self, chat_id: &str) -> Result<QueryStatus, VimoError> {
        match self.get_session_status(chat_id, StatusKind::Query).await? {
            SessionStatus::Query(status) => Ok(status),
            SessionStatus::Indexing(_) => {
                Err(VimoError::Other("Unexpected indexing status".into()))
            }
        }
    }

    pub async fn get_indexed_videos(&self, chat_id: &str) -> Result<IndexedVideos, VimoError> {
        let url = self.session_endpoint(chat_id, "videos/indexed")?;
        self.send(self.client.get(url), "get_indexed_videos").await
    }

    pub async fn query_video(&self, chat_id: &str, query: &str) -> Result<QueryStarted, VimoError> {
        let query = crate::validation::validate_query(query)?;
        let url = self.session_endpoint(chat_id, "query")?;
        self.send(
            self.client.post(url).json(&json!({ "query": query })),
            "query_video",
        )
        .await
    }

    pub async fn terminate_session(&self, chat_id: &str) -> Result<Acknowledgement, VimoError> {
        let url = self.session_endpoint(chat_id, "terminate")?;
        self.send(self.client.post(url), "terminate_session").await
    }

    pub async fn delete_session(&self, chat_id: &str) -> Result<Acknowledgement, VimoError> {
        let url = self.session_endpoint(chat_id, "delete")?;
        self.send(self.client.delete(url), "delete_session").await
    }

    pub async fn get_imagebind_status(&self) -> Result<ImageBindStatus, VimoError> {
        let response: ImageBindStatusResponse = self
            .send(
                self.client.get(self.endpoint("/api/imagebind/status")),
                "get_imagebind_status",
            )
            .await?;
        Ok(response.status)
    }

    pub async fn load_imagebind(&self) -> Result<Acknowledgement, VimoError> {
        self.send(
            self.client.post(self.endpoint("/api/imagebind/load")),
            "load_imagebind",
        )
        .await
    }

    pub async fn release_imagebind(&self) -> Result<Acknowledgement, VimoError> {
        self.send(
            self.client.post(self.endpoint("/api/imagebind/release")),
            "release_imagebind",
        )
        .await
    }
}

impl SessionBackend for VimoApi {
    async fn upload_videos(
        &self,
        chat_id: &str,
        video_paths: &[String],
    ) -> Result<UploadResponse, VimoError> {
        VimoApi::upload_videos(self, chat_id, video_paths).await
    }

    async fn indexing_status(&self, chat_id: &str) -> Result<IndexingStatus, VimoError> {
        self.get_indexing_status(chat_id).await
    }

    async fn submit_query(&self, chat_id: &str, query: &str) -> Result<QueryStarted, VimoError> {
        self.query_video(chat_id, query).await
    }

    async fn query_status(&self, chat_id: &str) -> Result<QueryStatus, VimoError> {
        self.get_query_status(chat_id).await
    }
}

async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, VimoError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    let value = interpret_response(status, &body)?;
    serde_json::from_value::<T>(value)
        .map_err(|e| VimoError::Backend(format!("Unexpected response shape: {}", e)))
}

/// Apply the backend's envelope rules to a raw response.
///
/// A missing `success` flag falls back to the HTTP status. Failures carry the
/// status code and the backend's `error` (or `message`) text.
pub fn interpret_response(status: u16, body: &str) -> Result<Value, VimoError> {
    let http_ok = (200..300).contains(&status);

    let value: Value = if body.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) if http_ok => {
                return Err(VimoError::Backend(format!("Malformed response: {}", e)));
            }
            Err(_) => {
                let snippet: String = body.chars().take(200).collect();
                return Err(VimoError::backend(status, snippet.trim()));
            }
        }
    };

    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(http_ok);

    if http_ok && success {
        return Ok(value);
    }

    let message = value
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))
        .unwrap_or("Request failed");

    Err(VimoError::backend(status, message))
}
