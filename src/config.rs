use crate::api::types::{BackendDefaults, VideoRagConfig};
use crate::error::{ErrorContext, VimoError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:64451";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Environment variable overriding the config directory (defaults to `~/.vimo`)
pub const HOME_ENV: &str = "VIMO_HOME";
/// Environment variable overriding the backend address
pub const SERVER_URL_ENV: &str = "VIMO_API_URL";

pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientConfig {
    #[serde(rename = "serverUrl")]
    pub server_url: Option<String>,
    #[serde(rename = "pollIntervalMs")]
    pub poll_interval_ms: Option<u64>,
    #[serde(rename = "requestTimeoutSecs")]
    pub request_timeout_secs: Option<u64>,
    #[serde(rename = "queryTimeoutSecs")]
    pub query_timeout_secs: Option<u64>,
    #[serde(rename = "maxFileBytes")]
    pub max_file_bytes: Option<u64>,
    #[serde(rename = "maxTotalBytes")]
    pub max_total_bytes: Option<u64>,
}

impl ClientConfig {
    /// Backend address: `VIMO_API_URL`, then the config file, then the default.
    pub fn server_url(&self) -> Result<String, VimoError> {
        resolve_server_url(
            std::env::var(SERVER_URL_ENV).ok().as_deref(),
            self.server_url.as_deref(),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(
            self.query_timeout_secs
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS),
        )
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes.unwrap_or(DEFAULT_MAX_FILE_BYTES)
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_bytes.unwrap_or(DEFAULT_MAX_TOTAL_BYTES)
    }
}

pub fn resolve_server_url(env: Option<&str>, configured: Option<&str>) -> Result<String, VimoError> {
    let raw = env
        .filter(|s| !s.trim().is_empty())
        .or(configured.filter(|s| !s.trim().is_empty()))
        .unwrap_or(DEFAULT_SERVER_URL)
        .trim();

    let parsed = url::Url::parse(raw)
        .map_err(|e| VimoError::Config(format!("Invalid server URL '{}': {}", raw, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(VimoError::Config(format!(
            "Server URL must use http or https: {}",
            raw
        )));
    }

    Ok(raw.trim_end_matches('/').to_string())
}

pub fn get_config_dir() -> Result<PathBuf, VimoError> {
    if let Ok(custom) = std::env::var(HOME_ENV) {
        if !custom.trim().is_empty() {
            let expanded = shellexpand::tilde(custom.trim()).to_string();
            return Ok(PathBuf::from(expanded));
        }
    }
    if let Some(home_dir) = dirs::home_dir() {
        Ok(home_dir.join(".vimo"))
    } else {
        Err(VimoError::Config("Could not find home directory".to_string()))
    }
}

pub fn get_config_file_path() -> Result<PathBuf, VimoError> {
    Ok(get_config_dir()?.join("config.json"))
}

pub fn get_settings_file_path() -> Result<PathBuf, VimoError> {
    Ok(get_config_dir()?.join("settings.json"))
}

pub fn get_logs_dir() -> Result<PathBuf, VimoError> {
    Ok(get_config_dir()?.join("logs"))
}

pub fn get_database_path() -> Result<PathBuf, VimoError> {
    Ok(get_config_dir()?.join("vimo.db"))
}

fn ensure_private_dir(dir: &Path) -> Result<(), VimoError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(dir)?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

pub fn ensure_config_dir() -> Result<(), VimoError> {
    ensure_private_dir(&get_config_dir()?)
}

pub fn ensure_logs_dir() -> Result<(), VimoError> {
    ensure_config_dir()?;
    ensure_private_dir(&get_logs_dir()?)
}

fn read_json_or_default<T>(path: &Path) -> Result<T, VimoError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if path.exists() {
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        let value: T = serde_json::from_str(&content)
            .map_err(|e| VimoError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(value)
    } else {
        Ok(T::default())
    }
}

fn write_private_json<T: Serialize>(path: &Path, value: &T) -> Result<(), VimoError> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;

    // Set permissions to 600 (read/write for owner only) on Unix systems
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

pub fn load_config() -> Result<ClientConfig, VimoError> {
    ensure_config_dir()?;
    load_config_from(&get_config_file_path()?)
}

pub fn load_config_from(path: &Path) -> Result<ClientConfig, VimoError> {
    read_json_or_default(path)
}

pub fn save_config(config: &ClientConfig) -> Result<(), VimoError> {
    write_private_json(&get_config_file_path()?, config)
}

/// Model and credential settings for the processing backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoRagSettings {
    pub openai_base_url: String,
    pub openai_api_key: String,
    pub processing_model: String,
    pub analysis_model: String,
    pub dashscope_api_key: String,
    pub caption_model: String,
    pub asr_model: String,
    pub store_directory: String,
    pub imagebind_model_directory: String,
    pub selected_imagebind_model: String,
    #[serde(default)]
    pub imagebind_installed: bool,
}

impl Default for VideoRagSettings {
    fn default() -> Self {
        Self {
            openai_base_url: String::new(),
            openai_api_key: String::new(),
            processing_model: "gpt-4o-mini".to_string(),
            analysis_model: "gpt-4o-mini".to_string(),
            dashscope_api_key: String::new(),
            caption_model: "qwen-vl-plus-latest".to_string(),
            asr_model: "paraformer-realtime-v2".to_string(),
            store_directory: String::new(),
            imagebind_model_directory: "/app/models".to_string(),
            selected_imagebind_model: "huge".to_string(),
            imagebind_installed: false,
        }
    }
}

/// A partial settings record; absent fields leave the underlying value alone.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub openai_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub processing_model: Option<String>,
    pub analysis_model: Option<String>,
    pub dashscope_api_key: Option<String>,
    pub caption_model: Option<String>,
    pub asr_model: Option<String>,
    pub store_directory: Option<String>,
    pub imagebind_model_directory: Option<String>,
    pub selected_imagebind_model: Option<String>,
    pub imagebind_installed: Option<bool>,
}

/// Backend defaults never carry the OpenAI key into local settings.
impl From<&BackendDefaults> for SettingsPatch {
    fn from(defaults: &BackendDefaults) -> Self {
        Self {
            openai_base_url: defaults.openai_base_url.clone(),
            openai_api_key: None,
            processing_model: defaults.processing_model.clone(),
            analysis_model: defaults.analysis_model.clone(),
            dashscope_api_key: defaults.dashscope_api_key.clone(),
            caption_model: defaults.caption_model.clone(),
            asr_model: defaults.asr_model.clone(),
            store_directory: defaults.store_directory.clone(),
            imagebind_model_directory: defaults.imagebind_model_directory.clone(),
            selected_imagebind_model: defaults.selected_imagebind_model.clone(),
            imagebind_installed: None,
        }
    }
}

impl VideoRagSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        set(&mut self.openai_base_url, &patch.openai_base_url);
        set(&mut self.openai_api_key, &patch.openai_api_key);
        set(&mut self.processing_model, &patch.processing_model);
        set(&mut self.analysis_model, &patch.analysis_model);
        set(&mut self.dashscope_api_key, &patch.dashscope_api_key);
        set(&mut self.caption_model, &patch.caption_model);
        set(&mut self.asr_model, &patch.asr_model);
        set(&mut self.store_directory, &patch.store_directory);
        set(&mut self.imagebind_model_directory, &patch.imagebind_model_directory);
        set(&mut self.selected_imagebind_model, &patch.selected_imagebind_model);
        if let Some(installed) = patch.imagebind_installed {
            self.imagebind_installed = installed;
        }
    }

    /// Payload for `/api/initialize` and `/api/config/update`
    pub fn to_backend_config(&self) -> VideoRagConfig {
        let model_dir = self.imagebind_model_directory.trim_end_matches('/');
        VideoRagConfig {
            openai_api_key: self.openai_api_key.clone(),
            openai_base_url: self.openai_base_url.clone(),
            ali_dashscope_api_key: self.dashscope_api_key.clone(),
            ali_dashscope_base_url: DASHSCOPE_BASE_URL.to_string(),
            analysis_model: self.analysis_model.clone(),
            processing_model: self.processing_model.clone(),
            caption_model: self.caption_model.clone(),
            asr_model: self.asr_model.clone(),
            image_bind_model_path: format!("{}/imagebind.pth", model_dir),
            base_storage_path: self.store_directory.clone(),
        }
    }
}

/// Built-in defaults, then backend defaults, then locally saved values.
pub fn merge_settings(
    backend_defaults: Option<&BackendDefaults>,
    saved: Option<&SettingsPatch>,
) -> VideoRagSettings {
    let mut settings = VideoRagSettings::default();
    if let Some(defaults) = backend_defaults {
        settings.apply(&SettingsPatch::from(defaults));
    }
    if let Some(saved) = saved {
        settings.apply(saved);
    }
    settings
}

pub fn load_saved_settings() -> Result<Option<SettingsPatch>, VimoError> {
    load_saved_settings_from(&get_settings_file_path()?)
}

pub fn load_saved_settings_from(path: &Path) -> Result<Option<SettingsPatch>, VimoError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json_or_default(path)
        .map(Some)
        .context("Failed to read saved settings")
}

pub fn save_settings(settings: &VideoRagSettings) -> Result<(), VimoError> {
    save_settings_to(&get_settings_file_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &VideoRagSettings) -> Result<(), VimoError> {
    write_private_json(path, settings)
}

pub fn clear_settings() -> Result<(), VimoError> {
    let path = get_settings_file_path()?;
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}
