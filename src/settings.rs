//! Loading and saving backend settings: the local file is the source of
//! truth, the backend is told about changes when it is reachable.

use crate::api::VimoApi;
use crate::config::{load_saved_settings_from, merge_settings, save_settings_to, VideoRagSettings};
use crate::error::VimoError;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Result of a save. The local write always happened when this is returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSaveOutcome {
    /// `Some(true)` when the backend was initialized, `Some(false)` when it was updated
    pub initialized: Option<bool>,
    pub backend_error: Option<String>,
}

/// Built-in defaults, overlaid by whatever the backend suggests, overlaid by
/// the saved file. An unreachable backend or unreadable file only costs
/// their layer.
pub async fn load_settings(api: &VimoApi, saved_path: &Path) -> VideoRagSettings {
    let defaults = match api.get_default_config().await {
        Ok(defaults) => Some(defaults),
        Err(e) => {
            warn!(error = %e, "backend defaults unavailable, using built-in defaults");
            None
        }
    };

    let saved = match load_saved_settings_from(saved_path) {
        Ok(saved) => saved,
        Err(e) => {
            warn!(path = %saved_path.display(), error = %e, "ignoring unreadable settings file");
            None
        }
    };

    merge_settings(defaults.as_ref(), saved.as_ref())
}

pub async fn save_settings(
    api: &VimoApi,
    saved_path: &Path,
    settings: &VideoRagSettings,
) -> Result<SettingsSaveOutcome, VimoError> {
    let outcome = match api.apply_config(&settings.to_backend_config()).await {
        Ok(initialized) => {
            info!(initialized, "backend configuration applied");
            SettingsSaveOutcome {
                initialized: Some(initialized),
                backend_error: None,
            }
        }
        Err(e) => {
            warn!(error = %e, "backend rejected configuration, saving locally only");
            SettingsSaveOutcome {
                initialized: None,
                backend_error: Some(e.to_string()),
            }
        }
    };

    save_settings_to(saved_path, settings)?;
    Ok(outcome)
}
