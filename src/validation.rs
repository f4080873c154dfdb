use crate::error::VimoError;
use std::path::Path;

/// Extensions accepted for upload (lowercase, without the dot)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "webm", "ogg", "mov", "avi", "mkv", "wmv", "flv", "m4v", "3gp",
];

/// Maximum question length accepted by `query_video`
pub const MAX_QUERY_LENGTH: usize = 4000;

/// Chat ids that mean "this conversation has not been created yet"
pub const UNSAVED_CHAT_IDS: &[&str] = &["", "new"];

pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Validate file size is within the specified limit
pub fn validate_file_size(path: &Path, max_size: u64) -> Result<u64, VimoError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        VimoError::Validation(format!(
            "Failed to get file metadata for '{}': {}",
            path.display(),
            e
        ))
    })?;

    let size = metadata.len();

    if size > max_size {
        return Err(VimoError::Validation(format!(
            "File size ({}) exceeds maximum allowed size ({}): {}",
            format_file_size(size),
            format_file_size(max_size),
            path.display()
        )));
    }

    Ok(size)
}

pub fn is_unsaved_chat(chat_id: &str) -> bool {
    UNSAVED_CHAT_IDS.contains(&chat_id.trim())
}

/// Chat ids travel in URL paths and storage keys
pub fn validate_chat_id(chat_id: &str) -> Result<(), VimoError> {
    if is_unsaved_chat(chat_id) {
        return Err(VimoError::Validation(
            "Chat has not been created yet".to_string(),
        ));
    }
    if chat_id.contains('/') || chat_id.contains('\\') || chat_id.contains("..") {
        return Err(VimoError::Validation(format!(
            "Chat id contains path characters: {}",
            chat_id
        )));
    }
    if chat_id.chars().any(char::is_control) {
        return Err(VimoError::Validation(
            "Chat id contains control characters".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_query(query: &str) -> Result<&str, VimoError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(VimoError::Validation("Question is empty".to_string()));
    }
    if trimmed.chars().count() > MAX_QUERY_LENGTH {
        return Err(VimoError::Validation(format!(
            "Question is longer than {} characters",
            MAX_QUERY_LENGTH
        )));
    }
    Ok(trimmed)
}

/// Human-readable size using 1024 steps ("0 Bytes", "1.5 KB", "2 GB")
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut exponent = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && exponent < UNITS.len() - 1 {
        value /= 1024.0;
        exponent += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;

    // Trailing zeros are dropped: 1.50 -> 1.5, 2.00 -> 2
    let mut text = format!("{:.2}", rounded);
    while text.contains('.') && (text.ends_with('0') || text.ends_with('.')) {
        text.pop();
    }
    format!("{} {}", text, UNITS[exponent])
}
