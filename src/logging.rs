use crate::config::{ensure_logs_dir, get_logs_dir};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{LazyLock, Mutex, Once};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_BACKUPS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub component: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

static LOGGER_INITIALIZED: Once = Once::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    ensure_logs_dir()?;
    let logs_dir = get_logs_dir()?;

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Console output stays terse; the file gets targets
        let console_layer = fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_filter(env_filter.clone());

        let file_appender = tracing_appender::rolling::never(&logs_dir, "app.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
            *guard_mutex = Some(guard);
        }

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        let _ = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });

    Ok(())
}

pub fn log_component_event(
    component: &str,
    level: &str,
    message: &str,
    details: Option<serde_json::Value>,
) -> Result<(), Box<dyn std::error::Error>> {
    match level {
        "ERROR" => error!(component = component, "{}", message),
        "WARN" => warn!(component = component, "{}", message),
        "DEBUG" => debug!(component = component, "{}", message),
        _ => info!(component = component, "{}", message),
    }

    ensure_logs_dir()?;
    let log_entry = LogEntry {
        timestamp: Utc::now().to_rfc3339(),
        level: level.to_string(),
        component: component.to_string(),
        message: message.to_string(),
        details,
    };
    let log_file_path = get_logs_dir()?.join(format!("{}.log", component));
    write_log_entry(&log_file_path, &log_entry)?;

    Ok(())
}

fn write_log_entry(log_file_path: &Path, entry: &LogEntry) -> Result<(), Box<dyn std::error::Error>> {
    if should_rotate_log(log_file_path)? {
        rotate_log_file(log_file_path)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;

    let json_line = serde_json::to_string(entry)?;
    writeln!(file, "{}", json_line)?;
    file.flush()?;

    Ok(())
}

fn should_rotate_log(log_file_path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    if !log_file_path.exists() {
        return Ok(false);
    }
    let metadata = std::fs::metadata(log_file_path)?;
    Ok(metadata.len() > MAX_LOG_SIZE)
}

fn rotate_log_file(log_file_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    // Shift existing backups (4 -> 5, 3 -> 4, ...); the oldest is overwritten
    for i in (1..MAX_BACKUPS).rev() {
        let current_backup = log_file_path.with_extension(format!("log.{}", i));
        let next_backup = log_file_path.with_extension(format!("log.{}", i + 1));

        if current_backup.exists() {
            std::fs::rename(&current_backup, &next_backup)?;
        }
    }

    if log_file_path.exists() {
        let first_backup = log_file_path.with_extension("log.1");
        std::fs::rename(log_file_path, first_backup)?;
    }

    Ok(())
}

/// Newest entries first
pub fn read_component_logs(
    component: &str,
    max_lines: Option<usize>,
) -> Result<Vec<LogEntry>, Box<dyn std::error::Error>> {
    let log_file_path = get_logs_dir()?.join(format!("{}.log", component));
    read_log_file(&log_file_path, max_lines)
}

fn read_log_file(
    log_file_path: &Path,
    max_lines: Option<usize>,
) -> Result<Vec<LogEntry>, Box<dyn std::error::Error>> {
    if !log_file_path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(log_file_path)?);
    let mut entries: Vec<LogEntry> = reader
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str::<LogEntry>(&line).ok())
        .collect();

    entries.reverse();
    if let Some(max) = max_lines {
        entries.truncate(max);
    }

    Ok(entries)
}

pub fn log_debug(component: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, "DEBUG", message, None)
}

pub fn log_info(component: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, "INFO", message, None)
}

pub fn log_warn(component: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, "WARN", message, None)
}

pub fn log_error(component: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, "ERROR", message, None)
}

pub fn log_with_details(
    component: &str,
    level: &str,
    message: &str,
    details: serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    log_component_event(component, level, message, Some(details))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_rotation() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("batch.log");

        {
            let mut file = File::create(&log_file).unwrap();
            let large_content = "x".repeat(11 * 1024 * 1024); // 11MB
            file.write_all(large_content.as_bytes()).unwrap();
        }

        assert!(should_rotate_log(&log_file).unwrap());
        rotate_log_file(&log_file).unwrap();

        assert!(log_file.with_extension("log.1").exists());
        assert!(!log_file.exists());
    }

    #[test]
    fn test_write_and_read_newest_first() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("chat.log");

        for i in 0..3 {
            let entry = LogEntry {
                timestamp: Utc::now().to_rfc3339(),
                level: "INFO".to_string(),
                component: "chat".to_string(),
                message: format!("message {}", i),
                details: None,
            };
            write_log_entry(&log_file, &entry).unwrap();
        }
        // Garbage lines are skipped
        let mut file = OpenOptions::new().append(true).open(&log_file).unwrap();
        writeln!(file, "not json").unwrap();

        let entries = read_log_file(&log_file, Some(2)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "message 2");
        assert_eq!(entries[1].message, "message 1");
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let temp_dir = tempdir().unwrap();
        let entries = read_log_file(&temp_dir.path().join("none.log"), None).unwrap();
        assert!(entries.is_empty());
    }
}
