//! Turns user-picked or dropped paths into an upload selection.
//!
//! Both entry points apply the same rules: extension allow-list, a per-file
//! ceiling (offending files are skipped with a reason), duplicate paths
//! collapsed, and an aggregate ceiling that rejects the whole selection.

use crate::config::ClientConfig;
use crate::config::{DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_TOTAL_BYTES};
use crate::error::VimoError;
use crate::validation::{format_file_size, has_extension, validate_file_size, VIDEO_EXTENSIONS};
use indexmap::IndexSet;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub accepted_extensions: Vec<String>,
    pub max_file_size: u64,
    pub max_total_size: u64,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            accepted_extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_file_size: DEFAULT_MAX_FILE_BYTES,
            max_total_size: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

impl CollectorOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_file_size: config.max_file_bytes(),
            max_total_size: config.max_total_bytes(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedFile {
    pub path: PathBuf,
    /// Path below the dropped folder, including the folder's own name
    pub relative_path: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderUploadResult {
    pub files: Vec<CollectedFile>,
    pub total_count: usize,
    pub total_size: u64,
    pub video_count: usize,
    pub directory_count: usize,
    pub skipped_count: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub visited: usize,
    pub total: usize,
    pub percent: u8,
}

#[derive(Default)]
struct Selection {
    seen: IndexSet<PathBuf>,
    files: Vec<CollectedFile>,
    skipped: Vec<SkippedFile>,
    directories: usize,
    entries: usize,
}

impl Selection {
    fn skip(&mut self, path: &Path, reason: impl Into<String>) {
        self.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            reason: reason.into(),
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct VideoCollector {
    options: CollectorOptions,
}

impl VideoCollector {
    pub fn new(options: CollectorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CollectorOptions {
        &self.options
    }

    /// Picker selection: files only, directories are skipped rather than walked
    pub fn collect_files(&self, paths: &[PathBuf]) -> Result<FolderUploadResult, VimoError> {
        let mut selection = Selection::default();
        for path in paths {
            let path = expand(path);
            selection.entries += 1;
            if path.is_dir() {
                selection.skip(&path, "Directories are not accepted here");
                continue;
            }
            let relative = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string());
            self.consider(&mut selection, &path, relative);
        }
        self.finish(selection)
    }

    /// Drag-and-drop: recurses into directories off the async runtime,
    /// reporting progress once per filesystem entry visited.
    pub async fn scan_paths<F>(
        &self,
        paths: Vec<PathBuf>,
        on_progress: F,
    ) -> Result<FolderUploadResult, VimoError>
    where
        F: Fn(ScanProgress) + Send + 'static,
    {
        let collector = self.clone();
        tokio::task::spawn_blocking(move || collector.scan_blocking(&paths, &on_progress)).await?
    }

    fn scan_blocking(
        &self,
        paths: &[PathBuf],
        on_progress: &dyn Fn(ScanProgress),
    ) -> Result<FolderUploadResult, VimoError> {
        let roots: Vec<PathBuf> = paths.iter().map(|p| expand(p)).collect();
        let total: usize = roots
            .iter()
            .map(|root| {
                if root.is_dir() {
                    WalkDir::new(root).into_iter().count()
                } else {
                    1
                }
            })
            .sum();
        debug!(roots = roots.len(), entries = total, "scanning dropped paths");

        let mut selection = Selection::default();
        let report = |selection: &Selection| {
            let percent = if total == 0 {
                100
            } else {
                ((selection.entries.min(total) * 100) / total) as u8
            };
            on_progress(ScanProgress {
                visited: selection.entries,
                total,
                percent,
            });
        };

        for root in &roots {
            if !root.is_dir() {
                selection.entries += 1;
                let relative = root.file_name().map(|n| n.to_string_lossy().to_string());
                self.consider(&mut selection, root, relative);
                report(&selection);
                continue;
            }

            let base = root.parent().unwrap_or(root.as_path()).to_path_buf();
            for entry in WalkDir::new(root).follow_links(false) {
                selection.entries += 1;
                match entry {
                    Ok(entry) if entry.file_type().is_dir() => selection.directories += 1,
                    Ok(entry) => {
                        let path = entry.path();
                        let relative = path
                            .strip_prefix(&base)
                            .ok()
                            .map(|p| p.to_string_lossy().to_string());
                        self.consider(&mut selection, path, relative);
                    }
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                        selection.skip(&path, e.to_string());
                    }
                }
                report(&selection);
            }
        }

        self.finish(selection)
    }

    fn consider(&self, selection: &mut Selection, path: &Path, relative: Option<String>) {
        if !has_extension(path, &self.options.accepted_extensions) {
            selection.skip(path, "Unsupported file type");
            return;
        }

        let size = match validate_file_size(path, self.options.max_file_size) {
            Ok(size) => size,
            Err(VimoError::Validation(reason)) => {
                selection.skip(path, reason);
                return;
            }
            Err(e) => {
                selection.skip(path, e.to_string());
                return;
            }
        };

        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !selection.seen.insert(key) {
            return;
        }

        selection.files.push(CollectedFile {
            path: path.to_path_buf(),
            relative_path: relative,
            size,
        });
    }

    fn finish(&self, selection: Selection) -> Result<FolderUploadResult, VimoError> {
        if selection.files.is_empty() {
            return Err(VimoError::Validation(
                "No supported video files found".to_string(),
            ));
        }

        let total_size: u64 = selection.files.iter().map(|f| f.size).sum();
        if total_size > self.options.max_total_size {
            return Err(VimoError::Validation(format!(
                "Total size {} exceeds limit {}",
                format_file_size(total_size),
                format_file_size(self.options.max_total_size)
            )));
        }

        let count = selection.files.len();
        info!(
            files = count,
            total_size = total_size,
            skipped = selection.skipped.len(),
            "selection collected"
        );

        Ok(FolderUploadResult {
            total_count: count,
            video_count: count,
            total_size,
            directory_count: selection.directories,
            skipped_count: selection.skipped.len(),
            skipped: selection.skipped,
            files: selection.files,
        })
    }
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}
