use super::poller::BatchStatusPoller;
use super::state::{video_name_for, VideoProcessingItem};
use crate::api::SessionBackend;
use crate::collector::CollectedFile;
use crate::error::VimoError;
use crate::validation::validate_chat_id;
use tracing::info;

/// Upload a collected selection and build the items the poller will track.
///
/// Items are named by the server's `video_names` when it returns one per
/// file, otherwise by file stem (which is how the server names them).
pub async fn submit_batch<B: SessionBackend>(
    backend: &B,
    chat_id: &str,
    files: &[CollectedFile],
) -> Result<Vec<VideoProcessingItem>, VimoError> {
    validate_chat_id(chat_id)?;
    if files.is_empty() {
        return Err(VimoError::Validation("No videos selected".to_string()));
    }

    let paths: Vec<String> = files
        .iter()
        .map(|f| f.path.to_string_lossy().to_string())
        .collect();
    let response = backend.upload_videos(chat_id, &paths).await?;

    let use_server_names = response.video_names.len() == files.len();
    let items = files
        .iter()
        .zip(paths)
        .enumerate()
        .map(|(i, (file, path))| {
            let name = if use_server_names {
                response.video_names[i].clone()
            } else {
                video_name_for(&file.path)
            };
            VideoProcessingItem::new(name, path, file.size)
        })
        .collect::<Vec<_>>();

    info!(chat_id = chat_id, count = items.len(), "batch submitted");
    Ok(items)
}

/// Reset every failed video, upload them again and restart polling.
/// Returns how many videos were resubmitted.
pub async fn retry_failed<B: SessionBackend + 'static>(
    backend: &B,
    poller: &BatchStatusPoller<B>,
) -> Result<usize, VimoError> {
    let failed = poller.failed_videos();
    if failed.is_empty() {
        return Ok(0);
    }

    let paths: Vec<String> = failed.iter().map(|v| v.path.clone()).collect();
    backend.upload_videos(poller.chat_id(), &paths).await?;

    for video in &failed {
        poller.retry_video(&video.id);
    }
    poller.start();

    info!(chat_id = poller.chat_id(), count = failed.len(), "failed videos resubmitted");
    Ok(failed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{
        IndexingStatus, QueryStarted, QueryStatus, UploadResponse, VideoStatus,
    };
    use crate::events::EventBus;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingBackend {
        uploads: Mutex<Vec<Vec<String>>>,
        names: Vec<String>,
    }

    impl SessionBackend for RecordingBackend {
        async fn upload_videos(&self, chat_id: &str, paths: &[String]) -> Result<UploadResponse, VimoError> {
            self.uploads.lock().unwrap().push(paths.to_vec());
            Ok(UploadResponse {
                message: None,
                video_names: self.names.clone(),
                video_count: paths.len(),
                chat_id: Some(chat_id.to_string()),
                status: Some("processing".into()),
            })
        }

        async fn indexing_status(&self, _: &str) -> Result<IndexingStatus, VimoError> {
            Ok(IndexingStatus::default())
        }

        async fn submit_query(&self, _: &str, _: &str) -> Result<QueryStarted, VimoError> {
            Err(VimoError::Other("unused".into()))
        }

        async fn query_status(&self, _: &str) -> Result<QueryStatus, VimoError> {
            Err(VimoError::Other("unused".into()))
        }
    }

    fn file(path: &str, size: u64) -> CollectedFile {
        CollectedFile {
            path: PathBuf::from(path),
            relative_path: None,
            size,
        }
    }

    #[tokio::test]
    async fn test_submit_names_by_stem_without_server_names() {
        let backend = RecordingBackend::default();
        let items = submit_batch(
            &backend,
            "chat-1",
            &[file("/v/beach.day.mp4", 10), file("/v/city.mov", 20)],
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "beach");
        assert_eq!(items[1].name, "city");
        assert_eq!(items[1].size_bytes, 20);
        assert!(items.iter().all(|i| i.status == VideoStatus::Pending));
        assert_eq!(backend.uploads.lock().unwrap()[0], vec!["/v/beach.day.mp4", "/v/city.mov"]);
    }

    #[tokio::test]
    async fn test_submit_prefers_server_names() {
        let backend = RecordingBackend {
            names: vec!["x".into()],
            ..Default::default()
        };
        let items = submit_batch(&backend, "chat-1", &[file("/v/beach.mp4", 1)])
            .await
            .unwrap();
        assert_eq!(items[0].name, "x");
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input_without_network() {
        let backend = RecordingBackend::default();
        assert!(submit_batch(&backend, "new", &[file("/v/a.mp4", 1)]).await.is_err());
        assert!(submit_batch(&backend, "chat-1", &[]).await.is_err());
        assert!(backend.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_failed_resubmits_only_failures() {
        let backend = Arc::new(RecordingBackend::default());
        let poller = BatchStatusPoller::new(backend.clone(), "chat-1", EventBus::new(8));

        let mut items = vec![
            VideoProcessingItem::new("a", "/v/a.mp4", 1),
            VideoProcessingItem::new("b", "/v/b.mp4", 1),
        ];
        items[1].status = VideoStatus::Error;
        poller.update_videos(items);

        assert_eq!(retry_failed(backend.as_ref(), &poller).await.unwrap(), 1);
        assert_eq!(backend.uploads.lock().unwrap()[0], vec!["/v/b.mp4"]);
        assert!(poller.failed_videos().is_empty());
        assert_eq!(poller.state().videos[1].retry_count, 1);

        assert_eq!(retry_failed(backend.as_ref(), &poller).await.unwrap(), 0);
        poller.stop();
    }
}
