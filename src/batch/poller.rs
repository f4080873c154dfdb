use super::state::{BatchProcessingState, BatchStatus, Reconciliation, VideoProcessingItem};
use crate::api::types::IndexingStatus;
use crate::api::SessionBackend;
use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::events::{EventBus, ProcessingEventPayload};
use crate::validation::is_unsaved_chat;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerPhase {
    Idle,
    Polling,
    Paused,
    Stopped,
}

/// What a single status fetch did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another fetch was already running
    Skipped,
    /// Server report identical to the previous one
    Unchanged,
    Applied,
    /// Fetch failed; state untouched
    Failed(String),
    /// Result arrived after stop/pause/disable and was dropped
    Stale,
}

struct PollerInner {
    state: BatchProcessingState,
    phase: PollerPhase,
    generation: u64,
    token: Option<CancellationToken>,
    last_snapshot: Option<String>,
    last_error: Option<String>,
    enabled: bool,
}

struct Shared<B> {
    backend: Arc<B>,
    chat_id: String,
    bus: EventBus,
    interval: Duration,
    inner: Mutex<PollerInner>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<B: SessionBackend + 'static> Shared<B> {
    fn lock(&self) -> MutexGuard<'_, PollerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn tick(&self, generation: u64, token: Option<&CancellationToken>) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return TickOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);

        let result = self.backend.indexing_status(&self.chat_id).await;

        let mut inner = self.lock();
        let cancelled = token.map(|t| t.is_cancelled()).unwrap_or(false);
        if cancelled || inner.generation != generation || !inner.enabled {
            debug!(chat_id = %self.chat_id, "dropping stale status result");
            return TickOutcome::Stale;
        }

        match result {
            Ok(status) => self.apply(&mut inner, &status),
            Err(e) => {
                let message = e.to_string();
                warn!(chat_id = %self.chat_id, error = %message, "indexing status fetch failed");
                inner.last_error = Some(message.clone());
                self.bus.publish(
                    &self.chat_id,
                    ProcessingEventPayload::StatusFetchFailed {
                        error: message.clone(),
                    },
                );
                TickOutcome::Failed(message)
            }
        }
    }

    fn apply(&self, inner: &mut PollerInner, status: &IndexingStatus) -> TickOutcome {
        let snapshot = serde_json::to_string(status).ok();
        if snapshot.is_some() && snapshot == inner.last_snapshot {
            return TickOutcome::Unchanged;
        }
        inner.last_snapshot = snapshot;

        let outcome = inner.state.reconcile(status, Utc::now());
        self.publish(&inner.state, &outcome);

        if let Some(error) = &outcome.batch_failed {
            inner.last_error = Some(error.clone());
        }

        if inner.state.is_finished() {
            info!(
                chat_id = %self.chat_id,
                status = ?inner.state.status,
                completed = inner.state.completed_videos,
                failed = inner.state.failed_videos,
                "batch finished, polling stopped"
            );
            inner.phase = PollerPhase::Stopped;
            if let Some(token) = inner.token.take() {
                token.cancel();
            }
        }

        TickOutcome::Applied
    }

    fn publish(&self, state: &BatchProcessingState, outcome: &Reconciliation) {
        for video in &outcome.newly_completed {
            self.bus.publish(
                &self.chat_id,
                ProcessingEventPayload::VideoCompleted {
                    video_id: video.id.clone(),
                    name: video.name.clone(),
                    path: video.path.clone(),
                },
            );
        }

        self.bus.publish(
            &self.chat_id,
            ProcessingEventPayload::StateChanged {
                completed: state.completed_videos,
                failed: state.failed_videos,
                total: state.total_videos,
                overall_progress: state.overall_progress,
                status: state.status,
                current_video: state.current_processing_video.clone(),
            },
        );

        if outcome.batch_completed {
            self.bus.publish(
                &self.chat_id,
                ProcessingEventPayload::BatchCompleted {
                    total: state.total_videos,
                    completed: state.completed_videos,
                    failed: state.failed_videos,
                },
            );
        }

        if let Some(error) = &outcome.batch_failed {
            self.bus.publish(
                &self.chat_id,
                ProcessingEventPayload::BatchFailed {
                    error: error.clone(),
                },
            );
        }
    }
}

async fn run<B: SessionBackend + 'static>(
    shared: Arc<Shared<B>>,
    token: CancellationToken,
    generation: u64,
) {
    let mut ticker = tokio::time::interval(shared.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        shared.tick(generation, Some(&token)).await;
    }
    debug!(chat_id = %shared.chat_id, generation, "poll loop exited");
}

/// Polls one chat's indexing status and keeps a [`BatchProcessingState`]
/// in step with it.
///
/// Every polling run owns a child of the parent token plus a generation
/// number. Results are applied only while both are still current, so a
/// response that lands after `stop`, `pause`, `set_enabled(false)` or drop is
/// discarded instead of mutating state or publishing events. The loop stops
/// itself once the batch reaches completed or error.
pub struct BatchStatusPoller<B: SessionBackend + 'static> {
    shared: Arc<Shared<B>>,
    parent: CancellationToken,
}

impl<B: SessionBackend + 'static> BatchStatusPoller<B> {
    pub fn new(backend: Arc<B>, chat_id: &str, bus: EventBus) -> Self {
        Self::with_interval(
            backend,
            chat_id,
            bus,
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        )
    }

    pub fn with_interval(backend: Arc<B>, chat_id: &str, bus: EventBus, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                chat_id: chat_id.to_string(),
                bus,
                interval,
                inner: Mutex::new(PollerInner {
                    state: BatchProcessingState::default(),
                    phase: PollerPhase::Idle,
                    generation: 0,
                    token: None,
                    last_snapshot: None,
                    last_error: None,
                    enabled: true,
                }),
                in_flight: AtomicBool::new(false),
            }),
            parent: CancellationToken::new(),
        }
    }

    /// Tie polling runs to an outer token (application shutdown)
    pub fn with_cancellation(mut self, parent: CancellationToken) -> Self {
        self.parent = parent;
        self
    }

    pub fn chat_id(&self) -> &str {
        &self.shared.chat_id
    }

    /// Begin polling. Returns false when disabled or the chat is not saved yet.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if is_unsaved_chat(&self.shared.chat_id) {
            return false;
        }
        let mut inner = self.shared.lock();
        if !inner.enabled || self.parent.is_cancelled() {
            return false;
        }
        if inner.phase == PollerPhase::Polling {
            return true;
        }
        if inner.state.is_finished() {
            inner.state.status = BatchStatus::Processing;
            inner.state.end_time = None;
            inner.last_snapshot = None;
        }
        self.spawn_run(&mut inner);
        true
    }

    fn spawn_run(&self, inner: &mut PollerInner) {
        if let Some(old) = inner.token.take() {
            old.cancel();
        }
        inner.generation += 1;
        let token = self.parent.child_token();
        inner.token = Some(token.clone());
        inner.phase = PollerPhase::Polling;

        info!(chat_id = %self.shared.chat_id, generation = inner.generation, "polling started");
        tokio::spawn(run(self.shared.clone(), token, inner.generation));
    }

    fn halt(inner: &mut PollerInner) {
        if let Some(token) = inner.token.take() {
            token.cancel();
        }
        inner.generation += 1;
    }

    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        Self::halt(&mut inner);
        inner.phase = PollerPhase::Stopped;
        debug!(chat_id = %self.shared.chat_id, "polling stopped");
    }

    /// Stop the timer but keep state; the batch shows as paused
    pub fn pause(&self) {
        let mut inner = self.shared.lock();
        if inner.phase != PollerPhase::Polling {
            return;
        }
        Self::halt(&mut inner);
        inner.phase = PollerPhase::Paused;
        inner.state.status = BatchStatus::Paused;
    }

    pub fn resume(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.phase != PollerPhase::Paused || !inner.enabled || self.parent.is_cancelled() {
            return false;
        }
        inner.state.status = BatchStatus::Processing;
        self.spawn_run(&mut inner);
        true
    }

    /// Disabling cancels any run; enabling restarts polling if the batch is
    /// still processing. A paused batch stays paused across the toggle.
    pub fn set_enabled(&self, enabled: bool) {
        let should_start = {
            let mut inner = self.shared.lock();
            inner.enabled = enabled;
            if !enabled {
                Self::halt(&mut inner);
                if inner.phase != PollerPhase::Paused {
                    inner.phase = PollerPhase::Idle;
                }
                false
            } else {
                inner.phase != PollerPhase::Polling
                    && inner.state.status == BatchStatus::Processing
                    && inner.state.total_videos > 0
            }
        };
        if should_start {
            self.start();
        }
    }

    /// One immediate fetch outside the timer. Skipped if a fetch is running.
    pub async fn fetch_now(&self) -> TickOutcome {
        let generation = {
            let inner = self.shared.lock();
            if !inner.enabled || matches!(inner.phase, PollerPhase::Paused | PollerPhase::Stopped) {
                return TickOutcome::Stale;
            }
            inner.generation
        };
        self.shared.tick(generation, None).await
    }

    /// Replace the batch with a fresh one and start polling it
    pub fn initialize_processing(&self, videos: Vec<VideoProcessingItem>) -> bool {
        {
            let mut inner = self.shared.lock();
            Self::halt(&mut inner);
            inner.state = BatchProcessingState::started(videos, Utc::now());
            inner.last_snapshot = None;
            inner.last_error = None;
            inner.phase = PollerPhase::Idle;
        }
        self.start()
    }

    pub fn update_videos(&self, videos: Vec<VideoProcessingItem>) {
        let mut inner = self.shared.lock();
        inner.state.replace_videos(videos);
        // Force the next report to be applied against the new list
        inner.last_snapshot = None;
    }

    /// Local reset only; resubmission is up to the caller
    pub fn retry_video(&self, video_id: &str) -> bool {
        let mut inner = self.shared.lock();
        let reset = inner.state.retry_video(video_id);
        if reset {
            inner.last_snapshot = None;
        }
        reset
    }

    pub fn remove_video(&self, video_id: &str) -> bool {
        self.shared.lock().state.remove_video(video_id)
    }

    pub fn failed_videos(&self) -> Vec<VideoProcessingItem> {
        self.shared.lock().state.failed_videos()
    }

    pub fn state(&self) -> BatchProcessingState {
        self.shared.lock().state.clone()
    }

    pub fn phase(&self) -> PollerPhase {
        self.shared.lock().phase
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }
}

impl<B: SessionBackend + 'static> Drop for BatchStatusPoller<B> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        Self::halt(&mut inner);
        inner.phase = PollerPhase::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{
        QueryStarted, QueryStatus, RemoteStatus, UploadResponse, VideoDetail, VideoStatus,
    };
    use crate::batch::PROCESSING_FAILED_TEXT;
    use crate::error::VimoError;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Replays scripted reports; the last one repeats forever
    struct ScriptedIndexing {
        reports: Mutex<VecDeque<Result<IndexingStatus, VimoError>>>,
        last: Mutex<Option<IndexingStatus>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedIndexing {
        fn new(reports: Vec<Result<IndexingStatus, VimoError>>) -> Self {
            Self {
                reports: Mutex::new(reports.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(reports: Vec<Result<IndexingStatus, VimoError>>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(reports)
            }
        }
    }

    impl SessionBackend for ScriptedIndexing {
        async fn upload_videos(&self, _: &str, _: &[String]) -> Result<UploadResponse, VimoError> {
            Err(VimoError::Other("unused".into()))
        }

        async fn indexing_status(&self, _: &str) -> Result<IndexingStatus, VimoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = self.reports.lock().unwrap().pop_front();
            match next {
                Some(Ok(status)) => {
                    *self.last.lock().unwrap() = Some(status.clone());
                    Ok(status)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone().unwrap_or_default()),
            }
        }

        async fn submit_query(&self, _: &str, _: &str) -> Result<QueryStarted, VimoError> {
            Err(VimoError::Other("unused".into()))
        }

        async fn query_status(&self, _: &str) -> Result<QueryStatus, VimoError> {
            Err(VimoError::Other("unused".into()))
        }
    }

    fn videos() -> Vec<VideoProcessingItem> {
        vec![
            VideoProcessingItem::new("a", "/v/a.mp4", 1),
            VideoProcessingItem::new("b", "/v/b.mp4", 1),
        ]
    }

    fn report(status: RemoteStatus, done: &[&str]) -> IndexingStatus {
        let mut details = BTreeMap::new();
        for name in done {
            details.insert(
                name.to_string(),
                VideoDetail {
                    status: Some(VideoStatus::Completed),
                    ..Default::default()
                },
            );
        }
        IndexingStatus {
            status,
            video_details: details,
            ..Default::default()
        }
    }

    fn poller(backend: ScriptedIndexing) -> (BatchStatusPoller<ScriptedIndexing>, EventBus) {
        let bus = EventBus::new(64);
        let poller = BatchStatusPoller::with_interval(
            Arc::new(backend),
            "chat-1",
            bus.clone(),
            Duration::from_millis(2000),
        );
        (poller, bus)
    }

    #[tokio::test]
    async fn test_fetch_now_applies_then_dedups() {
        let (poller, bus) = poller(ScriptedIndexing::new(vec![
            Ok(report(RemoteStatus::Processing, &["a"])),
            Ok(report(RemoteStatus::Processing, &["a"])),
        ]));
        let mut rx = bus.subscribe();
        poller.update_videos(videos());

        assert_eq!(poller.fetch_now().await, TickOutcome::Applied);
        assert_eq!(poller.fetch_now().await, TickOutcome::Unchanged);
        assert_eq!(poller.state().completed_videos, 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload_type(), "video_completed");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload_type(), "state_changed");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_completed_then_stops() {
        let backend = ScriptedIndexing::new(vec![
            Ok(report(RemoteStatus::Processing, &[])),
            Ok(report(RemoteStatus::Processing, &["a"])),
            Ok(report(RemoteStatus::Completed, &["a", "b"])),
        ]);
        let (poller, bus) = poller(backend);
        let mut rx = bus.subscribe();

        assert!(poller.initialize_processing(videos()));
        assert_eq!(poller.phase(), PollerPhase::Polling);

        let mut completed_events = 0;
        let mut video_events = 0;
        loop {
            let event = rx.recv().await.unwrap();
            match event.payload {
                ProcessingEventPayload::VideoCompleted { .. } => video_events += 1,
                ProcessingEventPayload::BatchCompleted { completed, .. } => {
                    completed_events += 1;
                    assert_eq!(completed, 2);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(video_events, 2);
        assert_eq!(completed_events, 1);

        let state = poller.state();
        assert_eq!(state.status, BatchStatus::Completed);
        assert_eq!(state.overall_progress, 100);
        assert!(state.end_time.is_some());
        assert_eq!(poller.phase(), PollerPhase::Stopped);

        let calls = poller.shared.backend.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(poller.shared.backend.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_fetch_error_is_reported_and_state_kept() {
        let (poller, bus) = poller(ScriptedIndexing::new(vec![Err(VimoError::backend(
            500,
            "Internal Server Error",
        ))]));
        let mut rx = bus.subscribe();
        poller.update_videos(videos());
        let before = poller.state();

        let outcome = poller.fetch_now().await;
        assert!(matches!(outcome, TickOutcome::Failed(_)));
        assert_eq!(poller.state(), before);
        assert!(poller.last_error().unwrap().contains("500"));
        assert_eq!(rx.recv().await.unwrap().payload_type(), "status_fetch_failed");
    }

    #[tokio::test]
    async fn test_result_after_stop_is_discarded() {
        let gate = Arc::new(Notify::new());
        let backend = ScriptedIndexing::gated(
            vec![Ok(report(RemoteStatus::Completed, &["a", "b"]))],
            gate.clone(),
        );
        let (poller, bus) = poller(backend);
        let mut rx = bus.subscribe();
        poller.update_videos(videos());
        let poller = Arc::new(poller);

        let fetch = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.fetch_now().await })
        };
        while poller.shared.backend.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        poller.stop();
        gate.notify_one();

        assert_eq!(fetch.await.unwrap(), TickOutcome::Stale);
        assert_eq!(poller.state().completed_videos, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overlapping_fetch_is_skipped() {
        let gate = Arc::new(Notify::new());
        let backend = ScriptedIndexing::gated(
            vec![Ok(report(RemoteStatus::Processing, &["a"]))],
            gate.clone(),
        );
        let (poller, _bus) = poller(backend);
        poller.update_videos(videos());
        let poller = Arc::new(poller);

        let first = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.fetch_now().await })
        };
        while poller.shared.backend.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(poller.fetch_now().await, TickOutcome::Skipped);
        gate.notify_one();
        assert_eq!(first.await.unwrap(), TickOutcome::Applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let (poller, _bus) = poller(ScriptedIndexing::new(vec![Ok(report(
            RemoteStatus::Processing,
            &[],
        ))]));
        assert!(poller.initialize_processing(videos()));

        poller.pause();
        assert_eq!(poller.phase(), PollerPhase::Paused);
        assert_eq!(poller.state().status, BatchStatus::Paused);
        assert_eq!(poller.fetch_now().await, TickOutcome::Stale);

        let calls = poller.shared.backend.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(poller.shared.backend.calls.load(Ordering::SeqCst), calls);

        assert!(poller.resume());
        assert_eq!(poller.phase(), PollerPhase::Polling);
        assert_eq!(poller.state().status, BatchStatus::Processing);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(poller.shared.backend.calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_survives_disable_and_enable() {
        let (poller, _bus) = poller(ScriptedIndexing::new(vec![Ok(report(
            RemoteStatus::Processing,
            &[],
        ))]));
        assert!(poller.initialize_processing(videos()));

        poller.pause();
        poller.set_enabled(false);
        assert_eq!(poller.phase(), PollerPhase::Paused);
        poller.set_enabled(true);
        assert_eq!(poller.phase(), PollerPhase::Paused);
        assert_eq!(poller.state().status, BatchStatus::Paused);

        let calls = poller.shared.backend.calls.load(Ordering::SeqCst);
        assert!(poller.resume());
        assert_eq!(poller.phase(), PollerPhase::Polling);
        assert_eq!(poller.state().status, BatchStatus::Processing);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(poller.shared.backend.calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test]
    async fn test_error_without_reason_publishes_batch_failed() {
        let (poller, bus) = poller(ScriptedIndexing::new(vec![Ok(report(
            RemoteStatus::Error,
            &[],
        ))]));
        let mut rx = bus.subscribe();
        poller.update_videos(videos());

        assert_eq!(poller.fetch_now().await, TickOutcome::Applied);
        assert_eq!(poller.phase(), PollerPhase::Stopped);
        assert_eq!(poller.last_error().as_deref(), Some(PROCESSING_FAILED_TEXT));

        assert_eq!(rx.recv().await.unwrap().payload_type(), "state_changed");
        let failed = rx.recv().await.unwrap();
        assert!(failed.is_terminal());
        assert!(matches!(
            failed.payload,
            ProcessingEventPayload::BatchFailed { ref error } if error == PROCESSING_FAILED_TEXT
        ));
    }

    #[tokio::test]
    async fn test_disabled_poller_does_not_start() {
        let (poller, _bus) = poller(ScriptedIndexing::new(vec![]));
        poller.set_enabled(false);
        assert!(!poller.initialize_processing(videos()));
        assert_eq!(poller.phase(), PollerPhase::Idle);
        assert_eq!(poller.fetch_now().await, TickOutcome::Stale);
    }

    #[tokio::test]
    async fn test_unsaved_chat_never_polls() {
        let bus = EventBus::new(8);
        let poller =
            BatchStatusPoller::new(Arc::new(ScriptedIndexing::new(vec![])), "new", bus);
        assert!(!poller.start());
        assert_eq!(poller.phase(), PollerPhase::Idle);
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_polling() {
        let parent = CancellationToken::new();
        let (poller, _bus) = poller(ScriptedIndexing::new(vec![]));
        let poller = poller.with_cancellation(parent.clone());
        parent.cancel();
        assert!(!poller.initialize_processing(videos()));
    }

    #[tokio::test]
    async fn test_retry_and_remove_are_local() {
        let (poller, _bus) = poller(ScriptedIndexing::new(vec![]));
        let mut items = videos();
        items[0].status = VideoStatus::Error;
        items[0].error = Some("decode".into());
        poller.update_videos(items);

        let failed = poller.failed_videos();
        assert_eq!(failed.len(), 1);
        assert!(poller.retry_video(&failed[0].id));
        assert!(poller.failed_videos().is_empty());
        assert_eq!(poller.state().videos[0].retry_count, 1);

        let id = poller.state().videos[1].id.clone();
        assert!(poller.remove_video(&id));
        assert_eq!(poller.state().total_videos, 1);
        assert_eq!(poller.shared.backend.calls.load(Ordering::SeqCst), 0);
    }
}
