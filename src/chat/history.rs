use super::types::{preview, ConversationSession, Message, MessageUpdate};
use crate::storage::ChatSessionStorage;
use crate::validation::is_unsaved_chat;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct HistoryState {
    chat_id: String,
    session: Option<ConversationSession>,
    messages: Vec<Message>,
    error: Option<String>,
}

/// Per-conversation message history.
///
/// Every mutation runs load, mutate and save while holding one async lock,
/// so concurrent callers sharing a manager cannot drop each other's writes.
/// Operations report failure as `false` and leave the reason in
/// [`ChatHistory::last_error`].
pub struct ChatHistory {
    storage: ChatSessionStorage,
    state: Mutex<HistoryState>,
}

impl ChatHistory {
    pub fn new(storage: ChatSessionStorage, chat_id: &str) -> Self {
        Self {
            storage,
            state: Mutex::new(HistoryState {
                chat_id: chat_id.to_string(),
                ..Default::default()
            }),
        }
    }

    /// Create a manager and load its history in one step
    pub async fn open(storage: ChatSessionStorage, chat_id: &str) -> Self {
        let history = Self::new(storage, chat_id);
        history.load_history(chat_id).await;
        history
    }

    /// Freshest session for a mutation. Storage wins unless it failed to read
    /// and there is a cached copy.
    fn current_session(&self, state: &mut HistoryState) -> ConversationSession {
        let load = self.storage.load(&state.chat_id);
        match (load.error, state.session.take()) {
            (Some(error), Some(cached)) => {
                state.error = Some(error);
                cached
            }
            (Some(error), None) => {
                state.error = Some(error);
                load.session
            }
            (None, _) => load.session,
        }
    }

    pub async fn add_message(&self, message: Message) -> bool {
        let mut state = self.state.lock().await;
        if is_unsaved_chat(&state.chat_id) {
            return false;
        }

        let mut session = self.current_session(&mut state);
        let mut message = message;
        if message.category.is_none() {
            message.category = Some(message.default_category());
        }

        session.last_message = preview(&message.content);
        session.last_updated = Utc::now();
        if !message.videos.is_empty() {
            session.video_count = message.videos.len();
            for video in &message.videos {
                if !session.videos.contains(video) {
                    session.videos.push(video.clone());
                }
            }
        }
        session.messages.push(message.clone());

        match self.storage.save(&state.chat_id, &session) {
            Ok(()) => {
                debug!(chat_id = %state.chat_id, message_id = %message.id, "message added");
                if !message.is_transient() {
                    state.messages.push(message);
                }
                state.session = Some(session);
                true
            }
            Err(e) => {
                warn!(chat_id = %state.chat_id, error = %e, "failed to save message");
                state.error = Some(format!("Failed to save message: {}", e));
                // Keep the last good copy for display
                state.session = self.storage.load(&state.chat_id).session.into();
                false
            }
        }
    }

    pub async fn update_message(&self, message_id: &str, update: MessageUpdate) -> bool {
        let mut state = self.state.lock().await;
        if is_unsaved_chat(&state.chat_id) {
            return false;
        }

        let mut session = self.current_session(&mut state);
        let Some(index) = session.messages.iter().position(|m| m.id == message_id) else {
            state.error = Some(format!("Message not found: {}", message_id));
            state.session = Some(session);
            return false;
        };

        update.apply(&mut session.messages[index]);
        if index + 1 == session.messages.len() && update.content.is_some() {
            session.last_message = preview(&session.messages[index].content);
        }
        session.last_updated = Utc::now();

        match self.storage.save(&state.chat_id, &session) {
            Ok(()) => {
                if let Some(shown) = state.messages.iter_mut().find(|m| m.id == message_id) {
                    update.apply(shown);
                }
                state.session = Some(session);
                true
            }
            Err(e) => {
                warn!(chat_id = %state.chat_id, error = %e, "failed to update message");
                state.error = Some(format!("Failed to update message: {}", e));
                false
            }
        }
    }

    /// Load (or switch to) a conversation. Idempotent.
    pub async fn load_history(&self, chat_id: &str) {
        let mut state = self.state.lock().await;
        state.chat_id = chat_id.to_string();
        state.error = None;

        if is_unsaved_chat(chat_id) {
            state.messages.clear();
            state.session = None;
            return;
        }

        let load = self.storage.load(chat_id);
        state.messages = load.session.display_messages();
        state.session = Some(load.session);
        state.error = load.error;
    }

    pub async fn refresh_history(&self) {
        let chat_id = self.state.lock().await.chat_id.clone();
        self.load_history(&chat_id).await;
    }

    pub async fn save_session(&self) -> bool {
        let mut state = self.state.lock().await;
        if is_unsaved_chat(&state.chat_id) {
            return false;
        }
        let Some(session) = state.session.clone() else {
            return false;
        };
        match self.storage.save(&state.chat_id, &session) {
            Ok(()) => true,
            Err(e) => {
                state.error = Some(format!("Failed to save session: {}", e));
                false
            }
        }
    }

    pub async fn clear_messages(&self) -> bool {
        let mut state = self.state.lock().await;
        if is_unsaved_chat(&state.chat_id) {
            return false;
        }
        match self.storage.delete(&state.chat_id) {
            Ok(()) => {
                state.messages.clear();
                state.session = None;
                true
            }
            Err(e) => {
                state.error = Some(format!("Failed to clear messages: {}", e));
                false
            }
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn session_info(&self) -> Option<ConversationSession> {
        self.state.lock().await.session.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.error.clone()
    }

    pub async fn chat_id(&self) -> String {
        self.state.lock().await.chat_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{DeliveryStatus, MessageCategory, Role};
    use crate::storage::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn history(chat_id: &str) -> (ChatHistory, ChatSessionStorage) {
        let storage = ChatSessionStorage::in_memory();
        (ChatHistory::new(storage.clone(), chat_id), storage)
    }

    #[tokio::test]
    async fn test_sentinel_chat_rejects_writes() {
        let (history, storage) = history("new");
        assert!(!history.add_message(Message::new(Role::User, "hi")).await);
        assert!(!history.update_message("x", MessageUpdate::default()).await);
        assert!(!history.clear_messages().await);
        assert!(storage.list_all_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_message_categorises_and_previews() {
        let (history, storage) = history("chat-1");
        let long = "a".repeat(80);
        assert!(history.add_message(Message::new(Role::User, long.clone())).await);

        let session = storage.load("chat-1").session;
        assert_eq!(session.messages[0].category, Some(MessageCategory::UserQuery));
        assert_eq!(session.last_message, format!("{}...", "a".repeat(50)));
        assert_eq!(history.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_messages_persist_but_hide() {
        let (history, storage) = history("chat-1");
        let mut progress = Message::new(Role::Assistant, "Indexing 1/3");
        progress.is_progress_bar = true;

        assert!(history.add_message(progress).await);
        assert!(history.add_message(Message::new(Role::User, "q")).await);

        assert_eq!(storage.load("chat-1").session.messages.len(), 2);
        assert_eq!(history.messages().await.len(), 1);

        history.load_history("chat-1").await;
        let first = history.messages().await;
        history.refresh_history().await;
        assert_eq!(first, history.messages().await);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_video_count_from_attached_videos() {
        let (history, storage) = history("chat-1");
        let msg = Message::new(Role::User, "Uploaded 2 videos")
            .with_videos(vec!["a".into(), "b".into()]);
        assert!(history.add_message(msg).await);
        assert!(history.add_message(Message::new(Role::User, "question")).await);

        let session = storage.load("chat-1").session;
        assert_eq!(session.video_count, 2);
        assert_eq!(session.videos, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_update_message_in_place() {
        let (history, storage) = history("chat-1");
        let placeholder = Message::new(Role::Assistant, "Processing your question...")
            .with_status(DeliveryStatus::Sending);
        let id = placeholder.id.clone();
        assert!(history.add_message(placeholder).await);

        assert!(
            history
                .update_message(&id, MessageUpdate::content_and_status("42", DeliveryStatus::Sent))
                .await
        );

        let session = storage.load("chat-1").session;
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "42");
        assert_eq!(session.last_message, "42");
        assert_eq!(history.messages().await[0].status, Some(DeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn test_update_unknown_message_fails() {
        let (history, _) = history("chat-1");
        assert!(!history.update_message("missing", MessageUpdate::default()).await);
        assert!(history.last_error().await.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_not_lost() {
        let storage = ChatSessionStorage::in_memory();
        let history = Arc::new(ChatHistory::new(storage.clone(), "chat-1"));

        let mut handles = Vec::new();
        for i in 0..20 {
            let history = history.clone();
            handles.push(tokio::spawn(async move {
                history
                    .add_message(Message::new(Role::User, format!("m{}", i)))
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(storage.load("chat-1").session.messages.len(), 20);
    }

    #[tokio::test]
    async fn test_quota_failure_reports_error() {
        let store = Arc::new(MemoryStore::with_quota(400));
        let storage = ChatSessionStorage::new(store.clone());
        let history = ChatHistory::new(storage, "chat-1");

        assert!(!history.add_message(Message::new(Role::User, "x".repeat(500))).await);
        assert!(history.last_error().await.unwrap().contains("quota"));
        assert!(history.messages().await.is_empty());
        assert!(store.keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_messages_deletes_session() {
        let (history, storage) = history("chat-1");
        assert!(history.add_message(Message::new(Role::User, "q")).await);
        assert!(history.clear_messages().await);
        assert!(history.messages().await.is_empty());
        assert!(history.session_info().await.is_none());
        assert!(storage.list_all_ids().unwrap().is_empty());
    }
}
