//! Persistence for chat sessions.
//!
//! Sessions live as JSON documents in a flat key/value space, one key per
//! chat. Loading never fails: a missing or unreadable record yields an empty
//! session plus an error string for the caller to surface.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::chat::types::ConversationSession;
use crate::error::VimoError;
use std::sync::Arc;
use tracing::warn;

pub const SESSION_KEY_PREFIX: &str = "videorag-chat-session-";

/// Flat string key/value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, VimoError>;
    fn set(&self, key: &str, value: &str) -> Result<(), VimoError>;
    fn remove(&self, key: &str) -> Result<(), VimoError>;
    fn keys(&self) -> Result<Vec<String>, VimoError>;
}

/// Outcome of loading a session; `session` is always usable
#[derive(Debug, Clone)]
pub struct SessionLoad {
    pub session: ConversationSession,
    pub existed: bool,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ChatSessionStorage {
    store: Arc<dyn KeyValueStore>,
}

impl ChatSessionStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn session_key(chat_id: &str) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, chat_id)
    }

    pub fn load(&self, chat_id: &str) -> SessionLoad {
        let raw = match self.store.get(&Self::session_key(chat_id)) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(chat_id = chat_id, error = %e, "failed to read chat session");
                return SessionLoad {
                    session: ConversationSession::empty(chat_id),
                    existed: false,
                    error: Some(format!("Failed to load chat session: {}", e)),
                };
            }
        };

        let Some(raw) = raw else {
            return SessionLoad {
                session: ConversationSession::empty(chat_id),
                existed: false,
                error: None,
            };
        };

        match serde_json::from_str::<ConversationSession>(&raw) {
            Ok(mut session) => {
                // The key is authoritative for the id
                session.id = chat_id.to_string();
                SessionLoad {
                    session,
                    existed: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(chat_id = chat_id, error = %e, "corrupt chat session record");
                SessionLoad {
                    session: ConversationSession::empty(chat_id),
                    existed: true,
                    error: Some(format!("Chat session record is corrupt: {}", e)),
                }
            }
        }
    }

    pub fn save(&self, chat_id: &str, session: &ConversationSession) -> Result<(), VimoError> {
        let json = serde_json::to_string(session)?;
        self.store.set(&Self::session_key(chat_id), &json)
    }

    pub fn delete(&self, chat_id: &str) -> Result<(), VimoError> {
        self.store.remove(&Self::session_key(chat_id))
    }

    pub fn list_all_ids(&self) -> Result<Vec<String>, VimoError> {
        let mut ids: Vec<String> = self
            .store
            .keys()?
            .into_iter()
            .filter_map(|key| key.strip_prefix(SESSION_KEY_PREFIX).map(str::to_string))
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{Message, Role};

    #[test]
    fn test_missing_session_is_empty_default() {
        let storage = ChatSessionStorage::in_memory();
        let load = storage.load("chat-1");
        assert!(!load.existed);
        assert!(load.error.is_none());
        assert_eq!(load.session.id, "chat-1");
        assert_eq!(load.session.title, "New Chat");
        assert!(load.session.messages.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let storage = ChatSessionStorage::in_memory();
        let mut session = ConversationSession::empty("chat-1");
        session.messages.push(Message::new(Role::User, "What is in the video?"));
        session.videos.push("/videos/a.mp4".into());

        storage.save("chat-1", &session).unwrap();
        let load = storage.load("chat-1");
        assert!(load.existed);
        assert_eq!(load.session, session);
    }

    #[test]
    fn test_corrupt_record_yields_default_and_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(&ChatSessionStorage::session_key("chat-1"), "{oops")
            .unwrap();
        let storage = ChatSessionStorage::new(store);

        let load = storage.load("chat-1");
        assert!(load.session.messages.is_empty());
        assert!(load.error.unwrap().contains("corrupt"));
    }

    #[test]
    fn test_list_ids_by_prefix_and_delete() {
        let store = Arc::new(MemoryStore::new());
        store.set("videorag-settings", "{}").unwrap();
        let storage = ChatSessionStorage::new(store);

        storage.save("b", &ConversationSession::empty("b")).unwrap();
        storage.save("a", &ConversationSession::empty("a")).unwrap();
        assert_eq!(storage.list_all_ids().unwrap(), vec!["a", "b"]);

        storage.delete("a").unwrap();
        assert_eq!(storage.list_all_ids().unwrap(), vec!["b"]);
        assert!(!storage.load("a").existed);
    }

    #[test]
    fn test_quota_failure_surfaces_on_save() {
        let storage = ChatSessionStorage::new(Arc::new(MemoryStore::with_quota(16)));
        let err = storage
            .save("chat-1", &ConversationSession::empty("chat-1"))
            .unwrap_err();
        assert!(matches!(err, VimoError::Storage(_)));
    }
}
