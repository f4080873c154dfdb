use super::history::ChatHistory;
use super::types::{DeliveryStatus, Message, MessageCategory, MessageUpdate, Role};
use crate::api::types::RemoteStatus;
use crate::api::SessionBackend;
use crate::config::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUERY_TIMEOUT_SECS};
use crate::error::VimoError;
use crate::validation::{validate_chat_id, validate_query};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PLACEHOLDER_TEXT: &str = "Processing your question...";
pub const SUBMIT_FAILED_TEXT: &str = "Sorry, the query failed. Please try again later.";
pub const NO_ANSWER_TEXT: &str = "Sorry, I couldn't answer this question.";

#[derive(Debug, Clone, Copy)]
pub struct ConversationOptions {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_wait: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

/// How a question ended; the placeholder message already reflects it.
#[derive(Debug, Clone, PartialEq)]
pub enum AskOutcome {
    Answered(String),
    Failed(String),
}

/// Question/answer flow over one chat.
///
/// The user message and a "sending" placeholder are recorded before the
/// network is touched; whatever happens afterwards is written back into that
/// placeholder, so a question never leaves two assistant replies behind.
pub struct Conversation<B: SessionBackend> {
    backend: Arc<B>,
    history: Arc<ChatHistory>,
    options: ConversationOptions,
    cancel: CancellationToken,
}

impl<B: SessionBackend> Conversation<B> {
    pub fn new(backend: Arc<B>, history: Arc<ChatHistory>, options: ConversationOptions) -> Self {
        Self {
            backend,
            history,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Tie the conversation to an outer token (application shutdown)
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn history(&self) -> &Arc<ChatHistory> {
        &self.history
    }

    pub async fn ask(&self, question: &str) -> Result<AskOutcome, VimoError> {
        let chat_id = self.history.chat_id().await;
        validate_chat_id(&chat_id)?;
        let question = validate_query(question)?;

        let user_message = Message::new(Role::User, question).with_status(DeliveryStatus::Sent);
        if !self.history.add_message(user_message).await {
            return Err(self.storage_error().await);
        }

        let placeholder = Message::new(Role::Assistant, PLACEHOLDER_TEXT)
            .with_status(DeliveryStatus::Sending)
            .with_category(MessageCategory::AssistantResponse);
        let placeholder_id = placeholder.id.clone();
        if !self.history.add_message(placeholder).await {
            return Err(self.storage_error().await);
        }

        if let Err(e) = self.backend.submit_query(&chat_id, question).await {
            warn!(chat_id = %chat_id, error = %e, "query submission failed");
            self.settle(&placeholder_id, SUBMIT_FAILED_TEXT, DeliveryStatus::Error)
                .await;
            return Ok(AskOutcome::Failed(e.to_string()));
        }
        info!(chat_id = %chat_id, "query submitted");

        let outcome = self.wait_for_answer(&chat_id).await;
        match &outcome {
            AskOutcome::Answered(answer) => {
                self.settle(&placeholder_id, answer, DeliveryStatus::Sent).await;
            }
            AskOutcome::Failed(reason) => {
                self.settle(
                    &placeholder_id,
                    &format!("Error: {}", reason),
                    DeliveryStatus::Error,
                )
                .await;
            }
        }
        Ok(outcome)
    }

    async fn wait_for_answer(&self, chat_id: &str) -> AskOutcome {
        let deadline = Instant::now() + self.options.max_wait;
        let mut last_step: Option<String> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return AskOutcome::Failed("the question was cancelled".to_string());
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return AskOutcome::Failed("timed out waiting for an answer".to_string());
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }

            let status = match self.backend.query_status(chat_id).await {
                Ok(status) => status,
                Err(e) => {
                    // Keep waiting; the deadline bounds a dead backend
                    debug!(chat_id = chat_id, error = %e, "query status fetch failed");
                    continue;
                }
            };

            match status.status {
                RemoteStatus::Completed => {
                    let answer = status
                        .answer
                        .filter(|a| !a.trim().is_empty())
                        .unwrap_or_else(|| NO_ANSWER_TEXT.to_string());
                    return AskOutcome::Answered(answer);
                }
                RemoteStatus::Error => {
                    let reason = status
                        .message
                        .or(status.error)
                        .unwrap_or_else(|| "query processing failed".to_string());
                    return AskOutcome::Failed(reason);
                }
                RemoteStatus::Terminated => {
                    return AskOutcome::Failed("the query was terminated".to_string());
                }
                RemoteStatus::Processing | RemoteStatus::Unknown => {
                    if status.current_step.is_some() && status.current_step != last_step {
                        debug!(chat_id = chat_id, step = ?status.current_step, "query progress");
                        last_step = status.current_step;
                    }
                }
            }
        }
    }

    async fn settle(&self, placeholder_id: &str, content: &str, status: DeliveryStatus) {
        let update = MessageUpdate::content_and_status(content, status);
        if !self.history.update_message(placeholder_id, update).await {
            warn!(
                message_id = placeholder_id,
                error = ?self.history.last_error().await,
                "failed to settle placeholder"
            );
        }
    }

    async fn storage_error(&self) -> VimoError {
        VimoError::Storage(
            self.history
                .last_error()
                .await
                .unwrap_or_else(|| "Failed to record message".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{IndexingStatus, QueryStarted, QueryStatus, UploadResponse};
    use crate::storage::ChatSessionStorage;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        submit_fails: bool,
        statuses: Mutex<VecDeque<Result<QueryStatus, VimoError>>>,
    }

    impl ScriptedBackend {
        fn new(submit_fails: bool, statuses: Vec<Result<QueryStatus, VimoError>>) -> Self {
            Self {
                submit_fails,
                statuses: Mutex::new(statuses.into()),
            }
        }
    }

    impl SessionBackend for ScriptedBackend {
        async fn upload_videos(&self, _: &str, _: &[String]) -> Result<UploadResponse, VimoError> {
            Err(VimoError::Other("unused".into()))
        }

        async fn indexing_status(&self, _: &str) -> Result<IndexingStatus, VimoError> {
            Err(VimoError::Other("unused".into()))
        }

        async fn submit_query(&self, _: &str, _: &str) -> Result<QueryStarted, VimoError> {
            if self.submit_fails {
                Err(VimoError::Other("Connection refused".into()))
            } else {
                Ok(QueryStarted {
                    query: None,
                    message: None,
                    chat_id: None,
                    status: Some("started".into()),
                })
            }
        }

        async fn query_status(&self, _: &str) -> Result<QueryStatus, VimoError> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(QueryStatus::default()))
        }
    }

    fn status(status: RemoteStatus, answer: Option<&str>, message: Option<&str>) -> QueryStatus {
        QueryStatus {
            status,
            answer: answer.map(str::to_string),
            message: message.map(str::to_string),
            ..Default::default()
        }
    }

    fn fast() -> ConversationOptions {
        ConversationOptions {
            poll_interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(5),
        }
    }

    async fn conversation(
        backend: ScriptedBackend,
    ) -> (Conversation<ScriptedBackend>, ChatSessionStorage) {
        let storage = ChatSessionStorage::in_memory();
        let history = Arc::new(ChatHistory::open(storage.clone(), "chat-1").await);
        (Conversation::new(Arc::new(backend), history, fast()), storage)
    }

    #[tokio::test]
    async fn test_offline_submit_updates_placeholder_in_place() {
        let (conv, storage) = conversation(ScriptedBackend::new(true, vec![])).await;

        let outcome = conv.ask("What happens at the end?").await.unwrap();
        assert!(matches!(outcome, AskOutcome::Failed(_)));

        let messages = storage.load("chat-1").session.messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].status, Some(DeliveryStatus::Sent));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].status, Some(DeliveryStatus::Error));
        assert_eq!(messages[1].content, SUBMIT_FAILED_TEXT);
    }

    #[tokio::test]
    async fn test_answer_replaces_placeholder() {
        let backend = ScriptedBackend::new(
            false,
            vec![
                Ok(status(RemoteStatus::Processing, None, None)),
                Err(VimoError::Other("blip".into())),
                Ok(status(RemoteStatus::Completed, Some("A cat jumps."), None)),
            ],
        );
        let (conv, storage) = conversation(backend).await;

        let outcome = conv.ask("what happens?").await.unwrap();
        assert_eq!(outcome, AskOutcome::Answered("A cat jumps.".into()));

        let messages = storage.load("chat-1").session.messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "A cat jumps.");
        assert_eq!(messages[1].status, Some(DeliveryStatus::Sent));
        assert_eq!(conv.history().messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_completed_without_answer_uses_fallback() {
        let backend =
            ScriptedBackend::new(false, vec![Ok(status(RemoteStatus::Completed, Some(" "), None))]);
        let (conv, _) = conversation(backend).await;
        let outcome = conv.ask("q").await.unwrap();
        assert_eq!(outcome, AskOutcome::Answered(NO_ANSWER_TEXT.into()));
    }

    #[tokio::test]
    async fn test_server_error_marks_placeholder() {
        let backend = ScriptedBackend::new(
            false,
            vec![Ok(status(RemoteStatus::Error, None, Some("LLM quota exceeded")))],
        );
        let (conv, storage) = conversation(backend).await;
        conv.ask("q").await.unwrap();

        let last = storage.load("chat-1").session.messages.pop().unwrap();
        assert_eq!(last.content, "Error: LLM quota exceeded");
        assert_eq!(last.status, Some(DeliveryStatus::Error));
    }

    #[tokio::test]
    async fn test_cancellation_settles_placeholder() {
        let backend = ScriptedBackend::new(false, vec![]);
        let token = CancellationToken::new();
        let (conv, storage) = conversation(backend).await;
        let conv = conv.with_cancellation(token.clone());
        token.cancel();

        let outcome = conv.ask("q").await.unwrap();
        assert!(matches!(outcome, AskOutcome::Failed(_)));
        let last = storage.load("chat-1").session.messages.pop().unwrap();
        assert_eq!(last.status, Some(DeliveryStatus::Error));
    }

    #[tokio::test]
    async fn test_invalid_input_records_nothing() {
        let (conv, storage) = conversation(ScriptedBackend::new(false, vec![])).await;
        assert!(conv.ask("   ").await.is_err());
        assert!(storage.list_all_ids().unwrap().is_empty());
    }
}
