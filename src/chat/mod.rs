mod conversation;
mod history;
pub mod types;

pub use conversation::{
    AskOutcome, Conversation, ConversationOptions, NO_ANSWER_TEXT, PLACEHOLDER_TEXT,
    SUBMIT_FAILED_TEXT,
};
pub use history::ChatHistory;
pub use types::{
    AnalysisState, ConversationSession, DeliveryStatus, Message, MessageCategory, MessageUpdate,
    Role,
};
