use std::pin::Pin;

use futures::Stream;

use crate::api::types::Usage;
use crate::conversation::Conversation;
use crate::error::Result;

/// Everything a backend needs to answer one new user turn.
#[derive(Debug, Clone)]
pub struct ConversationRequest {
    /// Prior turns, rebuilt from the request history.
    pub history: Conversation,
    /// The new, unanswered user text.
    pub prompt: String,
    /// Optional system instruction for this turn.
    pub system: Option<String>,
    pub stream: bool,
    pub temperature: Option<f32>,
}

/// One item of a streamed backend completion.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Incremental generated text.
    Fragment(String),
    /// Generation finished; final token accounting.
    Done(Usage),
}

/// Lazy, finite, single-pass sequence of backend events.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<BackendEvent>> + Send>>;

/// What a backend hands back for a conversation.
pub enum Completion {
    Streaming(FragmentStream),
    Whole { text: String, usage: Usage },
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Streaming(_) => f.write_str("Completion::Streaming(..)"),
            Completion::Whole { text, usage } => f
                .debug_struct("Completion::Whole")
                .field("text", text)
                .field("usage", usage)
                .finish(),
        }
    }
}
