//! Conversation reconstruction.
//!
//! The OpenAI protocol resends the whole history on every call while backends
//! think in turns. [`reconstruct`] rebuilds the turn list from the flat,
//! role-tagged message list of a single request. Nothing here outlives the
//! request that produced it.

pub mod export;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::types::ChatMessage;
use crate::error::{RelayError, Result};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(RelayError::InvalidRole(format!(
                "'{other}' (expected system, user or assistant)"
            ))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exchange in a conversation: a system directive, or a user prompt with
/// its (possibly still missing) assistant reply.
///
/// Turns are immutable. The only transition is [`Turn::answered`], which
/// returns a closed copy of an open turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    system_text: Option<String>,
    user_text: Option<String>,
    assistant_text: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    input_tokens: u32,
    output_tokens: u32,
}

impl Turn {
    pub fn builder() -> TurnBuilder {
        TurnBuilder::default()
    }

    pub fn system_text(&self) -> Option<&str> {
        self.system_text.as_deref()
    }

    pub fn user_text(&self) -> Option<&str> {
        self.user_text.as_deref()
    }

    pub fn assistant_text(&self) -> Option<&str> {
        self.assistant_text.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn input_tokens(&self) -> u32 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u32 {
        self.output_tokens
    }

    /// A user turn still waiting for its assistant reply.
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Close an open turn with the assistant's reply.
    ///
    /// Token counts are zeroed: history is rebuilt from text alone and the
    /// original accounting cannot be recovered.
    pub fn answered(&self, assistant_text: impl Into<String>, at: DateTime<Utc>) -> Turn {
        Turn {
            assistant_text: Some(assistant_text.into()),
            end_time: Some(at.max(self.start_time)),
            input_tokens: 0,
            output_tokens: 0,
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
pub struct TurnBuilder {
    system_text: Option<String>,
    user_text: Option<String>,
    assistant_text: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    input_tokens: u32,
    output_tokens: u32,
}

impl TurnBuilder {
    pub fn system(mut self, text: impl Into<String>) -> Self {
        self.system_text = Some(text.into());
        self
    }

    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.user_text = Some(text.into());
        self
    }

    pub fn assistant(mut self, text: impl Into<String>) -> Self {
        self.assistant_text = Some(text.into());
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = Some(at);
        self
    }

    pub fn ended_at(mut self, at: DateTime<Utc>) -> Self {
        self.end_time = Some(at);
        self
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn build(self) -> Turn {
        let start_time = self.start_time.unwrap_or_else(Utc::now);
        Turn {
            system_text: self.system_text,
            user_text: self.user_text,
            assistant_text: self.assistant_text,
            start_time,
            end_time: self.end_time.map(|end| end.max(start_time)),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

/// Ordered turns rebuilt from one request's message history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Flatten back into role-tagged messages, in turn order.
    ///
    /// Used by backends that speak a message-list protocol themselves.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() * 2);
        for turn in &self.turns {
            if let Some(text) = turn.system_text() {
                messages.push(ChatMessage::new(Role::System.as_str(), text));
            }
            if let Some(text) = turn.user_text() {
                messages.push(ChatMessage::new(Role::User.as_str(), text));
            }
            if let Some(text) = turn.assistant_text() {
                messages.push(ChatMessage::new(Role::Assistant.as_str(), text));
            }
        }
        messages
    }
}

/// Rebuild the conversation carried by `messages`, stamping turns with the
/// current time. With `excluding_last` the final message (the one still to
/// be answered) is left out.
pub fn reconstruct(messages: &[ChatMessage], excluding_last: bool) -> Result<Conversation> {
    reconstruct_at(messages, excluding_last, Utc::now())
}

/// [`reconstruct`] with an explicit timestamp for every turn.
///
/// - `system` produces its own closed turn.
/// - `user` appends an open turn immediately; a later `user` leaves the
///   earlier one unanswered.
/// - `assistant` closes the most recent open turn. With no open turn it
///   becomes a closed turn with no user text.
pub fn reconstruct_at(
    messages: &[ChatMessage],
    excluding_last: bool,
    now: DateTime<Utc>,
) -> Result<Conversation> {
    let history = if excluding_last {
        &messages[..messages.len().saturating_sub(1)]
    } else {
        messages
    };

    let mut turns: Vec<Turn> = Vec::with_capacity(history.len());
    let mut open: Option<usize> = None;

    for message in history {
        match message.role.parse::<Role>()? {
            Role::System => {
                turns.push(
                    Turn::builder()
                        .system(message.content.as_str())
                        .started_at(now)
                        .ended_at(now)
                        .build(),
                );
            }
            Role::User => {
                turns.push(
                    Turn::builder()
                        .user(message.content.as_str())
                        .started_at(now)
                        .build(),
                );
                open = Some(turns.len() - 1);
            }
            Role::Assistant => match open.take() {
                Some(index) => {
                    let closed = turns[index].answered(message.content.as_str(), now);
                    turns[index] = closed;
                }
                None => {
                    tracing::debug!("assistant message without an open user turn");
                    turns.push(
                        Turn::builder()
                            .assistant(message.content.as_str())
                            .started_at(now)
                            .ended_at(now)
                            .build(),
                    );
                }
            },
        }
    }

    Ok(Conversation::new(turns))
}

/// Return the text of the final message, which must be a `user` message.
pub fn final_user_prompt(messages: &[ChatMessage]) -> Result<&str> {
    let last = messages
        .last()
        .ok_or_else(|| RelayError::InvalidRequest("messages must not be empty".to_string()))?;

    match last.role.parse::<Role>()? {
        Role::User => Ok(last.content.as_str()),
        other => Err(RelayError::UnsupportedConversationShape(format!(
            "last message must have role 'user', got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage::new(role, content)
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("system".parse::<Role>().unwrap(), Role::System);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!(matches!(
            "tool".parse::<Role>(),
            Err(RelayError::InvalidRole(_))
        ));
        assert!("User".parse::<Role>().is_err());
    }

    #[test]
    fn test_reconstruct_scenario_history() {
        let messages = vec![
            msg("system", "You are terse."),
            msg("user", "Hi"),
            msg("assistant", "Hello."),
            msg("user", "2+2?"),
        ];
        let conversation = reconstruct(&messages, true).unwrap();
        assert_eq!(conversation.len(), 2);

        let system = &conversation.turns()[0];
        assert_eq!(system.system_text(), Some("You are terse."));
        assert!(system.user_text().is_none());
        assert!(system.assistant_text().is_none());
        assert!(!system.is_open());

        let pair = &conversation.turns()[1];
        assert_eq!(pair.user_text(), Some("Hi"));
        assert_eq!(pair.assistant_text(), Some("Hello."));
        assert_eq!(pair.input_tokens(), 0);
        assert_eq!(pair.output_tokens(), 0);
    }

    #[test]
    fn test_reconstruct_pairs() {
        let mut messages = Vec::new();
        for i in 0..5 {
            messages.push(msg("user", &format!("q{i}")));
            messages.push(msg("assistant", &format!("a{i}")));
        }
        let conversation = reconstruct(&messages, false).unwrap();
        assert_eq!(conversation.len(), 5);
        for (i, turn) in conversation.turns().iter().enumerate() {
            assert_eq!(turn.user_text(), Some(format!("q{i}").as_str()));
            assert_eq!(turn.assistant_text(), Some(format!("a{i}").as_str()));
            let end = turn.end_time().unwrap();
            assert!(end >= turn.start_time());
        }
    }

    #[test]
    fn test_unanswered_user_turn_is_kept() {
        let messages = vec![msg("user", "first"), msg("user", "second")];
        let conversation = reconstruct(&messages, false).unwrap();
        assert_eq!(conversation.len(), 2);
        assert!(conversation.turns()[0].is_open());
        assert!(conversation.turns()[1].is_open());
    }

    #[test]
    fn test_later_user_leaves_earlier_turn_unanswered() {
        let messages = vec![
            msg("user", "first"),
            msg("user", "second"),
            msg("assistant", "reply"),
        ];
        let conversation = reconstruct(&messages, false).unwrap();
        assert_eq!(conversation.len(), 2);
        assert!(conversation.turns()[0].assistant_text().is_none());
        assert_eq!(conversation.turns()[1].assistant_text(), Some("reply"));
    }

    #[test]
    fn test_orphan_assistant_becomes_own_turn() {
        let messages = vec![msg("assistant", "unprompted"), msg("user", "hi")];
        let conversation = reconstruct(&messages, false).unwrap();
        assert_eq!(conversation.len(), 2);
        let orphan = &conversation.turns()[0];
        assert!(orphan.user_text().is_none());
        assert_eq!(orphan.assistant_text(), Some("unprompted"));
        assert!(!orphan.is_open());
    }

    #[test]
    fn test_second_assistant_after_close_is_orphan() {
        let messages = vec![
            msg("user", "q"),
            msg("assistant", "a1"),
            msg("assistant", "a2"),
        ];
        let conversation = reconstruct(&messages, false).unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.turns()[0].assistant_text(), Some("a1"));
        assert_eq!(conversation.turns()[1].assistant_text(), Some("a2"));
        assert!(conversation.turns()[1].user_text().is_none());
    }

    #[test]
    fn test_system_between_user_and_assistant() {
        let messages = vec![
            msg("user", "q"),
            msg("system", "be brief"),
            msg("assistant", "a"),
        ];
        let conversation = reconstruct(&messages, false).unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.turns()[0].user_text(), Some("q"));
        assert_eq!(conversation.turns()[0].assistant_text(), Some("a"));
        assert_eq!(conversation.turns()[1].system_text(), Some("be brief"));
    }

    #[test]
    fn test_excluding_last() {
        let messages = vec![msg("user", "q"), msg("assistant", "a"), msg("user", "next")];
        let with_last = reconstruct(&messages, false).unwrap();
        let without_last = reconstruct(&messages, true).unwrap();
        assert_eq!(with_last.len(), 2);
        assert_eq!(without_last.len(), 1);
        assert!(reconstruct(&[], true).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_role_fails_fast() {
        let messages = vec![msg("user", "q"), msg("function", "x"), msg("user", "z")];
        let err = reconstruct(&messages, true).unwrap_err();
        assert!(matches!(err, RelayError::InvalidRole(_)));
    }

    #[test]
    fn test_reconstruct_is_idempotent() {
        let messages = vec![
            msg("system", "s"),
            msg("user", "q1"),
            msg("assistant", "a1"),
            msg("assistant", "a2"),
            msg("user", "q2"),
        ];
        let first = reconstruct_at(&messages, false, fixed_now()).unwrap();
        let second = reconstruct_at(&messages, false, fixed_now()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reconstruct_total_and_order_preserving() {
        const ROLES: [&str; 3] = ["system", "user", "assistant"];

        // Every role sequence up to length 5.
        for len in 0..=5u32 {
            for code in 0..3usize.pow(len) {
                let mut c = code;
                let messages: Vec<ChatMessage> = (0..len)
                    .map(|i| {
                        let role = ROLES[c % 3];
                        c /= 3;
                        msg(role, &format!("{role}-{i}"))
                    })
                    .collect();

                let conversation = reconstruct(&messages, false).unwrap();
                assert!(conversation.len() <= messages.len());

                let openers: Vec<&str> = messages
                    .iter()
                    .filter(|m| m.role != "assistant")
                    .map(|m| m.content.as_str())
                    .collect();
                let turn_openers: Vec<&str> = conversation
                    .turns()
                    .iter()
                    .filter_map(|t| t.system_text().or(t.user_text()))
                    .collect();
                assert_eq!(openers, turn_openers);

                let replies = messages.iter().filter(|m| m.role == "assistant").count();
                let turn_replies = conversation
                    .turns()
                    .iter()
                    .filter(|t| t.assistant_text().is_some())
                    .count();
                assert_eq!(replies, turn_replies);
            }
        }
    }

    #[test]
    fn test_answered_is_functional() {
        let open = Turn::builder().user("q").started_at(fixed_now()).build();
        let closed = open.answered("a", fixed_now());
        assert!(open.is_open());
        assert!(open.assistant_text().is_none());
        assert!(!closed.is_open());
        assert_eq!(closed.end_time(), Some(fixed_now()));
    }

    #[test]
    fn test_end_time_never_precedes_start() {
        let start = fixed_now();
        let earlier = start - chrono::Duration::seconds(5);
        let turn = Turn::builder().user("q").started_at(start).build();
        assert_eq!(turn.answered("a", earlier).end_time(), Some(start));
    }

    #[test]
    fn test_to_messages_flattens_turns() {
        let messages = vec![
            msg("system", "s"),
            msg("user", "q"),
            msg("assistant", "a"),
        ];
        let conversation = reconstruct(&messages, false).unwrap();
        assert_eq!(conversation.to_messages(), messages);
    }

    #[test]
    fn test_final_user_prompt() {
        let ok = vec![msg("system", "s"), msg("user", "2+2?")];
        assert_eq!(final_user_prompt(&ok).unwrap(), "2+2?");

        let system_last = vec![msg("user", "q"), msg("system", "directive")];
        assert!(matches!(
            final_user_prompt(&system_last),
            Err(RelayError::UnsupportedConversationShape(_))
        ));

        let assistant_last = vec![msg("user", "q"), msg("assistant", "a")];
        assert!(matches!(
            final_user_prompt(&assistant_last),
            Err(RelayError::UnsupportedConversationShape(_))
        ));

        assert!(matches!(
            final_user_prompt(&[]),
            Err(RelayError::InvalidRequest(_))
        ));
        assert!(matches!(
            final_user_prompt(&[msg("robot", "x")]),
            Err(RelayError::InvalidRole(_))
        ));
    }
}
