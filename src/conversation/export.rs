//! JSON export of reconstructed conversations, for inspecting what a client
//! actually sent.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Conversation, Turn};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub model: String,
    pub turns: Vec<TurnRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub prompt: Option<String>,
    pub system: Option<String>,
    pub response: Option<String>,
    pub done: bool,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<&Turn> for TurnRecord {
    fn from(turn: &Turn) -> Self {
        Self {
            prompt: turn.user_text().map(str::to_string),
            system: turn.system_text().map(str::to_string),
            response: turn.assistant_text().map(str::to_string),
            done: !turn.is_open(),
            start: turn.start_time(),
            end: turn.end_time(),
            input_tokens: turn.input_tokens(),
            output_tokens: turn.output_tokens(),
        }
    }
}

impl ConversationRecord {
    /// Snapshot `conversation` under a fresh id.
    pub fn new(model: impl Into<String>, conversation: &Conversation) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            model: model.into(),
            turns: conversation.turns().iter().map(TurnRecord::from).collect(),
        }
    }
}

/// Write `record` as pretty JSON to `<dir>/conversation-<id>.json`.
pub fn write_json(record: &ConversationRecord, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("conversation-{}.json", record.id));
    let mut content = serde_json::to_string_pretty(record)?;
    content.push('\n');
    std::fs::write(&path, content)?;
    Ok(path)
}
