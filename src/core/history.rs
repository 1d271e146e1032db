//! Conversation history model and the durable-store seam.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::context::{StreamContext, StreamId};

/// Placeholder shown while a response has not produced text yet.
pub const THINKING_PLACEHOLDER: &str = "Thinking...";

const THINKING_SENTINELS: [&str; 4] = ["思考中...", "思考中", "Thinking...", "thinking..."];

/// Returns whether `text` is only a "thinking" placeholder (or blank).
#[must_use]
pub fn is_thinking_placeholder(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || THINKING_SENTINELS.contains(&trimmed)
}

/// Returns whether `text` carries real response content.
#[must_use]
pub fn is_usable_text(text: &str) -> bool {
    !is_thinking_placeholder(text)
}

/// Current wall-clock time as RFC 3339.
#[must_use]
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message in a conversation history file.
///
/// Fields this crate does not model are kept in `extra` so host-written data survives a
/// load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: StreamId,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub is_thinking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_group_message: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HistoryEntry {
    #[must_use]
    pub fn assistant(
        id: impl Into<StreamId>,
        content: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: timestamp.into(),
            is_thinking: false,
            finish_reason: None,
            is_group_message: false,
            name: None,
            agent_id: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn user(
        id: impl Into<StreamId>,
        content: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::User,
            ..Self::assistant(id, content, timestamp)
        }
    }

    /// Copies ownership fields from `context` onto the entry.
    pub fn stamp_context(&mut self, context: &StreamContext) {
        self.is_group_message = context.is_group;
        if context.display_name.is_some() {
            self.name = context.display_name.clone();
        }
        if !context.is_group {
            self.agent_id = Some(context.principal_id.clone());
        }
    }
}

/// Ordered message entries of one conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn find(&self, id: &StreamId) -> Option<&HistoryEntry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    pub fn find_mut(&mut self, id: &StreamId) -> Option<&mut HistoryEntry> {
        self.entries.iter_mut().find(|entry| &entry.id == id)
    }

    /// Returns the entry for `id`, appending `create()` when it does not exist yet.
    pub fn upsert_with(
        &mut self,
        id: &StreamId,
        create: impl FnOnce() -> HistoryEntry,
    ) -> &mut HistoryEntry {
        let index = match self.entries.iter().position(|entry| &entry.id == id) {
            Some(index) => index,
            None => {
                self.entries.push(create());
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    /// Snapshot suitable for durable storage: thinking-only placeholders are left out.
    #[must_use]
    pub fn persistable(&self) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_thinking)
            .cloned()
            .collect()
    }
}

/// Failure reported by a [`HistoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreFailure {
    pub message: String,
}

impl StoreFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for StoreFailure {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for StoreFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Durable persistence for conversation histories.
pub trait HistoryStore {
    fn load_history(&mut self, context: &StreamContext) -> Result<Vec<HistoryEntry>, StoreFailure>;

    fn save_history(
        &mut self,
        context: &StreamContext,
        entries: &[HistoryEntry],
    ) -> Result<(), StoreFailure>;
}
