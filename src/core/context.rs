//! Stream identity and conversation context.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of one stream (one conversation entry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Conversation a stream belongs to.
///
/// `principal_id` is the owning agent for direct conversations and the group id for group
/// conversations. Only `display_name` may change after the stream is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamContext {
    pub principal_id: String,
    pub topic_id: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl StreamContext {
    #[must_use]
    pub fn new(principal_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            topic_id: topic_id.into(),
            is_group: false,
            display_name: None,
        }
    }

    #[must_use]
    pub fn group(group_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            is_group: true,
            ..Self::new(group_id, topic_id)
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn key(&self) -> ContextKey {
        ContextKey {
            principal_id: self.principal_id.clone(),
            topic_id: self.topic_id.clone(),
        }
    }

    /// Returns whether the host surface currently shows this conversation.
    #[must_use]
    pub fn matches_view(&self, view: &ViewContext) -> bool {
        view.principal_id.as_deref() == Some(self.principal_id.as_str())
            && view.topic_id.as_deref() == Some(self.topic_id.as_str())
    }
}

/// Map key for per-conversation state (histories, persistence tasks).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey {
    principal_id: String,
    topic_id: String,
}

impl ContextKey {
    #[must_use]
    pub fn new(principal_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            topic_id: topic_id.into(),
        }
    }

    #[must_use]
    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    #[must_use]
    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.principal_id, self.topic_id)
    }
}

/// What the host surface is displaying right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewContext {
    pub principal_id: Option<String>,
    pub topic_id: Option<String>,
}

impl ViewContext {
    #[must_use]
    pub fn new(principal_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            principal_id: Some(principal_id.into()),
            topic_id: Some(topic_id.into()),
        }
    }

    /// Stable signature used to invalidate cached relevance decisions.
    #[must_use]
    pub fn signature(&self) -> String {
        format!(
            "{}-{}",
            self.principal_id.as_deref().unwrap_or("none"),
            self.topic_id.as_deref().unwrap_or("none")
        )
    }

    #[must_use]
    pub fn key(&self) -> Option<ContextKey> {
        match (&self.principal_id, &self.topic_id) {
            (Some(principal_id), Some(topic_id)) => {
                Some(ContextKey::new(principal_id.clone(), topic_id.clone()))
            }
            _ => None,
        }
    }
}

/// Partial context supplied by the upstream driver.
///
/// Start seeds, chunks, and finalize calls may each carry some of these fields; missing
/// principal/topic fall back to the current view when a stream is started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextPatch {
    pub principal_id: Option<String>,
    pub topic_id: Option<String>,
    pub is_group: Option<bool>,
    pub display_name: Option<String>,
}

impl ContextPatch {
    #[must_use]
    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Resolves a full context, filling gaps from `view`.
    ///
    /// Returns the name of the missing field when the context cannot be completed.
    pub fn resolve(&self, view: Option<&ViewContext>) -> Result<StreamContext, &'static str> {
        let principal_id = non_empty(self.principal_id.as_deref())
            .or_else(|| view.and_then(|view| non_empty(view.principal_id.as_deref())));
        let topic_id = non_empty(self.topic_id.as_deref())
            .or_else(|| view.and_then(|view| non_empty(view.topic_id.as_deref())));

        match (principal_id, topic_id) {
            (Some(principal_id), Some(topic_id)) => Ok(StreamContext {
                principal_id: principal_id.to_string(),
                topic_id: topic_id.to_string(),
                is_group: self.is_group.unwrap_or(false),
                display_name: self.display_name.clone(),
            }),
            (None, Some(_)) => Err("principal"),
            (Some(_), None) => Err("topic"),
            (None, None) => Err("principal and topic"),
        }
    }
}

impl From<&StreamContext> for ContextPatch {
    fn from(context: &StreamContext) -> Self {
        Self {
            principal_id: Some(context.principal_id.clone()),
            topic_id: Some(context.topic_id.clone()),
            is_group: Some(context.is_group),
            display_name: context.display_name.clone(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Initial entry handed to `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub id: StreamId,
    pub context: ContextPatch,
    pub content: String,
    pub is_thinking: bool,
    pub timestamp: Option<String>,
}

impl SeedEntry {
    #[must_use]
    pub fn new(id: impl Into<StreamId>, context: impl Into<ContextPatch>) -> Self {
        Self {
            id: id.into(),
            context: context.into(),
            content: String::new(),
            is_thinking: false,
            timestamp: None,
        }
    }

    /// Marks the seed as a "thinking" placeholder with the given text.
    #[must_use]
    pub fn thinking(mut self, placeholder: impl Into<String>) -> Self {
        self.content = placeholder.into();
        self.is_thinking = true;
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

impl From<StreamContext> for ContextPatch {
    fn from(context: StreamContext) -> Self {
        Self::from(&context)
    }
}

/// Topics whose histories live only in memory and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralTopics {
    pub ids: Vec<String>,
    pub prefixes: Vec<String>,
}

impl Default for EphemeralTopics {
    fn default() -> Self {
        Self {
            ids: vec!["assistant_chat".to_string()],
            prefixes: vec!["voicechat_".to_string()],
        }
    }
}

impl EphemeralTopics {
    #[must_use]
    pub fn none() -> Self {
        Self {
            ids: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, topic_id: &str) -> bool {
        self.ids.iter().any(|id| id == topic_id)
            || self
                .prefixes
                .iter()
                .any(|prefix| topic_id.starts_with(prefix.as_str()))
    }
}
