//! Upstream event model and dispatch onto the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::engine::{AppendOutcome, FinalizeOutcome, StreamEngine, StreamHandle};
use super::finalize::OutOfBandPayload;
use crate::core::chunk::ChunkPayload;
use crate::core::context::{ContextPatch, SeedEntry, StreamId};
use crate::core::error::StreamError;
use crate::core::history::THINKING_PLACEHOLDER;

/// Reason used when an `end` event carries no finish reason.
pub const DEFAULT_FINISH_REASON: &str = "completed";
pub const ERROR_FINISH_REASON: &str = "error";

/// Conversation fields as upstream drivers send them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub is_group_message: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

impl WireContext {
    /// Group messages belong to the group; everything else to the agent.
    #[must_use]
    pub fn to_patch(&self) -> ContextPatch {
        let principal_id = if self.is_group_message {
            self.group_id.clone().or_else(|| self.agent_id.clone())
        } else {
            self.agent_id.clone()
        };
        ContextPatch {
            principal_id,
            topic_id: self.topic_id.clone(),
            is_group: Some(self.is_group_message),
            display_name: self.agent_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    AgentThinking {
        message_id: String,
        #[serde(default)]
        context: Option<WireContext>,
    },
    Start {
        message_id: String,
        #[serde(default)]
        context: Option<WireContext>,
    },
    Data {
        message_id: String,
        chunk: Value,
        #[serde(default)]
        context: Option<WireContext>,
    },
    End {
        message_id: String,
        #[serde(default)]
        context: Option<WireContext>,
        #[serde(default, rename = "finish_reason", skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        full_response: Option<String>,
    },
    Error {
        message_id: String,
        #[serde(default)]
        context: Option<WireContext>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::AgentThinking { message_id, .. }
            | Self::Start { message_id, .. }
            | Self::Data { message_id, .. }
            | Self::End { message_id, .. }
            | Self::Error { message_id, .. } => message_id,
        }
    }

    #[must_use]
    pub fn context(&self) -> Option<&WireContext> {
        match self {
            Self::AgentThinking { context, .. }
            | Self::Start { context, .. }
            | Self::Data { context, .. }
            | Self::End { context, .. }
            | Self::Error { context, .. } => context.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started(StreamHandle),
    Appended(AppendOutcome),
    Finalized(FinalizeOutcome),
}

fn chunk_payload(chunk: Value) -> ChunkPayload {
    match chunk {
        Value::String(text) => ChunkPayload::Text(text),
        other => ChunkPayload::Json(other),
    }
}

impl StreamEngine {
    /// Routes one upstream event to `start`, `append`, or `finalize`.
    pub fn dispatch(&mut self, event: StreamEvent) -> Result<DispatchOutcome, StreamError> {
        let patch = event.context().map(WireContext::to_patch);
        match event {
            StreamEvent::AgentThinking { message_id, .. } => {
                let seed = SeedEntry::new(message_id, patch.unwrap_or_default())
                    .thinking(THINKING_PLACEHOLDER);
                self.start(seed).map(DispatchOutcome::Started)
            }
            StreamEvent::Start { message_id, .. } => {
                let seed = SeedEntry::new(message_id, patch.unwrap_or_default());
                self.start(seed).map(DispatchOutcome::Started)
            }
            StreamEvent::Data {
                message_id, chunk, ..
            } => Ok(DispatchOutcome::Appended(self.append(
                StreamId::new(message_id),
                chunk_payload(chunk),
                patch,
            ))),
            StreamEvent::End {
                message_id,
                finish_reason,
                full_response,
                ..
            } => {
                let reason = finish_reason.as_deref().unwrap_or(DEFAULT_FINISH_REASON);
                let payload = full_response.map(OutOfBandPayload::full_response);
                Ok(DispatchOutcome::Finalized(
                    self.finalize(message_id, reason, patch, payload),
                ))
            }
            StreamEvent::Error {
                message_id, error, ..
            } => {
                let payload = error.map(OutOfBandPayload::error);
                Ok(DispatchOutcome::Finalized(self.finalize(
                    message_id,
                    ERROR_FINISH_REASON,
                    patch,
                    payload,
                )))
            }
        }
    }
}
