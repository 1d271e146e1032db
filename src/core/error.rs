use thiserror::Error;

use super::context::{ContextKey, StreamId};

/// Failure conditions of the streaming engine.
///
/// Only `InvalidContext` and `HistoryUnavailable` are returned from `start`. The others are
/// reported through outcomes and logs and never interrupt the render loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream {stream_id} has no usable context: missing {missing}")]
    InvalidContext {
        stream_id: StreamId,
        missing: &'static str,
    },
    #[error("stream {stream_id} is already finalized")]
    StreamAlreadyFinalized { stream_id: StreamId },
    #[error("pre-buffer for stream {stream_id} is full; dropped {dropped} oldest chunk(s)")]
    PreBufferOverflow { stream_id: StreamId, dropped: usize },
    #[error("patch for stream {stream_id} skipped: {reason}")]
    PatchTransientFailure { stream_id: StreamId, reason: String },
    #[error("failed to persist history for {context}: {reason}")]
    PersistenceFailure { context: ContextKey, reason: String },
    #[error("history for {context} could not be loaded: {reason}")]
    HistoryUnavailable { context: ContextKey, reason: String },
}

impl StreamError {
    #[must_use]
    pub fn already_finalized(stream_id: &StreamId) -> Self {
        Self::StreamAlreadyFinalized {
            stream_id: stream_id.clone(),
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> Option<&StreamId> {
        match self {
            Self::InvalidContext { stream_id, .. }
            | Self::StreamAlreadyFinalized { stream_id }
            | Self::PreBufferOverflow { stream_id, .. }
            | Self::PatchTransientFailure { stream_id, .. } => Some(stream_id),
            Self::PersistenceFailure { .. } | Self::HistoryUnavailable { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_stream_and_context() {
        let error = StreamError::InvalidContext {
            stream_id: StreamId::new("m1"),
            missing: "topic",
        };
        assert_eq!(
            error.to_string(),
            "stream m1 has no usable context: missing topic"
        );

        let error = StreamError::PersistenceFailure {
            context: ContextKey::new("agent", "topic"),
            reason: "disk full".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "failed to persist history for agent-topic: disk full"
        );
        assert_eq!(error.stream_id(), None);
    }
}
