//! Incremental rendering of streamed assistant responses.
//!
//! Invariant: `runtime::scheduler::RenderScheduler` is the only caller of the host
//! [`RenderSurface`].
//!
//! # Public API Overview
//! - Drive streams through [`StreamEngine`]: `start`, `append`, `finalize`, or feed typed
//!   upstream [`StreamEvent`]s to `dispatch`.
//! - Call `poll` whenever `next_wakeup` is due; it renders frames, persists histories, and
//!   collects finished streams.
//! - Plug the host in through [`RenderSurface`], [`HistoryStore`], [`ViewSource`],
//!   [`MarkupRenderer`], and [`Clock`].

#![allow(clippy::too_many_arguments, clippy::type_complexity)]

pub mod config;
pub mod logging;

pub mod core;
pub mod render;
pub mod runtime;

/// Engine configuration.
pub use crate::config::StreamConfig;
/// Logging setup.
pub use crate::logging::LoggingConfig;

/// Stream identity, context, payloads, and history model.
pub use crate::core::chunk::{extract_text, ChunkPayload, ChunkText};
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::context::{
    ContextKey, ContextPatch, EphemeralTopics, SeedEntry, StreamContext, StreamId, ViewContext,
};
pub use crate::core::error::StreamError;
pub use crate::core::history::{
    is_thinking_placeholder, ConversationHistory, HistoryEntry, HistoryStore, Role, StoreFailure,
    THINKING_PLACEHOLDER,
};
pub use crate::core::segment::{segment, SegmenterConfig};

/// Render seam.
pub use crate::render::{
    IncomingNode, Interaction, LiveNode, MarkdownMarkup, MarkupError, MarkupRenderer, NodeId,
    PatchError, PatchHooks, RenderHandle, RenderSurface, StreamMarker, SurfaceError,
    UpdateDecision,
};

/// Engine and upstream event model.
pub use crate::runtime::{
    AppendOutcome, Collaborators, DiscardReason, DispatchOutcome, FinalizeOutcome,
    OutOfBandPayload, PollReport, SharedView, StreamEngine, StreamEvent, StreamHandle,
    StreamRecord, StreamStatus, ViewSource, WireContext, ERROR_MARKER,
};
