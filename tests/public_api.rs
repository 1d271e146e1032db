#![allow(unused_imports)]

use tape_stream::{
    extract_text, is_thinking_placeholder, segment, AppendOutcome, ChunkPayload, ChunkText, Clock,
    Collaborators, ContextKey, ContextPatch, ConversationHistory, DiscardReason, DispatchOutcome,
    EphemeralTopics, FinalizeOutcome, HistoryEntry, HistoryStore, IncomingNode, Interaction,
    LiveNode, LoggingConfig, ManualClock, MarkdownMarkup, MarkupError, MarkupRenderer, NodeId,
    OutOfBandPayload, PatchError, PatchHooks, PollReport, RenderHandle, RenderSurface, Role,
    SeedEntry, SegmenterConfig, SharedView, StoreFailure, StreamConfig, StreamContext,
    StreamEngine, StreamError, StreamEvent, StreamHandle, StreamId, StreamMarker, StreamRecord,
    StreamStatus, SurfaceError, SystemClock, UpdateDecision, ViewContext, ViewSource,
    WireContext, ERROR_MARKER, THINKING_PLACEHOLDER,
};

#[test]
fn public_api_exports_compile() {}
