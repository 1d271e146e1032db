//! Stream registry and per-stream lifecycle.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tracing::{debug, warn};

use crate::core::chunk::ChunkPayload;
use crate::core::context::{ContextPatch, StreamContext, StreamId};
use crate::logging::REGISTRY_TARGET;
use crate::render::target::RenderTarget;

/// `Uninitialized -> Pending -> Ready -> Finalized`; `Finalized` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    /// Placeholder created by an append that arrived before `start`.
    Uninitialized,
    Pending,
    Ready,
    Finalized,
}

impl StreamStatus {
    #[must_use]
    pub fn is_initialized(self) -> bool {
        !matches!(self, Self::Uninitialized)
    }

    #[must_use]
    pub fn accepts_buffered(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Pending)
    }
}

/// A chunk received before its stream became ready.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedChunk {
    pub payload: ChunkPayload,
    pub context: Option<ContextPatch>,
}

#[derive(Debug)]
pub struct StreamRecord {
    id: StreamId,
    status: StreamStatus,
    context: Option<StreamContext>,
    accumulated_text: String,
    pending_units: VecDeque<String>,
    pre_buffer: VecDeque<BufferedChunk>,
    render_target: RenderTarget,
    thinking: bool,
    last_activity: Instant,
    finish_reason: Option<String>,
    final_text: Option<String>,
}

impl StreamRecord {
    fn placeholder(id: StreamId, now: Instant) -> Self {
        Self {
            id,
            status: StreamStatus::Uninitialized,
            context: None,
            accumulated_text: String::new(),
            pending_units: VecDeque::new(),
            pre_buffer: VecDeque::new(),
            render_target: RenderTarget::default(),
            thinking: false,
            last_activity: now,
            finish_reason: None,
            final_text: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.status
    }

    #[must_use]
    pub fn context(&self) -> Option<&StreamContext> {
        self.context.as_ref()
    }

    #[must_use]
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    #[must_use]
    pub fn pending_units(&self) -> usize {
        self.pending_units.len()
    }

    #[must_use]
    pub fn buffered_chunks(&self) -> usize {
        self.pre_buffer.len()
    }

    #[must_use]
    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Text committed by the finalizer; `None` until finalized.
    #[must_use]
    pub fn final_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }

    #[must_use]
    pub fn render_target(&self) -> RenderTarget {
        self.render_target
    }

    pub(crate) fn render_target_mut(&mut self) -> &mut RenderTarget {
        &mut self.render_target
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub(crate) fn append_text(&mut self, text: &str) {
        self.accumulated_text.push_str(text);
    }

    /// Replaces the seed text. Never shrinks what has accumulated.
    pub(crate) fn reseed(&mut self, seed: &str) -> bool {
        if seed.chars().count() <= self.accumulated_text.chars().count()
            && crate::core::history::is_usable_text(&self.accumulated_text)
        {
            return false;
        }
        self.accumulated_text = seed.to_string();
        true
    }

    /// Drops a "thinking" placeholder so real content does not append to it.
    pub(crate) fn clear_placeholder(&mut self) {
        if !self.accumulated_text.trim().is_empty()
            && crate::core::history::is_thinking_placeholder(&self.accumulated_text)
        {
            self.accumulated_text.clear();
        }
    }

    pub(crate) fn enqueue_units(&mut self, units: Vec<String>) {
        self.pending_units.extend(units);
    }

    /// Dequeues units until at least `min_chars` chars (and at least one unit) were taken.
    pub(crate) fn drain_units(&mut self, min_chars: usize) -> usize {
        let mut drained = 0;
        let mut chars = 0;
        while let Some(unit) = self.pending_units.pop_front() {
            drained += 1;
            chars += unit.chars().count();
            if chars >= min_chars {
                break;
            }
        }
        drained
    }

    pub(crate) fn update_display_name(&mut self, patch: Option<&ContextPatch>) {
        let Some(name) = patch.and_then(|patch| patch.display_name.as_ref()) else {
            return;
        };
        if let Some(context) = self.context.as_mut() {
            if context.display_name.as_ref() != Some(name) {
                context.display_name = Some(name.clone());
            }
        }
    }

    pub(crate) fn mark_finalized(&mut self, reason: &str, final_text: Option<String>) {
        self.status = StreamStatus::Finalized;
        self.finish_reason = Some(reason.to_string());
        self.final_text = final_text;
        self.pending_units.clear();
    }
}

/// How `start` relates to an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDisposition {
    /// No record or only a buffering placeholder.
    Fresh,
    /// Pending/ready record whose thinking flag changes.
    Reinitialize,
    /// Pending/ready record with the same thinking flag.
    Duplicate,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOutcome {
    pub buffered: usize,
    pub dropped: usize,
}

/// Owns every [`StreamRecord`]. One instance per engine.
#[derive(Debug)]
pub struct StreamRegistry {
    records: HashMap<StreamId, StreamRecord>,
    pre_buffer_cap: usize,
}

impl StreamRegistry {
    #[must_use]
    pub fn new(pre_buffer_cap: usize) -> Self {
        Self {
            records: HashMap::new(),
            pre_buffer_cap: pre_buffer_cap.max(1),
        }
    }

    #[must_use]
    pub fn get(&self, id: &StreamId) -> Option<&StreamRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &StreamId) -> Option<&mut StreamRecord> {
        self.records.get_mut(id)
    }

    #[must_use]
    pub fn status(&self, id: &StreamId) -> Option<StreamStatus> {
        self.records.get(id).map(StreamRecord::status)
    }

    #[must_use]
    pub fn is_initialized(&self, id: &StreamId) -> bool {
        self.status(id).is_some_and(StreamStatus::is_initialized)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &StreamId> {
        self.records.keys()
    }

    pub fn records(&self) -> impl Iterator<Item = &StreamRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn classify_start(&self, id: &StreamId, thinking: bool) -> StartDisposition {
        match self.records.get(id) {
            None => StartDisposition::Fresh,
            Some(record) => match record.status {
                StreamStatus::Uninitialized => StartDisposition::Fresh,
                StreamStatus::Finalized => StartDisposition::Finalized,
                StreamStatus::Pending | StreamStatus::Ready if record.thinking == thinking => {
                    StartDisposition::Duplicate
                }
                StreamStatus::Pending | StreamStatus::Ready => StartDisposition::Reinitialize,
            },
        }
    }

    /// Creates the record (or adopts a buffering placeholder) and moves it to `Pending`.
    ///
    /// A record that is already ready stays ready; only its display name and thinking flag
    /// change. Returns the record's effective context.
    pub fn begin_start(
        &mut self,
        id: &StreamId,
        context: StreamContext,
        thinking: bool,
        now: Instant,
    ) -> StreamContext {
        let record = self.records.entry(id.clone()).or_insert_with(|| {
            debug!(target: REGISTRY_TARGET, stream_id = %id, "stream record created by start");
            StreamRecord::placeholder(id.clone(), now)
        });
        if record.status == StreamStatus::Uninitialized {
            record.status = StreamStatus::Pending;
        }
        record.thinking = thinking;
        record.last_activity = now;
        match record.context.as_mut() {
            Some(existing) => {
                if context.display_name.is_some() {
                    existing.display_name = context.display_name;
                }
                existing.clone()
            }
            None => {
                record.context = Some(context.clone());
                context
            }
        }
    }

    /// Moves a pending record to `Ready` and hands back its pre-buffer, oldest first.
    pub fn promote_ready(&mut self, id: &StreamId) -> Vec<BufferedChunk> {
        let Some(record) = self.records.get_mut(id) else {
            return Vec::new();
        };
        if record.status == StreamStatus::Pending {
            record.status = StreamStatus::Ready;
        }
        let drained: Vec<_> = record.pre_buffer.drain(..).collect();
        if !drained.is_empty() {
            debug!(
                target: REGISTRY_TARGET,
                stream_id = %id,
                chunks = drained.len(),
                "draining pre-buffer"
            );
        }
        drained
    }

    /// Buffers a chunk for a stream that is not ready yet, creating a placeholder if needed.
    pub fn buffer(&mut self, id: &StreamId, chunk: BufferedChunk, now: Instant) -> BufferOutcome {
        let record = self.records.entry(id.clone()).or_insert_with(|| {
            debug!(
                target: REGISTRY_TARGET,
                stream_id = %id,
                "chunk arrived before start; buffering"
            );
            StreamRecord::placeholder(id.clone(), now)
        });
        record.pre_buffer.push_back(chunk);
        record.last_activity = now;

        let mut dropped = 0;
        while record.pre_buffer.len() > self.pre_buffer_cap {
            record.pre_buffer.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            warn!(
                target: REGISTRY_TARGET,
                stream_id = %id,
                dropped,
                cap = self.pre_buffer_cap,
                "pre-buffer overflow; dropped oldest chunks"
            );
        }
        BufferOutcome {
            buffered: record.pre_buffer.len(),
            dropped,
        }
    }

    /// Finalizes a record that never became initialized, discarding its buffer.
    pub fn abandon(&mut self, id: &StreamId, reason: &str) -> usize {
        let Some(record) = self.records.get_mut(id) else {
            return 0;
        };
        let dropped = record.pre_buffer.len();
        record.pre_buffer.clear();
        record.mark_finalized(reason, None);
        dropped
    }

    pub fn remove(&mut self, id: &StreamId) -> Option<StreamRecord> {
        self.records.remove(id)
    }
}
