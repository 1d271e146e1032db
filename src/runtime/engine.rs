//! Driver-facing streaming engine.
//!
//! `StreamEngine` owns every piece of mutable streaming state and is driven from a single
//! thread: the upstream driver calls `start`, `append`, and `finalize`; the host calls
//! `poll` whenever `next_wakeup` says something is due.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::book::HistoryBook;
use super::finalize::{reconcile_final_text, OutOfBandPayload};
use super::gate::{ViewGate, ViewSource};
use super::registry::{BufferedChunk, StartDisposition, StreamRecord, StreamRegistry, StreamStatus};
use super::scheduler::{RenderPass, RenderScheduler, TickReport};
use super::sync::{persist_all, HistorySync, ScheduleOutcome};
use crate::config::StreamConfig;
use crate::core::chunk::{extract_text, ChunkPayload, ChunkText};
use crate::core::clock::{Clock, SystemClock};
use crate::core::context::{ContextKey, ContextPatch, SeedEntry, StreamContext, StreamId, ViewContext};
use crate::core::error::StreamError;
use crate::core::history::{
    is_usable_text, now_rfc3339, ConversationHistory, HistoryEntry, HistoryStore, StoreFailure,
    THINKING_PLACEHOLDER,
};
use crate::core::segment::segment;
use crate::logging::{ENGINE_TARGET, FINALIZE_TARGET, REGISTRY_TARGET};
use crate::render::markup::{MarkdownMarkup, MarkupRenderer};
use crate::render::patch::PatchAdapter;
use crate::render::surface::{RenderHandle, RenderSurface};

/// Finish reason recorded when the idle sweep finalizes a stream.
pub const IDLE_TIMEOUT_REASON: &str = "idle_timeout";

macro_rules! render_pass {
    ($engine:expr, $view:expr, $now:expr) => {
        RenderPass {
            registry: &mut $engine.registry,
            gate: &mut $engine.gate,
            view: $view,
            surface: $engine.surface.as_mut(),
            markup: $engine.markup.as_ref(),
            patcher: &mut $engine.patcher,
            now: $now,
        }
    };
}

/// External collaborators the engine calls into.
pub struct Collaborators {
    pub surface: Box<dyn RenderSurface>,
    pub store: Box<dyn HistoryStore>,
    pub view: Box<dyn ViewSource>,
    pub markup: Box<dyn MarkupRenderer>,
    pub clock: Box<dyn Clock>,
}

impl Collaborators {
    /// Markdown markup and the system clock; override with the `with_*` builders.
    pub fn new(
        surface: impl RenderSurface + 'static,
        store: impl HistoryStore + 'static,
        view: impl ViewSource + 'static,
    ) -> Self {
        Self {
            surface: Box::new(surface),
            store: Box::new(store),
            view: Box::new(view),
            markup: Box::new(MarkdownMarkup),
            clock: Box::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_markup(mut self, markup: impl MarkupRenderer + 'static) -> Self {
        self.markup = Box::new(markup);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }
}

/// What `start` hands back to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub stream_id: StreamId,
    pub status: StreamStatus,
    pub target: Option<RenderHandle>,
    pub view_relevant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    ErrorFlagged,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Text was appended; `queued_units` were added to the reveal queue.
    Applied { queued_units: usize },
    /// The stream is not ready yet; the chunk waits in its pre-buffer.
    Buffered { dropped: usize },
    Empty,
    Discarded(DiscardReason),
    Rejected(StreamError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Finalized { text: String },
    /// Second finalize for the same stream; nothing changed.
    AlreadyFinalized,
    /// The stream never started; its buffered chunks were dropped.
    Abandoned { dropped: usize },
    UnknownStream,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub frame: TickReport,
    pub persisted: usize,
    pub timed_out: usize,
    pub cleaned: usize,
    pub classes_expired: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CleanupTask {
    due: Instant,
    stream_id: StreamId,
}

pub struct StreamEngine {
    config: StreamConfig,
    registry: StreamRegistry,
    gate: ViewGate,
    scheduler: RenderScheduler,
    patcher: PatchAdapter,
    sync: HistorySync,
    book: HistoryBook,
    cleanup: Vec<CleanupTask>,
    surface: Box<dyn RenderSurface>,
    store: Box<dyn HistoryStore>,
    view: Box<dyn ViewSource>,
    markup: Box<dyn MarkupRenderer>,
    clock: Box<dyn Clock>,
}

impl StreamEngine {
    #[must_use]
    pub fn new(config: StreamConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            surface,
            store,
            view,
            markup,
            clock,
        } = collaborators;
        Self {
            registry: StreamRegistry::new(config.pre_buffer_cap),
            gate: ViewGate::default(),
            scheduler: RenderScheduler::new(&config),
            patcher: PatchAdapter::new(config.patch_rules()),
            sync: HistorySync::new(config.history_debounce, config.ephemeral_topics.clone()),
            book: HistoryBook::default(),
            cleanup: Vec::new(),
            surface,
            store,
            view,
            markup,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Registers a stream, or re-initializes it when its thinking flag changed.
    ///
    /// A duplicate start with the same thinking flag returns the existing handle without
    /// touching accumulated text. Chunks buffered before this call are applied in arrival
    /// order once the stream is ready.
    pub fn start(&mut self, seed: SeedEntry) -> Result<StreamHandle, StreamError> {
        let now = self.clock.now();
        let view = self.view.view_context();
        let id = seed.id.clone();

        let context = seed.context.resolve(view.as_ref()).map_err(|missing| {
            warn!(target: REGISTRY_TARGET, stream_id = %id, missing, "start rejected: invalid context");
            StreamError::InvalidContext {
                stream_id: id.clone(),
                missing,
            }
        })?;

        let disposition = self.registry.classify_start(&id, seed.is_thinking);
        match disposition {
            StartDisposition::Duplicate => {
                debug!(target: REGISTRY_TARGET, stream_id = %id, "duplicate start ignored");
                return Ok(self.handle_for(&id, view.as_ref()));
            }
            StartDisposition::Finalized => {
                warn!(target: REGISTRY_TARGET, stream_id = %id, "start for finalized stream rejected");
                return Err(StreamError::already_finalized(&id));
            }
            StartDisposition::Fresh | StartDisposition::Reinitialize => {}
        }

        let context = self
            .registry
            .begin_start(&id, context, seed.is_thinking, now);
        let seed_text = if context.is_group && seed.is_thinking {
            ""
        } else {
            seed.content.as_str()
        };
        if let Some(record) = self.registry.get_mut(&id) {
            record.reseed(seed_text);
        }

        if let Err(failure) = self.prepare_history(&id, &context, &seed, view.as_ref(), now) {
            let dropped = self.registry.abandon(&id, "history_unavailable");
            self.schedule_cleanup(&id, now);
            warn!(
                target: REGISTRY_TARGET,
                stream_id = %id,
                context = %context.key(),
                dropped,
                error = %failure,
                "start failed: history unavailable"
            );
            return Err(StreamError::HistoryUnavailable {
                context: context.key(),
                reason: failure.message,
            });
        }

        self.scheduler
            .open_target(&mut render_pass!(self, view.as_ref(), now), &id, THINKING_PLACEHOLDER);

        let buffered = self.registry.promote_ready(&id);
        for chunk in buffered {
            self.apply_chunk(&id, chunk, view.as_ref(), now);
        }

        if disposition == StartDisposition::Reinitialize && !seed.is_thinking {
            self.scheduler
                .render_frame(&mut render_pass!(self, view.as_ref(), now), &id);
        }

        let handle = self.handle_for(&id, view.as_ref());
        info!(
            target: REGISTRY_TARGET,
            stream_id = %id,
            context = %context.key(),
            thinking = seed.is_thinking,
            view_relevant = handle.view_relevant,
            "stream started"
        );
        Ok(handle)
    }

    /// Feeds one chunk. Chunks for streams that are not ready yet are buffered.
    pub fn append(
        &mut self,
        id: impl Into<StreamId>,
        payload: impl Into<ChunkPayload>,
        context: Option<ContextPatch>,
    ) -> AppendOutcome {
        let id = id.into();
        let now = self.clock.now();
        let chunk = BufferedChunk {
            payload: payload.into(),
            context,
        };

        match self.registry.status(&id) {
            None | Some(StreamStatus::Uninitialized | StreamStatus::Pending) => {
                let outcome = self.registry.buffer(&id, chunk, now);
                AppendOutcome::Buffered {
                    dropped: outcome.dropped,
                }
            }
            Some(StreamStatus::Finalized) => {
                warn!(target: REGISTRY_TARGET, stream_id = %id, "late chunk for finalized stream rejected");
                AppendOutcome::Rejected(StreamError::already_finalized(&id))
            }
            Some(StreamStatus::Ready) => {
                let view = self.view.view_context();
                self.apply_chunk(&id, chunk, view.as_ref(), now)
            }
        }
    }

    /// Moves a stream to its terminal state and performs the final render.
    pub fn finalize(
        &mut self,
        id: impl Into<StreamId>,
        reason: &str,
        context: Option<ContextPatch>,
        payload: Option<OutOfBandPayload>,
    ) -> FinalizeOutcome {
        let id = id.into();
        let now = self.clock.now();

        match self.registry.status(&id) {
            None => {
                warn!(target: FINALIZE_TARGET, stream_id = %id, reason, "finalize for unknown stream");
                return FinalizeOutcome::UnknownStream;
            }
            Some(StreamStatus::Finalized) => {
                debug!(target: FINALIZE_TARGET, stream_id = %id, reason, "stream already finalized");
                return FinalizeOutcome::AlreadyFinalized;
            }
            Some(StreamStatus::Uninitialized) => {
                let dropped = self.registry.abandon(&id, reason);
                self.schedule_cleanup(&id, now);
                warn!(
                    target: FINALIZE_TARGET,
                    stream_id = %id,
                    reason,
                    dropped,
                    "stream finalized before start; buffered chunks dropped"
                );
                return FinalizeOutcome::Abandoned { dropped };
            }
            Some(StreamStatus::Pending | StreamStatus::Ready) => {}
        }

        let Some(record) = self.registry.get_mut(&id) else {
            return FinalizeOutcome::UnknownStream;
        };
        record.update_display_name(context.as_ref());
        let Some(stream_context) = record.context().cloned() else {
            return FinalizeOutcome::UnknownStream;
        };
        let text = reconcile_final_text(&stream_context, record.accumulated_text(), payload.as_ref());
        record.mark_finalized(reason, Some(text.clone()));

        self.commit_final_entry(&id, &stream_context, &text, reason, now);

        let view = self.view.view_context();
        self.scheduler.activate(&id, now);
        self.scheduler
            .render_final(&mut render_pass!(self, view.as_ref(), now), &id, &text);
        self.schedule_cleanup(&id, now);

        info!(
            target: FINALIZE_TARGET,
            stream_id = %id,
            context = %stream_context.key(),
            reason,
            chars = text.chars().count(),
            "stream finalized"
        );
        FinalizeOutcome::Finalized { text }
    }

    #[must_use]
    pub fn is_initialized(&self, id: &StreamId) -> bool {
        self.registry.is_initialized(id)
    }

    #[must_use]
    pub fn status(&self, id: &StreamId) -> Option<StreamStatus> {
        self.registry.status(id)
    }

    #[must_use]
    pub fn record(&self, id: &StreamId) -> Option<&StreamRecord> {
        self.registry.get(id)
    }

    #[must_use]
    pub fn accumulated_text(&self, id: &StreamId) -> Option<&str> {
        self.registry.get(id).map(StreamRecord::accumulated_text)
    }

    #[must_use]
    pub fn history(&self, key: &ContextKey) -> Option<&ConversationHistory> {
        self.book.get(key)
    }

    /// Installs the in-memory history of a conversation, typically the one being shown.
    pub fn set_history(&mut self, context: &StreamContext, entries: Vec<HistoryEntry>) {
        self.book
            .insert(context.key(), ConversationHistory::new(entries));
    }

    /// Returns the in-memory history for `context`, loading it from the store on first use.
    pub fn load_history(&mut self, context: &StreamContext) -> &ConversationHistory {
        if self.sync.is_ephemeral(context) {
            return self.book.ephemeral(context.key());
        }
        self.book.load_or_empty(context, self.store.as_mut())
    }

    #[must_use]
    pub fn active_streams(&self) -> &[StreamId] {
        self.scheduler.active()
    }

    #[must_use]
    pub fn is_render_loop_running(&self) -> bool {
        self.scheduler.is_running()
    }

    #[must_use]
    pub fn pending_persistence(&self) -> usize {
        self.sync.pending()
    }

    #[must_use]
    pub fn tracked_streams(&self) -> usize {
        self.registry.len()
    }

    /// Runs everything that is due: persistence, idle finalization, cleanup, class removal,
    /// and one render frame.
    pub fn poll(&mut self) -> PollReport {
        let now = self.clock.now();
        let mut report = PollReport {
            persisted: persist_all(self.store.as_mut(), self.sync.take_due(now)),
            ..PollReport::default()
        };
        report.timed_out = self.sweep_idle(now);
        report.cleaned = self.run_cleanup(now);

        let view = self.view.view_context();
        let mut pass = render_pass!(self, view.as_ref(), now);
        report.classes_expired = self.scheduler.expire_classes(&mut pass);
        report.frame = self.scheduler.tick(&mut pass);
        report
    }

    /// Earliest instant at which `poll` has work, or `None` when fully idle.
    #[must_use]
    pub fn next_wakeup(&self) -> Option<Instant> {
        let idle_deadlines = self.config.idle_timeout.and_then(|timeout| {
            self.registry
                .records()
                .filter(|record| record.status() != StreamStatus::Finalized)
                .map(|record| record.last_activity() + timeout)
                .min()
        });
        [
            self.scheduler.next_frame_at(),
            self.sync.next_due(),
            self.cleanup.iter().map(|task| task.due).min(),
            self.patcher.next_due(),
            idle_deadlines,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Writes every pending persistence task now. Returns how many writes succeeded.
    pub fn flush_history(&mut self) -> usize {
        persist_all(self.store.as_mut(), self.sync.drain_all())
    }

    fn handle_for(&self, id: &StreamId, view: Option<&ViewContext>) -> StreamHandle {
        let record = self.registry.get(id);
        StreamHandle {
            stream_id: id.clone(),
            status: record.map_or(StreamStatus::Uninitialized, StreamRecord::status),
            target: record.and_then(|record| record.render_target().cached()),
            view_relevant: record
                .and_then(StreamRecord::context)
                .zip(view)
                .is_some_and(|(context, view)| context.matches_view(view)),
        }
    }

    fn prepare_history(
        &mut self,
        id: &StreamId,
        context: &StreamContext,
        seed: &SeedEntry,
        view: Option<&ViewContext>,
        now: Instant,
    ) -> Result<(), StoreFailure> {
        let shown = view.is_some_and(|view| context.matches_view(view));
        let history = if self.sync.is_ephemeral(context) {
            self.book.ephemeral(context.key())
        } else if shown {
            self.book.load_or_empty(context, self.store.as_mut())
        } else {
            self.book.load(context, self.store.as_mut())?
        };

        let content = self
            .registry
            .get(id)
            .map(StreamRecord::accumulated_text)
            .filter(|text| is_usable_text(text))
            .unwrap_or_default()
            .to_string();
        let entry = history.upsert_with(id, || {
            let timestamp = seed.timestamp.clone().unwrap_or_else(now_rfc3339);
            HistoryEntry::assistant(id.clone(), String::new(), timestamp)
        });
        entry.content = content;
        entry.is_thinking = false;
        entry.stamp_context(context);

        let outcome = self.schedule_history(context, now);
        debug!(target: ENGINE_TARGET, stream_id = %id, ?outcome, "history entry prepared");
        Ok(())
    }

    fn apply_chunk(
        &mut self,
        id: &StreamId,
        chunk: BufferedChunk,
        view: Option<&ViewContext>,
        now: Instant,
    ) -> AppendOutcome {
        let text = match extract_text(&chunk.payload) {
            ChunkText::Text(text) => text,
            ChunkText::Empty => return AppendOutcome::Empty,
            ChunkText::ErrorFlagged { raw } => {
                warn!(
                    target: REGISTRY_TARGET,
                    stream_id = %id,
                    raw_len = raw.as_deref().map_or(0, str::len),
                    "error-flagged chunk discarded"
                );
                return AppendOutcome::Discarded(DiscardReason::ErrorFlagged);
            }
            ChunkText::Unrecognized => {
                warn!(target: REGISTRY_TARGET, stream_id = %id, "unrecognized chunk payload discarded");
                return AppendOutcome::Discarded(DiscardReason::Unrecognized);
            }
        };

        let Some(record) = self.registry.get_mut(id) else {
            return AppendOutcome::Rejected(StreamError::already_finalized(id));
        };
        record.clear_placeholder();
        record.append_text(&text);
        record.update_display_name(chunk.context.as_ref());
        record.touch(now);

        let queued_units = if self.config.smooth_streaming {
            let units = segment(&text, self.config.segmenter());
            let count = units.len();
            record.enqueue_units(units);
            count
        } else {
            0
        };
        let context = record.context().cloned();
        let accumulated = record.accumulated_text().to_string();

        if let Some(context) = context {
            self.sync_entry(id, &context, accumulated, now);
        }

        if self.config.smooth_streaming {
            self.scheduler.activate(id, now);
        } else {
            self.scheduler
                .render_frame(&mut render_pass!(self, view, now), id);
        }
        AppendOutcome::Applied { queued_units }
    }

    fn sync_entry(&mut self, id: &StreamId, context: &StreamContext, content: String, now: Instant) {
        let Some(history) = self.book.get_mut(&context.key()) else {
            return;
        };
        let entry = history.upsert_with(id, || {
            HistoryEntry::assistant(id.clone(), String::new(), now_rfc3339())
        });
        entry.content = content;
        entry.stamp_context(context);
        self.schedule_history(context, now);
    }

    fn commit_final_entry(
        &mut self,
        id: &StreamId,
        context: &StreamContext,
        text: &str,
        reason: &str,
        now: Instant,
    ) {
        let history = if self.sync.is_ephemeral(context) {
            self.book.ephemeral(context.key())
        } else if context.is_group {
            match self.book.reload(context, self.store.as_mut()) {
                Ok(history) => history,
                Err(failure) => {
                    warn!(
                        target: FINALIZE_TARGET,
                        stream_id = %id,
                        context = %context.key(),
                        error = %failure,
                        "group history reload failed; using in-memory copy"
                    );
                    self.book.ephemeral(context.key())
                }
            }
        } else {
            self.book.load_or_empty(context, self.store.as_mut())
        };

        let entry = history.upsert_with(id, || {
            HistoryEntry::assistant(id.clone(), String::new(), now_rfc3339())
        });
        entry.content = text.to_string();
        entry.is_thinking = false;
        entry.finish_reason = Some(reason.to_string());
        entry.stamp_context(context);
        self.schedule_history(context, now);
    }

    /// Queues a debounced save of the in-memory history of `context`.
    ///
    /// Stand-ins for histories that failed to load are never saved.
    fn schedule_history(&mut self, context: &StreamContext, now: Instant) -> ScheduleOutcome {
        let key = context.key();
        if self.book.is_stand_in(&key) {
            debug!(target: ENGINE_TARGET, context = %key, "history not loaded; save skipped");
            return ScheduleOutcome::SkippedUnloaded;
        }
        match self.book.get(&key) {
            Some(history) => self.sync.schedule(context, history, now),
            None => ScheduleOutcome::SkippedUnloaded,
        }
    }

    fn schedule_cleanup(&mut self, id: &StreamId, now: Instant) {
        self.cleanup.retain(|task| &task.stream_id != id);
        self.cleanup.push(CleanupTask {
            due: now + self.config.cleanup_grace,
            stream_id: id.clone(),
        });
    }

    fn sweep_idle(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.config.idle_timeout else {
            return 0;
        };
        let idle: Vec<StreamId> = self
            .registry
            .records()
            .filter(|record| record.status() != StreamStatus::Finalized)
            .filter(|record| now.saturating_duration_since(record.last_activity()) >= timeout)
            .map(|record| record.id().clone())
            .collect();
        for id in &idle {
            info!(target: FINALIZE_TARGET, stream_id = %id, "stream idle; finalizing");
            self.finalize(id.clone(), IDLE_TIMEOUT_REASON, None, None);
        }
        idle.len()
    }

    fn run_cleanup(&mut self, now: Instant) -> usize {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.cleanup)
            .into_iter()
            .partition(|task| task.due <= now);
        self.cleanup = pending;

        let view_key = self.view.view_context().and_then(|view| view.key());
        let mut cleaned = 0;
        for task in due {
            let Some(mut record) = self.registry.remove(&task.stream_id) else {
                continue;
            };
            if let Some(handle) = record.render_target_mut().clear() {
                self.patcher.forget(handle);
            }
            self.scheduler.forget(&task.stream_id);
            self.gate.forget(&task.stream_id);
            if let Some(context) = record.context() {
                self.release_background_history(context, view_key.as_ref());
            }
            debug!(target: ENGINE_TARGET, stream_id = %task.stream_id, "stream state collected");
            cleaned += 1;
        }
        cleaned
    }

    fn release_background_history(&mut self, context: &StreamContext, view_key: Option<&ContextKey>) {
        let key = context.key();
        if self.sync.is_ephemeral(context) || view_key == Some(&key) {
            return;
        }
        let in_use = self
            .registry
            .records()
            .filter_map(StreamRecord::context)
            .any(|other| other.key() == key);
        if !in_use {
            self.book.release(&key);
        }
    }
}
