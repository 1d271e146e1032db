//! Frame-rate limited render loop.
//!
//! One loop serves every active stream. Each tick drains a small batch of queued units per
//! stream and renders that stream's whole accumulated text, because markup structure can
//! span many chunks. All render surface calls of the engine go through this module.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::gate::ViewGate;
use super::registry::{StreamRegistry, StreamStatus};
use crate::config::StreamConfig;
use crate::core::context::{StreamId, ViewContext};
use crate::logging::SCHEDULER_TARGET;
use crate::render::markup::MarkupRenderer;
use crate::render::patch::{FrameOutcome, PatchAdapter};
use crate::render::surface::{RenderHandle, RenderSurface, StreamMarker};

/// Borrowed engine state for one scheduler operation.
pub struct RenderPass<'a> {
    pub registry: &'a mut StreamRegistry,
    pub gate: &'a mut ViewGate,
    pub view: Option<&'a ViewContext>,
    pub surface: &'a mut dyn RenderSurface,
    pub markup: &'a dyn MarkupRenderer,
    pub patcher: &'a mut PatchAdapter,
    pub now: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameResult {
    Rendered,
    /// Stream is not shown; the surface was not touched.
    Background,
    NoTarget,
    /// Markup or patch failed; retried on the next frame.
    Skipped,
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub ticked: bool,
    pub units: usize,
    pub frames: usize,
    pub skipped: usize,
    pub settled: usize,
}

#[derive(Debug)]
pub struct RenderScheduler {
    frame_interval: Duration,
    min_chunk_buffer_size: usize,
    scroll_throttle: Duration,
    active: Vec<StreamId>,
    last_frame: Option<Instant>,
    last_scroll: HashMap<StreamId, Instant>,
}

impl RenderScheduler {
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            min_chunk_buffer_size: config.min_chunk_buffer_size,
            scroll_throttle: config.scroll_throttle,
            active: Vec::new(),
            last_frame: None,
            last_scroll: HashMap::new(),
        }
    }

    /// Adds a stream to the active set and starts the loop if it is idle.
    pub fn activate(&mut self, id: &StreamId, now: Instant) {
        if !self.active.contains(id) {
            self.active.push(id.clone());
        }
        if self.last_frame.is_none() {
            debug!(target: SCHEDULER_TARGET, "render loop started");
            self.last_frame = Some(now);
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.last_frame.is_some()
    }

    #[must_use]
    pub fn active(&self) -> &[StreamId] {
        &self.active
    }

    #[must_use]
    pub fn next_frame_at(&self) -> Option<Instant> {
        self.last_frame.map(|last| last + self.frame_interval)
    }

    pub fn forget(&mut self, id: &StreamId) {
        self.active.retain(|active| active != id);
        self.last_scroll.remove(id);
    }

    /// Runs one frame if the frame interval has elapsed.
    pub fn tick(&mut self, pass: &mut RenderPass<'_>) -> TickReport {
        let Some(last) = self.last_frame else {
            return TickReport::default();
        };
        let elapsed = pass.now.saturating_duration_since(last);
        if elapsed < self.frame_interval {
            return TickReport::default();
        }
        let interval_nanos = self.frame_interval.as_nanos().max(1);
        let carry = Duration::from_nanos((elapsed.as_nanos() % interval_nanos) as u64);
        self.last_frame = Some(pass.now - carry);

        let mut report = TickReport {
            ticked: true,
            ..TickReport::default()
        };
        let mut still_active = Vec::with_capacity(self.active.len());
        for id in std::mem::take(&mut self.active) {
            let Some(record) = pass.registry.get_mut(&id) else {
                self.last_scroll.remove(&id);
                continue;
            };
            let drained = record.drain_units(self.min_chunk_buffer_size);
            let queue_empty = record.pending_units() == 0;
            let finalized = record.status() == StreamStatus::Finalized;

            if drained > 0 {
                report.units += drained;
                match self.render_frame(pass, &id) {
                    FrameResult::Rendered => report.frames += 1,
                    FrameResult::Skipped => report.skipped += 1,
                    _ => {}
                }
            }

            if !queue_empty {
                still_active.push(id);
            } else if finalized {
                self.settle(pass, &id);
                report.settled += 1;
            }
        }
        self.active = still_active;
        if self.active.is_empty() {
            debug!(target: SCHEDULER_TARGET, "render loop idle");
            self.last_frame = None;
        }
        report
    }

    /// Renders the stream's accumulated text now, outside the frame cadence.
    pub fn render_frame(&mut self, pass: &mut RenderPass<'_>, id: &StreamId) -> FrameResult {
        let Some(record) = pass.registry.get_mut(id) else {
            return FrameResult::Missing;
        };
        let relevant = match record.context() {
            Some(context) => pass.gate.is_relevant(id, context, pass.view),
            None => return FrameResult::Missing,
        };
        if !relevant {
            return FrameResult::Background;
        }
        let Some(handle) = record.render_target_mut().resolve(id, &*pass.surface) else {
            return FrameResult::NoTarget;
        };
        let markup = match pass.markup.streaming_markup(record.accumulated_text()) {
            Ok(markup) => markup,
            Err(err) => {
                debug!(target: SCHEDULER_TARGET, stream_id = %id, error = %err, "frame skipped");
                return FrameResult::Skipped;
            }
        };
        match pass
            .patcher
            .apply(&mut *pass.surface, handle, &markup, pass.now)
        {
            FrameOutcome::Patched => {
                self.scroll(&mut *pass.surface, id, pass.now);
                FrameResult::Rendered
            }
            FrameOutcome::Skipped(_) => FrameResult::Skipped,
        }
    }

    /// Creates or finds the render target of a shown stream and marks it streaming.
    pub fn open_target(
        &mut self,
        pass: &mut RenderPass<'_>,
        id: &StreamId,
        placeholder: &str,
    ) -> Option<RenderHandle> {
        let record = pass.registry.get_mut(id)?;
        let context = record.context()?.clone();
        if !pass.gate.is_relevant(id, &context, pass.view) {
            return None;
        }
        let handle = match record.render_target_mut().resolve(id, &*pass.surface) {
            Some(handle) => handle,
            None => match pass.surface.begin_render(id, &context, placeholder) {
                Ok(handle) => {
                    record.render_target_mut().remember(handle);
                    handle
                }
                Err(err) => {
                    warn!(target: SCHEDULER_TARGET, stream_id = %id, error = %err, "render target unavailable");
                    return None;
                }
            },
        };
        pass.surface.set_marker(handle, StreamMarker::Thinking, false);
        pass.surface.set_marker(handle, StreamMarker::Streaming, true);
        Some(handle)
    }

    /// Removes animation classes whose window has elapsed.
    pub fn expire_classes(&mut self, pass: &mut RenderPass<'_>) -> usize {
        pass.patcher.expire(&mut *pass.surface, pass.now)
    }

    /// The single full-fidelity render of a finalized stream.
    pub fn render_final(&mut self, pass: &mut RenderPass<'_>, id: &StreamId, text: &str) -> FrameResult {
        let Some(record) = pass.registry.get_mut(id) else {
            return FrameResult::Missing;
        };
        let relevant = match record.context() {
            Some(context) => pass.gate.is_relevant(id, context, pass.view),
            None => return FrameResult::Missing,
        };
        if !relevant {
            return FrameResult::Background;
        }
        let Some(handle) = record.render_target_mut().resolve(id, &*pass.surface) else {
            return FrameResult::NoTarget;
        };

        pass.surface.set_marker(handle, StreamMarker::Streaming, false);
        pass.surface.set_marker(handle, StreamMarker::Thinking, false);
        let markup = pass.markup.final_markup(text).unwrap_or_else(|err| {
            warn!(target: SCHEDULER_TARGET, stream_id = %id, error = %err, "final markup failed; rendering raw text");
            text.to_string()
        });
        if let Err(err) = pass.surface.full_render(handle, &markup) {
            warn!(target: SCHEDULER_TARGET, stream_id = %id, error = %err, "final render failed");
            return FrameResult::Skipped;
        }
        pass.surface.scroll_to_bottom();
        self.last_scroll.insert(id.clone(), pass.now);
        FrameResult::Rendered
    }

    fn settle(&mut self, pass: &mut RenderPass<'_>, id: &StreamId) {
        self.last_scroll.remove(id);
        let Some(record) = pass.registry.get_mut(id) else {
            return;
        };
        let relevant = record
            .context()
            .is_some_and(|context| pass.gate.is_relevant(id, context, pass.view));
        if !relevant {
            return;
        }
        if let Some(handle) = record.render_target_mut().resolve(id, &*pass.surface) {
            pass.surface.set_marker(handle, StreamMarker::Streaming, false);
        }
        debug!(target: SCHEDULER_TARGET, stream_id = %id, "stream settled");
    }

    fn scroll(&mut self, surface: &mut dyn RenderSurface, id: &StreamId, now: Instant) {
        let due = self
            .last_scroll
            .get(id)
            .map_or(true, |last| now.saturating_duration_since(*last) >= self.scroll_throttle);
        if due {
            surface.scroll_to_bottom();
            self.last_scroll.insert(id.clone(), now);
        }
    }
}
