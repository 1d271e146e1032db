#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tape_stream::{
    Clock, Collaborators, ContextKey, HistoryEntry, HistoryStore, ManualClock, MarkupError,
    MarkupRenderer, NodeId, PatchError, PatchHooks, PollReport, RenderHandle, RenderSurface,
    SeedEntry, SharedView, StoreFailure, StreamConfig, StreamContext, StreamEngine, StreamId,
    StreamMarker, SurfaceError, ViewContext,
};

pub const AGENT: &str = "agent-1";
pub const TOPIC: &str = "topic-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    BeginRender {
        stream_id: String,
        placeholder: String,
    },
    Patch {
        handle: RenderHandle,
        markup: String,
    },
    FullRender {
        handle: RenderHandle,
        markup: String,
    },
    Marker {
        handle: RenderHandle,
        marker: StreamMarker,
        on: bool,
    },
    RemoveClass {
        handle: RenderHandle,
        node: NodeId,
        class: String,
    },
    Scroll,
}

#[derive(Default)]
struct SurfaceState {
    calls: Vec<SurfaceCall>,
    targets: HashMap<String, RenderHandle>,
    detached: HashSet<RenderHandle>,
    next_handle: u64,
    failing_marker: Option<String>,
    failures_left: usize,
    refuse_targets: bool,
}

/// Render surface that records every call.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.state
            .lock()
            .expect("lock surface state for calls")
            .calls
            .clone()
    }

    pub fn take_calls(&self) -> Vec<SurfaceCall> {
        let mut state = self.state.lock().expect("lock surface state for take");
        std::mem::take(&mut state.calls)
    }

    /// Markup of every successful patch, oldest first.
    pub fn patches(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Patch { markup, .. } => Some(markup),
                _ => None,
            })
            .collect()
    }

    pub fn full_renders(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::FullRender { markup, .. } => Some(markup),
                _ => None,
            })
            .collect()
    }

    pub fn begin_renders(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SurfaceCall::BeginRender { .. }))
            .count()
    }

    pub fn scrolls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SurfaceCall::Scroll))
            .count()
    }

    pub fn handle_of(&self, stream_id: &str) -> Option<RenderHandle> {
        self.state
            .lock()
            .expect("lock surface state for handle")
            .targets
            .get(stream_id)
            .copied()
    }

    /// Detaches the stream's current target and mounts a fresh one the engine must locate.
    pub fn remount(&self, stream_id: &str) -> Option<RenderHandle> {
        let mut state = self.state.lock().expect("lock surface state for remount");
        let old = state.targets.get(stream_id).copied()?;
        state.detached.insert(old);
        state.next_handle += 1;
        let fresh = RenderHandle(state.next_handle);
        state.targets.insert(stream_id.to_string(), fresh);
        Some(fresh)
    }

    /// Makes `begin_render` fail until switched back.
    pub fn refuse_targets(&self, refuse: bool) {
        self.state
            .lock()
            .expect("lock surface state for targets")
            .refuse_targets = refuse;
    }

    /// Fails the next `times` patches whose markup contains `marker`.
    pub fn fail_patches_containing(&self, marker: &str, times: usize) {
        let mut state = self.state.lock().expect("lock surface state for failures");
        state.failing_marker = Some(marker.to_string());
        state.failures_left = times;
    }
}

impl RenderSurface for RecordingSurface {
    fn begin_render(
        &mut self,
        stream_id: &StreamId,
        _context: &StreamContext,
        placeholder: &str,
    ) -> Result<RenderHandle, SurfaceError> {
        let mut state = self.state.lock().expect("lock surface state for begin");
        if state.refuse_targets {
            return Err(SurfaceError::Failed("no room for a message".to_string()));
        }
        state.next_handle += 1;
        let handle = RenderHandle(state.next_handle);
        state.targets.insert(stream_id.to_string(), handle);
        state.calls.push(SurfaceCall::BeginRender {
            stream_id: stream_id.to_string(),
            placeholder: placeholder.to_string(),
        });
        Ok(handle)
    }

    fn locate(&self, stream_id: &StreamId) -> Option<RenderHandle> {
        self.state
            .lock()
            .expect("lock surface state for locate")
            .targets
            .get(stream_id.as_str())
            .copied()
    }

    fn is_attached(&self, handle: RenderHandle) -> bool {
        let state = self.state.lock().expect("lock surface state for attached");
        !state.detached.contains(&handle) && state.targets.values().any(|h| *h == handle)
    }

    fn patch(
        &mut self,
        handle: RenderHandle,
        markup: &str,
        _hooks: &mut dyn PatchHooks,
    ) -> Result<(), PatchError> {
        let mut state = self.state.lock().expect("lock surface state for patch");
        let failing = state
            .failing_marker
            .as_deref()
            .is_some_and(|marker| markup.contains(marker));
        if failing && state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(PatchError::IncompleteMarkup(markup.to_string()));
        }
        if state.detached.contains(&handle) {
            return Err(PatchError::Detached(handle));
        }
        state.calls.push(SurfaceCall::Patch {
            handle,
            markup: markup.to_string(),
        });
        Ok(())
    }

    fn full_render(&mut self, handle: RenderHandle, markup: &str) -> Result<(), SurfaceError> {
        self.state
            .lock()
            .expect("lock surface state for full render")
            .calls
            .push(SurfaceCall::FullRender {
                handle,
                markup: markup.to_string(),
            });
        Ok(())
    }

    fn set_marker(&mut self, handle: RenderHandle, marker: StreamMarker, on: bool) {
        self.state
            .lock()
            .expect("lock surface state for marker")
            .calls
            .push(SurfaceCall::Marker { handle, marker, on });
    }

    fn remove_node_class(&mut self, handle: RenderHandle, node: NodeId, class: &str) {
        self.state
            .lock()
            .expect("lock surface state for class removal")
            .calls
            .push(SurfaceCall::RemoveClass {
                handle,
                node,
                class: class.to_string(),
            });
    }

    fn scroll_to_bottom(&mut self) {
        self.state
            .lock()
            .expect("lock surface state for scroll")
            .calls
            .push(SurfaceCall::Scroll);
    }
}

#[derive(Default)]
struct StoreState {
    histories: HashMap<ContextKey, Vec<HistoryEntry>>,
    saves: Vec<(ContextKey, Vec<HistoryEntry>)>,
    loads: usize,
    fail_loads: bool,
    fail_saves: bool,
}

/// History store that keeps everything in memory and records writes.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn seed(&self, context: &StreamContext, entries: Vec<HistoryEntry>) {
        self.state
            .lock()
            .expect("lock store state for seed")
            .histories
            .insert(context.key(), entries);
    }

    pub fn saves(&self) -> Vec<(ContextKey, Vec<HistoryEntry>)> {
        self.state
            .lock()
            .expect("lock store state for saves")
            .saves
            .clone()
    }

    pub fn loads(&self) -> usize {
        self.state.lock().expect("lock store state for loads").loads
    }

    pub fn stored(&self, key: &ContextKey) -> Vec<HistoryEntry> {
        self.state
            .lock()
            .expect("lock store state for stored")
            .histories
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.state.lock().expect("lock store state for flag").fail_loads = fail;
    }

    pub fn fail_saves(&self, fail: bool) {
        self.state.lock().expect("lock store state for flag").fail_saves = fail;
    }
}

impl HistoryStore for MemoryStore {
    fn load_history(&mut self, context: &StreamContext) -> Result<Vec<HistoryEntry>, StoreFailure> {
        let mut state = self.state.lock().expect("lock store state for load");
        state.loads += 1;
        if state.fail_loads {
            return Err(StoreFailure::from("store offline"));
        }
        Ok(state
            .histories
            .get(&context.key())
            .cloned()
            .unwrap_or_default())
    }

    fn save_history(
        &mut self,
        context: &StreamContext,
        entries: &[HistoryEntry],
    ) -> Result<(), StoreFailure> {
        let mut state = self.state.lock().expect("lock store state for save");
        if state.fail_saves {
            return Err(StoreFailure::from("disk full"));
        }
        state.histories.insert(context.key(), entries.to_vec());
        state.saves.push((context.key(), entries.to_vec()));
        Ok(())
    }
}

/// Markup renderer that passes text through, so assertions can compare raw text.
#[derive(Clone, Copy, Default)]
pub struct EchoMarkup;

impl MarkupRenderer for EchoMarkup {
    fn streaming_markup(&self, text: &str) -> Result<String, MarkupError> {
        Ok(text.to_string())
    }

    fn final_markup(&self, text: &str) -> Result<String, MarkupError> {
        Ok(format!("final:{text}"))
    }
}

pub struct Harness {
    pub engine: StreamEngine,
    pub clock: ManualClock,
    pub surface: RecordingSurface,
    pub store: MemoryStore,
    pub view: SharedView,
}

impl Harness {
    /// Engine showing `AGENT`/`TOPIC`.
    pub fn new(config: StreamConfig) -> Self {
        Self::with_view(config, Some(ViewContext::new(AGENT, TOPIC)))
    }

    pub fn with_view(config: StreamConfig, view: Option<ViewContext>) -> Self {
        let clock = ManualClock::new();
        let surface = RecordingSurface::default();
        let store = MemoryStore::default();
        let view = SharedView::new(view);
        let collaborators = Collaborators::new(surface.clone(), store.clone(), view.clone())
            .with_markup(EchoMarkup)
            .with_clock(clock.clone());
        Self {
            engine: StreamEngine::new(config, collaborators),
            clock,
            surface,
            store,
            view,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Advances one frame interval and polls.
    pub fn frame(&mut self) -> PollReport {
        self.clock.advance(self.engine.config().frame_interval());
        self.engine.poll()
    }

    pub fn frames(&mut self, count: usize) {
        for _ in 0..count {
            self.frame();
        }
    }

    /// Polls at every wakeup until nothing is pending.
    pub fn run_until_idle(&mut self) -> usize {
        let mut polls = 0;
        while let Some(at) = self.engine.next_wakeup() {
            assert!(polls < 10_000, "engine never went idle");
            self.clock.advance_to(at);
            self.engine.poll();
            polls += 1;
        }
        polls
    }

    pub fn now(&self) -> std::time::Instant {
        self.clock.now()
    }
}

pub fn seed(id: &str) -> SeedEntry {
    SeedEntry::new(id, StreamContext::new(AGENT, TOPIC))
}

pub fn seed_in(id: &str, principal: &str, topic: &str) -> SeedEntry {
    SeedEntry::new(id, StreamContext::new(principal, topic))
}

pub fn key() -> ContextKey {
    ContextKey::new(AGENT, TOPIC)
}
