use std::time::Duration;

use tape_stream::{
    Clock, Collaborators, DispatchOutcome, ManualClock, SharedView, StreamConfig, StreamEngine,
    StreamError, StreamEvent, ViewContext,
};
use tracing::debug;

use crate::store::MemoryHistoryStore;
use crate::surface::HeadlessSurface;

const LOG_TARGET: &str = "stream_mock";

/// Upper bound on polls per pump; the engine never needs this many to go idle.
const MAX_POLLS: usize = 100_000;

/// A `StreamEngine` wired to in-memory collaborators and a manual clock.
pub struct MockHost {
    engine: StreamEngine,
    clock: ManualClock,
    surface: HeadlessSurface,
    store: MemoryHistoryStore,
    view: SharedView,
}

impl MockHost {
    #[must_use]
    pub fn new(config: StreamConfig, view: Option<ViewContext>) -> Self {
        let clock = ManualClock::new();
        let surface = HeadlessSurface::new();
        let store = MemoryHistoryStore::new();
        let view = SharedView::new(view);
        let collaborators = Collaborators::new(surface.clone(), store.clone(), view.clone())
            .with_clock(clock.clone());
        Self {
            engine: StreamEngine::new(config, collaborators),
            clock,
            surface,
            store,
            view,
        }
    }

    /// Host showing `agent_id`'s `topic_id`, with default configuration.
    #[must_use]
    pub fn viewing(agent_id: &str, topic_id: &str) -> Self {
        Self::new(
            StreamConfig::default(),
            Some(ViewContext::new(agent_id, topic_id)),
        )
    }

    #[must_use]
    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut StreamEngine {
        &mut self.engine
    }

    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    #[must_use]
    pub fn surface(&self) -> &HeadlessSurface {
        &self.surface
    }

    #[must_use]
    pub fn store(&self) -> &MemoryHistoryStore {
        &self.store
    }

    #[must_use]
    pub fn view(&self) -> &SharedView {
        &self.view
    }

    /// Dispatches each event, letting `gap` of simulated time pass after each one.
    pub fn feed(
        &mut self,
        events: impl IntoIterator<Item = StreamEvent>,
        gap: Duration,
    ) -> Vec<Result<DispatchOutcome, StreamError>> {
        events
            .into_iter()
            .map(|event| {
                let outcome = self.engine.dispatch(event);
                self.pump_for(gap);
                outcome
            })
            .collect()
    }

    /// Advances the clock by `span`, polling at every wakeup that falls inside it.
    pub fn pump_for(&mut self, span: Duration) -> usize {
        let deadline = self.clock.now() + span;
        let mut polls = 0;
        while polls < MAX_POLLS {
            match self.engine.next_wakeup() {
                Some(at) if at <= deadline => {
                    self.clock.advance_to(at);
                    self.engine.poll();
                    polls += 1;
                }
                _ => break,
            }
        }
        self.clock.advance_to(deadline);
        polls
    }

    /// Polls at every wakeup until nothing is pending. Returns the number of polls.
    pub fn run_until_idle(&mut self) -> usize {
        let mut polls = 0;
        while polls < MAX_POLLS {
            let Some(at) = self.engine.next_wakeup() else {
                break;
            };
            self.clock.advance_to(at);
            self.engine.poll();
            polls += 1;
        }
        debug!(target: LOG_TARGET, polls, "engine idle");
        polls
    }
}
