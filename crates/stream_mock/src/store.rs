use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tape_stream::{ContextKey, HistoryEntry, HistoryStore, StoreFailure, StreamContext};

#[derive(Debug, Default)]
struct StoreState {
    histories: HashMap<ContextKey, Vec<HistoryEntry>>,
    loads: usize,
    saves: usize,
    offline: bool,
}

/// In-memory history store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    state: Rc<RefCell<StoreState>>,
}

impl MemoryHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates the stored history of `context`.
    pub fn seed(&self, context: &StreamContext, entries: Vec<HistoryEntry>) {
        self.state
            .borrow_mut()
            .histories
            .insert(context.key(), entries);
    }

    #[must_use]
    pub fn entries(&self, key: &ContextKey) -> Vec<HistoryEntry> {
        self.state
            .borrow()
            .histories
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn loads(&self) -> usize {
        self.state.borrow().loads
    }

    #[must_use]
    pub fn saves(&self) -> usize {
        self.state.borrow().saves
    }

    /// While offline every load and save fails.
    pub fn set_offline(&self, offline: bool) {
        self.state.borrow_mut().offline = offline;
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load_history(&mut self, context: &StreamContext) -> Result<Vec<HistoryEntry>, StoreFailure> {
        let mut state = self.state.borrow_mut();
        if state.offline {
            return Err(StoreFailure::new("history store offline"));
        }
        state.loads += 1;
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
        let mut state = self.state.borrow_mut();
        if state.offline {
            return Err(StoreFailure::new("history store offline"));
        }
        state.saves += 1;
        state.histories.insert(context.key(), entries.to_vec());
        Ok(())
    }
}
