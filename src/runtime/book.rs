//! In-memory conversation histories keyed by context.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::core::context::{ContextKey, StreamContext};
use crate::core::history::{ConversationHistory, HistoryStore, StoreFailure};
use crate::logging::ENGINE_TARGET;

/// Histories the engine keeps in sync with accumulated text.
///
/// The copy for the displayed conversation is authoritative; copies for background
/// conversations are loaded from the store on first use and released with their streams.
/// A displayed conversation whose load failed gets an empty stand-in that is never written
/// back, so it cannot replace what the store still holds.
#[derive(Debug, Default)]
pub struct HistoryBook {
    histories: HashMap<ContextKey, ConversationHistory>,
    stand_ins: HashSet<ContextKey>,
}

impl HistoryBook {
    #[must_use]
    pub fn get(&self, key: &ContextKey) -> Option<&ConversationHistory> {
        self.histories.get(key)
    }

    pub fn get_mut(&mut self, key: &ContextKey) -> Option<&mut ConversationHistory> {
        self.histories.get_mut(key)
    }

    #[must_use]
    pub fn contains(&self, key: &ContextKey) -> bool {
        self.histories.contains_key(key)
    }

    /// Returns whether the copy for `key` is a stand-in for a history that failed to load.
    #[must_use]
    pub fn is_stand_in(&self, key: &ContextKey) -> bool {
        self.stand_ins.contains(key)
    }

    pub fn insert(&mut self, key: ContextKey, history: ConversationHistory) {
        self.stand_ins.remove(&key);
        self.histories.insert(key, history);
    }

    pub fn release(&mut self, key: &ContextKey) -> Option<ConversationHistory> {
        self.stand_ins.remove(key);
        self.histories.remove(key)
    }

    /// In-memory history that is never loaded from the store.
    pub fn ephemeral(&mut self, key: ContextKey) -> &mut ConversationHistory {
        self.histories.entry(key).or_default()
    }

    /// Returns the history for `context`, loading it from `store` on first use.
    ///
    /// A stand-in is loaded again; on failure the stand-in is kept and returned.
    pub fn load(
        &mut self,
        context: &StreamContext,
        store: &mut dyn HistoryStore,
    ) -> Result<&mut ConversationHistory, StoreFailure> {
        let key = context.key();
        if self.histories.contains_key(&key) && !self.stand_ins.contains(&key) {
            return Ok(self.histories.entry(key).or_default());
        }
        match store.load_history(context) {
            Ok(entries) => {
                debug!(target: ENGINE_TARGET, context = %key, entries = entries.len(), "history loaded");
                let mut history = ConversationHistory::new(entries);
                if let Some(stand_in) = self.histories.remove(&key) {
                    for entry in stand_in.entries() {
                        *history.upsert_with(&entry.id, || entry.clone()) = entry.clone();
                    }
                }
                self.insert(key.clone(), history);
                Ok(self.histories.entry(key).or_default())
            }
            Err(failure) if self.stand_ins.contains(&key) => {
                debug!(target: ENGINE_TARGET, context = %key, error = %failure, "history still unavailable; keeping stand-in");
                Ok(self.histories.entry(key).or_default())
            }
            Err(failure) => Err(failure),
        }
    }

    /// Like [`HistoryBook::load`], but a failed load starts from an empty stand-in.
    pub fn load_or_empty(
        &mut self,
        context: &StreamContext,
        store: &mut dyn HistoryStore,
    ) -> &mut ConversationHistory {
        let key = context.key();
        if let Some(failure) = self.load(context, store).err() {
            warn!(target: ENGINE_TARGET, context = %key, error = %failure, "history load failed; starting empty and not persisting");
            self.stand_ins.insert(key.clone());
            self.histories.insert(key.clone(), ConversationHistory::default());
        }
        self.histories.entry(key).or_default()
    }

    /// Replaces the in-memory copy with the store's version (used for group histories).
    pub fn reload(
        &mut self,
        context: &StreamContext,
        store: &mut dyn HistoryStore,
    ) -> Result<&mut ConversationHistory, StoreFailure> {
        let entries = store.load_history(context)?;
        let key = context.key();
        self.insert(key.clone(), ConversationHistory::new(entries));
        Ok(self.histories.entry(key).or_default())
    }
}
