//! Debounced history persistence.
//!
//! At most one task is outstanding per conversation; scheduling again replaces the pending
//! snapshot and pushes the deadline out. Group histories are owned elsewhere and never
//! written from here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::core::context::{ContextKey, EphemeralTopics, StreamContext};
use crate::core::error::StreamError;
use crate::core::history::{ConversationHistory, HistoryEntry, HistoryStore};
use crate::logging::SYNC_TARGET;

#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceTask {
    pub context: StreamContext,
    pub snapshot: Vec<HistoryEntry>,
    pub due_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    /// An earlier pending task for the same conversation was replaced.
    Replaced,
    SkippedEphemeral,
    SkippedGroup,
    /// The in-memory copy stands in for a history the store could not load.
    SkippedUnloaded,
}

#[derive(Debug)]
pub struct HistorySync {
    debounce: Duration,
    ephemeral: EphemeralTopics,
    tasks: HashMap<ContextKey, PersistenceTask>,
}

impl HistorySync {
    #[must_use]
    pub fn new(debounce: Duration, ephemeral: EphemeralTopics) -> Self {
        Self {
            debounce,
            ephemeral,
            tasks: HashMap::new(),
        }
    }

    /// Returns whether histories of `context` are persisted at all.
    #[must_use]
    pub fn persists(&self, context: &StreamContext) -> bool {
        !context.is_group && !self.ephemeral.contains(&context.topic_id)
    }

    #[must_use]
    pub fn is_ephemeral(&self, context: &StreamContext) -> bool {
        self.ephemeral.contains(&context.topic_id)
    }

    pub fn schedule(
        &mut self,
        context: &StreamContext,
        history: &ConversationHistory,
        now: Instant,
    ) -> ScheduleOutcome {
        if self.ephemeral.contains(&context.topic_id) {
            return ScheduleOutcome::SkippedEphemeral;
        }
        if context.is_group {
            return ScheduleOutcome::SkippedGroup;
        }

        let key = context.key();
        let task = PersistenceTask {
            context: context.clone(),
            snapshot: history.persistable(),
            due_at: now + self.debounce,
        };
        match self.tasks.insert(key, task) {
            Some(_) => ScheduleOutcome::Replaced,
            None => ScheduleOutcome::Scheduled,
        }
    }

    /// Removes and returns tasks due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<PersistenceTask> {
        let due_keys: Vec<ContextKey> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.due_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        let mut due: Vec<_> = due_keys
            .iter()
            .filter_map(|key| self.tasks.remove(key))
            .collect();
        due.sort_by_key(|task| task.due_at);
        due
    }

    pub fn drain_all(&mut self) -> Vec<PersistenceTask> {
        let mut all: Vec<_> = self.tasks.drain().map(|(_, task)| task).collect();
        all.sort_by_key(|task| task.due_at);
        all
    }

    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.tasks.values().map(|task| task.due_at).min()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_scheduled(&self, key: &ContextKey) -> bool {
        self.tasks.contains_key(key)
    }
}

/// Writes one task. Failures are reported, never retried.
pub fn persist(store: &mut dyn HistoryStore, task: &PersistenceTask) -> Result<(), StreamError> {
    let key = task.context.key();
    let entries: Vec<HistoryEntry> = task
        .snapshot
        .iter()
        .filter(|entry| !entry.is_thinking)
        .cloned()
        .collect();
    match store.save_history(&task.context, &entries) {
        Ok(()) => {
            debug!(target: SYNC_TARGET, context = %key, entries = entries.len(), "history persisted");
            Ok(())
        }
        Err(failure) => {
            error!(target: SYNC_TARGET, context = %key, error = %failure, "history persistence failed");
            Err(StreamError::PersistenceFailure {
                context: key,
                reason: failure.message,
            })
        }
    }
}

/// Persists every task, logging failures. Returns how many writes succeeded.
pub fn persist_all(store: &mut dyn HistoryStore, tasks: Vec<PersistenceTask>) -> usize {
    let total = tasks.len();
    let written = tasks
        .iter()
        .filter(|task| persist(store, task).is_ok())
        .count();
    if total > 0 {
        info!(target: SYNC_TARGET, written, failed = total - written, "persistence pass complete");
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::StoreFailure;

    #[derive(Default)]
    struct CountingStore {
        saves: Vec<(String, usize)>,
        fail: bool,
    }

    impl HistoryStore for CountingStore {
        fn load_history(
            &mut self,
            _context: &StreamContext,
        ) -> Result<Vec<HistoryEntry>, StoreFailure> {
            Ok(Vec::new())
        }

        fn save_history(
            &mut self,
            context: &StreamContext,
            entries: &[HistoryEntry],
        ) -> Result<(), StoreFailure> {
            if self.fail {
                return Err(StoreFailure::from("read-only"));
            }
            self.saves.push((context.key().to_string(), entries.len()));
            Ok(())
        }
    }

    fn history(contents: &[&str]) -> ConversationHistory {
        ConversationHistory::new(
            contents
                .iter()
                .enumerate()
                .map(|(index, content)| HistoryEntry::assistant(format!("m{index}"), *content, "t"))
                .collect(),
        )
    }

    #[test]
    fn rescheduling_replaces_and_extends_deadline() {
        let start = Instant::now();
        let mut sync = HistorySync::new(Duration::from_secs(1), EphemeralTopics::default());
        let context = StreamContext::new("agent", "topic");

        assert_eq!(
            sync.schedule(&context, &history(&["a"]), start),
            ScheduleOutcome::Scheduled
        );
        assert_eq!(
            sync.schedule(&context, &history(&["a", "b"]), start + Duration::from_millis(500)),
            ScheduleOutcome::Replaced
        );
        assert_eq!(sync.pending(), 1);
        assert!(sync.take_due(start + Duration::from_millis(1000)).is_empty());

        let due = sync.take_due(start + Duration::from_millis(1500));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].snapshot.len(), 2);
        assert_eq!(sync.next_due(), None);
    }

    #[test]
    fn group_and_ephemeral_contexts_are_never_scheduled() {
        let mut sync = HistorySync::new(Duration::from_secs(1), EphemeralTopics::default());
        let now = Instant::now();

        assert_eq!(
            sync.schedule(&StreamContext::group("g", "topic"), &history(&["a"]), now),
            ScheduleOutcome::SkippedGroup
        );
        assert_eq!(
            sync.schedule(&StreamContext::new("a", "voicechat_1"), &history(&["a"]), now),
            ScheduleOutcome::SkippedEphemeral
        );
        assert_eq!(sync.pending(), 0);
        assert!(!sync.persists(&StreamContext::new("a", "assistant_chat")));
        assert!(sync.persists(&StreamContext::new("a", "topic")));
    }

    #[test]
    fn persist_filters_thinking_entries_and_reports_failures() {
        let mut thinking = HistoryEntry::assistant("m9", "Thinking...", "t");
        thinking.is_thinking = true;
        let task = PersistenceTask {
            context: StreamContext::new("agent", "topic"),
            snapshot: vec![HistoryEntry::assistant("m1", "hi", "t"), thinking],
            due_at: Instant::now(),
        };

        let mut store = CountingStore::default();
        assert_eq!(persist(&mut store, &task), Ok(()));
        assert_eq!(store.saves, vec![("agent-topic".to_string(), 1)]);

        store.fail = true;
        assert_eq!(
            persist(&mut store, &task),
            Err(StreamError::PersistenceFailure {
                context: ContextKey::new("agent", "topic"),
                reason: "read-only".to_string(),
            })
        );
        assert_eq!(persist_all(&mut store, vec![task]), 0);
    }
}
