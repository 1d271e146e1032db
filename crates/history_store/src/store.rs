use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tape_stream::{HistoryEntry, HistoryStore, StoreFailure, StreamContext};
use tracing::debug;

use crate::error::HistoryStoreError;
use crate::paths::history_file;

const LOG_TARGET: &str = "history_store";

/// Stores each conversation as one pretty-printed JSON array on disk.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    root: PathBuf,
}

impl FileHistoryStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads the history of `context`. A missing file is an empty history.
    pub fn load(&self, context: &StreamContext) -> Result<Vec<HistoryEntry>, HistoryStoreError> {
        let path = history_file(&self.root, context)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(HistoryStoreError::io("reading history file", &path, source))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let entries: Vec<HistoryEntry> = serde_json::from_str(&raw)
            .map_err(|source| HistoryStoreError::json_parse(&path, source))?;
        validate_unique_ids(&path, &entries)?;
        debug!(target: LOG_TARGET, path = %path.display(), entries = entries.len(), "history read");
        Ok(entries)
    }

    /// Replaces the history of `context`. The file is written to a sibling temp file first
    /// and renamed over the old one.
    pub fn save(
        &self,
        context: &StreamContext,
        entries: &[HistoryEntry],
    ) -> Result<(), HistoryStoreError> {
        let path = history_file(&self.root, context)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| HistoryStoreError::io("creating history directory", parent, source))?;
        }

        let mut body = serde_json::to_string_pretty(entries)
            .map_err(|source| HistoryStoreError::json_serialize(&path, source))?;
        body.push('\n');

        let temp = path.with_extension("json.tmp");
        fs::write(&temp, body)
            .map_err(|source| HistoryStoreError::io("writing temporary history file", &temp, source))?;
        fs::rename(&temp, &path)
            .map_err(|source| HistoryStoreError::io("replacing history file", &path, source))?;
        debug!(target: LOG_TARGET, path = %path.display(), entries = entries.len(), "history written");
        Ok(())
    }
}

impl HistoryStore for FileHistoryStore {
    fn load_history(&mut self, context: &StreamContext) -> Result<Vec<HistoryEntry>, StoreFailure> {
        self.load(context)
            .map_err(|error| StoreFailure::new(error.to_string()))
    }

    fn save_history(
        &mut self,
        context: &StreamContext,
        entries: &[HistoryEntry],
    ) -> Result<(), StoreFailure> {
        self.save(context, entries)
            .map_err(|error| StoreFailure::new(error.to_string()))
    }
}

fn validate_unique_ids(path: &Path, entries: &[HistoryEntry]) -> Result<(), HistoryStoreError> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(HistoryStoreError::DuplicateEntryId {
                path: path.to_path_buf(),
                id: entry.id.to_string(),
            });
        }
    }
    Ok(())
}
