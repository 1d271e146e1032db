use std::path::{Path, PathBuf};

use tape_stream::StreamContext;

use crate::error::HistoryStoreError;

pub const AGENTS_DIR: &str = "agents";
pub const GROUPS_DIR: &str = "groups";
pub const TOPICS_DIR: &str = "topics";
pub const HISTORY_FILE: &str = "history.json";

/// Directory holding the history of `context` under `root`.
pub fn context_dir(root: &Path, context: &StreamContext) -> Result<PathBuf, HistoryStoreError> {
    let principal = validate_segment("principal id", &context.principal_id)?;
    let topic = validate_segment("topic id", &context.topic_id)?;
    let owners = if context.is_group {
        GROUPS_DIR
    } else {
        AGENTS_DIR
    };
    Ok(root.join(owners).join(principal).join(TOPICS_DIR).join(topic))
}

pub fn history_file(root: &Path, context: &StreamContext) -> Result<PathBuf, HistoryStoreError> {
    Ok(context_dir(root, context)?.join(HISTORY_FILE))
}

// Ids become directory names; anything that could escape the root is refused.
fn validate_segment<'a>(field: &'static str, value: &'a str) -> Result<&'a str, HistoryStoreError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if invalid {
        return Err(HistoryStoreError::InvalidSegment {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}
