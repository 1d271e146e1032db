//! File-backed conversation history storage.

mod error;
mod paths;
mod store;

pub use error::HistoryStoreError;
pub use paths::{context_dir, history_file, AGENTS_DIR, GROUPS_DIR, HISTORY_FILE, TOPICS_DIR};
pub use store::FileHistoryStore;
