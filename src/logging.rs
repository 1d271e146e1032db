//! `tracing` targets and subscriber installation.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::env_string_opt;

pub const REGISTRY_TARGET: &str = "tape_stream::registry";
pub const SCHEDULER_TARGET: &str = "tape_stream::scheduler";
pub const PATCH_TARGET: &str = "tape_stream::patch";
pub const GATE_TARGET: &str = "tape_stream::gate";
pub const SYNC_TARGET: &str = "tape_stream::sync";
pub const FINALIZE_TARGET: &str = "tape_stream::finalize";
pub const ENGINE_TARGET: &str = "tape_stream::engine";

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
    /// Append log lines to this file instead of stderr.
    pub file: Option<String>,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            filter: env_string_opt("TAPE_STREAM_LOG"),
            file: env_string_opt("TAPE_STREAM_LOG_FILE"),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.filter.as_deref().unwrap_or(DEFAULT_FILTER)))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs a global `fmt` subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, so repeated calls are safe.
pub fn init(config: &LoggingConfig) -> io::Result<bool> {
    let writer = match config.file.as_deref() {
        Some(path) => file_writer(Path::new(path))?,
        None => BoxMakeWriter::new(io::stderr),
    };
    let installed = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_writer(writer)
        .with_target(true)
        .try_init()
        .is_ok();
    Ok(installed)
}

fn file_writer(path: &Path) -> io::Result<BoxMakeWriter> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BoxMakeWriter::new(Mutex::new(file)))
}
