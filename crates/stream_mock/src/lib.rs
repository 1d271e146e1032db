//! Deterministic scripted upstream for `tape_stream`.
//!
//! This crate has no transport logic. It builds upstream event scripts, provides an
//! in-memory host (render surface and history store), and drives a `StreamEngine` on a
//! manual clock. It is intended for local development and end-to-end tests.

mod host;
mod script;
mod store;
mod surface;

pub use host::MockHost;
pub use script::{delta_chunk, token_split, ChunkStyle, Ending, ScriptedUpstream, DEMO_RESPONSE};
pub use store::MemoryHistoryStore;
pub use surface::{HeadlessNode, HeadlessSurface};
