//! Streaming runtime: registry, relevance gate, render loop, persistence, finalization.

pub mod book;
pub mod engine;
pub mod events;
pub mod finalize;
pub mod gate;
pub mod registry;
pub mod scheduler;
pub mod sync;

pub use engine::{
    AppendOutcome, Collaborators, DiscardReason, FinalizeOutcome, PollReport, StreamEngine,
    StreamHandle, IDLE_TIMEOUT_REASON,
};
pub use events::{DispatchOutcome, StreamEvent, WireContext};
pub use finalize::{OutOfBandPayload, ERROR_MARKER};
pub use gate::{SharedView, ViewSource};
pub use registry::{StreamRecord, StreamStatus};
pub use scheduler::TickReport;
