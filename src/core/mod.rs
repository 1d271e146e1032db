//! Core data model: identities, payloads, segmentation, history, errors, time.

pub mod chunk;
pub mod clock;
pub mod context;
pub mod error;
pub mod history;
pub mod segment;
