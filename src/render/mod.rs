//! Rendering seam: surface contract, markup translation, patch rules, target cache.

pub mod markup;
pub mod patch;
pub mod surface;
pub mod target;

pub use markup::{MarkdownMarkup, MarkupError, MarkupRenderer};
pub use patch::{FrameOutcome, PatchAdapter, PatchRules};
pub use surface::{
    IncomingNode, Interaction, LiveNode, NodeId, PatchError, PatchHooks, RenderHandle,
    RenderSurface, StreamMarker, SurfaceError, UpdateDecision,
};
pub use target::RenderTarget;
