//! Render surface contract.
//!
//! The host owns the live node tree. The engine hands it markup, and the host merges that
//! markup into the tree, consulting [`PatchHooks`] for every node it would update, discard,
//! or add. The hooks are where the engine protects stateful nodes.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::context::{StreamContext, StreamId};

/// Host-issued handle for the live node rendering one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(pub u64);

/// Host-issued identifier of a node inside a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Visual state markers on a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMarker {
    Streaming,
    Thinking,
}

/// Interaction state of a live node that a patch must not reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interaction {
    pub media_playing: bool,
    pub focused: bool,
    pub image_loaded: bool,
    /// Interactive button whose action already ran.
    pub completed_action: bool,
}

/// A node currently present in the host tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveNode {
    pub id: NodeId,
    pub tag: String,
    pub classes: BTreeSet<String>,
    /// Length of the node's text content in chars.
    pub text_len: usize,
    pub interaction: Interaction,
    pub label: Option<String>,
}

impl LiveNode {
    #[must_use]
    pub fn new(id: NodeId, tag: impl Into<String>, text_len: usize) -> Self {
        Self {
            id,
            tag: tag.into(),
            classes: BTreeSet::new(),
            text_len,
            interaction: Interaction::default(),
            label: None,
        }
    }

    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }
}

/// The freshly generated counterpart of a live node.
///
/// Hooks may edit `classes`, `disabled`, `label`, and `restore_focus`; the host applies the
/// edited node when the decision is [`UpdateDecision::Update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingNode {
    pub tag: String,
    pub classes: BTreeSet<String>,
    pub text_len: usize,
    /// The host found the incoming node structurally equal to the live node.
    pub equals_live: bool,
    pub disabled: bool,
    pub label: Option<String>,
    pub restore_focus: bool,
}

impl IncomingNode {
    #[must_use]
    pub fn new(tag: impl Into<String>, text_len: usize) -> Self {
        Self {
            tag: tag.into(),
            classes: BTreeSet::new(),
            text_len,
            equals_live: false,
            disabled: false,
            label: None,
            restore_focus: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    Update,
    Skip,
}

/// Callbacks the surface invokes while merging markup.
pub trait PatchHooks {
    fn before_update(&mut self, live: &mut LiveNode, incoming: &mut IncomingNode) -> UpdateDecision;

    /// Returns `false` to keep `live` in the tree.
    fn before_discard(&mut self, live: &LiveNode) -> bool;

    fn node_added(&mut self, node: &mut LiveNode);
}

/// A patch the surface could not apply (typically incomplete intermediate markup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("incomplete markup: {0}")]
    IncompleteMarkup(String),
    #[error("render target {0:?} is detached")]
    Detached(RenderHandle),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("no render target available for stream {0}")]
    NoTarget(StreamId),
    #[error("render surface failure: {0}")]
    Failed(String),
}

/// Host display surface.
pub trait RenderSurface {
    /// Creates the render target for a stream, showing `placeholder` until content arrives.
    fn begin_render(
        &mut self,
        stream_id: &StreamId,
        context: &StreamContext,
        placeholder: &str,
    ) -> Result<RenderHandle, SurfaceError>;

    /// Finds an existing render target for `stream_id`.
    fn locate(&self, stream_id: &StreamId) -> Option<RenderHandle>;

    fn is_attached(&self, handle: RenderHandle) -> bool;

    /// Merges `markup` into the live tree under `handle`.
    fn patch(
        &mut self,
        handle: RenderHandle,
        markup: &str,
        hooks: &mut dyn PatchHooks,
    ) -> Result<(), PatchError>;

    /// Full post-processing render of final markup.
    fn full_render(&mut self, handle: RenderHandle, markup: &str) -> Result<(), SurfaceError>;

    fn set_marker(&mut self, handle: RenderHandle, marker: StreamMarker, on: bool);

    fn remove_node_class(&mut self, handle: RenderHandle, node: NodeId, class: &str);

    fn scroll_to_bottom(&mut self);
}
