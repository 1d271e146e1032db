use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tape_stream::{
    IncomingNode, Interaction, LiveNode, NodeId, PatchError, PatchHooks, RenderHandle,
    RenderSurface, StreamContext, StreamId, StreamMarker, SurfaceError, UpdateDecision,
};

/// One live node plus the markup line it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessNode {
    pub node: LiveNode,
    pub markup: String,
}

#[derive(Debug, Clone)]
struct HeadlessTarget {
    stream_id: StreamId,
    context: StreamContext,
    nodes: Vec<HeadlessNode>,
    streaming: bool,
    thinking: bool,
    attached: bool,
    patches: usize,
    final_markup: Option<String>,
}

#[derive(Debug, Default)]
struct SurfaceState {
    targets: BTreeMap<RenderHandle, HeadlessTarget>,
    next_handle: u64,
    next_node: u64,
    scrolls: usize,
    rejected_patches: usize,
}

impl SurfaceState {
    fn node(&mut self, line: &str) -> HeadlessNode {
        self.next_node += 1;
        HeadlessNode {
            node: LiveNode::new(NodeId(self.next_node), tag_of(line), text_len(line)),
            markup: line.to_string(),
        }
    }

    fn handle_for(&self, stream_id: &StreamId) -> Option<RenderHandle> {
        self.targets
            .iter()
            .rev()
            .find(|(_, target)| target.attached && &target.stream_id == stream_id)
            .map(|(handle, _)| *handle)
    }
}

/// In-memory render surface.
///
/// Each non-empty markup line becomes one node, so patches exercise the same
/// update/add/discard hooks a real document tree would. Markup with an unterminated
/// `<pre>` is rejected as incomplete. Clones share state, so a caller can keep a handle for
/// inspection while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    state: Rc<RefCell<SurfaceState>>,
}

impl HeadlessSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handle_for(&self, stream_id: &StreamId) -> Option<RenderHandle> {
        self.state.borrow().handle_for(stream_id)
    }

    /// Markup currently shown for the stream, one node per line.
    #[must_use]
    pub fn markup(&self, stream_id: &StreamId) -> Option<String> {
        let state = self.state.borrow();
        let handle = state.handle_for(stream_id)?;
        let target = state.targets.get(&handle)?;
        Some(
            target
                .nodes
                .iter()
                .map(|node| node.markup.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    #[must_use]
    pub fn nodes(&self, stream_id: &StreamId) -> Vec<HeadlessNode> {
        let state = self.state.borrow();
        state
            .handle_for(stream_id)
            .and_then(|handle| state.targets.get(&handle))
            .map(|target| target.nodes.clone())
            .unwrap_or_default()
    }

    /// Markup of the final full render, once it happened.
    #[must_use]
    pub fn final_markup(&self, stream_id: &StreamId) -> Option<String> {
        let state = self.state.borrow();
        let handle = state.handle_for(stream_id)?;
        state.targets.get(&handle)?.final_markup.clone()
    }

    #[must_use]
    pub fn is_streaming(&self, stream_id: &StreamId) -> bool {
        self.with_target(stream_id, |target| target.streaming)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_thinking(&self, stream_id: &StreamId) -> bool {
        self.with_target(stream_id, |target| target.thinking)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn patches(&self, stream_id: &StreamId) -> usize {
        self.with_target(stream_id, |target| target.patches)
            .unwrap_or(0)
    }

    #[must_use]
    pub fn context(&self, stream_id: &StreamId) -> Option<StreamContext> {
        self.with_target(stream_id, |target| target.context.clone())
    }

    #[must_use]
    pub fn target_count(&self) -> usize {
        self.state.borrow().targets.len()
    }

    #[must_use]
    pub fn scrolls(&self) -> usize {
        self.state.borrow().scrolls
    }

    #[must_use]
    pub fn rejected_patches(&self) -> usize {
        self.state.borrow().rejected_patches
    }

    /// Marks a node as interacted with, as a user would.
    pub fn set_interaction(&self, stream_id: &StreamId, index: usize, interaction: Interaction) {
        let mut state = self.state.borrow_mut();
        let Some(handle) = state.handle_for(stream_id) else {
            return;
        };
        if let Some(node) = state
            .targets
            .get_mut(&handle)
            .and_then(|target| target.nodes.get_mut(index))
        {
            node.node.interaction = interaction;
        }
    }

    pub fn add_class(&self, stream_id: &StreamId, index: usize, class: &str) {
        let mut state = self.state.borrow_mut();
        let Some(handle) = state.handle_for(stream_id) else {
            return;
        };
        if let Some(node) = state
            .targets
            .get_mut(&handle)
            .and_then(|target| target.nodes.get_mut(index))
        {
            node.node.classes.insert(class.to_string());
        }
    }

    /// Removes the stream's target from the document, as a host re-render would.
    pub fn detach(&self, stream_id: &StreamId) {
        let mut state = self.state.borrow_mut();
        if let Some(handle) = state.handle_for(stream_id) {
            if let Some(target) = state.targets.get_mut(&handle) {
                target.attached = false;
            }
        }
    }

    fn with_target<T>(
        &self,
        stream_id: &StreamId,
        read: impl FnOnce(&HeadlessTarget) -> T,
    ) -> Option<T> {
        let state = self.state.borrow();
        let handle = state.handle_for(stream_id)?;
        state.targets.get(&handle).map(read)
    }
}

impl RenderSurface for HeadlessSurface {
    fn begin_render(
        &mut self,
        stream_id: &StreamId,
        context: &StreamContext,
        placeholder: &str,
    ) -> Result<RenderHandle, SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let handle = RenderHandle(state.next_handle);
        let placeholder = state.node(&format!("<p>{placeholder}</p>"));
        state.targets.insert(
            handle,
            HeadlessTarget {
                stream_id: stream_id.clone(),
                context: context.clone(),
                nodes: vec![placeholder],
                streaming: false,
                thinking: true,
                attached: true,
                patches: 0,
                final_markup: None,
            },
        );
        Ok(handle)
    }

    fn locate(&self, stream_id: &StreamId) -> Option<RenderHandle> {
        self.state.borrow().handle_for(stream_id)
    }

    fn is_attached(&self, handle: RenderHandle) -> bool {
        self.state
            .borrow()
            .targets
            .get(&handle)
            .is_some_and(|target| target.attached)
    }

    fn patch(
        &mut self,
        handle: RenderHandle,
        markup: &str,
        hooks: &mut dyn PatchHooks,
    ) -> Result<(), PatchError> {
        let mut state = self.state.borrow_mut();
        if markup.matches("<pre").count() > markup.matches("</pre>").count() {
            state.rejected_patches += 1;
            return Err(PatchError::IncompleteMarkup(
                "unterminated <pre> block".to_string(),
            ));
        }
        let mut live = match state.targets.get_mut(&handle) {
            Some(target) if target.attached => std::mem::take(&mut target.nodes).into_iter(),
            _ => return Err(PatchError::Detached(handle)),
        };

        let mut merged = Vec::new();
        for line in markup_lines(markup) {
            match live.next() {
                Some(mut current) => {
                    let mut incoming = IncomingNode::new(tag_of(line), text_len(line));
                    incoming.equals_live = current.markup == line;
                    if hooks.before_update(&mut current.node, &mut incoming) == UpdateDecision::Update {
                        current.node.tag = incoming.tag;
                        current.node.classes = incoming.classes;
                        current.node.text_len = incoming.text_len;
                        if incoming.label.is_some() {
                            current.node.label = incoming.label;
                        }
                        current.markup = line.to_string();
                    }
                    merged.push(current);
                }
                None => {
                    let mut added = state.node(line);
                    hooks.node_added(&mut added.node);
                    merged.push(added);
                }
            }
        }
        merged.extend(live.filter(|stale| !hooks.before_discard(&stale.node)));

        if let Some(target) = state.targets.get_mut(&handle) {
            target.nodes = merged;
            target.patches += 1;
        }
        Ok(())
    }

    fn full_render(&mut self, handle: RenderHandle, markup: &str) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        let stream_id = match state.targets.get(&handle) {
            Some(target) if target.attached => target.stream_id.clone(),
            Some(target) => return Err(SurfaceError::NoTarget(target.stream_id.clone())),
            None => return Err(SurfaceError::Failed(format!("unknown handle {}", handle.0))),
        };
        let nodes: Vec<HeadlessNode> = markup_lines(markup).map(|line| state.node(line)).collect();
        if let Some(target) = state.targets.get_mut(&handle) {
            target.nodes = nodes;
            target.final_markup = Some(markup.to_string());
        }
        tracing::debug!(target: "stream_mock", stream_id = %stream_id, "final render");
        Ok(())
    }

    fn set_marker(&mut self, handle: RenderHandle, marker: StreamMarker, on: bool) {
        if let Some(target) = self.state.borrow_mut().targets.get_mut(&handle) {
            match marker {
                StreamMarker::Streaming => target.streaming = on,
                StreamMarker::Thinking => target.thinking = on,
            }
        }
    }

    fn remove_node_class(&mut self, handle: RenderHandle, node: NodeId, class: &str) {
        if let Some(target) = self.state.borrow_mut().targets.get_mut(&handle) {
            for headless in target.nodes.iter_mut().filter(|n| n.node.id == node) {
                headless.node.classes.remove(class);
            }
        }
    }

    fn scroll_to_bottom(&mut self) {
        self.state.borrow_mut().scrolls += 1;
    }
}

fn markup_lines(markup: &str) -> impl Iterator<Item = &str> {
    markup.lines().map(str::trim).filter(|line| !line.is_empty())
}

fn tag_of(line: &str) -> String {
    line.strip_prefix('<')
        .map(|rest| {
            rest.chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect::<String>()
        })
        .filter(|tag| !tag.is_empty())
        .unwrap_or_else(|| "#text".to_string())
        .to_ascii_lowercase()
}

fn text_len(line: &str) -> usize {
    let mut in_tag = false;
    line.chars()
        .filter(|ch| match ch {
            '<' => {
                in_tag = true;
                false
            }
            '>' => {
                in_tag = false;
                false
            }
            _ => !in_tag,
        })
        .count()
}
