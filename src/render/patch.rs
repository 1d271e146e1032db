//! Incremental patch adapter.
//!
//! Wraps [`RenderSurface::patch`] with the rules that keep stateful nodes stable across
//! frames: animation classes survive re-renders, significant growth pulses instead of
//! flashing, new blocks fade in, interactive nodes are left alone, and a failed or
//! panicking patch only costs one frame.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::debug;

use super::surface::{
    IncomingNode, LiveNode, NodeId, PatchError, PatchHooks, RenderHandle, RenderSurface,
    UpdateDecision,
};
use crate::logging::PATCH_TARGET;

pub const FADE_IN_CLASS: &str = "stream-element-fade-in";
pub const PULSE_CLASS: &str = "stream-content-pulse";
pub const KEEP_ALIVE_CLASS: &str = "keep-alive";

const BLOCK_TAGS: [&str; 16] = [
    "p",
    "div",
    "ul",
    "ol",
    "li",
    "pre",
    "blockquote",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "table",
    "tr",
    "figure",
];

#[must_use]
pub fn is_block_tag(tag: &str) -> bool {
    BLOCK_TAGS.iter().any(|block| block.eq_ignore_ascii_case(tag))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRules {
    /// Growth in chars of a block node, between frames, that triggers a pulse.
    pub growth_threshold: usize,
    pub pulse_duration: Duration,
    pub entrance_duration: Duration,
}

impl Default for PatchRules {
    fn default() -> Self {
        Self {
            growth_threshold: 20,
            pulse_duration: Duration::from_millis(300),
            entrance_duration: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Patched,
    Skipped(PatchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassRemoval {
    due: Instant,
    handle: RenderHandle,
    node: NodeId,
    class: &'static str,
}

#[derive(Debug, Default)]
pub struct PatchAdapter {
    rules: PatchRules,
    last_lengths: HashMap<(RenderHandle, NodeId), usize>,
    removals: Vec<ClassRemoval>,
}

impl PatchAdapter {
    #[must_use]
    pub fn new(rules: PatchRules) -> Self {
        Self {
            rules,
            last_lengths: HashMap::new(),
            removals: Vec::new(),
        }
    }

    /// Patches `markup` into the target. Errors and panics from the surface skip the frame.
    pub fn apply(
        &mut self,
        surface: &mut dyn RenderSurface,
        handle: RenderHandle,
        markup: &str,
        now: Instant,
    ) -> FrameOutcome {
        let mut hooks = FrameHooks {
            adapter: self,
            handle,
            now,
        };
        let result = catch_unwind(AssertUnwindSafe(|| {
            surface.patch(handle, markup, &mut hooks)
        }));
        match result {
            Ok(Ok(())) => FrameOutcome::Patched,
            Ok(Err(err)) => {
                debug!(target: PATCH_TARGET, handle = handle.0, error = %err, "patch skipped");
                FrameOutcome::Skipped(err)
            }
            Err(_) => {
                debug!(target: PATCH_TARGET, handle = handle.0, "surface panicked while patching");
                FrameOutcome::Skipped(PatchError::Other(
                    "surface panicked while patching".to_string(),
                ))
            }
        }
    }

    /// Removes classes whose animation window has elapsed. Returns how many were removed.
    pub fn expire(&mut self, surface: &mut dyn RenderSurface, now: Instant) -> usize {
        let mut removed = 0;
        self.removals.retain(|removal| {
            if removal.due > now {
                return true;
            }
            if surface.is_attached(removal.handle) {
                surface.remove_node_class(removal.handle, removal.node, removal.class);
                removed += 1;
            }
            false
        });
        removed
    }

    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.removals.iter().map(|removal| removal.due).min()
    }

    #[must_use]
    pub fn pending_removals(&self) -> usize {
        self.removals.len()
    }

    /// Drops all cached state for a render target.
    pub fn forget(&mut self, handle: RenderHandle) {
        self.last_lengths.retain(|(cached, _), _| *cached != handle);
        self.removals.retain(|removal| removal.handle != handle);
    }

    fn schedule_removal(
        &mut self,
        handle: RenderHandle,
        node: NodeId,
        class: &'static str,
        due: Instant,
    ) {
        self.removals.retain(|removal| {
            !(removal.handle == handle && removal.node == node && removal.class == class)
        });
        self.removals.push(ClassRemoval {
            due,
            handle,
            node,
            class,
        });
    }
}

struct FrameHooks<'a> {
    adapter: &'a mut PatchAdapter,
    handle: RenderHandle,
    now: Instant,
}

impl PatchHooks for FrameHooks<'_> {
    fn before_update(&mut self, live: &mut LiveNode, incoming: &mut IncomingNode) -> UpdateDecision {
        if incoming.equals_live {
            return UpdateDecision::Skip;
        }

        for class in [FADE_IN_CLASS, PULSE_CLASS] {
            if live.has_class(class) {
                incoming.classes.insert(class.to_string());
            }
        }

        if is_block_tag(&live.tag) {
            let key = (self.handle, live.id);
            let previous = self
                .adapter
                .last_lengths
                .get(&key)
                .copied()
                .unwrap_or(live.text_len);
            if incoming.text_len.saturating_sub(previous) > self.adapter.rules.growth_threshold {
                live.classes.insert(PULSE_CLASS.to_string());
                incoming.classes.insert(PULSE_CLASS.to_string());
                let due = self.now + self.adapter.rules.pulse_duration;
                self.adapter
                    .schedule_removal(self.handle, live.id, PULSE_CLASS, due);
            }
            self.adapter.last_lengths.insert(key, incoming.text_len);
        }

        if live.interaction.completed_action {
            incoming.disabled = true;
            incoming.label = live.label.clone();
        }

        if live.interaction.media_playing || live.interaction.image_loaded {
            return UpdateDecision::Skip;
        }

        if live.interaction.focused {
            incoming.restore_focus = true;
        }

        UpdateDecision::Update
    }

    fn before_discard(&mut self, live: &LiveNode) -> bool {
        !live.has_class(KEEP_ALIVE_CLASS)
    }

    fn node_added(&mut self, node: &mut LiveNode) {
        if !is_block_tag(&node.tag) {
            return;
        }
        node.classes.insert(FADE_IN_CLASS.to_string());
        self.adapter
            .last_lengths
            .insert((self.handle, node.id), node.text_len);
        let due = self.now + self.adapter.rules.entrance_duration;
        self.adapter
            .schedule_removal(self.handle, node.id, FADE_IN_CLASS, due);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::core::context::{StreamContext, StreamId};
    use crate::render::surface::{Interaction, StreamMarker, SurfaceError};

    /// Surface whose `patch` runs a scripted closure against the hooks.
    struct ScriptedSurface {
        script: Box<dyn FnMut(&mut dyn PatchHooks) -> Result<(), PatchError>>,
        removed: Vec<(RenderHandle, NodeId, String)>,
        attached: bool,
    }

    impl ScriptedSurface {
        fn new(script: impl FnMut(&mut dyn PatchHooks) -> Result<(), PatchError> + 'static) -> Self {
            Self {
                script: Box::new(script),
                removed: Vec::new(),
                attached: true,
            }
        }
    }

    impl RenderSurface for ScriptedSurface {
        fn begin_render(
            &mut self,
            stream_id: &StreamId,
            _context: &StreamContext,
            _placeholder: &str,
        ) -> Result<RenderHandle, SurfaceError> {
            Err(SurfaceError::NoTarget(stream_id.clone()))
        }

        fn locate(&self, _stream_id: &StreamId) -> Option<RenderHandle> {
            None
        }

        fn is_attached(&self, _handle: RenderHandle) -> bool {
            self.attached
        }

        fn patch(
            &mut self,
            _handle: RenderHandle,
            _markup: &str,
            hooks: &mut dyn PatchHooks,
        ) -> Result<(), PatchError> {
            (self.script)(hooks)
        }

        fn full_render(&mut self, _handle: RenderHandle, _markup: &str) -> Result<(), SurfaceError> {
            Ok(())
        }

        fn set_marker(&mut self, _handle: RenderHandle, _marker: StreamMarker, _on: bool) {}

        fn remove_node_class(&mut self, handle: RenderHandle, node: NodeId, class: &str) {
            self.removed.push((handle, node, class.to_string()));
        }

        fn scroll_to_bottom(&mut self) {}
    }

    const HANDLE: RenderHandle = RenderHandle(1);

    fn classes(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn animation_classes_survive_update() {
        let mut adapter = PatchAdapter::default();
        let mut surface = ScriptedSurface::new(|hooks| {
            let mut live = LiveNode::new(NodeId(1), "span", 3);
            live.classes = classes(&[FADE_IN_CLASS, PULSE_CLASS, "other"]);
            let mut incoming = IncomingNode::new("span", 4);
            assert_eq!(
                hooks.before_update(&mut live, &mut incoming),
                UpdateDecision::Update
            );
            assert_eq!(incoming.classes, classes(&[FADE_IN_CLASS, PULSE_CLASS]));
            Ok(())
        });

        let outcome = adapter.apply(&mut surface, HANDLE, "<span>abcd</span>", Instant::now());
        assert_eq!(outcome, FrameOutcome::Patched);
    }

    #[test]
    fn significant_block_growth_pulses_and_expires() {
        let start = Instant::now();
        let mut adapter = PatchAdapter::default();
        let mut surface = ScriptedSurface::new(|hooks| {
            let mut live = LiveNode::new(NodeId(7), "p", 5);
            let mut small = IncomingNode::new("p", 20);
            hooks.before_update(&mut live, &mut small);
            assert!(!small.classes.contains(PULSE_CLASS));

            let mut live = LiveNode::new(NodeId(7), "p", 20);
            let mut large = IncomingNode::new("p", 41);
            hooks.before_update(&mut live, &mut large);
            assert!(live.has_class(PULSE_CLASS));
            assert!(large.classes.contains(PULSE_CLASS));
            Ok(())
        });

        adapter.apply(&mut surface, HANDLE, "<p>…</p>", start);
        assert_eq!(adapter.next_due(), Some(start + Duration::from_millis(300)));

        assert_eq!(adapter.expire(&mut surface, start + Duration::from_millis(299)), 0);
        assert_eq!(adapter.expire(&mut surface, start + Duration::from_millis(300)), 1);
        assert_eq!(
            surface.removed,
            vec![(HANDLE, NodeId(7), PULSE_CLASS.to_string())]
        );
        assert_eq!(adapter.next_due(), None);
    }

    #[test]
    fn added_blocks_fade_in_inline_nodes_do_not() {
        let start = Instant::now();
        let mut adapter = PatchAdapter::default();
        let mut surface = ScriptedSurface::new(|hooks| {
            let mut block = LiveNode::new(NodeId(1), "UL", 0);
            hooks.node_added(&mut block);
            assert!(block.has_class(FADE_IN_CLASS));

            let mut inline = LiveNode::new(NodeId(2), "em", 0);
            hooks.node_added(&mut inline);
            assert!(inline.classes.is_empty());
            Ok(())
        });

        adapter.apply(&mut surface, HANDLE, "", start);
        assert_eq!(adapter.pending_removals(), 1);
        assert_eq!(adapter.next_due(), Some(start + Duration::from_millis(1000)));
    }

    #[test]
    fn stateful_nodes_are_protected() {
        let mut adapter = PatchAdapter::default();
        let mut surface = ScriptedSurface::new(|hooks| {
            let mut keep = LiveNode::new(NodeId(1), "div", 0);
            keep.classes = classes(&[KEEP_ALIVE_CLASS]);
            assert!(!hooks.before_discard(&keep));
            assert!(hooks.before_discard(&LiveNode::new(NodeId(2), "div", 0)));

            let mut video = LiveNode::new(NodeId(3), "video", 0);
            video.interaction = Interaction {
                media_playing: true,
                ..Interaction::default()
            };
            assert_eq!(
                hooks.before_update(&mut video, &mut IncomingNode::new("video", 0)),
                UpdateDecision::Skip
            );

            let mut button = LiveNode::new(NodeId(4), "button", 4);
            button.interaction.completed_action = true;
            button.label = Some("Sent".to_string());
            let mut incoming = IncomingNode::new("button", 4);
            incoming.label = Some("Send".to_string());
            assert_eq!(
                hooks.before_update(&mut button, &mut incoming),
                UpdateDecision::Update
            );
            assert!(incoming.disabled);
            assert_eq!(incoming.label.as_deref(), Some("Sent"));

            let mut input = LiveNode::new(NodeId(5), "input", 0);
            input.interaction.focused = true;
            let mut incoming = IncomingNode::new("input", 0);
            hooks.before_update(&mut input, &mut incoming);
            assert!(incoming.restore_focus);

            let mut same = IncomingNode::new("p", 1);
            same.equals_live = true;
            assert_eq!(
                hooks.before_update(&mut LiveNode::new(NodeId(6), "p", 1), &mut same),
                UpdateDecision::Skip
            );
            Ok(())
        });

        assert_eq!(
            adapter.apply(&mut surface, HANDLE, "", Instant::now()),
            FrameOutcome::Patched
        );
    }

    #[test]
    fn errors_and_panics_skip_the_frame() {
        let mut adapter = PatchAdapter::default();
        let mut failing = ScriptedSurface::new(|_| {
            Err(PatchError::IncompleteMarkup("unterminated fence".to_string()))
        });
        assert_eq!(
            adapter.apply(&mut failing, HANDLE, "```", Instant::now()),
            FrameOutcome::Skipped(PatchError::IncompleteMarkup(
                "unterminated fence".to_string()
            ))
        );

        let mut panicking = ScriptedSurface::new(|_| panic!("surface bug"));
        assert!(matches!(
            adapter.apply(&mut panicking, HANDLE, "x", Instant::now()),
            FrameOutcome::Skipped(PatchError::Other(_))
        ));
    }

    #[test]
    fn detached_targets_drop_scheduled_removals() {
        let start = Instant::now();
        let mut adapter = PatchAdapter::default();
        let mut surface = ScriptedSurface::new(|hooks| {
            hooks.node_added(&mut LiveNode::new(NodeId(1), "p", 0));
            Ok(())
        });
        adapter.apply(&mut surface, HANDLE, "", start);

        surface.attached = false;
        assert_eq!(adapter.expire(&mut surface, start + Duration::from_secs(2)), 0);
        assert_eq!(adapter.pending_removals(), 0);
        assert!(surface.removed.is_empty());

        adapter.apply(&mut surface, HANDLE, "", start);
        adapter.forget(HANDLE);
        assert_eq!(adapter.pending_removals(), 0);
    }
}
