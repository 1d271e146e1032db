//! View-relevance gate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::core::context::{StreamContext, StreamId, ViewContext};
use crate::logging::GATE_TARGET;

/// Reports what the host is displaying.
pub trait ViewSource {
    fn view_context(&self) -> Option<ViewContext>;
}

/// In-process view source the host updates as the user navigates.
#[derive(Debug, Clone, Default)]
pub struct SharedView {
    current: Rc<RefCell<Option<ViewContext>>>,
}

impl SharedView {
    #[must_use]
    pub fn new(view: Option<ViewContext>) -> Self {
        Self {
            current: Rc::new(RefCell::new(view)),
        }
    }

    pub fn show(&self, view: ViewContext) {
        *self.current.borrow_mut() = Some(view);
    }

    pub fn clear(&self) {
        *self.current.borrow_mut() = None;
    }
}

impl ViewSource for SharedView {
    fn view_context(&self) -> Option<ViewContext> {
        self.current.borrow().clone()
    }
}

/// Caches per-stream relevance for the current view signature.
#[derive(Debug, Default)]
pub struct ViewGate {
    signature: Option<String>,
    decisions: HashMap<StreamId, bool>,
}

impl ViewGate {
    /// Invalidates every cached decision when the view signature changed.
    pub fn observe(&mut self, view: Option<&ViewContext>) {
        let signature = view
            .map(ViewContext::signature)
            .unwrap_or_else(|| ViewContext::default().signature());
        if self.signature.as_deref() != Some(signature.as_str()) {
            if self.signature.is_some() {
                debug!(
                    target: GATE_TARGET,
                    signature = %signature,
                    cleared = self.decisions.len(),
                    "view changed; relevance cache cleared"
                );
            }
            self.decisions.clear();
            self.signature = Some(signature);
        }
    }

    pub fn is_relevant(
        &mut self,
        id: &StreamId,
        context: &StreamContext,
        view: Option<&ViewContext>,
    ) -> bool {
        self.observe(view);
        *self
            .decisions
            .entry(id.clone())
            .or_insert_with(|| view.is_some_and(|view| context.matches_view(view)))
    }

    pub fn forget(&mut self, id: &StreamId) {
        self.decisions.remove(id);
    }

    #[must_use]
    pub fn cached_decisions(&self) -> usize {
        self.decisions.len()
    }
}
