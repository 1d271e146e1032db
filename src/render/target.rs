//! Cached render target with liveness checks.

use super::surface::{RenderHandle, RenderSurface};
use crate::core::context::StreamId;

/// Remembers the last known render target of a stream.
///
/// A cached handle is only trusted while the surface reports it attached; otherwise the
/// surface is asked to locate the stream's target again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderTarget {
    cached: Option<RenderHandle>,
}

impl RenderTarget {
    #[must_use]
    pub fn cached(&self) -> Option<RenderHandle> {
        self.cached
    }

    pub fn remember(&mut self, handle: RenderHandle) {
        self.cached = Some(handle);
    }

    pub fn clear(&mut self) -> Option<RenderHandle> {
        self.cached.take()
    }

    pub fn resolve(
        &mut self,
        stream_id: &StreamId,
        surface: &dyn RenderSurface,
    ) -> Option<RenderHandle> {
        if let Some(handle) = self.cached {
            if surface.is_attached(handle) {
                return Some(handle);
            }
            self.cached = None;
        }
        let handle = surface.locate(stream_id)?;
        self.cached = Some(handle);
        Some(handle)
    }
}
