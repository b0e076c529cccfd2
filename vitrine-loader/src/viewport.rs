//! Visibility signal adapter.

use std::collections::HashSet;

use vitrine_core::constants::DEFAULT_VISIBILITY_THRESHOLD;

use crate::request::RequestId;
use crate::scheduler::FastLoader;

/// Turns intersection ratios into viewport marks on a loader.
///
/// The loader is only told when an id crosses the threshold in either
/// direction.
#[derive(Debug)]
pub struct VisibilityTracker {
    loader: FastLoader,
    threshold: f64,
    visible: HashSet<RequestId>,
}

impl VisibilityTracker {
    pub fn new(loader: FastLoader) -> Self {
        Self::with_threshold(loader, DEFAULT_VISIBILITY_THRESHOLD)
    }

    /// `threshold` is the visible fraction (0.0 to 1.0) at which an element
    /// counts as in the viewport.
    pub fn with_threshold(loader: FastLoader, threshold: f64) -> Self {
        Self {
            loader,
            threshold: threshold.clamp(0.0, 1.0),
            visible: HashSet::new(),
        }
    }

    /// Feed one intersection reading for `id`. Returns whether it is visible.
    pub fn observe(&mut self, id: &RequestId, intersection_ratio: f64) -> bool {
        let now_visible = intersection_ratio > 0.0 && intersection_ratio >= self.threshold;
        let was_visible = self.visible.contains(id);
        if now_visible && !was_visible {
            self.visible.insert(id.clone());
            self.loader.mark_in_viewport(id, true);
        } else if !now_visible && was_visible {
            self.visible.remove(id);
            self.loader.mark_in_viewport(id, false);
        }
        now_visible
    }

    /// Stop tracking `id`, e.g. when its element is unmounted.
    pub fn forget(&mut self, id: &RequestId) {
        if self.visible.remove(id) {
            self.loader.mark_in_viewport(id, false);
        }
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }
}
