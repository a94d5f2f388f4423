//! Round-robin source selection with split-record stickiness.
//!
//! Sources are visited in registration order, one buffer per visit. A source
//! that just yielded a partial record is selected again until it yields the
//! record's final buffer, so fragments are never interleaved with another
//! source's buffers.

use crate::types::SourceId;
use std::collections::{HashMap, HashSet};

/// Chooses which available source to drain next.
///
/// Every [`next_source_to_consume`](Self::next_source_to_consume) that returns
/// a source must be followed by exactly one
/// [`mark_last_consumption`](Self::mark_last_consumption).
#[derive(Debug)]
pub struct RoundRobinSelector {
    /// Registration order, the cycle that round robin walks.
    order: Vec<SourceId>,
    positions: HashMap<SourceId, usize>,
    /// Sources that reported data and have not run dry since.
    available: HashSet<SourceId>,
    /// Position of the source whose last record completed.
    cursor: Option<usize>,
    /// Source returned by the last selection, pending its consumption mark.
    last: Option<SourceId>,
    /// Source in the middle of a split record.
    sticky: Option<SourceId>,
    switchable: bool,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            positions: HashMap::new(),
            available: HashSet::new(),
            cursor: None,
            last: None,
            sticky: None,
            switchable: true,
        }
    }

    /// Add a source to the end of the cycle. Callers reject duplicate ids
    /// before reaching the selector.
    pub fn register(&mut self, id: SourceId) {
        debug_assert!(
            !self.positions.contains_key(&id),
            "source {} registered twice",
            id
        );
        self.positions.insert(id, self.order.len());
        self.order.push(id);
    }

    /// Record that `id` has data. Returns false if it was already recorded
    /// or is not registered.
    pub fn mark_available(&mut self, id: SourceId) -> bool {
        if !self.positions.contains_key(&id) {
            return false;
        }
        self.available.insert(id)
    }

    /// Pick the next source to pull from.
    ///
    /// A sticky source is returned unconditionally, even if it is not marked
    /// available. Otherwise the first available source after the cursor in
    /// registration order is returned.
    pub fn next_source_to_consume(&mut self) -> Option<SourceId> {
        if let Some(id) = self.sticky {
            self.last = Some(id);
            return Some(id);
        }

        if self.available.is_empty() || self.order.is_empty() {
            self.last = None;
            return None;
        }

        let len = self.order.len();
        let start = self.cursor.map(|c| c + 1).unwrap_or(0);
        let next = (0..len)
            .map(|offset| self.order[(start + offset) % len])
            .find(|id| self.available.contains(id));

        self.last = next;
        next
    }

    /// Report the outcome of pulling from the last selected source.
    pub fn mark_last_consumption(&mut self, success: bool, is_partial: bool) {
        let Some(id) = self.last.take() else {
            return;
        };

        if success {
            self.switchable = true;
            if is_partial {
                self.sticky = Some(id);
            } else {
                self.sticky = None;
                self.cursor = self.positions.get(&id).copied();
            }
        } else {
            // Ran dry until it reports availability again
            self.available.remove(&id);
            self.switchable = self.sticky.is_none();
        }
    }

    /// False when the sticky source just failed to yield, in which case no
    /// other source may be drained until it completes its record.
    pub fn is_more_switchable(&self) -> bool {
        self.switchable
    }

    pub fn is_available(&self, id: SourceId) -> bool {
        self.available.contains(&id)
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn sticky(&self) -> Option<SourceId> {
        self.sticky
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}
