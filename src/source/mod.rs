//! Contracts between the union view and the producers it merges.
//!
//! A source is an independent, internally ordered producer of buffers. It is
//! pulled without blocking and reports availability asynchronously, from its
//! own thread, through the [`SourceNotifier`] it receives at registration.
//!
//! The union view in turn signals a single downstream
//! [`AvailabilityListener`] when its cache goes from empty to non-empty.

mod memory;

pub use memory::InMemorySource;

use crate::error::{FailureCause, Result};
use crate::registry::ViewKey;
use crate::types::{BufferAndBacklog, SourceId};
use crate::view::UnionView;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::Weak;

/// An ordered buffer producer merged by the union view.
pub trait SourceView: Send + Sync {
    /// Pull the next buffer without blocking.
    ///
    /// `Ok(None)` means nothing is ready right now. An error is recorded
    /// against this source and surfaced through `failure_cause`.
    fn try_next_buffer(&self) -> Result<Option<BufferAndBacklog>>;

    /// Why this source failed, if it has.
    fn failure_cause(&self) -> Option<FailureCause>;

    /// Release all resources held by this source.
    fn release(&self) -> Result<()>;

    /// Hint that the consumer needs `segment_id` next.
    fn notify_required_segment(&self, _source_id: SourceId, _segment_id: u32) {}

    /// The downstream buffer size changed.
    fn notify_new_buffer_size(&self, _size: usize) {}
}

/// Receives a signal when the union view has data to pull.
pub trait AvailabilityListener: Send + Sync {
    fn notify_data_available(&self);
}

impl<F> AvailabilityListener for F
where
    F: Fn() + Send + Sync,
{
    fn notify_data_available(&self) {
        self()
    }
}

/// Listener that forwards each signal into a bounded channel.
///
/// A full channel already holds a pending signal, and a disconnected one has
/// no consumer left, so both are treated as delivered.
pub struct ChannelListener {
    sender: Sender<()>,
}

impl ChannelListener {
    pub fn new(sender: Sender<()>) -> Self {
        Self { sender }
    }
}

impl AvailabilityListener for ChannelListener {
    fn notify_data_available(&self) {
        match self.sender.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Non-owning back-reference from a source to the union view it feeds.
///
/// Handed out by [`UnionView::register`]. Holding a notifier does not keep
/// the union view alive.
#[derive(Clone)]
pub struct SourceNotifier {
    view: Weak<UnionView>,
    key: ViewKey,
}

impl SourceNotifier {
    pub(crate) fn new(view: Weak<UnionView>, key: ViewKey) -> Self {
        Self { view, key }
    }

    /// Report that the source has data available.
    ///
    /// Returns false if the union view no longer exists.
    pub fn notify(&self) -> bool {
        match self.view.upgrade() {
            Some(view) => {
                view.notify_available_by_key(self.key);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SourceNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceNotifier")
            .field("key", &self.key)
            .field("alive", &(self.view.strong_count() > 0))
            .finish()
    }
}
