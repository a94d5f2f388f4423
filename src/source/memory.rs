//! Queue-backed source.

use super::{SourceNotifier, SourceView};
use crate::error::{FailureCause, Result, UnionError};
use crate::types::{Buffer, BufferAndBacklog, DataType, SourceId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Buffer>,
    /// Data buffers in `queue`, events excluded.
    data_buffers: usize,
    next_sequence: u64,
    failure: Option<FailureCause>,
    /// Reason the next pull will fail with, if set.
    fail_next_pull: Option<String>,
    /// Reason release will fail with, if set.
    fail_release: Option<String>,
    buffer_size: Option<usize>,
    required_segments: Vec<(SourceId, u32)>,
}

impl QueueState {
    fn enqueue(&mut self, buffer: Buffer) {
        if buffer.data_type.is_data() {
            self.data_buffers += 1;
        }
        self.queue.push_back(buffer);
    }

    fn dequeue(&mut self) -> Option<Buffer> {
        let buffer = self.queue.pop_front()?;
        if buffer.data_type.is_data() {
            self.data_buffers -= 1;
        }
        Some(buffer)
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.data_buffers = 0;
    }
}

/// A source that serves buffers pushed into an in-memory queue.
///
/// Pushing into an empty queue fires the attached notifier, the way a
/// network-fed source reports its first buffer after running dry. Pull and
/// release failures can be injected.
pub struct InMemorySource {
    id: SourceId,
    state: Mutex<QueueState>,
    notifier: Mutex<Option<SourceNotifier>>,
    released: AtomicBool,
    release_calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            state: Mutex::new(QueueState::default()),
            notifier: Mutex::new(None),
            released: AtomicBool::new(false),
            release_calls: AtomicUsize::new(0),
        }
    }

    /// Create a source already holding `buffers`.
    pub fn with_buffers(id: SourceId, buffers: impl IntoIterator<Item = Buffer>) -> Self {
        let source = Self::new(id);
        {
            let mut state = source.state.lock();
            for buffer in buffers {
                state.enqueue(buffer);
            }
        }
        source
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Attach the notifier returned by registration.
    ///
    /// Fires it right away if buffers were queued before attaching.
    pub fn attach(&self, notifier: SourceNotifier) {
        let has_data = !self.state.lock().queue.is_empty();
        *self.notifier.lock() = Some(notifier.clone());
        if has_data {
            notifier.notify();
        }
    }

    /// Append a buffer. Dropped if the source was released.
    pub fn push(&self, buffer: Buffer) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }

        let was_empty = {
            let mut state = self.state.lock();
            let was_empty = state.queue.is_empty();
            state.enqueue(buffer);
            was_empty
        };

        if was_empty {
            self.fire();
        }
    }

    /// Append several buffers, notifying at most once.
    pub fn push_all(&self, buffers: impl IntoIterator<Item = Buffer>) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }

        let fire = {
            let mut state = self.state.lock();
            let was_empty = state.queue.is_empty();
            for buffer in buffers {
                state.enqueue(buffer);
            }
            was_empty && !state.queue.is_empty()
        };

        if fire {
            self.fire();
        }
    }

    /// Make the next pull fail with `reason`.
    pub fn fail_next_pull(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_pull = Some(reason.into());
    }

    /// Make release fail with `reason`.
    pub fn fail_release(&self, reason: impl Into<String>) {
        self.state.lock().fail_release = Some(reason.into());
    }

    /// Record a failure that happened outside of a pull.
    pub fn set_failure(&self, cause: UnionError) {
        self.state.lock().failure = Some(Arc::new(cause));
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// How many times `release` was invoked.
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Last buffer size forwarded to this source.
    pub fn buffer_size(&self) -> Option<usize> {
        self.state.lock().buffer_size
    }

    /// Segment requests forwarded to this source, oldest first.
    pub fn required_segments(&self) -> Vec<(SourceId, u32)> {
        self.state.lock().required_segments.clone()
    }

    fn fire(&self) {
        let notifier = self.notifier.lock().clone();
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }
}

impl SourceView for InMemorySource {
    fn try_next_buffer(&self) -> Result<Option<BufferAndBacklog>> {
        if self.released.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let mut state = self.state.lock();

        if let Some(reason) = state.fail_next_pull.take() {
            state.failure = Some(Arc::new(UnionError::SourcePull {
                source_id: self.id,
                reason: reason.clone(),
            }));
            return Err(UnionError::SourcePull {
                source_id: self.id,
                reason,
            });
        }

        let buffer = match state.dequeue() {
            Some(buffer) => buffer,
            None => return Ok(None),
        };

        let backlog = state.data_buffers;
        let next_data_type = state
            .queue
            .front()
            .map(|b| b.data_type)
            .unwrap_or(DataType::None);
        let sequence_number = state.next_sequence;
        state.next_sequence += 1;

        Ok(Some(BufferAndBacklog::new(
            buffer,
            backlog,
            next_data_type,
            sequence_number,
        )))
    }

    fn failure_cause(&self) -> Option<FailureCause> {
        self.state.lock().failure.clone()
    }

    fn release(&self) -> Result<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);

        let mut state = self.state.lock();
        state.clear();
        match state.fail_release.take() {
            Some(reason) => Err(UnionError::SourceRelease {
                source_id: self.id,
                reason,
            }),
            None => Ok(()),
        }
    }

    fn notify_required_segment(&self, source_id: SourceId, segment_id: u32) {
        self.state
            .lock()
            .required_segments
            .push((source_id, segment_id));
    }

    fn notify_new_buffer_size(&self, size: usize) {
        self.state.lock().buffer_size = Some(size);
    }
}
