//! The union view: merges several sources into one pull stream.

use crate::cache::BufferCache;
use crate::error::{FailureCause, Result, UnionError};
use crate::registry::{SourceRegistry, ViewKey};
use crate::selector::RoundRobinSelector;
use crate::source::{AvailabilityListener, SourceNotifier, SourceView};
use crate::types::{AvailabilityWithBacklog, BufferAndBacklog, Capability, SourceId, UnionStats};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// Default maximum number of buffers pulled ahead of the consumer.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// Capabilities provided in union mode.
const SUPPORTED_CAPABILITIES: &[Capability] = &[
    Capability::Pull,
    Capability::AvailabilityPush,
    Capability::AdministrativeForward,
];

/// Union view configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnionConfig {
    /// Maximum buffers cached ahead of the consumer, and the most work a
    /// single refill does.
    /// Default: 10
    pub cache_capacity: usize,
}

impl Default for UnionConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl UnionConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(UnionError::InvalidConfig(
                "cache_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// State guarded by the union view's lock.
struct Inner {
    registry: SourceRegistry,
    selector: RoundRobinSelector,
    cache: BufferCache,
    /// Pull errors seen by refill, latest per source.
    pull_failures: HashMap<SourceId, FailureCause>,
    sequence_number: u64,
    released: bool,
}

impl Inner {
    /// Pull from available sources until the cache is full, no source has
    /// data, or an open split record blocks switching to another source.
    fn refill(&mut self) {
        if self.released {
            return;
        }

        let mut failed = Vec::new();

        while !self.cache.is_full() {
            let Some(id) = self.selector.next_source_to_consume() else {
                break;
            };

            let view = self.registry.get(id);
            debug_assert!(view.is_some(), "selected source {} is not registered", id);
            let Some(view) = view else {
                break;
            };

            match view.try_next_buffer() {
                Ok(Some(buffer)) => {
                    let partial = buffer.is_partial_record();
                    self.cache.push(id, buffer);
                    self.selector.mark_last_consumption(true, partial);
                }
                Ok(None) => {
                    self.selector.mark_last_consumption(false, false);
                    if !self.selector.is_more_switchable() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(source = %id, error = %e, "Pull failed, skipping source for this refill");
                    self.pull_failures.insert(id, Arc::new(e));
                    self.selector.mark_last_consumption(false, false);
                    failed.push(id);
                    if !self.selector.is_more_switchable() {
                        break;
                    }
                }
            }
        }

        // Failed sources are retried on the next refill
        for id in failed {
            self.selector.mark_available(id);
        }
    }
}

/// Merges the buffers of several sources into a single ordered pull stream.
///
/// Guarantees on the output:
/// - Every buffer comes from exactly one registered source.
/// - Buffers of the same source keep their order.
/// - The fragments of a record split across buffers are returned back to
///   back, with no buffer from another source in between.
///
/// Sources report availability from their own threads through the
/// [`SourceNotifier`] returned by [`register`](Self::register). The
/// downstream listener is signalled once per empty to non-empty transition
/// of the cache, and never while the internal lock is held.
pub struct UnionView {
    inner: Mutex<Inner>,
    /// Cache length as of the last locked update.
    queued: AtomicUsize,
    listener: Box<dyn AvailabilityListener>,
    this: Weak<UnionView>,
}

impl UnionView {
    /// Create a union view with the default configuration.
    pub fn new<L>(listener: L) -> Arc<Self>
    where
        L: AvailabilityListener + 'static,
    {
        Self::build(UnionConfig::default(), Box::new(listener))
    }

    /// Create a union view with a custom configuration.
    pub fn with_config<L>(config: UnionConfig, listener: L) -> Result<Arc<Self>>
    where
        L: AvailabilityListener + 'static,
    {
        config.validate()?;
        Ok(Self::build(config, Box::new(listener)))
    }

    fn build(config: UnionConfig, listener: Box<dyn AvailabilityListener>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            inner: Mutex::new(Inner {
                registry: SourceRegistry::new(),
                selector: RoundRobinSelector::new(),
                cache: BufferCache::new(config.cache_capacity),
                pull_failures: HashMap::new(),
                sequence_number: 0,
                released: false,
            }),
            queued: AtomicUsize::new(0),
            listener,
            this: this.clone(),
        })
    }

    // --- Registration ---

    /// Register a source under `id`.
    ///
    /// The returned notifier is the source's way to report availability. It
    /// does not keep the union view alive.
    pub fn register(&self, id: SourceId, view: Arc<dyn SourceView>) -> Result<SourceNotifier> {
        let mut inner = self.inner.lock();
        if inner.released {
            return Err(UnionError::Released);
        }

        let key = inner.registry.insert(id, view)?;
        inner.selector.register(id);
        debug!(source = %id, sources = inner.registry.len(), "Registered source");

        Ok(SourceNotifier::new(self.this.clone(), key))
    }

    /// Registered ids in registration order.
    pub fn source_ids(&self) -> Vec<SourceId> {
        self.inner.lock().registry.ids().to_vec()
    }

    // --- Consumer pull surface ---

    /// Id of the source the next buffer comes from, if any is ready.
    pub fn peek_next_source_id(&self) -> Option<SourceId> {
        let mut inner = self.inner.lock();
        inner.refill();
        self.publish_queued(&inner);
        inner.cache.peek().map(|entry| entry.source)
    }

    /// Take the next buffer.
    ///
    /// The returned backlog counts data buffers still cached, the next data
    /// type is that of the new head, and the sequence number is this view's
    /// own counter, gapless from 0.
    ///
    /// The freed slot is refilled before the next data type is computed, so a
    /// source still holding data is never reported as `DataType::None`.
    pub fn next_buffer(&self) -> Option<BufferAndBacklog> {
        let mut inner = self.inner.lock();
        inner.refill();

        let Some(entry) = inner.cache.pop() else {
            self.publish_queued(&inner);
            return None;
        };
        // Sources still marked available only notify again after running dry
        inner.refill();
        self.publish_queued(&inner);

        let sequence_number = inner.sequence_number;
        inner.sequence_number += 1;

        Some(BufferAndBacklog::new(
            entry.buffer.buffer,
            inner.cache.data_backlog(),
            inner.cache.head_data_type(),
            sequence_number,
        ))
    }

    /// Whether a buffer may be sent given the consumer's credit, and how
    /// many data buffers are cached.
    ///
    /// Events at the head are available without credit.
    pub fn availability_and_backlog(&self, credit_available: bool) -> AvailabilityWithBacklog {
        let mut inner = self.inner.lock();
        inner.refill();
        self.publish_queued(&inner);

        if inner.cache.is_empty() {
            return AvailabilityWithBacklog::unavailable();
        }

        AvailabilityWithBacklog::new(
            credit_available || inner.cache.head_data_type().is_event(),
            inner.cache.data_backlog(),
        )
    }

    /// Number of cached buffers.
    pub fn queued_count(&self) -> usize {
        self.inner.lock().cache.len()
    }

    /// Number of cached buffers without taking the lock. May be stale.
    pub fn queued_count_unsynchronized(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    // --- Producer push surface ---

    /// Report that `view` has data available.
    ///
    /// Called by sources from their own threads. Notifications from views
    /// that are not registered are ignored.
    pub fn notify_available<V>(&self, view: &Arc<V>)
    where
        V: SourceView + ?Sized,
    {
        self.notify_available_by_key(ViewKey::of(view));
    }

    pub(crate) fn notify_available_by_key(&self, key: ViewKey) {
        let became_available = {
            let mut inner = self.inner.lock();
            if inner.released {
                debug!("Availability reported after release, ignoring");
                return;
            }

            let Some(id) = inner.registry.resolve(key) else {
                warn!("Availability reported by an unregistered view, ignoring");
                return;
            };

            inner.selector.mark_available(id);

            // The listener has already been signalled for the cached data
            if !inner.cache.is_empty() {
                return;
            }

            inner.refill();
            self.publish_queued(&inner);
            !inner.cache.is_empty()
        };

        if became_available {
            self.listener.notify_data_available();
        }
    }

    // --- Administrative surface ---

    /// Forward a segment hint to the source registered under `source_id`.
    pub fn notify_required_segment(&self, source_id: SourceId, segment_id: u32) -> Result<()> {
        let inner = self.inner.lock();
        let view = inner
            .registry
            .get(source_id)
            .ok_or(UnionError::UnknownSource(source_id))?;
        view.notify_required_segment(source_id, segment_id);
        Ok(())
    }

    /// Forward a new buffer size to every source.
    pub fn notify_new_buffer_size(&self, size: usize) {
        let inner = self.inner.lock();
        for (_, view) in inner.registry.iter() {
            view.notify_new_buffer_size(size);
        }
    }

    /// Release every source and stop producing buffers.
    ///
    /// Idempotent: only the first call forwards to the sources. Every source
    /// is released even if some fail; the first failure is returned.
    pub fn release_all_resources(&self) -> Result<()> {
        let views = {
            let mut inner = self.inner.lock();
            if inner.released {
                return Ok(());
            }

            inner.released = true;
            let dropped = inner.cache.clear();
            self.publish_queued(&inner);
            debug!(
                sources = inner.registry.len(),
                dropped_buffers = dropped,
                "Releasing union view"
            );
            inner.registry.snapshot()
        };

        let mut first_error = None;
        for (id, view) in views {
            if let Err(e) = view.release() {
                warn!(source = %id, error = %e, "Failed to release source");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().released
    }

    /// Failure of any registered source.
    ///
    /// Every failing source is logged; when several have failed the last one
    /// in registration order is returned. Released sources still count.
    pub fn failure_cause(&self) -> Option<FailureCause> {
        let (views, recorded) = {
            let inner = self.inner.lock();
            (inner.registry.snapshot(), inner.pull_failures.clone())
        };

        let mut cause = None;
        for (id, view) in views {
            let found = view
                .failure_cause()
                .or_else(|| recorded.get(&id).cloned());
            if let Some(found) = found {
                error!(source = %id, cause = %found, "Source failed");
                cause = Some(found);
            }
        }
        cause
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> UnionStats {
        let inner = self.inner.lock();
        UnionStats {
            sources: inner.registry.len(),
            queued: inner.cache.len(),
            data_backlog: inner.cache.data_backlog(),
            next_sequence: inner.sequence_number,
            released: inner.released,
        }
    }

    pub fn cache_capacity(&self) -> usize {
        self.inner.lock().cache.capacity()
    }

    // --- Capabilities ---

    /// Capabilities this view provides.
    pub fn capabilities(&self) -> &'static [Capability] {
        SUPPORTED_CAPABILITIES
    }

    pub fn supports(&self, capability: Capability) -> bool {
        SUPPORTED_CAPABILITIES.contains(&capability)
    }

    /// Availability without naming a source. Sources must report through
    /// [`notify_available`](Self::notify_available) instead.
    pub fn notify_data_available(&self) -> Result<()> {
        Err(UnionError::Unsupported {
            operation: "notify_data_available",
        })
    }

    pub fn notify_priority_event(&self, _priority_buffer_number: usize) -> Result<()> {
        Err(UnionError::Unsupported {
            operation: "notify_priority_event",
        })
    }

    pub fn resume_consumption(&self) -> Result<()> {
        Err(UnionError::Unsupported {
            operation: "resume_consumption",
        })
    }

    pub fn acknowledge_all_data_processed(&self) -> Result<()> {
        Err(UnionError::Unsupported {
            operation: "acknowledge_all_data_processed",
        })
    }

    fn publish_queued(&self, inner: &Inner) {
        self.queued.store(inner.cache.len(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for UnionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionView")
            .field("queued", &self.queued_count_unsynchronized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use crate::types::{Buffer, DataType};
    use std::sync::atomic::AtomicUsize;

    fn counting_view(config: UnionConfig) -> (Arc<UnionView>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let view = UnionView::with_config(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (view, count)
    }

    fn add_source(view: &Arc<UnionView>, id: u32) -> Arc<InMemorySource> {
        let source = Arc::new(InMemorySource::new(SourceId(id)));
        let notifier = view.register(SourceId(id), source.clone()).unwrap();
        source.attach(notifier);
        source
    }

    fn drain(view: &UnionView) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| view.next_buffer())
            .map(|b| b.buffer.payload)
            .collect()
    }

    #[test]
    fn test_empty_view() {
        let (view, notified) = counting_view(UnionConfig::default());
        add_source(&view, 0);

        assert_eq!(view.peek_next_source_id(), None);
        assert!(view.next_buffer().is_none());
        assert_eq!(view.availability_and_backlog(true), AvailabilityWithBacklog::unavailable());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_split_record_not_interleaved() {
        let (view, _) = counting_view(UnionConfig::default());
        let a = add_source(&view, 0);
        let b = add_source(&view, 1);

        // a1 is cached and pins source A; a2 has not arrived yet
        a.push(Buffer::partial(b"a1".to_vec()));
        // B becomes available while A's record is still open
        b.push(Buffer::data(b"b1".to_vec()));
        a.push(Buffer::data(b"a2".to_vec()));

        assert_eq!(drain(&view), vec![b"a1".to_vec(), b"a2".to_vec(), b"b1".to_vec()]);
    }

    #[test]
    fn test_refill_stops_at_capacity() {
        let (view, _) = counting_view(UnionConfig::default());
        let source = add_source(&view, 0);
        source.push_all((0..15u8).map(|i| Buffer::data(vec![i])));

        assert_eq!(view.queued_count(), 10);
        assert_eq!(source.len(), 5);

        for _ in 0..5 {
            view.next_buffer().unwrap();
        }
        source.push_all((15..20u8).map(|i| Buffer::data(vec![i])));
        assert_eq!(view.peek_next_source_id(), Some(SourceId(0)));
        assert_eq!(view.queued_count(), 10);
        assert_eq!(view.queued_count_unsynchronized(), 10);
    }

    #[test]
    fn test_sequence_numbers_and_backlog() {
        let (view, _) = counting_view(UnionConfig::default());
        let source = add_source(&view, 0);
        source.push_all(vec![
            Buffer::data(b"d1".to_vec()),
            Buffer::event(b"e1".to_vec()),
            Buffer::data(b"d2".to_vec()),
        ]);

        let first = view.next_buffer().unwrap();
        assert_eq!(first.sequence_number, 0);
        assert_eq!(first.backlog, 1);
        assert_eq!(first.next_data_type, DataType::Event);

        let second = view.next_buffer().unwrap();
        assert_eq!(second.sequence_number, 1);
        assert_eq!(second.backlog, 1);
        assert_eq!(second.next_data_type, DataType::Data);

        let third = view.next_buffer().unwrap();
        assert_eq!(third.sequence_number, 2);
        assert_eq!(third.backlog, 0);
        assert_eq!(third.next_data_type, DataType::None);
    }

    #[test]
    fn test_single_slot_cache_reports_pending_data() {
        let (view, notified) = counting_view(UnionConfig { cache_capacity: 1 });
        let source = add_source(&view, 0);
        source.push_all(vec![Buffer::data(vec![1]), Buffer::data(vec![2])]);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(source.len(), 1);

        let first = view.next_buffer().unwrap();
        assert_eq!(first.buffer.payload, vec![1]);
        assert_eq!(first.next_data_type, DataType::Data);
        assert_eq!(first.backlog, 1);
        assert_eq!(source.len(), 0);
        assert_eq!(view.queued_count_unsynchronized(), 1);

        let second = view.next_buffer().unwrap();
        assert_eq!(second.buffer.payload, vec![2]);
        assert_eq!(second.next_data_type, DataType::None);
        assert_eq!(second.backlog, 0);

        // The consumer never needed another signal to find the second buffer
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notification_once_per_transition() {
        let (view, notified) = counting_view(UnionConfig::default());
        let a = add_source(&view, 0);
        let b = add_source(&view, 1);

        a.push(Buffer::data(b"a1".to_vec()));
        b.push(Buffer::data(b"b1".to_vec()));
        a.push(Buffer::data(b"a2".to_vec()));
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        assert_eq!(drain(&view).len(), 3);

        a.push(Buffer::data(b"a3".to_vec()));
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_credit_gating() {
        let (view, _) = counting_view(UnionConfig::default());
        let source = add_source(&view, 0);
        source.push_all(vec![Buffer::event(b"e".to_vec()), Buffer::data(b"d".to_vec())]);

        assert_eq!(view.availability_and_backlog(false), AvailabilityWithBacklog::new(true, 1));
        view.next_buffer().unwrap();
        assert_eq!(view.availability_and_backlog(false), AvailabilityWithBacklog::new(false, 1));
        assert_eq!(view.availability_and_backlog(true), AvailabilityWithBacklog::new(true, 1));
    }

    #[test]
    fn test_failing_source_does_not_block_others() {
        let (view, _) = counting_view(UnionConfig::default());
        let a = add_source(&view, 0);
        let b = add_source(&view, 1);

        b.push(Buffer::data(b"b1".to_vec()));
        a.fail_next_pull("connection reset");
        a.push(Buffer::data(b"a1".to_vec()));

        // A fails during the consumer's refill; B still flows
        assert_eq!(view.next_buffer().unwrap().buffer.payload, b"b1".to_vec());
        assert!(view.failure_cause().is_some());

        // A is retried on a later refill
        assert_eq!(view.next_buffer().unwrap().buffer.payload, b"a1".to_vec());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (view, _) = counting_view(UnionConfig::default());
        let a = add_source(&view, 0);
        a.push(Buffer::data(vec![1]));
        assert_eq!(view.queued_count(), 1);

        view.release_all_resources().unwrap();
        view.release_all_resources().unwrap();

        assert!(view.is_released());
        assert_eq!(a.release_calls(), 1);
        assert_eq!(view.queued_count(), 0);
        assert!(view.next_buffer().is_none());
        assert!(matches!(
            view.register(SourceId(5), Arc::new(InMemorySource::new(SourceId(5)))),
            Err(UnionError::Released)
        ));
    }

    #[test]
    fn test_release_continues_past_failing_source() {
        let (view, _) = counting_view(UnionConfig::default());
        let a = add_source(&view, 0);
        let b = add_source(&view, 1);
        a.fail_release("still flushing");

        let result = view.release_all_resources();
        assert!(matches!(result, Err(UnionError::SourceRelease { source_id: SourceId(0), .. })));
        assert!(b.is_released());
        assert!(view.is_released());
    }

    #[test]
    fn test_administrative_forwards() {
        let (view, _) = counting_view(UnionConfig::default());
        let a = add_source(&view, 3);
        let b = add_source(&view, 8);

        view.notify_new_buffer_size(4096);
        assert_eq!(a.buffer_size(), Some(4096));
        assert_eq!(b.buffer_size(), Some(4096));

        view.notify_required_segment(SourceId(8), 12).unwrap();
        assert_eq!(b.required_segments(), vec![(SourceId(8), 12)]);
        assert!(a.required_segments().is_empty());

        assert!(matches!(
            view.notify_required_segment(SourceId(99), 1),
            Err(UnionError::UnknownSource(SourceId(99)))
        ));
    }

    #[test]
    fn test_unsupported_operations() {
        let (view, _) = counting_view(UnionConfig::default());
        let source = add_source(&view, 0);
        source.push(Buffer::data(vec![1]));

        assert!(matches!(view.notify_data_available(), Err(UnionError::Unsupported { .. })));
        assert!(matches!(view.notify_priority_event(1), Err(UnionError::Unsupported { .. })));
        assert!(matches!(view.resume_consumption(), Err(UnionError::Unsupported { .. })));
        assert!(matches!(
            view.acknowledge_all_data_processed(),
            Err(UnionError::Unsupported { .. })
        ));

        assert!(view.supports(Capability::Pull));
        assert!(!view.supports(Capability::PriorityEvents));
        assert_eq!(view.queued_count(), 1);
    }

    #[test]
    fn test_config() {
        let config = UnionConfig::from_json(r#"{"cache_capacity": 4}"#).unwrap();
        assert_eq!(config.cache_capacity, 4);

        let defaulted = UnionConfig::from_json("{}").unwrap();
        assert_eq!(defaulted, UnionConfig::default());

        assert!(matches!(
            UnionConfig::from_json(r#"{"cache_capacity": 0}"#),
            Err(UnionError::InvalidConfig(_))
        ));
        assert!(matches!(
            UnionConfig::from_json("not json"),
            Err(UnionError::Serialization(_))
        ));
        assert!(matches!(
            UnionView::with_config(UnionConfig { cache_capacity: 0 }, || {}),
            Err(UnionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stats() {
        let (view, _) = counting_view(UnionConfig { cache_capacity: 3 });
        let source = add_source(&view, 0);
        source.push_all(vec![
            Buffer::data(vec![1]),
            Buffer::event(vec![2]),
            Buffer::data(vec![3]),
            Buffer::data(vec![4]),
        ]);
        view.next_buffer().unwrap();

        // The freed slot took the fourth buffer
        let stats = view.stats();
        assert_eq!(stats.sources, 1);
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.data_backlog, 2);
        assert_eq!(stats.next_sequence, 1);
        assert!(!stats.released);
        assert_eq!(view.cache_capacity(), 3);
    }
}
