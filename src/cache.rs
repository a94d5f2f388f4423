//! Bounded look-ahead cache of pulled buffers.

use crate::types::{BufferAndBacklog, DataType, SourceId};
use std::collections::VecDeque;

/// A cached buffer and the source it was pulled from.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub buffer: BufferAndBacklog,
    pub source: SourceId,
}

/// FIFO of buffers pulled ahead of the consumer.
///
/// Insertion order is consumption order. The cache gives the type of the
/// next buffer and an exact backlog without touching the sources.
#[derive(Debug)]
pub struct BufferCache {
    entries: VecDeque<CacheEntry>,
    capacity: usize,
}

impl BufferCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn push(&mut self, source: SourceId, buffer: BufferAndBacklog) {
        self.entries.push_back(CacheEntry { buffer, source });
    }

    pub fn pop(&mut self) -> Option<CacheEntry> {
        self.entries.pop_front()
    }

    pub fn peek(&self) -> Option<&CacheEntry> {
        self.entries.front()
    }

    /// Type of the head buffer, `DataType::None` if empty.
    pub fn head_data_type(&self) -> DataType {
        self.entries
            .front()
            .map(|e| e.buffer.data_type())
            .unwrap_or(DataType::None)
    }

    /// Number of cached buffers holding ordinary data.
    pub fn data_backlog(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.buffer.data_type().is_data())
            .count()
    }

    /// Drop every cached buffer, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }
}
