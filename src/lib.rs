//! # Union View
//!
//! Merges the buffered output of several independent, ordered sources into
//! a single pull stream for one consumer.
//!
//! ## Core Concepts
//!
//! - **Sources**: Ordered buffer producers, pulled without blocking
//! - **Selector**: Round robin across sources that reported data, sticking to
//!   a source while it is in the middle of a split record
//! - **Cache**: Bounded look-ahead giving the next buffer's type and backlog
//! - **Notification**: The downstream listener is signalled once per
//!   empty to non-empty transition, outside the lock
//!
//! ## Example
//!
//! ```ignore
//! use union_view::{Buffer, InMemorySource, SourceId, UnionView};
//! use std::sync::Arc;
//!
//! let view = UnionView::new(|| println!("data available"));
//!
//! let source = Arc::new(InMemorySource::new(SourceId(0)));
//! let notifier = view.register(SourceId(0), source.clone())?;
//! source.attach(notifier);
//!
//! source.push(Buffer::data(b"hello".to_vec()));
//! while let Some(next) = view.next_buffer() {
//!     println!("#{} backlog={}", next.sequence_number, next.backlog);
//! }
//!
//! view.release_all_resources()?;
//! ```

pub mod cache;
pub mod error;
mod registry;
pub mod selector;
pub mod source;
pub mod types;
pub mod view;

// Re-exports
pub use cache::{BufferCache, CacheEntry};
pub use error::{FailureCause, Result, UnionError};
pub use selector::RoundRobinSelector;
pub use source::{
    AvailabilityListener, ChannelListener, InMemorySource, SourceNotifier, SourceView,
};
pub use types::*;
pub use view::{UnionConfig, UnionView, DEFAULT_CACHE_CAPACITY};
