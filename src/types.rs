//! Core types for the union view.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-assigned handle of a registered source.
///
/// Ids are unique per union view but need not be contiguous.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u32);

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of content carried by a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// No buffer follows.
    None,
    /// Ordinary data, gated by downstream credit.
    Data,
    /// In-band event, passes regardless of credit.
    Event,
}

impl DataType {
    pub fn is_data(self) -> bool {
        matches!(self, DataType::Data)
    }

    pub fn is_event(self) -> bool {
        matches!(self, DataType::Event)
    }
}

impl Default for DataType {
    fn default() -> Self {
        DataType::None
    }
}

/// A single buffer handed out by a source.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer {
    /// Opaque payload bytes.
    pub payload: Vec<u8>,

    /// What the payload holds.
    pub data_type: DataType,

    /// True if this buffer is a non-final fragment of a record split across
    /// several buffers. The fragments must be delivered back to back.
    pub partial_record: bool,
}

impl Buffer {
    /// A complete data buffer.
    pub fn data(payload: Vec<u8>) -> Self {
        Self {
            payload,
            data_type: DataType::Data,
            partial_record: false,
        }
    }

    /// A data buffer whose record continues in the next buffer.
    pub fn partial(payload: Vec<u8>) -> Self {
        Self {
            payload,
            data_type: DataType::Data,
            partial_record: true,
        }
    }

    /// An event buffer.
    pub fn event(payload: Vec<u8>) -> Self {
        Self {
            payload,
            data_type: DataType::Event,
            partial_record: false,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.payload.len())
            .field("data_type", &self.data_type)
            .field("partial_record", &self.partial_record)
            .finish()
    }
}

/// A buffer together with the producer's view of what follows it.
///
/// Sources return this from a pull, and the union view returns it to the
/// consumer with the fields recomputed against its own cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferAndBacklog {
    pub buffer: Buffer,

    /// Data buffers still queued behind this one.
    pub backlog: usize,

    /// Type of the next queued buffer, `DataType::None` if nothing is queued.
    pub next_data_type: DataType,

    /// Position of this buffer in the producer's output.
    pub sequence_number: u64,
}

impl BufferAndBacklog {
    pub fn new(
        buffer: Buffer,
        backlog: usize,
        next_data_type: DataType,
        sequence_number: u64,
    ) -> Self {
        Self {
            buffer,
            backlog,
            next_data_type,
            sequence_number,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.buffer.data_type
    }

    pub fn is_partial_record(&self) -> bool {
        self.buffer.partial_record
    }
}

/// Answer to a credit-aware availability query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWithBacklog {
    pub available: bool,
    pub backlog: usize,
}

impl AvailabilityWithBacklog {
    pub fn new(available: bool, backlog: usize) -> Self {
        Self { available, backlog }
    }

    pub fn unavailable() -> Self {
        Self::new(false, 0)
    }
}

/// Consumption capabilities a subpartition view may offer.
///
/// Callers that drive several kinds of view ask for a capability before
/// using it instead of relying on a failing call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// `peek_next_source_id`, `next_buffer`, `availability_and_backlog`.
    Pull,
    /// Sources report availability through `notify_available`.
    AvailabilityPush,
    /// Segment hints, buffer size changes and release are forwarded to sources.
    AdministrativeForward,
    /// Resuming consumption after backpressure.
    CreditResume,
    /// Priority events overtaking queued data.
    PriorityEvents,
    /// Acknowledging that all data was processed (tiered segments).
    TieredSegmentAck,
}

/// Point-in-time counters for monitoring.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionStats {
    /// Number of registered sources.
    pub sources: usize,
    /// Buffers currently cached.
    pub queued: usize,
    /// Cached buffers that are ordinary data.
    pub data_backlog: usize,
    /// Sequence number the next returned buffer will carry.
    pub next_sequence: u64,
    pub released: bool,
}
