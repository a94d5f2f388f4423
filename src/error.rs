//! Error types for the union view.

use crate::types::SourceId;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for union view operations.
#[derive(Debug, Error)]
pub enum UnionError {
    #[error("Source already registered: {0}")]
    DuplicateRegistration(SourceId),

    #[error("View already registered as source {existing}")]
    DuplicateView { existing: SourceId },

    #[error("Source not registered: {0}")]
    UnknownSource(SourceId),

    #[error("Source {source_id} failed to produce a buffer: {reason}")]
    SourcePull { source_id: SourceId, reason: String },

    #[error("Source {source_id} failed to release: {reason}")]
    SourceRelease { source_id: SourceId, reason: String },

    #[error("Unsupported for union mode: {operation}")]
    Unsupported { operation: &'static str },

    #[error("Union view already released")]
    Released,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for UnionError {
    fn from(e: serde_json::Error) -> Self {
        UnionError::Serialization(e.to_string())
    }
}

/// A recorded failure, shared between the source and every caller that asks for it.
pub type FailureCause = Arc<UnionError>;

/// Result type for union view operations.
pub type Result<T> = std::result::Result<T, UnionError>;
