// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replicator.
//!
//! Errors are categorized by their source (revision tree shape, document store,
//! configuration) and carry enough context to be reported per document in a
//! [`BatchOutcome`](crate::batch::BatchOutcome).
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Store(Unavailable)` | Yes | Store unreachable, pool exhausted, busy |
//! | `Store(Conflict)` | No | Concurrent write detected by the store; the batch applier re-merges |
//! | `Store(Backend)` | No | Store rejected the operation |
//! | `MalformedTree` | No | Revision tree violates shape assumptions |
//! | `InvalidRevision` | No | Revision id or leaf key failed to parse |
//! | `Serialization` | No | JSON encode/decode failed |
//! | `Config` | No | Configuration invalid |
//! | `Cancelled` | No | Batch was cancelled before the document ran |
//! | `Shutdown` | No | Replicator is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! CheckpointDivergence and empty batches are not errors: the first resolves to a
//! full resync from the epoch cursor, the second is a logged no-op.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for replicator operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Failures reported by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached. Retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store detected a concurrent write to the same record.
    #[error("concurrent write to '{id}'")]
    Conflict { id: String },

    /// The store rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors that can occur while replicating.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A revision node violates the single-root or shape assumptions.
    ///
    /// Fails only the document being processed.
    #[error("Malformed revision tree for '{doc_id}': {reason}")]
    MalformedTree { doc_id: String, reason: String },

    /// A revision id or composite leaf key could not be parsed.
    #[error("Invalid revision '{value}': {reason}")]
    InvalidRevision { value: String, reason: String },

    /// Document store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The batch was cancelled before this document was dispatched.
    #[error("Cancelled before dispatch")]
    Cancelled,

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a per-document failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedTree,
    StoreUnavailable,
    StoreConflict,
    Store,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedTree => write!(f, "malformed_tree"),
            Self::StoreUnavailable => write!(f, "store_unavailable"),
            Self::StoreConflict => write!(f, "store_conflict"),
            Self::Store => write!(f, "store"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl ReplicationError {
    /// Create a malformed-tree error for a document.
    pub fn malformed(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTree {
            doc_id: doc_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(StoreError::Unavailable(_)) => true,
            Self::Store(_) => false,
            Self::MalformedTree { .. } => false,
            Self::InvalidRevision { .. } => false,
            Self::Serialization(_) => false,
            Self::Config(_) => false,
            Self::Cancelled => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Classify the error for batch reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedTree { .. } | Self::InvalidRevision { .. } => ErrorKind::MalformedTree,
            Self::Store(StoreError::Unavailable(_)) => ErrorKind::StoreUnavailable,
            Self::Store(StoreError::Conflict { .. }) => ErrorKind::StoreConflict,
            Self::Store(StoreError::Backend(_)) | Self::Serialization(_) => ErrorKind::Store,
            Self::Cancelled | Self::Shutdown => ErrorKind::Cancelled,
            Self::Config(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
