//! # Document Replicator
//!
//! Conflict resolution and replication bookkeeping for a document-store
//! synchronizer. Given the destination's revision history of a document and an
//! incoming copy from a source replica, it:
//!
//! - merges the two revision trees into one,
//! - deterministically picks the winning revision when branches conflict,
//! - works out which revision bodies the destination still has to fetch,
//! - keeps a per-source checkpoint so bulk transfers resume instead of restarting.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                              Replicator                                │
//! │                                                                        │
//! │  ┌────────────────────┐     ┌─────────────────────────────────────┐    │
//! │  │ CheckpointResolver │     │ BatchApplier (JoinSet + Bulkhead)   │    │
//! │  │ resolve / commit   │     │  per document:                      │    │
//! │  └─────────┬──────────┘     │  merge_trees ─▶ select_winner       │    │
//! │            │                │        └──▶ find_missing_leaves     │    │
//! │            │                └──────────────────┬──────────────────┘    │
//! │            ▼                                   ▼                       │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ DocumentStore: checkpoints / metas / bodies                      │  │
//! │  │ (MemoryStore, SqliteStore, or your own)                          │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport to the source replica is the caller's job: this crate decides
//! *where* to resume and *what* is missing, never fetches anything itself.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use doc_replicator::{Replicator, ReplicationConfig};
//! use doc_replicator::meta::{MetaDocument, SyncCheckpoint};
//!
//! # async fn example(source: SyncCheckpoint, batch: Vec<MetaDocument>) -> doc_replicator::Result<()> {
//! let replicator = Replicator::open(ReplicationConfig::default()).await?;
//!
//! let cursor = replicator.resolve_cursor(&source).await?;
//! // ... fetch metadata from the source starting at `cursor` ...
//! let outcome = replicator.apply_meta_batch(batch).await?;
//! for key in outcome.missing_leaf_strings() {
//!     // ... fetch the body for `key` ...
//! #   let _ = key;
//! }
//!
//! replicator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod error;
pub mod leaf_diff;
pub mod meta;
pub mod metrics;
pub mod resilience;
pub mod rev_tree;
pub mod revision;
pub mod sqlite_store;
pub mod store;
pub mod winner;

// Re-exports for convenience
pub use batch::{ApplyAction, AppliedDocument, BatchApplier, BatchConfig, BatchOutcome, DocumentFailure};
pub use config::{BatchSettings, CheckpointConfig, ReplicationConfig, RetrySettings, StoreConfig};
pub use coordinator::{Replicator, ReplicatorState};
pub use cursor::CheckpointResolver;
pub use error::{ErrorKind, ReplicationError, Result, StoreError};
pub use leaf_diff::find_missing_leaves;
pub use meta::{CursorToken, DocumentBody, HistoryEntry, MetaDocument, SyncCheckpoint};
pub use rev_tree::{merge, merge_trees, NodeAttributes, RevisionNode};
pub use revision::{LeafKey, RevisionId};
pub use sqlite_store::SqliteStore;
pub use store::{DocumentStore, MemoryStore};
pub use winner::select_winner;
