// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicator facade.
//!
//! Ties together:
//! - Checkpoint negotiation via [`crate::cursor::CheckpointResolver`]
//! - Metadata merge via [`crate::batch::BatchApplier`]
//! - Body insertion and store shutdown via [`crate::store::DocumentStore`]
//!
//! # Sync Round
//!
//! ```text
//! resolve_cursor(source checkpoint) ──▶ cursor
//!        │
//!        ▼  (caller fetches a metadata batch from the source starting at cursor)
//! apply_meta_batch(records) ──▶ BatchOutcome { missing_leaves, .. }
//!        │
//!        ▼  (caller fetches the missing bodies from the source)
//! insert_bodies(bodies)
//!        │
//!        ▼
//! commit_checkpoint(source_id, last_key)
//! ```

mod types;

pub use types::ReplicatorState;

use crate::batch::{BatchApplier, BatchConfig, BatchOutcome};
use crate::config::ReplicationConfig;
use crate::cursor::CheckpointResolver;
use crate::error::{ReplicationError, Result};
use crate::meta::{CursorToken, DocumentBody, MetaDocument, SyncCheckpoint};
use crate::metrics;
use crate::resilience::{retry, RetryConfig};
use crate::sqlite_store::SqliteStore;
use crate::store::{DocumentStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock, RwLockReadGuard};
use tracing::{debug, info, instrument, warn};

/// How long shutdown waits for running operations before closing the store.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination-side replicator.
///
/// The store is passed in explicitly; the replicator never owns storage
/// beyond the `Arc` it is handed.
pub struct Replicator<S: DocumentStore = MemoryStore> {
    config: ReplicationConfig,

    store: Arc<S>,

    resolver: CheckpointResolver<S>,

    applier: BatchApplier<S>,

    retry: RetryConfig,

    /// State (broadcast to watchers)
    state_tx: watch::Sender<ReplicatorState>,
    state_rx: watch::Receiver<ReplicatorState>,

    /// Shutdown signal; batches stop dispatching once it reads `true`.
    shutdown_tx: watch::Sender<bool>,

    /// Held shared by every running operation; shutdown holds it exclusively
    /// until the store is closed.
    drain: RwLock<()>,
}

impl Replicator<MemoryStore> {
    /// Create a replicator over a fresh in-process store (tests, standalone).
    pub fn new(config: ReplicationConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }
}

impl Replicator<SqliteStore> {
    /// Create a replicator over the SQLite store described by `config.store`.
    pub async fn open(config: ReplicationConfig) -> Result<Self> {
        let store = SqliteStore::new(&config.store).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }
}

impl<S: DocumentStore> Replicator<S> {
    /// Create a replicator over an existing store.
    pub fn with_store(config: ReplicationConfig, store: Arc<S>) -> Self {
        let (state_tx, state_rx) = watch::channel(ReplicatorState::Ready);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let retry = config.retry.to_retry_config();
        let resolver = CheckpointResolver::new(
            Arc::clone(&store),
            retry.clone(),
            config.checkpoint.history_limit,
        );
        let applier = BatchApplier::new(
            Arc::clone(&store),
            BatchConfig {
                max_concurrent_documents: config.batch.max_concurrent_documents,
                retry: retry.clone(),
            },
        )
        .with_shutdown(shutdown_rx);

        info!(
            replica_id = %config.local_replica_id,
            max_concurrent_documents = config.batch.max_concurrent_documents,
            "Replicator created"
        );
        metrics::set_replicator_state("Ready");

        Self {
            config,
            store,
            resolver,
            applier,
            retry,
            state_tx,
            state_rx,
            shutdown_tx,
            drain: RwLock::new(()),
        }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the local replica ID.
    pub fn replica_id(&self) -> &str {
        &self.config.local_replica_id
    }

    /// Get current state.
    pub fn state(&self) -> ReplicatorState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ReplicatorState> {
        self.state_rx.clone()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state().accepts_work() {
            Ok(())
        } else {
            Err(ReplicationError::Shutdown)
        }
    }

    /// Register a running operation.
    ///
    /// The state is checked again once the guard is held: an operation that
    /// queued behind shutdown must not reach the closed store.
    async fn begin_operation(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.ensure_ready()?;
        let running = self.drain.read().await;
        self.ensure_ready()?;
        Ok(running)
    }

    /// Cursor the next transfer from `source` should start at.
    pub async fn resolve_cursor(&self, source: &SyncCheckpoint) -> Result<CursorToken> {
        let _running = self.begin_operation().await?;
        self.resolver.resolve_cursor(source).await
    }

    /// Merge one batch of incoming metadata records.
    ///
    /// Per-document failures are in the outcome; `Err` only means the
    /// replicator is no longer accepting work.
    pub async fn apply_meta_batch(&self, incoming: Vec<MetaDocument>) -> Result<BatchOutcome> {
        let _running = self.begin_operation().await?;
        Ok(self.applier.apply(incoming).await)
    }

    /// Insert revision bodies fetched from the source.
    ///
    /// An empty list is a no-op. Returns the number of bodies inserted.
    #[instrument(skip(self, bodies), fields(count = bodies.len()))]
    pub async fn insert_bodies(&self, bodies: Vec<DocumentBody>) -> Result<usize> {
        self.ensure_ready()?;

        if bodies.is_empty() {
            debug!("No bodies to insert");
            metrics::record_empty_batch("insert_bodies");
            return Ok(0);
        }

        let _running = self.begin_operation().await?;
        let count = bodies.len();
        retry("create_bodies", &self.retry, || async {
            self.store
                .create_bodies(bodies.clone())
                .await
                .map_err(ReplicationError::from)
        })
        .await?;

        metrics::record_bodies_inserted(count);
        debug!(count, "Bodies inserted");
        Ok(count)
    }

    /// Record that the transfer from `source_id` completed up to `last_key`.
    pub async fn commit_checkpoint(&self, source_id: &str, last_key: CursorToken) -> Result<SyncCheckpoint> {
        let _running = self.begin_operation().await?;
        self.resolver.commit(source_id, last_key).await
    }

    /// Shut down: stop dispatching documents, then close the store.
    ///
    /// Documents already in flight in a concurrently running batch finish;
    /// those not yet dispatched are reported as `Cancelled`.
    pub async fn shutdown(&self) {
        if !self.state().accepts_work() {
            debug!(state = %self.state(), "Shutdown already requested");
            return;
        }

        info!(replica_id = %self.config.local_replica_id, "Shutting down replicator");
        let _ = self.state_tx.send(ReplicatorState::ShuttingDown);
        metrics::set_replicator_state("ShuttingDown");

        let _ = self.shutdown_tx.send(true);

        let _drained = match tokio::time::timeout(DRAIN_TIMEOUT, self.drain.write()).await {
            Ok(guard) => {
                debug!("Running operations drained");
                Some(guard)
            }
            Err(_) => {
                warn!("Timed out waiting for running operations, closing store anyway");
                None
            }
        };

        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Failed to close store cleanly");
        }

        let _ = self.state_tx.send(ReplicatorState::Stopped);
        metrics::set_replicator_state("Stopped");
        info!("Replicator stopped");
    }
}
