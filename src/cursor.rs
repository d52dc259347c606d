// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint negotiation for resumable transfers.
//!
//! Before requesting a batch from a source replica, the caller asks where to
//! resume. The destination keeps one [`SyncCheckpoint`] per source, holding the
//! cursor tokens of previously completed transfers (most recent first).
//!
//! ## Resolution
//!
//! ```text
//! stored checkpoint?  ── no ──▶ create {history: []}        → EPOCH
//!       │ yes
//!       ▼
//! stored history empty? ── yes ──────────────────────────────▶ EPOCH
//!       │ no
//!       ▼
//! stored.latest == source.latest? ── yes ──▶ stored lastKey
//!       │ no  (diverged, or source has no history)
//!       ▼
//!     EPOCH  (full resync)
//! ```
//!
//! Divergence is not an error: the next transfer simply starts from the
//! beginning, and merge idempotence makes re-applying old revisions harmless.
//!
//! ## Commit
//!
//! After a batch is applied, [`CheckpointResolver::commit`] prepends the new
//! `lastKey` to the history and truncates it to the configured limit.

use crate::error::{ReplicationError, Result};
use crate::meta::{CursorToken, HistoryEntry, SyncCheckpoint};
use crate::resilience::{retry, RetryConfig};
use crate::store::DocumentStore;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Resolves and records transfer cursors against the checkpoint store.
pub struct CheckpointResolver<S: DocumentStore> {
    store: Arc<S>,
    retry: RetryConfig,
    history_limit: usize,
}

impl<S: DocumentStore> CheckpointResolver<S> {
    pub fn new(store: Arc<S>, retry: RetryConfig, history_limit: usize) -> Self {
        Self {
            store,
            retry,
            history_limit: history_limit.max(1),
        }
    }

    async fn read(&self, source_id: &str) -> Result<Option<SyncCheckpoint>> {
        retry("read_checkpoint", &self.retry, || async {
            self.store
                .read_checkpoint(source_id)
                .await
                .map_err(ReplicationError::from)
        })
        .await
    }

    /// Decide which cursor the next transfer from `source` should start at.
    ///
    /// `source` is the checkpoint record as published by the source replica.
    #[instrument(skip(self, source), fields(source_id = %source.source_id))]
    pub async fn resolve_cursor(&self, source: &SyncCheckpoint) -> Result<CursorToken> {
        let Some(stored) = self.read(&source.source_id).await? else {
            info!("No checkpoint for source, starting from epoch");
            let created = SyncCheckpoint::empty(source.source_id.clone());
            retry("create_checkpoint", &self.retry, || async {
                self.store
                    .create_checkpoint(created.clone())
                    .await
                    .map_err(ReplicationError::from)
            })
            .await?;
            crate::metrics::record_checkpoint_resolution(&source.source_id, "created");
            return Ok(CursorToken::EPOCH);
        };

        let Some(stored_latest) = stored.latest() else {
            debug!("Checkpoint has no history, starting from epoch");
            crate::metrics::record_checkpoint_resolution(&source.source_id, "empty_history");
            return Ok(CursorToken::EPOCH);
        };

        match source.latest() {
            Some(source_latest) if source_latest.last_key == stored_latest.last_key => {
                debug!(last_key = %stored_latest.last_key, "Resuming from checkpoint");
                crate::metrics::record_checkpoint_resolution(&source.source_id, "resumed");
                Ok(stored_latest.last_key.clone())
            }
            source_latest => {
                warn!(
                    stored = %stored_latest.last_key,
                    source = ?source_latest.map(|h| h.last_key.to_string()),
                    "Checkpoint diverged, resyncing from epoch"
                );
                crate::metrics::record_checkpoint_resolution(&source.source_id, "diverged");
                Ok(CursorToken::EPOCH)
            }
        }
    }

    /// Record a completed transfer from `source_id` ending at `last_key`.
    ///
    /// Creates the checkpoint if this is the first commit for the source.
    /// Returns the persisted record.
    #[instrument(skip(self, last_key), fields(last_key = %last_key))]
    pub async fn commit(&self, source_id: &str, last_key: CursorToken) -> Result<SyncCheckpoint> {
        let existing = self.read(source_id).await?;
        let is_new = existing.is_none();

        let mut checkpoint = existing.unwrap_or_else(|| SyncCheckpoint::empty(source_id));
        checkpoint.push_latest(HistoryEntry::new(last_key), self.history_limit);

        let result = retry("commit_checkpoint", &self.retry, || async {
            let write = if is_new {
                self.store.create_checkpoint(checkpoint.clone())
            } else {
                self.store.update_checkpoint(checkpoint.clone())
            };
            write.await.map_err(ReplicationError::from)
        })
        .await;

        crate::metrics::record_checkpoint_commit(source_id, result.is_ok());
        result?;

        debug!(history_len = checkpoint.history.len(), "Checkpoint committed");
        Ok(checkpoint)
    }
}
