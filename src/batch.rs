//! Batch applier for incoming revision metadata.
//!
//! Takes one batch of MetaDocument-shaped records from a source replica and
//! merges each into the destination's meta store, returning which revision
//! bodies the destination must fetch next.
//!
//! # Design
//!
//! ```text
//! incoming ──▶ fold duplicate ids ──▶ JoinSet (bounded by Bulkhead)
//!                                        │
//!                        per document:   ▼
//!                  read_meta ──┬── absent ──▶ normalize ──▶ no winner? skip
//!                              │                              │
//!                              │                              ▼
//!                              │                         create_meta
//!                              │
//!                              └── present ─▶ merge ──▶ normalize ──▶ update_meta
//!                                                                        │
//!                                            find_missing_leaves ◀───────┘
//!                                        │
//!                                        ▼
//!                   BatchOutcome (input order: applied / skipped / failed)
//! ```
//!
//! Failures stay at the document boundary: a malformed tree or a store error
//! for one document never discards the results of the others. Documents failing
//! with `StoreUnavailable` are retried with backoff before being reported.
//!
//! A meta write that loses to a concurrent writer (`StoreConflict`) is redone
//! from a fresh read, so branches arriving through overlapping batches all
//! survive.

use crate::error::{ErrorKind, ReplicationError, Result, StoreError};
use crate::leaf_diff::find_missing_leaves;
use crate::meta::MetaDocument;
use crate::resilience::{retry, Bulkhead, RetryConfig};
use crate::rev_tree::{merge_trees, RevisionNode};
use crate::revision::{LeafKey, RevisionId};
use crate::store::DocumentStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Re-read and re-merge attempts after losing a meta write to another writer.
const MAX_WRITE_CONFLICTS: usize = 32;

/// Configuration for batch application.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum documents merged concurrently.
    pub max_concurrent_documents: usize,
    /// Per-document retry on `StoreUnavailable`.
    pub retry: RetryConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 64,
            retry: RetryConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Small fan-out, fast retries.
    pub fn testing() -> Self {
        Self {
            max_concurrent_documents: 4,
            retry: RetryConfig::testing(),
        }
    }
}

/// How a document's metadata was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    /// First time the destination sees the document.
    Created,
    /// Merged into an existing record.
    Merged,
}

impl ApplyAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Merged => "merged",
        }
    }
}

/// A document whose metadata was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedDocument {
    pub doc_id: String,
    pub action: ApplyAction,
    /// Winner after the merge; `None` once every leaf is deleted.
    pub winning_revision: Option<RevisionId>,
}

/// A document that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub doc_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl DocumentFailure {
    pub fn new(doc_id: impl Into<String>, error: &ReplicationError) -> Self {
        Self {
            doc_id: doc_id.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result of applying a batch.
///
/// Each list keeps the order documents had in the batch.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchOutcome {
    pub applied: Vec<AppliedDocument>,
    /// Deletion-only records for documents the destination never had.
    pub skipped: Vec<String>,
    pub failed: Vec<DocumentFailure>,
    /// Bodies to fetch, from successfully applied documents only.
    pub missing_leaves: Vec<LeafKey>,
}

impl BatchOutcome {
    /// Check if every document was applied or skipped.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of distinct documents in the batch.
    pub fn total(&self) -> usize {
        self.applied.len() + self.skipped.len() + self.failed.len()
    }

    /// Missing leaves in wire form (`"<docId>::<revId>"`).
    pub fn missing_leaf_strings(&self) -> Vec<String> {
        self.missing_leaves.iter().map(ToString::to_string).collect()
    }

    /// Failure for a document, if it failed.
    pub fn failure(&self, doc_id: &str) -> Option<&DocumentFailure> {
        self.failed.iter().find(|f| f.doc_id == doc_id)
    }
}

/// Per-document result before aggregation.
enum DocumentReport {
    Applied(AppliedDocument, Vec<LeafKey>),
    Skipped(String),
    Failed(DocumentFailure),
}

/// Applies batches of incoming revision metadata to a [`DocumentStore`].
pub struct BatchApplier<S: DocumentStore> {
    store: Arc<S>,
    config: BatchConfig,
    bulkhead: Bulkhead,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<S: DocumentStore> BatchApplier<S> {
    pub fn new(store: Arc<S>, config: BatchConfig) -> Self {
        let bulkhead = Bulkhead::new(config.max_concurrent_documents);
        Self {
            store,
            config,
            bulkhead,
            shutdown: None,
        }
    }

    /// Stop dispatching documents once `shutdown` reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Apply one batch of incoming metadata records.
    ///
    /// Per-document failures are reported in the outcome, never returned as an
    /// error.
    #[instrument(skip(self, incoming), fields(batch_size = incoming.len()))]
    pub async fn apply(&self, incoming: Vec<MetaDocument>) -> BatchOutcome {
        if incoming.is_empty() {
            debug!("Empty batch, nothing to apply");
            crate::metrics::record_empty_batch("apply_meta_batch");
            return BatchOutcome::default();
        }

        let start = Instant::now();
        let received = incoming.len();
        let documents = fold_duplicates(incoming);
        crate::metrics::record_batch_dedup(received, documents.len());
        if documents.len() < received {
            debug!(received, distinct = documents.len(), "Folded duplicate document ids");
        }

        let mut reports: Vec<Option<DocumentReport>> = Vec::with_capacity(documents.len());
        reports.resize_with(documents.len(), || None);

        let mut join_set: JoinSet<Result<Option<AppliedWithLeaves>>> = JoinSet::new();
        let mut task_slots: HashMap<tokio::task::Id, (usize, String)> = HashMap::new();
        let mut cancelled = false;

        for (slot, (doc_id, tree)) in documents.into_iter().enumerate() {
            let tree = match tree {
                Ok(tree) => tree,
                Err(e) => {
                    reports[slot] = Some(DocumentReport::Failed(DocumentFailure::new(doc_id, &e)));
                    continue;
                }
            };

            if cancelled || self.is_cancelled() {
                cancelled = true;
                reports[slot] = Some(cancelled_report(doc_id));
                continue;
            }

            let permit = match self.bulkhead.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(error = %e, "Bulkhead closed, cancelling remaining documents");
                    cancelled = true;
                    reports[slot] = Some(cancelled_report(doc_id));
                    continue;
                }
            };

            // Shutdown may have arrived while waiting for a slot.
            if self.is_cancelled() {
                cancelled = true;
                reports[slot] = Some(cancelled_report(doc_id));
                continue;
            }

            let store = Arc::clone(&self.store);
            let retry_config = self.config.retry.clone();
            let task_doc_id = doc_id.clone();
            let handle = join_set.spawn(async move {
                let _permit = permit;
                retry("apply_document", &retry_config, || {
                    apply_document(store.as_ref(), &task_doc_id, tree.clone())
                })
                .await
            });
            task_slots.insert(handle.id(), (slot, doc_id));
            crate::metrics::set_documents_in_flight(join_set.len());
        }

        if cancelled {
            warn!("Batch cancelled, undispatched documents reported as cancelled");
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let (task_id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    let failure = ReplicationError::Internal(format!("document task failed: {}", e));
                    (e.id(), Err(failure))
                }
            };
            let Some((slot, doc_id)) = task_slots.remove(&task_id) else {
                warn!(task_id = %task_id, "Finished task with no document slot");
                continue;
            };

            reports[slot] = Some(match result {
                Ok(Some(applied)) => DocumentReport::Applied(
                    AppliedDocument {
                        doc_id,
                        action: applied.action,
                        winning_revision: applied.winning_revision,
                    },
                    applied.missing,
                ),
                Ok(None) => DocumentReport::Skipped(doc_id),
                Err(e) => {
                    warn!(doc_id = %doc_id, kind = %e.kind(), error = %e, "Document failed");
                    DocumentReport::Failed(DocumentFailure::new(doc_id, &e))
                }
            });
        }
        crate::metrics::set_documents_in_flight(0);

        let mut outcome = BatchOutcome::default();
        for report in reports.into_iter().flatten() {
            match report {
                DocumentReport::Applied(doc, missing) => {
                    crate::metrics::record_document_applied(doc.action.as_str());
                    outcome.applied.push(doc);
                    outcome.missing_leaves.extend(missing);
                }
                DocumentReport::Skipped(doc_id) => {
                    crate::metrics::record_document_skipped();
                    outcome.skipped.push(doc_id);
                }
                DocumentReport::Failed(failure) => {
                    crate::metrics::record_document_failed(&failure.kind.to_string());
                    outcome.failed.push(failure);
                }
            }
        }

        let elapsed = start.elapsed();
        crate::metrics::record_batch_applied(
            outcome.applied.len(),
            outcome.skipped.len(),
            outcome.failed.len(),
            outcome.missing_leaves.len(),
            elapsed,
        );

        info!(
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            missing_leaves = outcome.missing_leaves.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Batch applied"
        );

        outcome
    }
}

fn cancelled_report(doc_id: String) -> DocumentReport {
    DocumentReport::Failed(DocumentFailure::new(doc_id, &ReplicationError::Cancelled))
}

/// Group records by document id (first-seen order) and merge each group's
/// trees in arrival order.
fn fold_duplicates(incoming: Vec<MetaDocument>) -> Vec<(String, Result<RevisionNode>)> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(incoming.len());
    let mut groups: Vec<(String, Vec<RevisionNode>)> = Vec::with_capacity(incoming.len());

    for meta in incoming {
        match index.get(&meta.id) {
            Some(&i) => groups[i].1.push(meta.revision_tree),
            None => {
                index.insert(meta.id.clone(), groups.len());
                groups.push((meta.id, vec![meta.revision_tree]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(doc_id, trees)| {
            let mut trees = trees.into_iter();
            let folded = match trees.next() {
                Some(first) => trees.try_fold(first, |acc, next| merge_trees(&doc_id, acc, next)),
                None => Err(ReplicationError::Internal(format!("empty group for '{}'", doc_id))),
            };
            (doc_id, folded)
        })
        .collect()
}

struct AppliedWithLeaves {
    action: ApplyAction,
    winning_revision: Option<RevisionId>,
    missing: Vec<LeafKey>,
}

/// Merge one incoming tree into the store.
///
/// Returns `None` when the document is unknown and the incoming tree has no
/// active leaf (nothing to record).
async fn apply_document<S>(
    store: &S,
    doc_id: &str,
    incoming: RevisionNode,
) -> Result<Option<AppliedWithLeaves>>
where
    S: DocumentStore + ?Sized,
{
    incoming.validate(doc_id)?;

    let mut conflicts = 0;
    let written = loop {
        match write_meta(store, doc_id, incoming.clone()).await {
            Err(ReplicationError::Store(StoreError::Conflict { .. })) if conflicts < MAX_WRITE_CONFLICTS => {
                conflicts += 1;
                debug!(doc_id, conflicts, "Meta changed underneath, merging again");
                crate::metrics::record_write_conflict();
                tokio::task::yield_now().await;
            }
            other => break other?,
        }
    };
    let Some((meta, action)) = written else {
        return Ok(None);
    };

    let missing = find_missing_leaves(store, &meta).await?;
    debug!(
        doc_id,
        action = action.as_str(),
        winner = ?meta.winning_revision.as_ref().map(ToString::to_string),
        missing = missing.len(),
        "Document applied"
    );

    Ok(Some(AppliedWithLeaves {
        action,
        winning_revision: meta.winning_revision,
        missing,
    }))
}

/// One read-merge-write round against the meta store.
async fn write_meta<S>(
    store: &S,
    doc_id: &str,
    incoming: RevisionNode,
) -> Result<Option<(MetaDocument, ApplyAction)>>
where
    S: DocumentStore + ?Sized,
{
    match store.read_meta(doc_id).await? {
        None => {
            let meta = MetaDocument::from_tree(doc_id, incoming);
            if meta.winning_revision.is_none() {
                debug!(doc_id, "Unknown document with only deleted leaves, skipping");
                return Ok(None);
            }
            store.create_meta(meta.clone()).await?;
            Ok(Some((meta, ApplyAction::Created)))
        }
        Some(existing) => {
            let version = existing.version;
            let merged = merge_trees(doc_id, existing.revision_tree, incoming)?;
            let meta = MetaDocument {
                version,
                ..MetaDocument::from_tree(doc_id, merged)
            };
            store.update_meta(meta.clone()).await?;
            Ok(Some((meta, ApplyAction::Merged)))
        }
    }
}
