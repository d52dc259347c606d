//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Checkpoint resolution outcomes
//! - Per-document apply results
//! - Missing leaves handed back for fetching
//! - Store retries
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use doc_replicator::metrics;
//! use std::time::Duration;
//!
//! metrics::record_checkpoint_resolution("source-1", "resumed");
//! metrics::record_batch_applied(10, 2, 1, 7, Duration::from_millis(50));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the outcome of a checkpoint resolution.
///
/// Outcomes: `created`, `empty_history`, `resumed`, `diverged`.
pub fn record_checkpoint_resolution(source_id: &str, outcome: &'static str) {
    counter!(
        "replication_checkpoint_resolutions_total",
        "source_id" => source_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a committed checkpoint.
pub fn record_checkpoint_commit(source_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_checkpoint_commits_total", "source_id" => source_id.to_string(), "status" => status).increment(1);
}

/// Record a document whose metadata was created or merged.
pub fn record_document_applied(action: &'static str) {
    counter!("replication_documents_applied_total", "action" => action).increment(1);
}

/// Record a document skipped (deletion-only record for an unknown document).
pub fn record_document_skipped() {
    counter!("replication_documents_skipped_total").increment(1);
}

/// Record a document failure by error kind.
pub fn record_document_failed(kind: &str) {
    counter!("replication_documents_failed_total", "kind" => kind.to_string()).increment(1);
}

/// Record a whole batch.
pub fn record_batch_applied(
    applied: usize,
    skipped: usize,
    failed: usize,
    missing_leaves: usize,
    duration: Duration,
) {
    counter!("replication_batches_total").increment(1);
    counter!("replication_missing_leaves_total").increment(missing_leaves as u64);
    histogram!("replication_batch_size").record((applied + skipped + failed) as f64);
    histogram!("replication_batch_duration_seconds").record(duration.as_secs_f64());
    if failed > 0 {
        counter!("replication_batch_failures_total").increment(1);
    }
}

/// Record duplicate document ids folded within one batch.
pub fn record_batch_dedup(before_dedup: usize, after_dedup: usize) {
    let folded = before_dedup.saturating_sub(after_dedup);
    if folded > 0 {
        counter!("replication_batch_folded_total").increment(folded as u64);
    }
}

/// Record an empty batch (no-op).
pub fn record_empty_batch(operation: &'static str) {
    counter!("replication_empty_batches_total", "operation" => operation).increment(1);
}

/// Record revision bodies inserted.
pub fn record_bodies_inserted(count: usize) {
    counter!("replication_bodies_inserted_total").increment(count as u64);
}

/// Record a retried store operation.
pub fn record_store_retry(operation: &str) {
    counter!("replication_store_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_sqlite_retry(operation: &str) {
    counter!("replication_sqlite_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record a meta write lost to a concurrent writer and retried.
pub fn record_write_conflict() {
    counter!("replication_meta_write_conflicts_total").increment(1);
}

/// Record replicator lifecycle state.
pub fn set_replicator_state(state: &str) {
    gauge!("replication_replicator_state", "state" => state.to_string()).set(1.0);
}

/// Record in-flight document tasks.
pub fn set_documents_in_flight(count: usize) {
    gauge!("replication_documents_in_flight").set(count as f64);
}
