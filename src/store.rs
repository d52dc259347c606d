// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store integration trait.
//!
//! The replicator never owns storage. It is handed a [`DocumentStore`] and
//! drives three logical collections through it:
//!
//! | Collection | Records | Operations |
//! |------------|---------|------------|
//! | checkpoint store | [`SyncCheckpoint`] | read / create / update |
//! | meta store | [`MetaDocument`] | read / create / update |
//! | body store | [`DocumentBody`] | create many / lookup by composite key |
//!
//! # Concurrency Contract
//!
//! Documents in one batch are processed concurrently, but never two tasks for
//! the same document id. Two *batches* touching the same document at once are
//! reconciled optimistically, so implementations must:
//!
//! - fail `create_meta` with `StoreError::Conflict` when the id already exists
//! - store created records at version 1
//! - fail `update_meta` with `StoreError::Conflict` unless the stored version
//!   equals `meta.version`, and bump the stored version on success
//! - return the stored version from `read_meta`
//!
//! The batch applier re-reads and re-merges on `Conflict`, so no branch is lost.
//!
//! # Example
//!
//! ```rust,no_run
//! use doc_replicator::store::{BoxFuture, DocumentStore};
//! use doc_replicator::meta::{DocumentBody, MetaDocument, SyncCheckpoint};
//! use doc_replicator::revision::LeafKey;
//!
//! struct MyBackend { /* ... */ }
//!
//! impl DocumentStore for MyBackend {
//!     fn read_checkpoint(&self, _source_id: &str) -> BoxFuture<'_, Option<SyncCheckpoint>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!     fn create_checkpoint(&self, _checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn update_checkpoint(&self, _checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn read_meta(&self, _doc_id: &str) -> BoxFuture<'_, Option<MetaDocument>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!     fn create_meta(&self, _meta: MetaDocument) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn update_meta(&self, _meta: MetaDocument) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn create_bodies(&self, _bodies: Vec<DocumentBody>) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn lookup_bodies(&self, _keys: &[LeafKey]) -> BoxFuture<'_, Vec<LeafKey>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//! }
//! ```

use crate::error::StoreError;
use crate::meta::{DocumentBody, MetaDocument, SyncCheckpoint};
use crate::revision::LeafKey;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Trait defining what the replicator needs from the destination store.
///
/// Passed explicitly (as `Arc<S>`) so tests can substitute a fake.
pub trait DocumentStore: Send + Sync + 'static {
    /// Read the checkpoint kept for a source replica.
    fn read_checkpoint(&self, source_id: &str) -> BoxFuture<'_, Option<SyncCheckpoint>>;

    /// Create the checkpoint record for a source replica seen for the first time.
    fn create_checkpoint(&self, checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()>;

    /// Replace an existing checkpoint record.
    fn update_checkpoint(&self, checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()>;

    /// Read the revision metadata of one document.
    fn read_meta(&self, doc_id: &str) -> BoxFuture<'_, Option<MetaDocument>>;

    /// Create the metadata record of a document seen for the first time.
    fn create_meta(&self, meta: MetaDocument) -> BoxFuture<'_, ()>;

    /// Replace the metadata record of a known document if it is still at
    /// `meta.version`.
    fn update_meta(&self, meta: MetaDocument) -> BoxFuture<'_, ()>;

    /// Insert revision bodies.
    fn create_bodies(&self, bodies: Vec<DocumentBody>) -> BoxFuture<'_, ()>;

    /// Return the subset of `keys` whose bodies already exist.
    fn lookup_bodies(&self, keys: &[LeafKey]) -> BoxFuture<'_, Vec<LeafKey>>;

    /// Release resources on shutdown. Default: nothing to do.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// In-process store backed by concurrent maps.
///
/// Meta writes follow the versioned contract above; the map shard lock makes
/// each check-and-write atomic.
#[derive(Default)]
pub struct MemoryStore {
    checkpoints: DashMap<String, SyncCheckpoint>,
    metas: DashMap<String, MetaDocument>,
    bodies: DashMap<LeafKey, DocumentBody>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of metadata records.
    #[must_use]
    pub fn meta_count(&self) -> usize {
        self.metas.len()
    }

    /// Number of stored bodies.
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Snapshot of one metadata record.
    pub fn meta(&self, doc_id: &str) -> Option<MetaDocument> {
        self.metas.get(doc_id).map(|r| r.value().clone())
    }

    /// Snapshot of one checkpoint record.
    pub fn checkpoint(&self, source_id: &str) -> Option<SyncCheckpoint> {
        self.checkpoints.get(source_id).map(|r| r.value().clone())
    }
}

impl DocumentStore for MemoryStore {
    fn read_checkpoint(&self, source_id: &str) -> BoxFuture<'_, Option<SyncCheckpoint>> {
        let found = self.checkpoint(source_id);
        Box::pin(async move { Ok(found) })
    }

    fn create_checkpoint(&self, checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.checkpoints
                .insert(checkpoint.source_id.clone(), checkpoint);
            Ok(())
        })
    }

    fn update_checkpoint(&self, checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.checkpoints
                .insert(checkpoint.source_id.clone(), checkpoint);
            Ok(())
        })
    }

    fn read_meta(&self, doc_id: &str) -> BoxFuture<'_, Option<MetaDocument>> {
        let found = self.meta(doc_id);
        Box::pin(async move { Ok(found) })
    }

    fn create_meta(&self, meta: MetaDocument) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self.metas.entry(meta.id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    Err(StoreError::Conflict { id: meta.id })
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(MetaDocument { version: 1, ..meta });
                    Ok(())
                }
            }
        })
    }

    fn update_meta(&self, meta: MetaDocument) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self.metas.get_mut(&meta.id) {
                Some(mut existing) if existing.version == meta.version => {
                    let version = existing.version + 1;
                    *existing = MetaDocument { version, ..meta };
                    Ok(())
                }
                Some(_) => Err(StoreError::Conflict { id: meta.id }),
                None => Err(StoreError::Backend(format!("no meta document '{}'", meta.id))),
            }
        })
    }

    fn create_bodies(&self, bodies: Vec<DocumentBody>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for body in bodies {
                self.bodies.insert(body.key.clone(), body);
            }
            Ok(())
        })
    }

    fn lookup_bodies(&self, keys: &[LeafKey]) -> BoxFuture<'_, Vec<LeafKey>> {
        let found: Vec<LeafKey> = keys
            .iter()
            .filter(|key| self.bodies.contains_key(*key))
            .cloned()
            .collect();
        Box::pin(async move { Ok(found) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rev_tree::RevisionNode;
    use std::sync::Arc;

    fn meta(id: &str, rev: &str) -> MetaDocument {
        MetaDocument::from_tree(id, RevisionNode::leaf(rev.parse().unwrap()))
    }

    fn body(key: &str) -> DocumentBody {
        DocumentBody::new(key.parse().unwrap(), serde_json::Map::new())
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.meta_count(), 0);
        assert_eq!(store.body_count(), 0);
        assert!(store.read_meta("missing").await.unwrap().is_none());
        assert!(store.read_checkpoint("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_and_read_meta() {
        let store = MemoryStore::new();
        store.create_meta(meta("doc-1", "1-a")).await.unwrap();

        let read = store.read_meta("doc-1").await.unwrap().unwrap();
        assert_eq!(read.id, "doc-1");
        assert_eq!(read.winning_revision.unwrap().to_string(), "1-a");
    }

    #[tokio::test]
    async fn test_create_meta_twice_conflicts() {
        let store = MemoryStore::new();
        store.create_meta(meta("doc-1", "1-a")).await.unwrap();
        let err = store.create_meta(meta("doc-1", "1-a")).await.unwrap_err();
        assert_eq!(err, StoreError::Conflict { id: "doc-1".into() });
    }

    #[tokio::test]
    async fn test_update_missing_meta_fails() {
        let store = MemoryStore::new();
        assert!(store.update_meta(meta("ghost", "1-a")).await.is_err());
    }

    #[tokio::test]
    async fn test_update_meta_replaces() {
        let store = MemoryStore::new();
        store.create_meta(meta("doc-1", "1-a")).await.unwrap();
        let current = store.read_meta("doc-1").await.unwrap().unwrap();
        assert_eq!(current.version, 1);

        let next = MetaDocument { version: current.version, ..meta("doc-1", "1-b") };
        store.update_meta(next).await.unwrap();
        let read = store.meta("doc-1").unwrap();
        assert_eq!(read.revision_tree.rev.to_string(), "1-b");
        assert_eq!(read.version, 2);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        store.create_meta(meta("doc-1", "1-a")).await.unwrap();
        let first = store.read_meta("doc-1").await.unwrap().unwrap();
        let second = first.clone();

        store.update_meta(MetaDocument { version: first.version, ..meta("doc-1", "1-b") }).await.unwrap();
        let err = store
            .update_meta(MetaDocument { version: second.version, ..meta("doc-1", "1-c") })
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::Conflict { id: "doc-1".into() });
        assert_eq!(store.meta("doc-1").unwrap().revision_tree.rev.to_string(), "1-b");
    }

    #[tokio::test]
    async fn test_checkpoint_create_and_update() {
        let store = MemoryStore::new();
        store.create_checkpoint(SyncCheckpoint::empty("src")).await.unwrap();
        let mut cp = store.read_checkpoint("src").await.unwrap().unwrap();
        assert!(cp.history.is_empty());

        cp.push_latest(crate::meta::HistoryEntry::new(7u64), 5);
        store.update_checkpoint(cp.clone()).await.unwrap();
        assert_eq!(store.checkpoint("src"), Some(cp));
    }

    #[tokio::test]
    async fn test_lookup_bodies_returns_existing_subset() {
        let store = MemoryStore::new();
        store.create_bodies(vec![body("1::1-a")]).await.unwrap();

        let keys: Vec<LeafKey> = vec!["1::1-a".parse().unwrap(), "1::2-b".parse().unwrap()];
        let found = store.lookup_bodies(&keys).await.unwrap();
        assert_eq!(found, vec![keys[0].clone()]);
    }

    #[tokio::test]
    async fn test_concurrent_meta_creates() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store
                        .create_meta(meta(&format!("doc-{}-{}", batch, i), "1-a"))
                        .await
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.meta_count(), 100);
    }
}
