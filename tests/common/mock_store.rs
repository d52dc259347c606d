//! Recording document store for integration and chaos tests.
//!
//! Wraps a [`MemoryStore`] and records every call, with knobs for
//! injecting per-document failures, transient unavailability and latency.

use doc_replicator::meta::{DocumentBody, MetaDocument, SyncCheckpoint};
use doc_replicator::store::{BoxFuture, DocumentStore, MemoryStore};
use doc_replicator::{LeafKey, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A store call as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum StoreCall {
    ReadCheckpoint(String),
    CreateCheckpoint(String),
    UpdateCheckpoint(String),
    ReadMeta(String),
    CreateMeta(String),
    UpdateMeta(String),
    CreateBodies(usize),
    LookupBodies(usize),
    Close,
}

/// Mock store that records calls and can inject failures.
#[allow(dead_code)]
pub struct MockStore {
    inner: MemoryStore,

    /// Every call in arrival order
    pub calls: RwLock<Vec<StoreCall>>,

    /// read_meta for these documents always fails with the given error
    doc_failures: RwLock<HashMap<String, StoreError>>,

    /// Remaining read_meta calls (any document) that fail as unavailable
    unavailable_remaining: AtomicUsize,

    /// Remaining create_bodies calls that fail as unavailable
    bodies_unavailable_remaining: AtomicUsize,

    /// Latency added to every read_meta
    read_delay: RwLock<Option<Duration>>,

    /// Concurrent read_meta calls right now, and the peak seen
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,

    pub closed: AtomicBool,
}

#[allow(dead_code)]
impl MockStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            calls: RwLock::new(Vec::new()),
            doc_failures: RwLock::new(HashMap::new()),
            unavailable_remaining: AtomicUsize::new(0),
            bodies_unavailable_remaining: AtomicUsize::new(0),
            read_delay: RwLock::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Underlying store, for seeding and assertions.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Make every read_meta of `doc_id` fail with `error`.
    pub async fn fail_doc(&self, doc_id: &str, error: StoreError) {
        self.doc_failures.write().await.insert(doc_id.to_string(), error);
    }

    /// Make the next `times` read_meta calls fail as unavailable.
    pub fn unavailable_times(&self, times: usize) {
        self.unavailable_remaining.store(times, Ordering::SeqCst);
    }

    /// Make the next `times` create_bodies calls fail as unavailable.
    pub fn bodies_unavailable_times(&self, times: usize) {
        self.bodies_unavailable_remaining.store(times, Ordering::SeqCst);
    }

    pub async fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.write().await = Some(delay);
    }

    pub async fn read_meta_count(&self, doc_id: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| matches!(c, StoreCall::ReadMeta(id) if id == doc_id))
            .count()
    }

    pub async fn write_count(&self) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| matches!(c, StoreCall::CreateMeta(_) | StoreCall::UpdateMeta(_)))
            .count()
    }

    async fn record(&self, call: StoreCall) {
        self.calls.write().await.push(call);
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MockStore {
    fn read_checkpoint(&self, source_id: &str) -> BoxFuture<'_, Option<SyncCheckpoint>> {
        let source_id = source_id.to_string();
        Box::pin(async move {
            self.record(StoreCall::ReadCheckpoint(source_id.clone())).await;
            self.inner.read_checkpoint(&source_id).await
        })
    }

    fn create_checkpoint(&self, checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(StoreCall::CreateCheckpoint(checkpoint.source_id.clone())).await;
            self.inner.create_checkpoint(checkpoint).await
        })
    }

    fn update_checkpoint(&self, checkpoint: SyncCheckpoint) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(StoreCall::UpdateCheckpoint(checkpoint.source_id.clone())).await;
            self.inner.update_checkpoint(checkpoint).await
        })
    }

    fn read_meta(&self, doc_id: &str) -> BoxFuture<'_, Option<MetaDocument>> {
        let doc_id = doc_id.to_string();
        Box::pin(async move {
            self.record(StoreCall::ReadMeta(doc_id.clone())).await;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = *self.read_delay.read().await;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let result = if let Some(err) = self.doc_failures.read().await.get(&doc_id).cloned() {
                Err(err)
            } else if Self::take_one(&self.unavailable_remaining) {
                Err(StoreError::Unavailable("injected".into()))
            } else {
                self.inner.read_meta(&doc_id).await
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn create_meta(&self, meta: MetaDocument) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(StoreCall::CreateMeta(meta.id.clone())).await;
            self.inner.create_meta(meta).await
        })
    }

    fn update_meta(&self, meta: MetaDocument) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(StoreCall::UpdateMeta(meta.id.clone())).await;
            self.inner.update_meta(meta).await
        })
    }

    fn create_bodies(&self, bodies: Vec<DocumentBody>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(StoreCall::CreateBodies(bodies.len())).await;
            if Self::take_one(&self.bodies_unavailable_remaining) {
                return Err(StoreError::Unavailable("injected".into()));
            }
            self.inner.create_bodies(bodies).await
        })
    }

    fn lookup_bodies(&self, keys: &[LeafKey]) -> BoxFuture<'_, Vec<LeafKey>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            self.record(StoreCall::LookupBodies(keys.len())).await;
            self.inner.lookup_bodies(&keys).await
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(StoreCall::Close).await;
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}
