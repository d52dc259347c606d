//! Which revision bodies does the destination still need?
//!
//! Every leaf of a merged tree needs a body on the destination, tombstones
//! included (a deletion is itself a revision with a body). The finder forms the
//! composite [`LeafKey`] of each leaf, asks the body store which already exist,
//! and returns the rest in traversal order.

use crate::error::{ReplicationError, Result};
use crate::meta::MetaDocument;
use crate::revision::LeafKey;
use crate::store::DocumentStore;
use std::collections::HashSet;
use tracing::debug;

/// Leaf keys of `meta` whose bodies are absent from `store`.
pub async fn find_missing_leaves<S>(store: &S, meta: &MetaDocument) -> Result<Vec<LeafKey>>
where
    S: DocumentStore + ?Sized,
{
    let wanted = meta.all_leaf_keys();
    if wanted.is_empty() {
        return Ok(Vec::new());
    }

    let existing: HashSet<LeafKey> = store
        .lookup_bodies(&wanted)
        .await
        .map_err(ReplicationError::from)?
        .into_iter()
        .collect();

    let missing: Vec<LeafKey> = wanted
        .into_iter()
        .filter(|key| !existing.contains(key))
        .collect();

    debug!(
        doc_id = %meta.id,
        leaves = existing.len() + missing.len(),
        missing = missing.len(),
        "Leaf diff computed"
    );

    Ok(missing)
}
