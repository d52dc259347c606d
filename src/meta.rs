// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable records exchanged between replicas.
//!
//! - [`MetaDocument`]: per-document revision tree, winner and active leaves
//! - [`SyncCheckpoint`]: per-source transfer history for resumable sync
//! - [`DocumentBody`]: a revision body keyed by its [`LeafKey`]
//!
//! Field names follow the wire format upstream replicas already speak
//! (`_id`, `_revisions`, `_winningRev`, `_leafRevs`, `lastKey`, `_id_rev`).

use crate::error::Result;
use crate::rev_tree::RevisionNode;
use crate::revision::{LeafKey, RevisionId};
use crate::winner::select_winner;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decode JSON without a nesting limit.
///
/// Revision trees nest one array level per generation, well past
/// `serde_json`'s default depth of 128. The stack grows on demand while
/// decoding.
pub fn decode_json<T: DeserializeOwned>(input: &[u8]) -> serde_json::Result<T> {
    let mut de = serde_json::Deserializer::from_slice(input);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Per-document revision metadata.
///
/// `leaf_revisions` always equals the active leaves of `revision_tree`, and
/// `winning_revision` is the greatest of them (or `None` if there are none).
/// Build persisted records through [`MetaDocument::from_tree`] to keep the two
/// in lockstep.
///
/// `version` is owned by the store: zero on records that were never stored,
/// bumped on every successful write, and checked by `update_meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_revisions")]
    pub revision_tree: RevisionNode,
    #[serde(rename = "_winningRev", default)]
    pub winning_revision: Option<RevisionId>,
    #[serde(rename = "_leafRevs", default)]
    pub leaf_revisions: Vec<RevisionId>,
    #[serde(skip)]
    pub version: u64,
}

impl MetaDocument {
    /// Build a record whose winner and leaf set are derived from `tree`.
    pub fn from_tree(id: impl Into<String>, tree: RevisionNode) -> Self {
        let winning_revision = select_winner(&tree);
        let leaf_revisions = tree.active_leaves();
        Self {
            id: id.into(),
            revision_tree: tree,
            winning_revision,
            leaf_revisions,
            version: 0,
        }
    }

    /// Recompute winner and leaf set from the current tree.
    pub fn normalized(self) -> Self {
        let version = self.version;
        let mut meta = Self::from_tree(self.id, self.revision_tree);
        meta.version = version;
        meta
    }

    /// A document with no active leaf is considered deleted.
    pub fn is_deleted(&self) -> bool {
        self.winning_revision.is_none()
    }

    /// Composite keys of every leaf body, tombstones included.
    pub fn all_leaf_keys(&self) -> Vec<LeafKey> {
        let mut seen = std::collections::HashSet::new();
        self.revision_tree
            .all_leaves()
            .into_iter()
            .filter(|rev| seen.insert(rev.clone()))
            .map(|rev| LeafKey::new(self.id.clone(), rev))
            .collect()
    }

    /// Check tree shape.
    pub fn validate(&self) -> Result<()> {
        self.revision_tree.validate(&self.id)
    }
}

/// Opaque transfer cursor.
///
/// Only compared for equality. Upstream replicas send either a sequence number
/// or a string key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorToken {
    Seq(u64),
    Key(String),
}

impl CursorToken {
    /// The initial cursor: transfer everything from the beginning.
    pub const EPOCH: CursorToken = CursorToken::Seq(0);

    pub fn is_epoch(&self) -> bool {
        *self == Self::EPOCH
    }
}

impl Default for CursorToken {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl fmt::Display for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seq(n) => write!(f, "{}", n),
            Self::Key(k) => write!(f, "{}", k),
        }
    }
}

impl From<u64> for CursorToken {
    fn from(n: u64) -> Self {
        Self::Seq(n)
    }
}

impl From<&str> for CursorToken {
    fn from(k: &str) -> Self {
        Self::Key(k.to_string())
    }
}

/// One synchronized point in a checkpoint history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "lastKey")]
    pub last_key: CursorToken,
}

impl HistoryEntry {
    pub fn new(last_key: impl Into<CursorToken>) -> Self {
        Self {
            last_key: last_key.into(),
        }
    }
}

/// Transfer history for one source replica, most recent entry first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    #[serde(rename = "_id")]
    pub source_id: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl SyncCheckpoint {
    /// A fresh checkpoint with no history.
    pub fn empty(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            history: Vec::new(),
        }
    }

    /// Most recent synchronized point.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.history.first()
    }

    /// Record a new synchronized point, keeping at most `limit` entries.
    pub fn push_latest(&mut self, entry: HistoryEntry, limit: usize) {
        self.history.insert(0, entry);
        self.history.truncate(limit.max(1));
    }
}

/// A revision body, keyed by `(document id, revision id)`.
///
/// The remaining fields are the document content and are carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBody {
    #[serde(rename = "_id_rev")]
    pub key: LeafKey,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl DocumentBody {
    pub fn new(key: LeafKey, fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { key, fields }
    }
}
