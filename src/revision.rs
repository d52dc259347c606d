// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Revision identifiers and composite leaf keys.
//!
//! A revision id has the form `"<generation>-<hash>"`. The generation is the
//! edit depth; the hash is opaque and only used for equality and tie-breaking.
//!
//! ```text
//! "3-9f2c"          → RevisionId { generation: 3, hash: "9f2c" }
//! "03-9f2c"         → a different id, same generation and hash
//! "doc-1::3-9f2c"   → LeafKey { doc_id: "doc-1", rev: 3-9f2c }
//! ```

use crate::error::ReplicationError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Separator between document id and revision id in a [`LeafKey`].
pub const LEAF_KEY_SEPARATOR: &str = "::";

/// A document revision identifier.
///
/// The id is opaque: two ids are equal only if their strings are equal, and
/// the parsed string is what gets displayed and serialized. Ordering is the
/// winner order: generation first, then hash compared as a plain string, then
/// the whole string (so `"01-a"` and `"1-a"` stay distinct). The greatest
/// revision wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId {
    raw: String,
    generation: u64,
    /// Byte offset of the hash in `raw`.
    hash_start: usize,
}

impl RevisionId {
    /// Build a revision id from its parts.
    pub fn new(generation: u64, hash: impl Into<String>) -> Self {
        let prefix = generation.to_string();
        let hash_start = prefix.len() + 1;
        let raw = format!("{}-{}", prefix, hash.into());
        Self {
            raw,
            generation,
            hash_start,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hash(&self) -> &str {
        &self.raw[self.hash_start..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for RevisionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.hash().cmp(other.hash()))
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for RevisionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for RevisionId {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ReplicationError::InvalidRevision {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (generation, hash) = s.split_once('-').ok_or_else(|| invalid("missing '-'"))?;
        if generation.is_empty() || !generation.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("generation is not a non-negative integer"));
        }
        let parsed = generation
            .parse::<u64>()
            .map_err(|_| invalid("generation out of range"))?;
        if hash.is_empty() {
            return Err(invalid("empty hash"));
        }

        Ok(Self {
            raw: s.to_string(),
            generation: parsed,
            hash_start: generation.len() + 1,
        })
    }
}

impl TryFrom<String> for RevisionId {
    type Error = ReplicationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RevisionId> for String {
    fn from(rev: RevisionId) -> Self {
        rev.raw
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Composite key of a revision body: `(document id, revision id)`.
///
/// Serialized as `"<documentId>::<revisionId>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LeafKey {
    pub doc_id: String,
    pub rev: RevisionId,
}

impl LeafKey {
    pub fn new(doc_id: impl Into<String>, rev: RevisionId) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev,
        }
    }
}

impl FromStr for LeafKey {
    type Err = ReplicationError;

    /// Splits on the last `::`, so document ids may themselves contain `::`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (doc_id, rev) = s
            .rsplit_once(LEAF_KEY_SEPARATOR)
            .ok_or_else(|| ReplicationError::InvalidRevision {
                value: s.to_string(),
                reason: "missing '::' separator".to_string(),
            })?;
        Ok(Self {
            doc_id: doc_id.to_string(),
            rev: rev.parse()?,
        })
    }
}

impl TryFrom<String> for LeafKey {
    type Error = ReplicationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LeafKey> for String {
    fn from(key: LeafKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for LeafKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.doc_id, LEAF_KEY_SEPARATOR, self.rev)
    }
}
