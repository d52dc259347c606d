// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic winning-revision selection.
//!
//! Candidates are the active (non-deleted) leaves. The winner is the greatest
//! under [`RevisionId`]'s order: highest generation, ties broken by the greater
//! hash string. Two replicas holding the same active leaves always agree,
//! regardless of merge history or arrival order.
//!
//! A document whose every leaf is a tombstone has no winner.

use crate::rev_tree::RevisionNode;
use crate::revision::RevisionId;

/// Pick the winning revision of a tree, or `None` if every leaf is deleted.
pub fn select_winner(tree: &RevisionNode) -> Option<RevisionId> {
    winner_of(tree.active_leaves())
}

/// Pick the winner among a set of candidate revisions.
pub fn winner_of<I>(candidates: I) -> Option<RevisionId>
where
    I: IntoIterator<Item = RevisionId>,
{
    candidates.into_iter().max()
}
