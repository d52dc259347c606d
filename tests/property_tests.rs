//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use doc_replicator::winner::winner_of;
use doc_replicator::{merge, select_winner, LeafKey, RevisionId, RevisionNode};
use proptest::prelude::*;
use std::collections::BTreeSet;

const MAX_DEPTH: u64 = 5;

/// Grow a tree from a stream of choices.
///
/// Hashes are derived from the path, so every revision id in the tree is
/// unique and generation equals depth + 1.
fn grow(rev: RevisionId, choices: &mut impl Iterator<Item = u8>) -> RevisionNode {
    let fanout = if rev.generation() >= MAX_DEPTH {
        0
    } else {
        choices.next().unwrap_or(0) % 3
    };

    let children: Vec<RevisionNode> = (0..fanout)
        .map(|i| {
            let child = RevisionId::new(rev.generation() + 1, format!("{}{}", rev.hash(), (b'a' + i) as char));
            grow(child, choices)
        })
        .collect();

    if children.is_empty() && choices.next().unwrap_or(1) % 4 == 0 {
        RevisionNode::tombstone(rev)
    } else {
        RevisionNode::leaf(rev).with_children(children)
    }
}

/// Keep a prefix-closed subset of `tree`: the root always survives, and a
/// child survives only if its parent did.
fn prune(tree: &RevisionNode, choices: &mut impl Iterator<Item = bool>) -> RevisionNode {
    let children = tree
        .children
        .iter()
        .filter_map(|child| {
            if choices.next().unwrap_or(true) {
                Some(prune(child, choices))
            } else {
                None
            }
        })
        .collect();
    RevisionNode {
        rev: tree.rev.clone(),
        attributes: tree.attributes,
        children,
    }
}

fn reversed(tree: &RevisionNode) -> RevisionNode {
    RevisionNode {
        rev: tree.rev.clone(),
        attributes: tree.attributes,
        children: tree.children.iter().rev().map(reversed).collect(),
    }
}

fn revisions(tree: &RevisionNode) -> BTreeSet<RevisionId> {
    let mut out = BTreeSet::new();
    let mut stack = vec![tree];
    while let Some(node) = stack.pop() {
        out.insert(node.rev.clone());
        stack.extend(node.children.iter());
    }
    out
}

fn universe() -> impl Strategy<Value = RevisionNode> {
    prop::collection::vec(any::<u8>(), 1..64)
        .prop_map(|choices| grow(RevisionId::new(1, "r"), &mut choices.into_iter()))
}

/// Two views of the same document history, as two replicas might hold it.
fn replica_pair() -> impl Strategy<Value = (RevisionNode, RevisionNode)> {
    (
        universe(),
        prop::collection::vec(any::<bool>(), 0..64),
        prop::collection::vec(any::<bool>(), 0..64),
    )
        .prop_map(|(tree, a, b)| {
            let left = prune(&tree, &mut a.into_iter());
            let right = prune(&tree, &mut b.into_iter());
            (left, right)
        })
}

fn revision_id() -> impl Strategy<Value = RevisionId> {
    (1u64..20, "[a-f0-9]{1,6}").prop_map(|(generation, hash)| RevisionId::new(generation, hash))
}

// =============================================================================
// Merge Properties
// =============================================================================

proptest! {
    /// Merging a tree with itself changes nothing
    #[test]
    fn merge_is_idempotent(tree in universe()) {
        let merged = merge(tree.clone(), tree.clone());
        prop_assert_eq!(merged, tree);
    }

    /// Merge order only affects sibling order, never shape
    #[test]
    fn merge_is_commutative_up_to_sibling_order((a, b) in replica_pair()) {
        let ab = merge(a.clone(), b.clone()).canonical();
        let ba = merge(b, a).canonical();
        prop_assert_eq!(ab, ba);
    }

    /// Every revision from either side survives, and nothing is duplicated
    #[test]
    fn merge_preserves_every_revision((a, b) in replica_pair()) {
        let expected: BTreeSet<_> = revisions(&a).union(&revisions(&b)).cloned().collect();
        let merged = merge(a, b);
        prop_assert_eq!(merged.node_count(), expected.len());
        prop_assert_eq!(revisions(&merged), expected);
    }

    /// Re-applying an already merged copy is a no-op
    #[test]
    fn merge_absorbs_repeated_source((a, b) in replica_pair()) {
        let once = merge(a, b.clone());
        let twice = merge(once.clone(), b);
        prop_assert_eq!(twice.canonical(), once.canonical());
    }

    /// Merged result still passes shape validation
    #[test]
    fn merge_keeps_siblings_unique((a, b) in replica_pair()) {
        let merged = merge(a, b);
        prop_assert!(merged.validate("doc").is_ok());
    }
}

// =============================================================================
// Winner Properties
// =============================================================================

proptest! {
    /// The winner does not depend on branch order
    #[test]
    fn winner_ignores_sibling_order(tree in universe()) {
        let winner = select_winner(&tree);
        prop_assert_eq!(select_winner(&reversed(&tree)), winner.clone());
        prop_assert_eq!(select_winner(&tree.canonical()), winner);
    }

    /// Both replicas agree on the winner after exchanging trees
    #[test]
    fn winner_agrees_across_merge_order((a, b) in replica_pair()) {
        let ab = select_winner(&merge(a.clone(), b.clone()));
        let ba = select_winner(&merge(b, a));
        prop_assert_eq!(ab, ba);
    }

    /// The winner is an active leaf at the highest generation present
    #[test]
    fn winner_is_highest_active_leaf(tree in universe()) {
        let active = tree.active_leaves();
        match select_winner(&tree) {
            Some(winner) => {
                prop_assert!(active.contains(&winner));
                let top = active.iter().map(RevisionId::generation).max();
                prop_assert_eq!(Some(winner.generation()), top);
            }
            None => prop_assert!(active.is_empty()),
        }
    }

    /// Candidate order never changes the winner
    #[test]
    fn winner_of_is_order_independent(
        revs in prop::collection::vec(revision_id(), 1..12).prop_shuffle(),
    ) {
        let mut sorted = revs.clone();
        sorted.sort();
        prop_assert_eq!(winner_of(revs), sorted.last().cloned());
    }
}

// =============================================================================
// Leaf Key Properties
// =============================================================================

proptest! {
    /// Document ids containing the separator still parse back
    #[test]
    fn leaf_key_allows_separator_in_doc_id(
        doc_id in "[a-z]{1,4}(::[a-z]{1,4}){0,2}",
        rev in revision_id(),
    ) {
        let key = LeafKey::new(doc_id.clone(), rev.clone());
        let parsed: LeafKey = key.to_string().parse().unwrap();
        prop_assert_eq!(parsed.doc_id, doc_id);
        prop_assert_eq!(parsed.rev, rev);
    }
}
