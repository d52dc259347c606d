// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Revision trees and the tree merge.
//!
//! Each document carries a single-rooted tree of revisions. Linear edits extend a
//! branch; concurrent edits on two replicas produce sibling branches (conflicts).
//!
//! # Wire Format
//!
//! Nodes travel as 3-tuples, the same shape upstream replicas emit:
//!
//! ```text
//! ["1-a", {}, [
//!     ["2-b", {}, []],
//!     ["2-c", {"_deleted": true}, []]
//! ]]
//! ```
//!
//! # Merge
//!
//! [`merge`] consumes both trees and builds the merged one. At each level the
//! destination children are indexed by revision id:
//!
//! ```text
//! common children?  ── yes ──▶ keep destination order, descend into each
//!       │                      matched pair, append unmatched source children
//!       no
//!       ▼
//! structural fork: destination children ++ source children
//! ```

use crate::error::{ReplicationError, Result};
use crate::revision::RevisionId;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet};

/// Free stack below which serialization switches to a fresh segment.
const STACK_RED_ZONE: usize = 64 * 1024;
/// Size of each extra stack segment.
const STACK_SEGMENT: usize = 1024 * 1024;

/// Per-revision attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributes {
    /// Tombstone marker. Missing on the wire means `false`.
    #[serde(rename = "_deleted", default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Wire shape of a node: `[rev, attributes, children]`.
#[derive(Deserialize)]
struct WireNode(RevisionId, NodeAttributes, Vec<RevisionNode>);

/// A node in a document's revision tree.
///
/// Long-lived documents grow linear histories thousands of revisions deep, so
/// clone, comparison, drop and merge all walk the tree with an explicit stack.
/// Decode deep trees from JSON with [`crate::meta::decode_json`].
#[derive(Debug, Deserialize)]
#[serde(from = "WireNode")]
pub struct RevisionNode {
    pub rev: RevisionId,
    pub attributes: NodeAttributes,
    pub children: Vec<RevisionNode>,
}

impl From<WireNode> for RevisionNode {
    fn from(WireNode(rev, attributes, children): WireNode) -> Self {
        Self {
            rev,
            attributes,
            children,
        }
    }
}

impl Serialize for RevisionNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || {
            let mut node = serializer.serialize_tuple(3)?;
            node.serialize_element(&self.rev)?;
            node.serialize_element(&self.attributes)?;
            node.serialize_element(&self.children)?;
            node.end()
        })
    }
}

impl Clone for RevisionNode {
    fn clone(&self) -> Self {
        let mut root = self.shallow();
        let mut stack: Vec<(&RevisionNode, &mut RevisionNode)> = vec![(self, &mut root)];
        while let Some((src, dst)) = stack.pop() {
            dst.children = src.children.iter().map(Self::shallow).collect();
            stack.extend(src.children.iter().zip(dst.children.iter_mut()));
        }
        root
    }
}

impl PartialEq for RevisionNode {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.rev != b.rev || a.attributes != b.attributes || a.children.len() != b.children.len() {
                return false;
            }
            stack.extend(a.children.iter().zip(&b.children));
        }
        true
    }
}

impl Eq for RevisionNode {}

impl Drop for RevisionNode {
    fn drop(&mut self) {
        if self.children.is_empty() {
            return;
        }
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl RevisionNode {
    /// A live leaf revision.
    pub fn leaf(rev: RevisionId) -> Self {
        Self {
            rev,
            attributes: NodeAttributes::default(),
            children: Vec::new(),
        }
    }

    /// A deleted leaf revision.
    pub fn tombstone(rev: RevisionId) -> Self {
        Self {
            rev,
            attributes: NodeAttributes { deleted: true },
            children: Vec::new(),
        }
    }

    /// Copy of this node without its children.
    fn shallow(&self) -> Self {
        Self {
            rev: self.rev.clone(),
            attributes: self.attributes,
            children: Vec::new(),
        }
    }

    /// Builder-style helper to attach children.
    pub fn with_children(mut self, children: Vec<RevisionNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.attributes.deleted
    }

    /// Leaf revisions that are not deleted, depth-first.
    pub fn active_leaves(&self) -> Vec<RevisionId> {
        let mut out = Vec::new();
        self.walk_leaves(&mut |node| {
            if !node.is_deleted() {
                out.push(node.rev.clone());
            }
        });
        out
    }

    /// Every leaf revision, tombstones included, depth-first.
    pub fn all_leaves(&self) -> Vec<RevisionId> {
        let mut out = Vec::new();
        self.walk_leaves(&mut |node| out.push(node.rev.clone()));
        out
    }

    fn walk_leaves<'a>(&'a self, visit: &mut impl FnMut(&'a RevisionNode)) {
        // Explicit stack: deep linear histories must not blow the call stack.
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                visit(node);
            }
            stack.extend(node.children.iter().rev());
        }
    }

    /// Total number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Check the shape assumptions merge relies on.
    ///
    /// Sibling lists must not repeat a revision id.
    pub fn validate(&self, doc_id: &str) -> Result<()> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            let mut seen = HashSet::with_capacity(node.children.len());
            for child in &node.children {
                if !seen.insert(&child.rev) {
                    return Err(ReplicationError::malformed(
                        doc_id,
                        format!("revision {} appears twice under {}", child.rev, node.rev),
                    ));
                }
            }
            stack.extend(node.children.iter());
        }
        Ok(())
    }

    /// Copy of the tree with every sibling list sorted by revision id.
    ///
    /// Two trees with the same shape compare equal after canonicalization,
    /// whatever order their branches arrived in.
    pub fn canonical(&self) -> RevisionNode {
        let mut out = self.clone();
        let mut stack = vec![&mut out];
        while let Some(node) = stack.pop() {
            node.children.sort_by(|a, b| a.rev.cmp(&b.rev));
            stack.extend(node.children.iter_mut());
        }
        out
    }
}

/// Merge two revision trees of the same document.
///
/// Both roots must carry the same revision id. Returns `MalformedTree` when they
/// do not, or when either tree repeats an id within a sibling list.
pub fn merge_trees(doc_id: &str, destination: RevisionNode, source: RevisionNode) -> Result<RevisionNode> {
    if destination.rev != source.rev {
        return Err(ReplicationError::malformed(
            doc_id,
            format!("root mismatch: {} vs {}", destination.rev, source.rev),
        ));
    }
    destination.validate(doc_id)?;
    source.validate(doc_id)?;
    Ok(merge(destination, source))
}

/// Merge `source` into `destination`, both describing the same revision.
///
/// Matched nodes keep the destination's attributes. Callers are expected to
/// have matched the roots; [`merge_trees`] does that and validates sibling
/// uniqueness first.
pub fn merge(mut destination: RevisionNode, source: RevisionNode) -> RevisionNode {
    let mut stack: Vec<(&mut RevisionNode, RevisionNode)> = vec![(&mut destination, source)];

    while let Some((dest, mut src)) = stack.pop() {
        let incoming = std::mem::take(&mut src.children);

        let index: HashMap<&RevisionId, usize> = dest
            .children
            .iter()
            .enumerate()
            .map(|(i, child)| (&child.rev, i))
            .collect();

        // Indexed like dest.children; stays empty on a structural fork.
        let mut matched: Vec<Option<RevisionNode>> = Vec::new();
        let mut unmatched = Vec::new();
        for child in incoming {
            match index.get(&child.rev) {
                Some(&i) => {
                    if matched.is_empty() {
                        matched.resize_with(dest.children.len(), || None);
                    }
                    matched[i] = Some(child);
                }
                None => unmatched.push(child),
            }
        }
        drop(index);

        dest.children.extend(unmatched);
        for (child, pair) in dest.children.iter_mut().zip(matched) {
            if let Some(pair) = pair {
                stack.push((child, pair));
            }
        }
    }

    destination
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(s: &str) -> RevisionId {
        s.parse().unwrap()
    }

    fn leaf(s: &str) -> RevisionNode {
        RevisionNode::leaf(rev(s))
    }

    fn node(s: &str, children: Vec<RevisionNode>) -> RevisionNode {
        RevisionNode::leaf(rev(s)).with_children(children)
    }

    fn ids(revs: &[RevisionId]) -> Vec<String> {
        revs.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_wire_format_roundtrip() {
        let json = r#"["1-a",{},[["2-b",{},[]],["2-c",{"_deleted":true},[]]]]"#;
        let tree: RevisionNode = serde_json::from_str(json).unwrap();
        assert_eq!(tree.rev, rev("1-a"));
        assert_eq!(tree.children.len(), 2);
        assert!(tree.children[1].is_deleted());
        assert_eq!(serde_json::to_string(&tree).unwrap(), json);
    }

    #[test]
    fn test_wire_format_explicit_false_deleted() {
        let tree: RevisionNode = serde_json::from_str(r#"["1-a",{"_deleted":false},[]]"#).unwrap();
        assert!(!tree.is_deleted());
    }

    #[test]
    fn test_wire_format_rejects_bad_revision() {
        assert!(serde_json::from_str::<RevisionNode>(r#"["bogus",{},[]]"#).is_err());
    }

    #[test]
    fn test_leaf_merged_with_leaf_is_unchanged() {
        let merged = merge(leaf("1-a"), leaf("1-a"));
        assert_eq!(merged, leaf("1-a"));
    }

    #[test]
    fn test_merge_idempotent() {
        let tree = node("1-a", vec![node("2-b", vec![leaf("3-c")]), leaf("2-d")]);
        assert_eq!(merge(tree.clone(), tree.clone()), tree);
    }

    #[test]
    fn test_merge_extends_linear_history() {
        let dest = node("1-a", vec![leaf("2-b")]);
        let src = node("1-a", vec![node("2-b", vec![leaf("3-c")])]);
        let merged = merge(dest, src);
        assert_eq!(merged, node("1-a", vec![node("2-b", vec![leaf("3-c")])]));
    }

    #[test]
    fn test_merge_appends_new_branch_next_to_common_child() {
        let dest = node("1-a", vec![leaf("2-b")]);
        let src = node("1-a", vec![leaf("2-b"), leaf("2-x")]);
        let merged = merge(dest, src);
        assert_eq!(ids(&merged.all_leaves()), vec!["2-b", "2-x"]);
    }

    #[test]
    fn test_merge_fork_preserves_both_branches() {
        let dest = node("1-a", vec![leaf("2-a")]);
        let src = node("1-a", vec![leaf("2-b")]);
        let merged = merge(dest, src);
        assert_eq!(merged.children.len(), 2);
        assert_eq!(ids(&merged.active_leaves()), vec!["2-a", "2-b"]);
    }

    #[test]
    fn test_merge_fork_onto_empty_destination() {
        let merged = merge(leaf("1-a"), node("1-a", vec![leaf("2-b")]));
        assert_eq!(merged, node("1-a", vec![leaf("2-b")]));
    }

    #[test]
    fn test_merge_shape_commutes() {
        let a = node("1-a", vec![node("2-b", vec![leaf("3-c")]), leaf("2-q")]);
        let b = node("1-a", vec![node("2-b", vec![leaf("3-d")]), leaf("2-r")]);
        let ab = merge(a.clone(), b.clone()).canonical();
        let ba = merge(b, a).canonical();
        assert_eq!(ab, ba);
        assert_eq!(ab.node_count(), 6);
    }

    #[test]
    fn test_merge_keeps_destination_attributes() {
        let live = node("1-a", vec![leaf("2-b")]);
        let deleted = node("1-a", vec![RevisionNode::tombstone(rev("2-b"))]);

        let merged = merge(live.clone(), deleted.clone());
        assert!(!merged.children[0].is_deleted());
        assert_eq!(ids(&merged.active_leaves()), vec!["2-b"]);

        let merged = merge(deleted, live);
        assert!(merged.children[0].is_deleted());
        assert!(merged.active_leaves().is_empty());
    }

    #[test]
    fn test_merge_trees_rejects_root_mismatch() {
        let err = merge_trees("doc", leaf("1-a"), leaf("1-b")).unwrap_err();
        assert!(matches!(err, ReplicationError::MalformedTree { .. }));
    }

    #[test]
    fn test_validate_rejects_duplicate_siblings() {
        let tree = node("1-a", vec![leaf("2-b"), leaf("2-b")]);
        let err = tree.validate("doc").unwrap_err();
        assert!(err.to_string().contains("appears twice"));
        assert!(merge_trees("doc", leaf("1-a"), tree).is_err());
    }

    #[test]
    fn test_same_revision_on_two_branches_is_valid() {
        // Ids only need to be unique among siblings.
        let tree = node("1-a", vec![node("2-b", vec![leaf("3-z")]), node("2-c", vec![leaf("3-z")])]);
        assert!(tree.validate("doc").is_ok());
    }

    #[test]
    fn test_active_and_all_leaves() {
        let tree = node(
            "1-a",
            vec![
                node("2-b", vec![leaf("3-c")]),
                RevisionNode::tombstone(rev("2-d")),
                leaf("2-e"),
            ],
        );
        assert_eq!(ids(&tree.all_leaves()), vec!["3-c", "2-d", "2-e"]);
        assert_eq!(ids(&tree.active_leaves()), vec!["3-c", "2-e"]);
    }

    #[test]
    fn test_deleted_interior_node_is_not_a_leaf() {
        let tree = RevisionNode::tombstone(rev("1-a")).with_children(vec![leaf("2-b")]);
        assert_eq!(ids(&tree.active_leaves()), vec!["2-b"]);
    }

    #[test]
    fn test_distinct_spellings_are_distinct_siblings() {
        let tree = node("1-r", vec![leaf("02-x"), leaf("2-x")]);
        assert!(tree.validate("doc").is_ok());
        assert_eq!(ids(&tree.all_leaves()), vec!["02-x", "2-x"]);

        let merged = merge(tree.clone(), node("1-r", vec![leaf("2-x")]));
        assert_eq!(merged, tree);
    }

    fn linear(depth: u64, tip: &str) -> RevisionNode {
        let mut tree = leaf(&format!("{}-{}", depth, tip));
        for g in (1..depth).rev() {
            tree = node(&format!("{}-h", g), vec![tree]);
        }
        tree
    }

    #[test]
    fn test_deep_linear_history_does_not_overflow() {
        let tree = linear(5000, "end");
        assert_eq!(tree.node_count(), 5000);
        assert_eq!(ids(&tree.all_leaves()), vec!["5000-end"]);

        let copy = tree.clone();
        assert_eq!(copy, tree);
        assert_eq!(tree.canonical(), tree);
        assert_eq!(merge(copy, tree.clone()), tree);
    }

    #[test]
    fn test_deep_histories_fork_at_the_tip() {
        let merged = merge(linear(3000, "a"), linear(3000, "b"));
        assert_eq!(merged.node_count(), 3001);
        assert_eq!(ids(&merged.active_leaves()), vec!["3000-a", "3000-b"]);
    }

    #[test]
    fn test_deep_history_wire_roundtrip() {
        let tree = linear(2000, "tip");
        let json = serde_json::to_vec(&tree).unwrap();
        let back: RevisionNode = crate::meta::decode_json(&json).unwrap();
        assert_eq!(back, tree);
    }
}
