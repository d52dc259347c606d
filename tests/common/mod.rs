//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A recording [`MockStore`] with failure injection
//! - Revision tree and document helpers

pub mod mock_store;

#[allow(unused_imports)]
pub use mock_store::*;

use doc_replicator::{MetaDocument, RevisionId, RevisionNode};

/// Parse a revision id, panicking on bad test input.
#[allow(dead_code)]
pub fn rev(s: &str) -> RevisionId {
    s.parse().expect("valid revision id")
}

#[allow(dead_code)]
pub fn leaf(s: &str) -> RevisionNode {
    RevisionNode::leaf(rev(s))
}

#[allow(dead_code)]
pub fn tombstone(s: &str) -> RevisionNode {
    RevisionNode::tombstone(rev(s))
}

#[allow(dead_code)]
pub fn node(s: &str, children: Vec<RevisionNode>) -> RevisionNode {
    leaf(s).with_children(children)
}

/// An incoming metadata record as a source replica would send it.
#[allow(dead_code)]
pub fn incoming(id: &str, tree: RevisionNode) -> MetaDocument {
    MetaDocument::from_tree(id, tree)
}
