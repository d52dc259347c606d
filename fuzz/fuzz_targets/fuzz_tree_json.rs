//! Fuzz target for revision trees received over the wire.
//!
//! Arbitrary JSON must never panic the decoder (however deep it nests), and
//! any tree that decodes and validates must merge with itself into the same
//! tree and survive re-encoding.

#![no_main]

use doc_replicator::meta::decode_json;
use doc_replicator::{merge_trees, select_winner, RevisionNode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(tree) = decode_json::<RevisionNode>(data) else {
        return;
    };
    if tree.validate("fuzz").is_err() {
        return;
    }

    let merged = merge_trees("fuzz", tree.clone(), tree.clone()).expect("self-merge of a valid tree");
    assert_eq!(merged, tree);
    assert_eq!(select_winner(&merged), select_winner(&tree));

    let encoded = serde_json::to_vec(&tree).expect("encode");
    assert_eq!(decode_json::<RevisionNode>(&encoded).expect("decode"), tree);
});
