//! Fuzz target for composite leaf key parsing.
//!
//! Document ids may contain the separator themselves; parsing splits on the
//! last one and must never panic.

#![no_main]

use doc_replicator::LeafKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(key) = data.parse::<LeafKey>() {
        let again: LeafKey = key.to_string().parse().expect("displayed key must parse");
        assert_eq!(again, key);
        assert!(!key.rev.to_string().contains("::"));
    }
});
