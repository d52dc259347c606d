//! Fuzz target for revision id parsing and ordering.
//!
//! Parsing must never panic, and anything that parses must display back to
//! an id that parses to the same value.

#![no_main]

use doc_replicator::RevisionId;
use libfuzzer_sys::fuzz_target;
use std::cmp::Ordering;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    let (Ok(ra), Ok(rb)) = (a.parse::<RevisionId>(), b.parse::<RevisionId>()) else {
        return;
    };

    let again: RevisionId = ra.to_string().parse().expect("displayed id must parse");
    assert_eq!(again, ra);

    // Antisymmetry
    match ra.cmp(&rb) {
        Ordering::Less => assert_eq!(rb.cmp(&ra), Ordering::Greater),
        Ordering::Greater => assert_eq!(rb.cmp(&ra), Ordering::Less),
        Ordering::Equal => assert_eq!(ra, rb),
    }
});
