#![no_main]

//! Fuzz target for ingestion body parsing.
//!
//! Feeds arbitrary bytes through the payload parser to ensure malformed,
//! truncated, or adversarial request bodies can never panic the ingestion
//! path, and that accepted payloads always satisfy the structural
//! contract the pipeline relies on.

use libfuzzer_sys::fuzz_target;
use relay_api::handlers::ingest::parse_payload;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    fuzz_ingest_payload(data);
});

fn fuzz_ingest_payload(data: &[u8]) {
    let first = parse_payload(data);

    if let Some(payload) = &first {
        // Only structured documents may enter the pipeline.
        assert!(
            matches!(payload, Value::Object(_) | Value::Array(_)),
            "parser accepted a non-structured payload"
        );

        // Accepted payloads must survive re-serialization, since the
        // dispatcher sends them back out as JSON bodies.
        let encoded = serde_json::to_vec(payload).expect("accepted payload must re-serialize");
        let reparsed = parse_payload(&encoded).expect("re-serialized payload must parse");
        assert_eq!(payload, &reparsed, "payload changed across a serialization cycle");
    }

    // Parsing is a pure function of the body.
    assert_eq!(first, parse_payload(data), "parser must be deterministic");
}
