#![no_main]

//! Fuzz target for destination header construction.
//!
//! Destinations store their outbound headers as operator-edited JSON, so
//! the header builder must tolerate every malformed shape that can reach
//! the database: wrong types, invalid header names, control characters in
//! values, and absurdly large documents.

use chrono::Utc;
use libfuzzer_sys::fuzz_target;
use relay_core::{Destination, DestinationId, HttpMethod};
use relay_dispatch::build_destination_headers;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    fuzz_destination_headers(data);
});

fn destination(headers: Option<Value>) -> Destination {
    Destination {
        id: DestinationId::new(),
        url: "http://example.invalid/hook".to_owned(),
        http_method: HttpMethod::Post,
        headers,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn fuzz_destination_headers(data: &[u8]) {
    // Unset headers always yield the JSON default, whatever else happens.
    let defaults = build_destination_headers(&destination(None))
        .expect("destination without stored headers must build");
    assert!(defaults.contains_key("content-type"));

    let Ok(stored) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    match build_destination_headers(&destination(Some(stored.clone()))) {
        Ok(headers) => {
            // Anything the builder accepts must be a usable header map:
            // `null` falls back to defaults, objects map pair for pair.
            match &stored {
                Value::Null => assert!(headers.contains_key("content-type")),
                Value::Object(map) => assert!(headers.len() <= map.len().max(1)),
                other => panic!("non-object headers accepted: {other:?}"),
            }
        }
        Err(_) => {
            // Rejections may only come from malformed stored documents,
            // never from the unset path.
            assert!(!stored.is_null(), "null headers must fall back to defaults");
        }
    }
}
