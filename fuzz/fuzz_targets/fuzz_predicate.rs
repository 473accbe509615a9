//! Fuzz target: predicate decoding and evaluation.
//!
//! The input is split on the first NUL byte into a predicate document and a
//! row document, both JSON. Decoding may fail; evaluation must not panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pubdev_db::{row_from_json, Predicate};

fuzz_target!(|data: &[u8]| {
    let (predicate, row) = match data.iter().position(|&b| b == 0) {
        Some(split) => (&data[..split], &data[split + 1..]),
        None => (data, &b"{}"[..]),
    };
    let Ok(predicate) = serde_json::from_slice::<Predicate>(predicate) else {
        return;
    };
    let Ok(serde_json::Value::Object(object)) = serde_json::from_slice(row) else {
        return;
    };
    let Ok(row) = row_from_json(object) else {
        return;
    };

    let matched = predicate.matches(&row);

    // Wrapping in single-element combinators must not change the result.
    let wrapped = Predicate::and(vec![Predicate::or(vec![predicate])]);
    assert_eq!(wrapped.matches(&row), matched, "single-element and/or must be transparent");
});
