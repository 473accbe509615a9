//! Fuzz target: `ScriptPath` normalization.
//!
//! Accepted paths must never climb out of the workspace and must be stable
//! under re-normalization.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pubdev_core::ScriptPath;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(path) = ScriptPath::new(raw) else {
        return;
    };
    let normalized = path.as_str();
    assert!(!normalized.starts_with('/'), "normalized path must be relative");
    assert!(normalized.split('/').all(|s| s != ".." && s != "."), "no dot segments survive");
    match ScriptPath::new(normalized) {
        Ok(again) => assert_eq!(again, path, "normalization must be idempotent"),
        Err(e) => panic!("normalized path rejected: {e}"),
    }
});
