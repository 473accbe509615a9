//! Fuzz target: `%` wildcard matching.
//!
//! Input is `pattern NUL value`. Matching must not panic, and a pattern
//! always matches its own literal part.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pubdev_db::LikePattern;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (pattern, value) = text.split_once('\0').unwrap_or((text, ""));
    let like = LikePattern::parse(pattern);
    let _ = like.matches(value);

    let literal = match like {
        LikePattern::Contains(s) | LikePattern::EndsWith(s) | LikePattern::StartsWith(s) | LikePattern::Exact(s) => s,
    };
    assert!(like.matches(literal), "pattern {pattern:?} must match {literal:?}");
});
