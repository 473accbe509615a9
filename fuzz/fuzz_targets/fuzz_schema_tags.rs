//! Fuzz target: schema validation from script-facing type tags.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pubdev_db::Schema;

fuzz_target!(|data: &[u8]| {
    let Ok(serde_json::Value::Object(object)) = serde_json::from_slice(data) else {
        return;
    };
    let tags: Vec<(&str, &str)> = object
        .iter()
        .filter_map(|(column, tag)| tag.as_str().map(|tag| (column.as_str(), tag)))
        .collect();

    if let Ok(schema) = Schema::from_tags(tags.iter().copied()) {
        let keys = tags.iter().filter(|(_, tag)| *tag == "PrimaryKey").count();
        assert_eq!(keys, 1, "accepted schema must carry exactly one primary key");
        assert_eq!(schema.len(), tags.len());
        assert!(schema.column_type(schema.primary_key()).is_some());
    }
});
