//! Schema-less document store.
//!
//! Documents are JSON objects carrying an engine-assigned `id`. Queries are
//! partial objects matched by exact field equality. Every value handed out is
//! a copy; callers can never reach a stored document.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use uuid::Uuid;

/// A stored document.
pub type Document = Map<String, Value>;

/// Field holding the engine-assigned identifier.
pub const ID_FIELD: &str = "id";

fn matches(doc: &Document, query: &Document) -> bool {
    query.iter().all(|(key, value)| doc.get(key).is_some_and(|field| same_value(field, value)))
}

/// JSON equality where numbers compare by value, so `1` equals `1.0`.
#[allow(clippy::float_cmp)]
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len() && xs.iter().all(|(k, x)| ys.get(k).is_some_and(|y| same_value(x, y)))
        }
        _ => a == b,
    }
}

/// An insertion-ordered sequence of documents.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    docs: Vec<Document>,
}

impl Collection {
    /// Store a copy of `doc` under a fresh id and return another copy.
    ///
    /// Any `id` the caller supplied is replaced.
    pub fn insert(&mut self, doc: Document) -> Document {
        let mut stored = Document::with_capacity(doc.len() + 1);
        stored.insert(ID_FIELD.to_owned(), Value::String(Uuid::new_v4().to_string()));
        stored.extend(doc.into_iter().filter(|(k, _)| k != ID_FIELD));
        self.docs.push(stored.clone());
        stored
    }

    /// Every match, in insertion order.
    #[must_use]
    pub fn find(&self, query: &Document) -> Vec<Document> {
        self.docs.iter().filter(|d| matches(d, query)).cloned().collect()
    }

    /// The first match.
    #[must_use]
    pub fn find_one(&self, query: &Document) -> Option<Document> {
        self.docs.iter().find(|d| matches(d, query)).cloned()
    }

    /// Delete and return the first match.
    pub fn remove(&mut self, query: &Document) -> Option<Document> {
        let idx = self.docs.iter().position(|d| matches(d, query))?;
        Some(self.docs.remove(idx))
    }

    /// Delete and return every match.
    pub fn remove_all(&mut self, query: &Document) -> Vec<Document> {
        let (removed, kept): (Vec<Document>, Vec<Document>) = std::mem::take(&mut self.docs)
            .into_iter()
            .partition(|d| matches(d, query));
        self.docs = kept;
        removed
    }

    /// Shallow-merge `patch` onto the first match and return the result.
    ///
    /// The `id` field is immutable and is ignored in `patch`.
    pub fn update(&mut self, query: &Document, patch: Document) -> Option<Document> {
        let doc = self.docs.iter_mut().find(|d| matches(d, query))?;
        for (key, value) in patch {
            if key != ID_FIELD {
                doc.insert(key, value);
            }
        }
        Some(doc.clone())
    }

    /// Number of matches.
    #[must_use]
    pub fn count(&self, query: &Document) -> usize {
        self.docs.iter().filter(|d| matches(d, query)).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Per-workspace set of named collections, created on first reference.
#[derive(Debug, Default)]
pub struct DocumentStore {
    collections: BTreeMap<String, Collection>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The named collection, created empty if absent.
    pub fn collection(&mut self, name: &str) -> &mut Collection {
        self.collections.entry(name.to_owned()).or_default()
    }

    /// Read-only lookup that does not create the collection.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Names of existing collections, sorted.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}
