//! Embedded data engines injected into every workspace sandbox.
//!
//! - [`RelationalStore`]: schema-validated tables with builder-style
//!   `insert` / `select` / `update` / `delete` and schema migration.
//! - [`DocumentStore`]: schema-less collections queried by partial match.
//!
//! Both engines are synchronous and hold no locks of their own; the host
//! serializes access per workspace.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod document;
pub mod error;
pub mod migration;
pub mod predicate;
pub mod relational;
pub mod schema;
pub mod value;

pub use document::{Collection, Document, DocumentStore};
pub use error::DbError;
pub use migration::MigrationReport;
pub use predicate::{LikePattern, Predicate};
pub use relational::{RelationalStore, Selection, Table, TableChange};
pub use schema::{ColumnType, Schema};
pub use value::{row_from_json, row_to_json, Row, SqlValue, MAX_KEY};
