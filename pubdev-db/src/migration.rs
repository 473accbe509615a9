//! Row migration between two schemas of the same table.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::schema::{ColumnType, Schema};
use crate::value::{Row, SqlValue, MAX_KEY};

/// What a migration did to a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct MigrationReport {
    /// Columns present only in the new schema.
    pub added: Vec<String>,
    /// Columns present only in the old schema.
    pub removed: Vec<String>,
    /// Columns kept under a different type.
    pub retyped: Vec<String>,
    /// Rows carried over.
    pub kept: usize,
    /// Rows dropped for failed coercion or a key collision.
    pub dropped: usize,
}

/// Migrate `rows` from `old` to `new`.
///
/// Per row: new columns are zero-filled, removed columns are dropped and
/// retyped columns are coerced. Rows that fail coercion are dropped. Key
/// uniqueness is then enforced in table order (first occurrence wins) and
/// rows without a key, as happens when the key column itself is new, get the
/// next unused integer. Rows left without a key once [`MAX_KEY`] is taken
/// are dropped.
#[must_use]
pub fn migrate(rows: Vec<Row>, old: &Schema, new: &Schema) -> (Vec<Row>, MigrationReport) {
    let mut report = MigrationReport::default();
    for (column, ty) in new.columns() {
        match old.column_type(column) {
            None => report.added.push(column.to_owned()),
            Some(previous) if previous != ty => report.retyped.push(column.to_owned()),
            Some(_) => {}
        }
    }
    report.removed = old
        .columns()
        .filter(|(c, _)| new.column_type(c).is_none())
        .map(|(c, _)| c.to_owned())
        .collect();

    let total = rows.len();
    let key = new.primary_key();
    let converted: Vec<Row> = rows.into_iter().filter_map(|row| convert(row, old, new)).collect();

    let mut used = BTreeSet::new();
    let mut keep = Vec::with_capacity(converted.len());
    for row in converted {
        match row.get(key).and_then(SqlValue::as_key) {
            Some(k) if !used.insert(k) => {}
            _ => keep.push(row),
        }
    }

    let mut next = used.last().map_or(Some(0), |k| k.checked_add(1));
    keep.retain_mut(|row| {
        if row.get(key).and_then(SqlValue::as_key).is_some() {
            return true;
        }
        while let Some(k) = next.filter(|k| used.contains(k)) {
            next = k.checked_add(1);
        }
        match next.filter(|k| *k <= MAX_KEY) {
            Some(k) => {
                row.insert(key.to_owned(), SqlValue::key(k));
                used.insert(k);
                next = k.checked_add(1);
                true
            }
            None => false,
        }
    });

    let migrated: Vec<Row> = keep.into_iter().map(|row| new.arrange(row)).collect();
    report.kept = migrated.len();
    report.dropped = total - migrated.len();
    (migrated, report)
}

/// Convert one row, or `None` if a retyped value cannot be coerced.
fn convert(mut row: Row, old: &Schema, new: &Schema) -> Option<Row> {
    let mut out = Row::with_capacity(new.len());
    for (column, ty) in new.columns() {
        match old.column_type(column) {
            None => {
                if let Some(zero) = ty.zero_value() {
                    out.insert(column.to_owned(), zero);
                }
            }
            Some(previous) => {
                let value = row.swap_remove(column).unwrap_or(SqlValue::Null);
                let value = if previous == ty || (ty != ColumnType::PrimaryKey && value == SqlValue::Null) {
                    value
                } else {
                    ty.coerce(value)?
                };
                out.insert(column.to_owned(), value);
            }
        }
    }
    Some(out)
}
