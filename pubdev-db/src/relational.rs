//! Schema-validated relational store.
//!
//! One [`RelationalStore`] exists per workspace. Operations are expressed as
//! small builders mirroring the script API:
//!
//! ```
//! # use pubdev_db::{ColumnType, Predicate, RelationalStore, Row, Selection};
//! # fn demo() -> Result<(), pubdev_db::DbError> {
//! let mut db = RelationalStore::new();
//! db.create_table("users", [("id", ColumnType::PrimaryKey), ("name", ColumnType::Text)])?;
//! let mut row = Row::new();
//! row.insert("name".to_owned(), "ada".into());
//! db.insert().into("users").values(row).exec()?;
//! let rows = db.select(Selection::All).from("users").filter(Predicate::like("name", "a%")).exec()?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! # demo().unwrap();
//! ```

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::migration::{migrate, MigrationReport};
use crate::predicate::Predicate;
use crate::schema::{ColumnType, Schema};
use crate::value::{Row, SqlValue, MAX_KEY};

/// A table: its schema and rows in insertion order.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Schema,
    rows: Vec<Row>,
}

impl Table {
    /// The table's current schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Rows in table order.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        let key = self.schema.primary_key();
        self.rows.iter().filter_map(move |r| r.get(key).and_then(SqlValue::as_key))
    }

    fn next_key(&self, name: &str) -> Result<u64, DbError> {
        match self.keys().max() {
            None => Ok(0),
            Some(k) => k
                .checked_add(1)
                .filter(|next| *next <= MAX_KEY)
                .ok_or_else(|| DbError::validation(name, format!("no primary key left after {k}"))),
        }
    }
}

/// Outcome of [`RelationalStore::create_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableChange {
    /// The table did not exist and was created empty.
    Created,
    /// The table already had exactly this schema.
    Unchanged,
    /// The table existed under another schema and its rows were migrated.
    Migrated(MigrationReport),
}

/// Which columns a `select` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    /// Every column, bypassing the column check.
    All,
    /// Only these columns, in this order.
    Columns(Vec<String>),
}

impl Selection {
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection::Columns(columns.into_iter().map(Into::into).collect())
    }
}

/// Per-workspace collection of tables.
#[derive(Debug, Default)]
pub struct RelationalStore {
    tables: BTreeMap<String, Table>,
}

impl RelationalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table, or migrate it if it exists under a different schema.
    ///
    /// # Errors
    /// Returns [`DbError::InvalidSchema`] unless exactly one column is the
    /// primary key.
    pub fn create_table<I, S>(&mut self, name: &str, columns: I) -> Result<TableChange, DbError>
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let columns: IndexMap<String, ColumnType> =
            columns.into_iter().map(|(c, t)| (c.into(), t)).collect();
        let schema = Schema::new(columns)?;
        self.create_with_schema(name, schema)
    }

    /// Like [`create_table`](Self::create_table) for an already validated
    /// schema.
    ///
    /// # Errors
    /// Never fails today; kept fallible for symmetry with `create_table`.
    pub fn create_with_schema(&mut self, name: &str, schema: Schema) -> Result<TableChange, DbError> {
        let Some(table) = self.tables.get_mut(name) else {
            tracing::debug!(table = name, columns = schema.len(), "table created");
            self.tables.insert(name.to_owned(), Table { schema, rows: Vec::new() });
            return Ok(TableChange::Created);
        };
        if table.schema == schema {
            return Ok(TableChange::Unchanged);
        }
        let rows = std::mem::take(&mut table.rows);
        let (rows, report) = migrate(rows, &table.schema, &schema);
        tracing::info!(
            table = name,
            kept = report.kept,
            dropped = report.dropped,
            added = ?report.added,
            removed = ?report.removed,
            retyped = ?report.retyped,
            "table migrated"
        );
        table.rows = rows;
        table.schema = schema;
        Ok(TableChange::Migrated(report))
    }

    /// Remove a table. Returns `true` if it existed.
    pub fn drop_table(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    /// Look up a table.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Names of all tables, sorted.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn insert(&mut self) -> Insert<'_> {
        Insert { store: self, table: None, row: None }
    }

    pub fn select(&self, selection: Selection) -> Select<'_> {
        Select { store: self, selection, table: None, predicate: Predicate::All }
    }

    pub fn update(&mut self, table: impl Into<String>) -> Update<'_> {
        Update { store: self, table: table.into(), assignments: Row::new(), predicate: Predicate::All }
    }

    pub fn delete(&mut self) -> Delete<'_> {
        Delete { store: self, table: None, predicate: Predicate::All }
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, DbError> {
        self.tables.get_mut(name).ok_or_else(|| DbError::TableNotFound(name.to_owned()))
    }
}

/// `insert().into(table).values(row).exec()`
#[must_use = "builders do nothing until `exec` is called"]
pub struct Insert<'a> {
    store: &'a mut RelationalStore,
    table: Option<String>,
    row: Option<Row>,
}

impl Insert<'_> {
    pub fn into(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn values(mut self, row: Row) -> Self {
        self.row = Some(row);
        self
    }

    /// Validate and append the row, generating its key if absent.
    ///
    /// # Errors
    /// [`DbError::MissingInput`] without a table or row,
    /// [`DbError::TableNotFound`], or [`DbError::SchemaValidation`] when the
    /// row does not fit the schema or reuses an existing key.
    pub fn exec(self) -> Result<Row, DbError> {
        let name = self.table.ok_or_else(|| DbError::MissingInput("insert needs a table".into()))?;
        let mut row = self.row.ok_or_else(|| DbError::MissingInput("insert needs values".into()))?;
        let table = self.store.table_mut(&name)?;

        let key = table.schema.primary_key().to_owned();
        if !row.contains_key(&key) {
            row.insert(key.clone(), SqlValue::key(table.next_key(&name)?));
        }
        table.schema.validate_row(&name, &row)?;
        if let Some(k) = row.get(&key).and_then(SqlValue::as_key) {
            if table.keys().any(|existing| existing == k) {
                return Err(DbError::validation(&name, format!("duplicate primary key {key}={k}")));
            }
        }

        let row = table.schema.arrange(row);
        table.rows.push(row.clone());
        Ok(row)
    }
}

/// `select(columns).from(table).filter(predicate).exec()`
#[must_use = "builders do nothing until `exec` is called"]
pub struct Select<'a> {
    store: &'a RelationalStore,
    selection: Selection,
    table: Option<String>,
    predicate: Predicate,
}

impl Select<'_> {
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Return matching rows in table order, projected to the selection.
    ///
    /// # Errors
    /// [`DbError::MissingInput`] without a table, [`DbError::TableNotFound`],
    /// or [`DbError::UnknownColumn`] for an undeclared selected column.
    pub fn exec(self) -> Result<Vec<Row>, DbError> {
        let name = self.table.ok_or_else(|| DbError::MissingInput("select needs a table".into()))?;
        let table = self.store.tables.get(&name).ok_or_else(|| DbError::TableNotFound(name.clone()))?;

        if let Selection::Columns(columns) = &self.selection {
            if let Some(unknown) = columns.iter().find(|c| table.schema.column_type(c).is_none()) {
                return Err(DbError::UnknownColumn { table: name, column: unknown.clone() });
            }
        }

        let matching = table.rows.iter().filter(|row| self.predicate.matches(row));
        let rows: Vec<Row> = match &self.selection {
            Selection::All => matching.cloned().collect(),
            Selection::Columns(columns) => matching
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
                        .collect()
                })
                .collect(),
        };
        Ok(rows)
    }
}

/// `update(table).set(column, value).filter(predicate).exec()`
#[must_use = "builders do nothing until `exec` is called"]
pub struct Update<'a> {
    store: &'a mut RelationalStore,
    table: String,
    assignments: Row,
    predicate: Predicate,
}

impl Update<'_> {
    pub fn set(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.assignments.insert(column.into(), value.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Overwrite the assigned columns on every matching row.
    ///
    /// All-or-nothing: if any updated row fails validation the table is left
    /// untouched. Returns the updated rows.
    ///
    /// # Errors
    /// [`DbError::TableNotFound`], [`DbError::MissingInput`] without any
    /// assignment, or [`DbError::SchemaValidation`].
    pub fn exec(self) -> Result<Vec<Row>, DbError> {
        let name = self.table;
        let table = self.store.table_mut(&name)?;
        if self.assignments.is_empty() {
            return Err(DbError::MissingInput("update needs at least one set(column, value)".into()));
        }

        let mut next = table.rows.clone();
        let mut updated = Vec::new();
        for row in next.iter_mut().filter(|row| self.predicate.matches(row)) {
            for (column, value) in &self.assignments {
                row.insert(column.clone(), value.clone());
            }
            table.schema.validate_row(&name, row)?;
            updated.push(row.clone());
        }

        let key = table.schema.primary_key();
        let mut seen = BTreeSet::new();
        for k in next.iter().filter_map(|r| r.get(key).and_then(SqlValue::as_key)) {
            if !seen.insert(k) {
                return Err(DbError::validation(&name, format!("duplicate primary key {key}={k}")));
            }
        }

        table.rows = next;
        Ok(updated)
    }
}

/// `delete().from(table).filter(predicate).exec()`
#[must_use = "builders do nothing until `exec` is called"]
pub struct Delete<'a> {
    store: &'a mut RelationalStore,
    table: Option<String>,
    predicate: Predicate,
}

impl Delete<'_> {
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Remove and return the matching rows.
    ///
    /// # Errors
    /// [`DbError::MissingInput`] without a table, or [`DbError::TableNotFound`].
    pub fn exec(self) -> Result<Vec<Row>, DbError> {
        let name = self.table.ok_or_else(|| DbError::MissingInput("delete needs a table".into()))?;
        let table = self.store.table_mut(&name)?;
        let (removed, kept): (Vec<Row>, Vec<Row>) = std::mem::take(&mut table.rows)
            .into_iter()
            .partition(|row| self.predicate.matches(row));
        table.rows = kept;
        Ok(removed)
    }
}
