//! Table schemas: column type tags, validation and value coercion.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::value::{render_number, Row, SqlValue};

/// The type tag of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "String")]
    Text,
    #[serde(rename = "Number")]
    Numeric,
    Boolean,
    PrimaryKey,
}

impl ColumnType {
    /// Parse a script-facing tag (`"String"`, `"Number"`, `"Boolean"`,
    /// `"PrimaryKey"`).
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "String" => Some(Self::Text),
            "Number" => Some(Self::Numeric),
            "Boolean" => Some(Self::Boolean),
            "PrimaryKey" => Some(Self::PrimaryKey),
            _ => None,
        }
    }

    /// The script-facing tag.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Text => "String",
            Self::Numeric => "Number",
            Self::Boolean => "Boolean",
            Self::PrimaryKey => "PrimaryKey",
        }
    }

    /// Value a new column of this type is filled with during migration.
    ///
    /// Key columns have no zero value; migration assigns fresh keys instead.
    #[must_use]
    pub fn zero_value(self) -> Option<SqlValue> {
        match self {
            Self::Text => Some(SqlValue::Text(String::new())),
            Self::Numeric => Some(SqlValue::Number(0.0)),
            Self::Boolean => Some(SqlValue::Bool(false)),
            Self::PrimaryKey => None,
        }
    }

    /// True if `value` may be stored in a column of this type.
    ///
    /// Non-key columns are nullable.
    #[must_use]
    pub fn accepts(self, value: &SqlValue) -> bool {
        match (self, value) {
            (Self::PrimaryKey, v) => v.as_key().is_some(),
            (_, SqlValue::Null)
            | (Self::Text, SqlValue::Text(_))
            | (Self::Numeric, SqlValue::Number(_))
            | (Self::Boolean, SqlValue::Bool(_)) => true,
            _ => false,
        }
    }

    /// Convert a value into this type, or `None` if it cannot be converted.
    #[must_use]
    pub fn coerce(self, value: SqlValue) -> Option<SqlValue> {
        match (self, value) {
            (Self::PrimaryKey, SqlValue::Text(s)) => {
                parse_number(&s).map(SqlValue::Number).filter(|v| v.as_key().is_some())
            }
            (Self::PrimaryKey, v) => v.as_key().map(SqlValue::key),
            (_, SqlValue::Null) => Some(SqlValue::Null),

            (Self::Text, SqlValue::Text(s)) => Some(SqlValue::Text(s)),
            (Self::Text, SqlValue::Number(n)) => Some(SqlValue::Text(render_number(n))),
            (Self::Text, SqlValue::Bool(b)) => Some(SqlValue::Text(b.to_string())),

            (Self::Numeric, SqlValue::Number(n)) => Some(SqlValue::Number(n)),
            (Self::Numeric, SqlValue::Text(s)) => parse_number(&s).map(SqlValue::Number),
            (Self::Numeric, SqlValue::Bool(b)) => Some(SqlValue::Number(if b { 1.0 } else { 0.0 })),

            (Self::Boolean, SqlValue::Bool(b)) => Some(SqlValue::Bool(b)),
            (Self::Boolean, SqlValue::Number(n)) => Some(SqlValue::Bool(n != 0.0)),
            (Self::Boolean, SqlValue::Text(s)) => parse_bool(&s).map(SqlValue::Bool),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// A validated table schema: ordered columns with exactly one primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    columns: IndexMap<String, ColumnType>,
    #[serde(skip)]
    primary_key: String,
}

impl Schema {
    /// Validate a column map.
    ///
    /// # Errors
    /// Returns [`DbError::InvalidSchema`] unless exactly one column is tagged
    /// [`ColumnType::PrimaryKey`].
    pub fn new(columns: IndexMap<String, ColumnType>) -> Result<Self, DbError> {
        let keys: Vec<&String> = columns
            .iter()
            .filter(|(_, ty)| **ty == ColumnType::PrimaryKey)
            .map(|(name, _)| name)
            .collect();
        match keys.as_slice() {
            [key] => {
                let primary_key = (*key).clone();
                Ok(Self { columns, primary_key })
            }
            [] => Err(DbError::InvalidSchema("no primary key column".to_owned())),
            many => Err(DbError::InvalidSchema(format!(
                "{} primary key columns ({}), expected exactly one",
                many.len(),
                many.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// Validate a map of script-facing tags (`{"id": "PrimaryKey", ...}`).
    ///
    /// # Errors
    /// Returns [`DbError::InvalidSchema`] for unknown tags or a bad key count.
    pub fn from_tags<'a>(
        tags: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, DbError> {
        let mut columns = IndexMap::new();
        for (column, tag) in tags {
            let ty = ColumnType::from_tag(tag).ok_or_else(|| {
                DbError::InvalidSchema(format!("column '{column}' has unsupported type '{tag}'"))
            })?;
            columns.insert(column.to_owned(), ty);
        }
        Self::new(columns)
    }

    /// Name of the primary key column.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Type of a column, if declared.
    #[must_use]
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).copied()
    }

    /// Declared columns in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// Number of declared columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false: a valid schema has at least its key column.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check a complete row (key included) against this schema.
    ///
    /// # Errors
    /// Returns [`DbError::SchemaValidation`] on a column-count mismatch, an
    /// undeclared column, a missing column, or a value of the wrong type.
    pub fn validate_row(&self, table: &str, row: &Row) -> Result<(), DbError> {
        for (column, value) in row {
            let Some(ty) = self.column_type(column) else {
                return Err(DbError::validation(table, format!("unknown column '{column}'")));
            };
            if !ty.accepts(value) {
                return Err(DbError::validation(
                    table,
                    format!(
                        "column '{column}' expects {ty}, got {} {value}",
                        value.type_name()
                    ),
                ));
            }
        }
        if let Some((missing, _)) = self.columns().find(|(c, _)| !row.contains_key(*c)) {
            return Err(DbError::validation(table, format!("missing column '{missing}'")));
        }
        if row.len() != self.len() {
            return Err(DbError::validation(
                table,
                format!("expected {} columns, got {}", self.len(), row.len()),
            ));
        }
        Ok(())
    }

    /// Reorder a validated row's cells into declaration order.
    #[must_use]
    pub fn arrange(&self, mut row: Row) -> Row {
        self.columns
            .keys()
            .filter_map(|c| row.swap_remove(c).map(|v| (c.clone(), v)))
            .collect()
    }
}
