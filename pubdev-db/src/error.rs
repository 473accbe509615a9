//! Error types for the store engines.

use pubdev_core::ErrorKind;

/// Errors raised by the relational and document engines.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum DbError {
    /// The named table has not been created (or was dropped).
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    /// A schema declared zero or several primary keys, or an unknown type.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A row failed validation against its table's schema.
    #[error("row rejected by schema of table '{table}': {reason}")]
    SchemaValidation { table: String, reason: String },

    /// A builder was executed without a required argument.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// A projection named a column the table does not declare.
    #[error("column '{column}' is not declared by table '{table}'")]
    UnknownColumn { table: String, column: String },
}

impl DbError {
    /// The shared taxonomy kind for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::TableNotFound(_) => ErrorKind::TableNotFound,
            DbError::InvalidSchema(_) => ErrorKind::InvalidSchema,
            DbError::SchemaValidation { .. } => ErrorKind::SchemaValidationError,
            DbError::MissingInput(_) => ErrorKind::MissingInput,
            DbError::UnknownColumn { .. } => ErrorKind::UnknownColumn,
        }
    }

    pub(crate) fn validation(table: &str, reason: impl Into<String>) -> Self {
        DbError::SchemaValidation { table: table.to_owned(), reason: reason.into() }
    }
}
