use serde::{Deserialize, Serialize};

/// Errors produced by the `pubdev-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A workspace identifier was empty or contained a path separator.
    #[error("invalid workspace id '{value}': {reason}")]
    InvalidWorkspaceId { value: String, reason: String },

    /// A script or resource path escaped the workspace or was malformed.
    #[error("invalid path '{value}': {reason}")]
    InvalidPath { value: String, reason: String },
}

/// Error taxonomy shared by every engine.
///
/// Kinds survive the trip through tenant code: an engine error thrown inside a
/// script and not caught there is reported to the caller under the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A script required a capability name that is not registered.
    CapabilityNotFound,
    /// A relational operation named a table that does not exist.
    TableNotFound,
    /// A table schema has zero or several primary keys, or an unknown type tag.
    InvalidSchema,
    /// A row does not satisfy its table's schema.
    SchemaValidationError,
    /// A builder was executed without its required arguments.
    MissingInput,
    /// A selection named a column the schema does not declare.
    UnknownColumn,
    /// A workspace tried to bind a second gateway path.
    GatewayConflict,
    /// The HTTP verb has no handler, or the module is a gateway module.
    MethodNotAllowed,
    /// No page, module or static resource matched the request.
    NotFound,
    /// Tenant code threw, failed to parse, or returned an unusable value.
    Script,
    /// A handler exceeded its time budget.
    Timeout,
    /// Anything else: I/O failures, a dead sandbox worker.
    Internal,
}

impl ErrorKind {
    /// HTTP status code the transport reports for this kind.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::GatewayConflict => 409,
            ErrorKind::InvalidSchema
            | ErrorKind::SchemaValidationError
            | ErrorKind::MissingInput
            | ErrorKind::UnknownColumn => 400,
            ErrorKind::Timeout => 504,
            ErrorKind::CapabilityNotFound
            | ErrorKind::TableNotFound
            | ErrorKind::Script
            | ErrorKind::Internal => 500,
        }
    }

    /// Stable name used on the wire and inside tenant error objects.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CapabilityNotFound => "CapabilityNotFound",
            ErrorKind::TableNotFound => "TableNotFound",
            ErrorKind::InvalidSchema => "InvalidSchema",
            ErrorKind::SchemaValidationError => "SchemaValidationError",
            ErrorKind::MissingInput => "MissingInput",
            ErrorKind::UnknownColumn => "UnknownColumn",
            ErrorKind::GatewayConflict => "GatewayConflict",
            ErrorKind::MethodNotAllowed => "MethodNotAllowed",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Script => "Script",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
