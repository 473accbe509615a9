//! Error types for the host crate.

use pubdev_core::{CoreError, ErrorKind};
use pubdev_db::DbError;

/// Errors that can occur while loading, wiring or invoking workspace scripts.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HostError {
    /// An engine error raised by a host-side store call.
    #[error(transparent)]
    Db(#[from] DbError),

    /// A script required a capability name outside the registry.
    #[error("capability '{0}' not found")]
    CapabilityNotFound(String),

    /// The workspace already owns a gateway bound to another script.
    #[error("workspace '{workspace}' already has a gateway at '{existing}' (requested '{requested}'); only one gateway per workspace")]
    GatewayConflict {
        workspace: String,
        existing: String,
        requested: String,
    },

    /// The verb has no handler, or the module is a gateway module.
    #[error("{method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    /// Nothing in the workspace matched the request.
    #[error("nothing found at '{0}'")]
    NotFound(String),

    /// Tenant code failed. `kind` carries the engine kind when the failure
    /// was an engine error thrown through the script.
    #[error("{path}: {message}")]
    Script {
        path: String,
        kind: ErrorKind,
        message: String,
    },

    /// A capability call received arguments it cannot decode.
    #[error("invalid arguments for {capability}.{op}: {reason}")]
    InvalidArguments {
        capability: String,
        op: String,
        reason: String,
    },

    /// A handler ran past the configured time budget.
    #[error("{path}: handler exceeded its {budget_ms}ms budget")]
    Timeout { path: String, budget_ms: u128 },

    /// The sandbox worker thread for a workspace has stopped.
    #[error("sandbox for workspace '{0}' is not running")]
    WorkerGone(String),

    /// The script runtime itself could not be created or driven.
    #[error("script runtime error: {0}")]
    Runtime(String),

    /// Several independent steps failed; see each entry.
    #[error("{}", join(.0))]
    Collected(Vec<HostError>),

    /// Rewriting a script failed in cleanup, setup, or both.
    #[error("script lifecycle failed: {}", lifecycle(.cleanup.as_deref(), .setup.as_deref()))]
    Lifecycle {
        cleanup: Option<Box<HostError>>,
        setup: Option<Box<HostError>>,
    },

    /// A workspace id or path failed validation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Underlying I/O error from the workspace store.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// The shared taxonomy kind, used for transport status mapping.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::Db(e) => e.kind(),
            HostError::CapabilityNotFound(_) => ErrorKind::CapabilityNotFound,
            HostError::GatewayConflict { .. } => ErrorKind::GatewayConflict,
            HostError::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
            HostError::NotFound(_) => ErrorKind::NotFound,
            HostError::Script { kind, .. } => *kind,
            HostError::InvalidArguments { .. } => ErrorKind::Script,
            HostError::Timeout { .. } => ErrorKind::Timeout,
            HostError::Collected(errors) => errors.first().map_or(ErrorKind::Internal, HostError::kind),
            HostError::Lifecycle { cleanup, setup } => setup
                .as_deref()
                .or(cleanup.as_deref())
                .map_or(ErrorKind::Internal, HostError::kind),
            HostError::Core(_) => ErrorKind::NotFound,
            HostError::WorkerGone(_) | HostError::Runtime(_) | HostError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Flatten into individual messages, one per underlying failure.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        match self {
            HostError::Collected(errors) => errors.iter().flat_map(HostError::messages).collect(),
            HostError::Lifecycle { cleanup, setup } => cleanup
                .iter()
                .chain(setup.iter())
                .flat_map(|e| e.messages())
                .collect(),
            other => vec![other.to_string()],
        }
    }

    /// Fold collected step errors: none is success, one is returned as is.
    pub(crate) fn collect(mut errors: Vec<HostError>) -> Result<(), HostError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(HostError::Collected(errors)),
        }
    }
}

fn join(errors: &[HostError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

fn lifecycle(cleanup: Option<&HostError>, setup: Option<&HostError>) -> String {
    let mut parts = Vec::new();
    if let Some(e) = cleanup {
        parts.push(format!("cleanup: {e}"));
    }
    if let Some(e) = setup {
        parts.push(format!("setup: {e}"));
    }
    parts.join("; ")
}
