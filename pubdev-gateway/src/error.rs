//! Error types for the gateway crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pubdev_core::{CoreError, ErrorKind};
use pubdev_host::HostError;
use serde_json::json;

/// Errors that can occur during gateway request handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// An error propagated from the execution host.
    #[error(transparent)]
    Host(#[from] HostError),

    /// The request is malformed or targets something that cannot be edited.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A websocket upgrade arrived where no gateway is open.
    #[error("no open gateway at {0}")]
    NoGateway(String),
}

impl From<CoreError> for GatewayError {
    fn from(e: CoreError) -> Self {
        GatewayError::Host(HostError::Core(e))
    }
}

impl GatewayError {
    /// Taxonomy kind reported alongside the message.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Host(e) => e.kind(),
            GatewayError::InvalidRequest(_) => ErrorKind::MissingInput,
            GatewayError::NoGateway(_) => ErrorKind::NotFound,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            other => StatusCode::from_u16(other.kind().status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let errors = match &self {
            GatewayError::Host(e) => e.messages(),
            other => vec![other.to_string()],
        };
        let body = json!({
            "error": self.to_string(),
            "kind": self.kind().as_str(),
            "errors": errors,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn gateway_error_status_codes_follow_the_kind() {
        let cases = [
            (GatewayError::Host(HostError::NotFound("w/x".to_owned())), StatusCode::NOT_FOUND),
            (
                GatewayError::Host(HostError::MethodNotAllowed { method: "GET".to_owned(), path: "chat.js".to_owned() }),
                StatusCode::METHOD_NOT_ALLOWED,
            ),
            (
                GatewayError::Host(HostError::GatewayConflict {
                    workspace: "w".to_owned(),
                    existing: "a.js".to_owned(),
                    requested: "b.js".to_owned(),
                }),
                StatusCode::CONFLICT,
            ),
            (
                GatewayError::Host(HostError::Timeout { path: "spin.js".to_owned(), budget_ms: 5 }),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (GatewayError::Host(HostError::Runtime("boom".to_owned())), StatusCode::INTERNAL_SERVER_ERROR),
            (GatewayError::InvalidRequest("missing field".to_owned()), StatusCode::BAD_REQUEST),
            (GatewayError::NoGateway("w/chat".to_owned()), StatusCode::NOT_FOUND),
        ];
        for (err, expected) in cases {
            let msg = err.to_string();
            assert_eq!(err.into_response().status(), expected, "{msg}");
        }
    }

    #[test]
    fn script_errors_report_the_thrown_kind() {
        let err = GatewayError::Host(HostError::Script {
            path: "users.js".to_owned(),
            kind: ErrorKind::SchemaValidationError,
            message: "bad row".to_owned(),
        });
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lifecycle_errors_list_every_step() {
        let err = GatewayError::Host(HostError::Lifecycle {
            cleanup: Some(Box::new(HostError::Runtime("old".to_owned()))),
            setup: Some(Box::new(HostError::CapabilityNotFound("fs".to_owned()))),
        });
        let resp = err.into_response();
        let bytes = match axum::body::to_bytes(resp.into_body(), 4096).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        let body: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => panic!("invalid JSON: {e}"),
        };
        assert_eq!(body["errors"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["kind"], "CapabilityNotFound");
    }
}
