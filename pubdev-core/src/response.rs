use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured result of an API handler: `{status, data, headers?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct EndpointResponse {
    /// HTTP status code chosen by the handler.
    pub status: u16,
    /// JSON body.
    #[serde(default)]
    pub data: Value,
    /// Extra response headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl EndpointResponse {
    /// A response with no extra headers.
    #[must_use]
    pub fn new(status: u16, data: Value) -> Self {
        Self { status, data, headers: BTreeMap::new() }
    }

    /// Interpret a raw handler return value.
    ///
    /// An object carrying a numeric `status` is taken as a structured
    /// response. `null` (a handler that returned nothing) becomes `204`.
    /// Anything else is wrapped as the body of a `200`.
    #[must_use]
    pub fn from_handler_value(value: Value) -> Self {
        if value.is_null() {
            return Self::new(204, Value::Null);
        }
        let is_structured = value
            .get("status")
            .and_then(Value::as_u64)
            .is_some_and(|s| (100..=599).contains(&s));
        if is_structured {
            if let Ok(resp) = serde_json::from_value::<EndpointResponse>(value.clone()) {
                return resp;
            }
        }
        Self::new(200, value)
    }
}

/// Bytes of a file served from a workspace's public assets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct StaticResource {
    /// Workspace-relative name, used to pick the content type.
    pub name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl StaticResource {
    /// Creates a resource from its name and contents.
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), bytes }
    }

    /// MIME type derived from the file extension.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        let ext = self
            .name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "html" | "htm" => "text/html",
            "css" => "text/css",
            "js" | "mjs" => "text/javascript",
            "json" => "application/json",
            "txt" => "text/plain",
            "svg" => "image/svg+xml",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "ico" => "image/x-icon",
            "wasm" => "application/wasm",
            "pdf" => "application/pdf",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            _ => "application/octet-stream",
        }
    }
}

/// What the dispatcher hands back to the transport for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A plain HTML page read from the routes tree.
    Page(String),
    /// The result of an API module handler.
    Api(EndpointResponse),
    /// A binary resource from the public assets.
    Static(StaticResource),
}
