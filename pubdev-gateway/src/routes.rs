//! Axum route handlers for the pubdev gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{any, patch},
    Json, Router,
};
use pubdev_core::{EndpointResponse, Outcome, ScriptPath, WorkspaceId};
use pubdev_host::{EndpointRequest, ExecutionHost};
use serde::Deserialize;
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{error::GatewayError, socket};

// ── Shared state ─────────────────────────────────────────────────────────────

type Host = Arc<ExecutionHost>;

/// Largest request body handed to a handler.
const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Prefix of editable script paths under `/pub-dev/workspace/{workspace}/`.
const ROUTES_PREFIX: &str = "routes/";

// ── Request types ────────────────────────────────────────────────────────────

/// Body of `PATCH /pub-dev/workspace/{workspace}/routes/{*path}`.
#[derive(Debug, Deserialize)]
pub struct WriteRouteBody {
    /// New file contents.
    pub file: String,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the application router around an execution host.
pub fn create_router(host: Host) -> Router {
    Router::new()
        .route("/pub-dev/workspace/{workspace}/{*path}", patch(write_route).delete(delete_route))
        .route("/pub-dev/{workspace}", any(serve_root))
        .route("/pub-dev/{workspace}/", any(serve_root))
        .route("/pub-dev/{workspace}/{*path}", any(serve_path))
        .with_state(host)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// `ANY /pub-dev/{workspace}`: the workspace index.
///
/// # Errors
/// See [`serve`].
pub async fn serve_root(
    State(host): State<Host>,
    Path(workspace): Path<String>,
    request: Request,
) -> Result<Response, GatewayError> {
    serve(&host, &workspace, "", request).await
}

/// `ANY /pub-dev/{workspace}/{*path}`: a page, asset, API call or gateway
/// upgrade.
///
/// # Errors
/// See [`serve`].
pub async fn serve_path(
    State(host): State<Host>,
    Path((workspace, path)): Path<(String, String)>,
    request: Request,
) -> Result<Response, GatewayError> {
    serve(&host, &workspace, &path, request).await
}

/// Route one request into the host, or onto the workspace gateway when it is
/// a websocket upgrade.
///
/// # Errors
/// [`GatewayError::Host`] for resolution and handler failures,
/// [`GatewayError::NoGateway`] for upgrades nothing listens for, and
/// [`GatewayError::InvalidRequest`] for unreadable queries or bodies.
async fn serve(host: &ExecutionHost, workspace: &str, path: &str, request: Request) -> Result<Response, GatewayError> {
    let workspace = WorkspaceId::new(workspace)?;
    let path = ScriptPath::new(path)?;
    let (mut parts, body) = request.into_parts();

    if socket::is_upgrade(&parts.headers) {
        return socket::upgrade(host.multiplexer(), &workspace, &path, &mut parts).await;
    }

    let Query(query) = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|e| GatewayError::InvalidRequest(format!("unreadable body: {e}")))?;
    let request = EndpointRequest::new(parts.method.as_str(), &path)
        .with_query(query)
        .with_body(parse_body(&bytes));

    let outcome = host.evaluate_request(&workspace, &path, request).await?;
    Ok(render(outcome))
}

/// `PATCH /pub-dev/workspace/{workspace}/routes/{*path}`: create or replace
/// a route file and re-run its lifecycle.
///
/// # Errors
/// [`GatewayError::InvalidRequest`] outside `routes/`; lifecycle failures as
/// [`GatewayError::Host`] listing every failed step.
pub async fn write_route(
    State(host): State<Host>,
    Path((workspace, path)): Path<(String, String)>,
    Json(body): Json<WriteRouteBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let (workspace, path) = route_target(&workspace, &path)?;
    host.write_script(&workspace, &path, &body.file).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /pub-dev/workspace/{workspace}/routes/{*path}`: remove a route
/// file after cleaning up its module.
///
/// # Errors
/// As for [`write_route`]; [`GatewayError::Host`] with `NotFound` if the
/// file does not exist.
pub async fn delete_route(
    State(host): State<Host>,
    Path((workspace, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, GatewayError> {
    let (workspace, path) = route_target(&workspace, &path)?;
    host.delete_script(&workspace, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn route_target(workspace: &str, path: &str) -> Result<(WorkspaceId, ScriptPath), GatewayError> {
    let workspace = WorkspaceId::new(workspace)?;
    let path = ScriptPath::new(path)?;
    let route = path
        .as_str()
        .strip_prefix(ROUTES_PREFIX)
        .filter(|route| !route.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest(format!("only files under {ROUTES_PREFIX} can be edited")))?;
    Ok((workspace, ScriptPath::new(route)?))
}

/// JSON when it parses, otherwise the raw text; `null` when empty.
fn parse_body(bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn render(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Page(html) => Html(html).into_response(),
        Outcome::Static(asset) => ([(header::CONTENT_TYPE, asset.content_type())], asset.bytes).into_response(),
        Outcome::Api(resp) => render_api(resp),
    }
}

fn render_api(resp: EndpointResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK);
    let mut response = if status == StatusCode::NO_CONTENT {
        status.into_response()
    } else {
        (status, Json(resp.data)).into_response()
    };
    for (name, value) in resp.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid response header"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest};
    use pubdev_host::{HostConfig, MemoryWorkspaceStore, QuickJsBackend};
    use tower::ServiceExt;

    fn ws(name: &str) -> WorkspaceId {
        match WorkspaceId::new(name) {
            Ok(id) => id,
            Err(e) => panic!("bad workspace id: {e}"),
        }
    }

    fn path(p: &str) -> ScriptPath {
        match ScriptPath::new(p) {
            Ok(path) => path,
            Err(e) => panic!("bad path: {e}"),
        }
    }

    fn test_host() -> Host {
        let w = ws("demo");
        let store = MemoryWorkspaceStore::new()
            .with_route(&w, &path("index.html"), "<h1>demo</h1>")
            .with_route(
                &w,
                &path("echo.js"),
                "module.exports = { post(req) { return { status: 201, data: req, headers: { 'x-echo': 'yes' } }; }, get() {} };",
            )
            .with_route(&w, &path("chat.js"), "module.exports = { message() {} };")
            .with_static(&w, &path("app.css"), "body{}");
        Arc::new(ExecutionHost::new(HostConfig::default(), Arc::new(QuickJsBackend::new()), Arc::new(store)))
    }

    fn request(method: &str, uri: &str, body: Body) -> HttpRequest<Body> {
        match HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
        {
            Ok(r) => r,
            Err(e) => panic!("failed to build request: {e}"),
        }
    }

    async fn send(app: Router, req: HttpRequest<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let resp = match app.oneshot(req).await {
            Ok(r) => r,
            Err(e) => panic!("handler error: {e}"),
        };
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = match axum::body::to_bytes(resp.into_body(), 64 * 1024).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        (status, headers, bytes)
    }

    fn json(bytes: &Bytes) -> Value {
        match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => panic!("invalid JSON: {e}"),
        }
    }

    #[tokio::test]
    async fn workspace_index_is_served_as_html() {
        for uri in ["/pub-dev/demo", "/pub-dev/demo/"] {
            let (status, headers, bytes) = send(create_router(test_host()), request("GET", uri, Body::empty())).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert!(
                headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("text/html")),
                "{uri}: page must be html"
            );
            assert_eq!(&bytes[..], b"<h1>demo</h1>");
        }
    }

    #[tokio::test]
    async fn api_handler_receives_method_query_and_body() {
        let app = create_router(test_host());
        let req = request("POST", "/pub-dev/demo/echo?x=1", Body::from(r#"{"n":2}"#));
        let (status, headers, bytes) = send(app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers.get("x-echo").and_then(|v| v.to_str().ok()), Some("yes"));
        assert_eq!(
            json(&bytes),
            serde_json::json!({ "method": "POST", "path": "echo", "query": { "x": "1" }, "body": { "n": 2 } })
        );
    }

    #[tokio::test]
    async fn handler_returning_nothing_is_no_content() {
        let app = create_router(test_host());
        let (status, _, bytes) = send(app, request("GET", "/pub-dev/demo/echo", Body::empty())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn static_assets_carry_their_mime_type() {
        let app = create_router(test_host());
        let (status, headers, bytes) = send(app, request("GET", "/pub-dev/demo/app.css", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()), Some("text/css"));
        assert_eq!(&bytes[..], b"body{}");
    }

    #[tokio::test]
    async fn unknown_paths_verbs_and_gateway_modules_map_to_status_codes() {
        let cases = [
            ("GET", "/pub-dev/demo/missing", StatusCode::NOT_FOUND),
            ("GET", "/pub-dev/nobody/echo", StatusCode::NOT_FOUND),
            ("PUT", "/pub-dev/demo/echo", StatusCode::METHOD_NOT_ALLOWED),
            ("GET", "/pub-dev/demo/chat", StatusCode::METHOD_NOT_ALLOWED),
        ];
        let host = test_host();
        for (method, uri, expected) in cases {
            let (status, _, bytes) = send(create_router(Arc::clone(&host)), request(method, uri, Body::empty())).await;
            assert_eq!(status, expected, "{method} {uri}");
            assert!(json(&bytes)["kind"].is_string(), "{method} {uri}: error body must carry a kind");
        }
    }

    #[tokio::test]
    async fn upgrade_without_an_open_gateway_is_not_found() {
        let app = create_router(test_host());
        let req = match HttpRequest::builder()
            .uri("/pub-dev/demo/chat")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
        {
            Ok(r) => r,
            Err(e) => panic!("failed to build request: {e}"),
        };
        let (status, _, _) = send(app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_and_delete_edit_routes() {
        let host = test_host();
        let body = Body::from(r#"{"file":"module.exports = { get() { return 'fresh'; } };"}"#);
        let (status, _, _) = send(
            create_router(Arc::clone(&host)),
            request("PATCH", "/pub-dev/workspace/demo/routes/api/new.js", body),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, bytes) =
            send(create_router(Arc::clone(&host)), request("GET", "/pub-dev/demo/api/new", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&bytes), serde_json::json!("fresh"));

        let (status, _, _) = send(
            create_router(Arc::clone(&host)),
            request("DELETE", "/pub-dev/workspace/demo/routes/api/new.js", Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) =
            send(create_router(Arc::clone(&host)), request("GET", "/pub-dev/demo/api/new", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edits_outside_routes_are_rejected() {
        let body = Body::from(r#"{"file":"x"}"#);
        let (status, _, _) = send(
            create_router(test_host()),
            request("PATCH", "/pub-dev/workspace/demo/public/app.css", body),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failing_setup_is_reported_after_the_write() {
        let host = test_host();
        let body = Body::from(r#"{"file":"require('fs'); module.exports = {};"}"#);
        let (status, _, bytes) = send(
            create_router(Arc::clone(&host)),
            request("PATCH", "/pub-dev/workspace/demo/routes/broken.js", body),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(&bytes)["kind"], "CapabilityNotFound");
    }

    #[test]
    fn body_parsing_prefers_json() {
        assert_eq!(parse_body(&Bytes::new()), Value::Null);
        assert_eq!(parse_body(&Bytes::from_static(b"{\"a\":1}")), serde_json::json!({ "a": 1 }));
        assert_eq!(parse_body(&Bytes::from_static(b"plain")), Value::String("plain".to_owned()));
    }
}
