//! Request resolution and evaluation.
//!
//! A request path resolves, in order, to the first of: `<path>.html`,
//! `<path>/index.html`, `<path>.js`, `<path>/index.js` among the workspace
//! routes, then `<path>` among its public assets. The empty path only
//! considers the `index.*` forms and `index.html` in public.

use std::collections::BTreeMap;

use pubdev_core::{EndpointResponse, HttpMethod, Outcome, ScriptPath, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ExecutionHost, HostError, WorkspaceStore};

/// What a request path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A route `.html` file served verbatim.
    Page(ScriptPath),
    /// A route script evaluated as an API or gateway module.
    Module(ScriptPath),
    /// A public asset.
    Static(ScriptPath),
}

/// The request as handed to an API handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointRequest {
    /// Upper-case HTTP verb.
    pub method: String,
    /// Path below the workspace, without a leading slash.
    pub path: String,
    /// Decoded query string.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Parsed JSON body, or the raw text, or `null` when empty.
    #[serde(default)]
    pub body: Value,
}

impl EndpointRequest {
    pub fn new(method: impl Into<String>, path: &ScriptPath) -> Self {
        Self { method: method.into(), path: path.to_string(), ..Self::default() }
    }

    #[must_use]
    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

/// Find what `path` names inside `workspace`.
///
/// # Errors
/// [`HostError::NotFound`] if nothing matches; store I/O errors.
pub async fn resolve(store: &dyn WorkspaceStore, workspace: &WorkspaceId, path: &ScriptPath) -> Result<Resolution, HostError> {
    let routes = if path.is_root() {
        vec![(path.child("index.html"), false), (path.child("index.js"), true)]
    } else {
        vec![
            (path.with_suffix(".html"), false),
            (path.child("index.html"), false),
            (path.with_suffix(".js"), true),
            (path.child("index.js"), true),
        ]
    };
    for (candidate, is_module) in routes {
        if store.is_route(workspace, &candidate).await? {
            return Ok(if is_module { Resolution::Module(candidate) } else { Resolution::Page(candidate) });
        }
    }
    let asset = if path.is_root() { path.child("index.html") } else { path.clone() };
    if store.is_static_resource(workspace, &asset).await? {
        return Ok(Resolution::Static(asset));
    }
    Err(HostError::NotFound(format!("{workspace}/{path}")))
}

impl ExecutionHost {
    /// Resolve and evaluate a request against a workspace.
    ///
    /// Pages and assets are returned as stored. For an API module the
    /// handler named after the verb (`get`, `post`, `put`, `del`, `patch`)
    /// is called with the request and its result shaped into an
    /// [`EndpointResponse`].
    ///
    /// # Errors
    /// [`HostError::NotFound`] for unknown workspaces and paths;
    /// [`HostError::MethodNotAllowed`] for gateway modules and missing
    /// handlers; otherwise whatever the handler raised.
    pub async fn evaluate_request(
        &self,
        workspace: &WorkspaceId,
        path: &ScriptPath,
        request: EndpointRequest,
    ) -> Result<Outcome, HostError> {
        let store = self.store().as_ref();
        if !store.exists(workspace).await? {
            return Err(HostError::NotFound(workspace.to_string()));
        }
        let resolution = resolve(store, workspace, path).await?;
        tracing::debug!(workspace = %workspace, path = %path, ?resolution, method = %request.method, "request resolved");

        match resolution {
            Resolution::Page(page) => Ok(Outcome::Page(store.read_route(workspace, &page).await?)),
            Resolution::Static(asset) => Ok(Outcome::Static(store.read_static_resource(workspace, &asset).await?)),
            Resolution::Module(module) => {
                let not_allowed = || HostError::MethodNotAllowed { method: request.method.clone(), path: module.to_string() };
                let method = HttpMethod::parse(&request.method).ok_or_else(not_allowed)?;
                let runtime = self.runtime(workspace).await?;
                let info = Self::load_module(&runtime, store, &module).await?;
                let handler = method.handler_name();
                if info.is_gateway() || !info.exports(handler) {
                    return Err(not_allowed());
                }
                let args = vec![serde_json::to_value(&request).map_err(|e| HostError::Runtime(e.to_string()))?];
                let value = runtime.sandbox.call(&module, handler, args).await?;
                Ok(Outcome::Api(EndpointResponse::from_handler_value(value)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryWorkspaceStore;

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

    async fn resolved(store: &MemoryWorkspaceStore, p: &str) -> Result<Resolution, HostError> {
        resolve(store, &ws("w"), &path(p)).await
    }

    #[tokio::test]
    async fn pages_win_over_modules_and_assets() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new()
            .with_route(&w, &path("todos.html"), "<p/>")
            .with_route(&w, &path("todos.js"), "")
            .with_static(&w, &path("todos"), "x");
        assert_eq!(resolved(&store, "todos").await.ok(), Some(Resolution::Page(path("todos.html"))));
    }

    #[tokio::test]
    async fn resolution_follows_the_documented_order() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new()
            .with_route(&w, &path("a/index.html"), "")
            .with_route(&w, &path("a.js"), "")
            .with_route(&w, &path("b.js"), "")
            .with_route(&w, &path("b/index.js"), "")
            .with_route(&w, &path("c/index.js"), "")
            .with_static(&w, &path("logo.png"), "png");
        assert_eq!(resolved(&store, "a").await.ok(), Some(Resolution::Page(path("a/index.html"))));
        assert_eq!(resolved(&store, "b").await.ok(), Some(Resolution::Module(path("b.js"))));
        assert_eq!(resolved(&store, "c").await.ok(), Some(Resolution::Module(path("c/index.js"))));
        assert_eq!(resolved(&store, "logo.png").await.ok(), Some(Resolution::Static(path("logo.png"))));
        assert!(matches!(resolved(&store, "nothing").await, Err(HostError::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_path_only_considers_index_forms() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new().with_route(&w, &path("index.js"), "");
        assert_eq!(resolved(&store, "").await.ok(), Some(Resolution::Module(path("index.js"))));

        let store = MemoryWorkspaceStore::new().with_static(&w, &path("index.html"), "<p/>");
        assert_eq!(resolved(&store, "").await.ok(), Some(Resolution::Static(path("index.html"))));

        let store = MemoryWorkspaceStore::new().with_route(&w, &path("other.js"), "");
        assert!(matches!(resolved(&store, "").await, Err(HostError::NotFound(_))));
    }

    #[test]
    fn request_serialises_for_handlers() {
        let request = EndpointRequest::new("POST", &path("todos"))
            .with_query(BTreeMap::from([("q".to_owned(), "1".to_owned())]))
            .with_body(serde_json::json!({ "title": "x" }));
        let value = match serde_json::to_value(&request) {
            Ok(v) => v,
            Err(e) => panic!("serialise failed: {e}"),
        };
        assert_eq!(
            value,
            serde_json::json!({ "method": "POST", "path": "todos", "query": { "q": "1" }, "body": { "title": "x" } })
        );
    }
}
