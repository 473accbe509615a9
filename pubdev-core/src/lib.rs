//! Core types for the pubdev multi-tenant endpoint host.
//!
//! Defines the identifiers shared by every engine (workspaces, script paths,
//! gateway clients), the HTTP verb to handler mapping, the response shapes
//! handed to the transport, and the error taxonomy.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod directory;
pub mod error;
pub mod id;
pub mod method;
pub mod response;

pub use directory::Directory;
pub use error::{CoreError, ErrorKind};
pub use id::{ClientId, ScriptPath, WorkspaceId};
pub use method::HttpMethod;
pub use response::{EndpointResponse, Outcome, StaticResource};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> ScriptPath {
        match ScriptPath::new(p) {
            Ok(p) => p,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn workspace_id_valid_names_accept() {
        assert!(WorkspaceId::new("todo-app").is_ok());
        assert!(WorkspaceId::new("w").is_ok());
    }

    #[test]
    fn workspace_id_invalid_names_reject() {
        assert!(WorkspaceId::new("").is_err());
        assert!(WorkspaceId::new("a/b").is_err());
        assert!(WorkspaceId::new("..").is_err());
        assert!(WorkspaceId::new("a\\b").is_err());
    }

    #[test]
    fn script_path_normalizes_separators() {
        assert_eq!(path("/api//todos/").as_str(), "api/todos");
        assert_eq!(path("./index.js").as_str(), "index.js");
        assert!(path("/").is_root());
    }

    #[test]
    fn script_path_rejects_parent_segments() {
        assert!(ScriptPath::new("../other/secret.js").is_err());
        assert!(ScriptPath::new("a/../../b").is_err());
    }

    #[test]
    fn script_path_suffix_and_child_build_candidates() {
        let p = path("todos");
        assert_eq!(p.with_suffix(".js").as_str(), "todos.js");
        assert_eq!(p.child("index.js").as_str(), "todos/index.js");
        assert_eq!(ScriptPath::root().child("index.html").as_str(), "index.html");
    }

    #[test]
    fn script_path_extension_ignores_dotfiles() {
        assert_eq!(path("a/chat.js").extension(), Some("js"));
        assert!(path("a/chat.js").is_script());
        assert_eq!(path(".hidden").extension(), None);
        assert_eq!(path("README").extension(), None);
    }

    #[test]
    fn http_method_delete_maps_to_del() {
        assert_eq!(HttpMethod::parse("DELETE").map(HttpMethod::handler_name), Some("del"));
        assert_eq!(HttpMethod::parse("get").map(HttpMethod::handler_name), Some("get"));
        assert_eq!(HttpMethod::parse("OPTIONS"), None);
        assert_eq!(HttpMethod::parse("HEAD"), None);
    }

    #[test]
    fn endpoint_response_structured_value_is_kept() {
        let resp = EndpointResponse::from_handler_value(json!({
            "status": 201,
            "data": {"id": "x"},
            "headers": {"x-extra": "1"}
        }));
        assert_eq!(resp.status, 201);
        assert_eq!(resp.data, json!({"id": "x"}));
        assert_eq!(resp.headers.get("x-extra").map(String::as_str), Some("1"));
    }

    #[test]
    fn endpoint_response_plain_value_is_wrapped() {
        let resp = EndpointResponse::from_handler_value(json!([1, 2]));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.data, json!([1, 2]));

        let resp = EndpointResponse::from_handler_value(json!({"status": "ok"}));
        assert_eq!(resp.status, 200, "non-numeric status is plain data");
    }

    #[test]
    fn endpoint_response_null_is_no_content() {
        let resp = EndpointResponse::from_handler_value(serde_json::Value::Null);
        assert_eq!(resp.status, 204);
    }

    #[test]
    fn static_resource_content_type_by_extension() {
        assert_eq!(StaticResource::new("a/logo.PNG", vec![]).content_type(), "image/png");
        assert_eq!(StaticResource::new("style.css", vec![]).content_type(), "text/css");
        assert_eq!(
            StaticResource::new("blob", vec![]).content_type(),
            "application/octet-stream"
        );
    }

    #[test]
    fn directory_scripts_walks_tree() {
        let tree = Directory::new(
            "routes",
            vec!["index.js".to_owned(), "page.html".to_owned()],
            vec![Directory::new("api", vec!["todos.js".to_owned()], vec![])],
        );
        let scripts: Vec<String> = tree.scripts().into_iter().map(String::from).collect();
        assert_eq!(scripts, vec!["index.js".to_owned(), "api/todos.js".to_owned()]);
    }

    #[test]
    fn error_kind_status_codes_map_correctly() {
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::MethodNotAllowed.status_code(), 405);
        assert_eq!(ErrorKind::GatewayConflict.status_code(), 409);
        assert_eq!(ErrorKind::SchemaValidationError.status_code(), 400);
        assert_eq!(ErrorKind::Timeout.status_code(), 504);
        assert_eq!(ErrorKind::TableNotFound.status_code(), 500);
    }

    #[test]
    fn error_kind_round_trips_through_its_name() {
        let kind: ErrorKind = match serde_json::from_value(json!("GatewayConflict")) {
            Ok(k) => k,
            Err(e) => panic!("invalid kind: {e}"),
        };
        assert_eq!(kind, ErrorKind::GatewayConflict);
        assert_eq!(kind.to_string(), "GatewayConflict");
    }
}
