//! Sandboxed execution host for workspace endpoints.
//!
//! Every workspace runs its route scripts in a dedicated QuickJS runtime on
//! its own worker thread. Scripts reach the relational store, the document
//! store and the websocket gateway only through `require`, which resolves
//! against a typed capability registry. One [`GatewayMultiplexer`] fronts
//! every workspace's gateway.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod bridge;
pub mod capability;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod multiplexer;
pub mod quickjs;
pub mod worker;
pub mod workspace;

pub use backend::{ModuleInfo, Sandbox, ScriptBackend};
pub use bridge::Bridge;
pub use capability::{Capability, CapabilityFactory, CapabilityInstance, CapabilityRegistry, WorkspaceCapabilities};
pub use config::HostConfig;
pub use dispatch::{resolve, EndpointRequest, Resolution};
pub use error::HostError;
pub use host::{ExecutionHost, SetupReport};
pub use multiplexer::{ClientSender, Gateway, GatewayHandler, GatewayMultiplexer, Outbound, CLOSE_REASON};
pub use quickjs::QuickJsBackend;
pub use worker::SandboxHandle;
pub use workspace::{FsWorkspaceStore, MemoryWorkspaceStore, WorkspaceStore};

#[cfg(test)]
mod tests {
    //! Host lifecycle tests against a scripted backend, no JavaScript
    //! involved. A module's source is a JSON description of what it exports
    //! and which calls fail.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use pubdev_core::{ErrorKind, Outcome, ScriptPath, WorkspaceId};
    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::*;

    #[derive(Debug, Clone, Default, Deserialize)]
    struct Script {
        #[serde(default)]
        exports: Vec<String>,
        #[serde(default)]
        fail: Vec<String>,
        #[serde(default)]
        require: Vec<String>,
        #[serde(default)]
        returns: Value,
    }

    type Journal = Arc<Mutex<Vec<String>>>;

    fn record(journal: &Journal, entry: String) {
        match journal.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(e) => panic!("journal poisoned: {e}"),
        }
    }

    struct ScriptedBackend {
        journal: Journal,
        started: Journal,
        // Sandbox creation for the workspace named `slow` sleeps this long.
        slow_start: Duration,
    }

    struct ScriptedSandbox {
        bridge: Bridge,
        journal: Journal,
        modules: HashMap<ScriptPath, Script>,
    }

    impl ScriptBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn create_sandbox(
            &self,
            workspace: &WorkspaceId,
            bridge: Bridge,
            _config: &HostConfig,
        ) -> Result<Box<dyn Sandbox>, HostError> {
            if workspace.as_str() == "slow" {
                std::thread::sleep(self.slow_start);
            }
            record(&self.started, workspace.to_string());
            Ok(Box::new(ScriptedSandbox { bridge, journal: Arc::clone(&self.journal), modules: HashMap::new() }))
        }
    }

    fn script_error(path: &ScriptPath, message: &str) -> HostError {
        HostError::Script { path: path.to_string(), kind: ErrorKind::Script, message: message.to_owned() }
    }

    impl Sandbox for ScriptedSandbox {
        fn load(&mut self, path: &ScriptPath, source: &str, _budget: Duration) -> Result<ModuleInfo, HostError> {
            let script: Script = serde_json::from_str(source).map_err(|e| script_error(path, &e.to_string()))?;
            record(&self.journal, format!("load {path}"));
            for capability in &script.require {
                self.bridge.call(path, capability, "resolve", Value::Null)?;
            }
            let info = ModuleInfo::new(script.exports.clone());
            self.modules.insert(path.clone(), script);
            Ok(info)
        }

        fn call(&mut self, path: &ScriptPath, function: &str, args: Vec<Value>, _budget: Duration) -> Result<Value, HostError> {
            let script = self.modules.get(path).ok_or_else(|| script_error(path, "not loaded"))?;
            record(&self.journal, format!("{function} {path}"));
            if script.fail.iter().any(|f| f == function) {
                return Err(script_error(path, &format!("{function} failed")));
            }
            Ok(if script.returns.is_null() { json!({ "args": args }) } else { script.returns.clone() })
        }

        fn unload(&mut self, path: &ScriptPath) {
            record(&self.journal, format!("unload {path}"));
            self.modules.remove(path);
        }

        fn shared_state(&mut self) -> Result<Value, HostError> {
            Ok(json!({}))
        }
    }

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

    fn host(store: MemoryWorkspaceStore) -> (ExecutionHost, Journal) {
        let journal = Journal::default();
        let backend =
            Arc::new(ScriptedBackend { journal: Arc::clone(&journal), started: Journal::default(), slow_start: Duration::ZERO });
        (ExecutionHost::new(HostConfig::default(), backend, Arc::new(store)), journal)
    }

    fn entries(journal: &Journal) -> Vec<String> {
        match journal.lock() {
            Ok(entries) => entries.clone(),
            Err(e) => panic!("journal poisoned: {e}"),
        }
    }

    #[tokio::test]
    async fn api_request_calls_the_verb_handler_once_loaded() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new().with_route(&w, &path("todos.js"), r#"{"exports":["get","del"]}"#);
        let (host, journal) = host(store);

        for _ in 0..2 {
            let outcome = host
                .evaluate_request(&w, &path("todos"), EndpointRequest::new("GET", &path("todos")))
                .await;
            match outcome {
                Ok(Outcome::Api(resp)) => assert_eq!(resp.status, 200),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        if let Err(e) = host.evaluate_request(&w, &path("todos"), EndpointRequest::new("DELETE", &path("todos"))).await {
            panic!("delete failed: {e}");
        }
        assert_eq!(entries(&journal), vec!["load todos.js", "get todos.js", "get todos.js", "del todos.js"]);
    }

    #[tokio::test]
    async fn missing_handler_and_unknown_verb_are_not_allowed() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new().with_route(&w, &path("todos.js"), r#"{"exports":["get"]}"#);
        let (host, _) = host(store);
        for verb in ["POST", "OPTIONS"] {
            let result = host.evaluate_request(&w, &path("todos"), EndpointRequest::new(verb, &path("todos"))).await;
            assert!(matches!(result, Err(HostError::MethodNotAllowed { .. })), "{verb}: {result:?}");
        }
    }

    #[tokio::test]
    async fn gateway_modules_refuse_http_and_open_their_gateway() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new()
            .with_route(&w, &path("chat.js"), r#"{"exports":["get","message","setup"]}"#);
        let (host, journal) = host(store);

        if let Err(e) = host.setup_endpoint(&w, &path("chat.js")).await {
            panic!("setup failed: {e}");
        }
        assert!(host.multiplexer().resolve(&w, &path("chat")).is_some(), "gateway must be open");
        let result = host.evaluate_request(&w, &path("chat"), EndpointRequest::new("GET", &path("chat"))).await;
        assert!(matches!(result, Err(HostError::MethodNotAllowed { .. })));
        assert_eq!(entries(&journal), vec!["load chat.js", "setup chat.js"]);

        if let Err(e) = host.cleanup_endpoint(&w, &path("chat.js")).await {
            panic!("cleanup failed: {e}");
        }
        assert!(host.multiplexer().get(&w).is_none(), "cleanup must release the gateway");
    }

    #[tokio::test]
    async fn setup_collects_gateway_and_hook_failures() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new()
            .with_route(&w, &path("a.js"), r#"{"exports":["message"]}"#)
            .with_route(&w, &path("b.js"), r#"{"exports":["message","setup"],"fail":["setup"]}"#);
        let (host, _) = host(store);
        if let Err(e) = host.setup_endpoint(&w, &path("a.js")).await {
            panic!("first gateway failed: {e}");
        }
        match host.setup_endpoint(&w, &path("b.js")).await {
            Err(e @ HostError::Collected(_)) => {
                assert_eq!(e.kind(), ErrorKind::GatewayConflict);
                assert_eq!(e.messages().len(), 2);
            }
            other => panic!("expected collected errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn require_of_unknown_capability_fails_the_load() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new().with_route(&w, &path("a.js"), r#"{"exports":["get"],"require":["fs"]}"#);
        let (host, _) = host(store);
        let result = host.setup_endpoint(&w, &path("a.js")).await;
        assert!(matches!(result, Err(HostError::CapabilityNotFound(_))), "{result:?}");
    }

    #[tokio::test]
    async fn write_script_cleans_up_old_then_sets_up_new() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new()
            .with_route(&w, &path("a.js"), r#"{"exports":["get","cleanup"],"returns":1}"#);
        let (host, journal) = host(store);
        if let Err(e) = host.setup_endpoint(&w, &path("a.js")).await {
            panic!("setup failed: {e}");
        }
        if let Err(e) = host.write_script(&w, &path("a.js"), r#"{"exports":["get","setup"],"returns":2}"#).await {
            panic!("write failed: {e}");
        }
        assert_eq!(
            entries(&journal),
            vec!["load a.js", "cleanup a.js", "unload a.js", "load a.js", "setup a.js"]
        );
        match host.evaluate_request(&w, &path("a"), EndpointRequest::new("GET", &path("a"))).await {
            Ok(Outcome::Api(resp)) => assert_eq!(resp.data, json!(2)),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_script_reports_both_failures_but_keeps_the_file() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new()
            .with_route(&w, &path("a.js"), r#"{"exports":["cleanup"],"fail":["cleanup"]}"#);
        let (host, _) = host(store);
        let result = host.write_script(&w, &path("a.js"), r#"{"exports":["setup"],"fail":["setup"]}"#).await;
        match result {
            Err(HostError::Lifecycle { cleanup: Some(_), setup: Some(_) }) => {}
            other => panic!("expected both lifecycle errors, got {other:?}"),
        }
        let stored = host.store().read_route(&w, &path("a.js")).await;
        assert_eq!(stored.ok().as_deref(), Some(r#"{"exports":["setup"],"fail":["setup"]}"#));
    }

    #[tokio::test]
    async fn delete_script_runs_cleanup_and_removes_the_route() {
        let w = ws("w");
        let store = MemoryWorkspaceStore::new().with_route(&w, &path("a.js"), r#"{"exports":["get","cleanup"]}"#);
        let (host, journal) = host(store);
        if let Err(e) = host.delete_script(&w, &path("a.js")).await {
            panic!("delete failed: {e}");
        }
        // Unload is queued without a reply; any later job flushes it.
        if let Err(e) = host.shared_state(&w).await {
            panic!("shared state failed: {e}");
        }
        assert_eq!(entries(&journal), vec!["load a.js", "cleanup a.js", "unload a.js"]);
        let result = host.evaluate_request(&w, &path("a"), EndpointRequest::new("GET", &path("a"))).await;
        assert!(matches!(result, Err(HostError::NotFound(_))));
        assert!(matches!(host.delete_script(&w, &path("a.js")).await, Err(HostError::NotFound(_))));
    }

    #[tokio::test]
    async fn bulk_setup_reports_failures_without_stopping() {
        let (a, b) = (ws("a"), ws("b"));
        let store = MemoryWorkspaceStore::new()
            .with_route(&a, &path("ok.js"), r#"{"exports":["setup"]}"#)
            .with_route(&a, &path("broken.js"), "not json")
            .with_route(&b, &path("api/x.js"), r#"{"exports":["get"]}"#)
            .with_route(&b, &path("page.html"), "<p/>");
        let (host, _) = host(store);
        let report = host.setup_endpoints(&[a.clone(), b.clone()]).await;
        assert_eq!(report.ready.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1, path("broken.js"));
        assert_eq!(host.active_count().await, 2);

        assert!(host.discard_workspace(&a).await);
        assert!(!host.discard_workspace(&a).await);
        assert_eq!(host.active_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_workspace_is_not_found() {
        let (host, _) = host(MemoryWorkspaceStore::new());
        let result = host.evaluate_request(&ws("ghost"), &path(""), EndpointRequest::new("GET", &path(""))).await;
        assert!(matches!(result, Err(HostError::NotFound(_))));
        assert_eq!(host.active_count().await, 0, "no sandbox for unknown workspaces");
    }

    #[tokio::test]
    async fn slow_sandbox_start_does_not_hold_up_other_workspaces() {
        let started = Journal::default();
        let backend = Arc::new(ScriptedBackend {
            journal: Journal::default(),
            started: Arc::clone(&started),
            slow_start: Duration::from_millis(500),
        });
        let host = Arc::new(ExecutionHost::new(HostConfig::default(), backend, Arc::new(MemoryWorkspaceStore::new())));

        let slow = {
            let host = Arc::clone(&host);
            tokio::spawn(async move {
                let (slow_a, slow_b) = (ws("slow"), ws("slow"));
                let (first, second) = tokio::join!(host.shared_state(&slow_a), host.shared_state(&slow_b));
                first.and(second)
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        match tokio::time::timeout(Duration::from_millis(300), host.shared_state(&ws("fast"))).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => panic!("fast workspace failed: {e}"),
            Err(_) => panic!("fast workspace waited on the slow start"),
        }
        match slow.await {
            Ok(Ok(_)) => {}
            other => panic!("slow workspace failed: {other:?}"),
        }
        assert_eq!(entries(&started), vec!["fast", "slow"], "concurrent lookups share one sandbox");
        assert_eq!(host.active_count().await, 2);
    }
}
