//! QuickJS-backed sandboxes.
//!
//! Each workspace gets its own [`rquickjs::Runtime`], so heaps, globals and
//! module caches never mix between tenants. The runtime carries a memory
//! limit and an interrupt handler that aborts any evaluation running past its
//! deadline.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pubdev_core::{ErrorKind, ScriptPath, WorkspaceId};
use rquickjs::{CatchResultExt, Context, Function, Runtime};
use serde_json::Value;

use crate::bridge::Envelope;
use crate::{Bridge, HostConfig, HostError, ModuleInfo, Sandbox, ScriptBackend};

const PRELUDE: &str = include_str!("prelude.js");

/// Native stack ceiling per runtime.
const MAX_STACK_BYTES: usize = 1024 * 1024;

/// Script backend running tenant modules on embedded QuickJS.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickJsBackend;

impl QuickJsBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ScriptBackend for QuickJsBackend {
    fn name(&self) -> &'static str {
        "quickjs"
    }

    fn create_sandbox(
        &self,
        workspace: &WorkspaceId,
        bridge: Bridge,
        config: &HostConfig,
    ) -> Result<Box<dyn Sandbox>, HostError> {
        let runtime = Runtime::new().map_err(runtime_error)?;
        runtime.set_memory_limit(config.memory_limit_bytes);
        runtime.set_max_stack_size(MAX_STACK_BYTES);

        let deadline = Deadline::default();
        let watched = deadline.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || watched.expired())));

        let context = Context::full(&runtime).map_err(runtime_error)?;
        context.with(|ctx| {
            let host_bridge = bridge.clone();
            let host = Function::new(
                ctx.clone(),
                move |script: String, capability: String, op: String, args: String| -> String {
                    host_bridge.call_json(&script, &capability, &op, &args)
                },
            )?;
            let log = Function::new(ctx.clone(), move |script: String, level: String, message: String| {
                bridge.log(&script, &level, &message);
            })?;
            let globals = ctx.globals();
            globals.set("__pubdev_host", host)?;
            globals.set("__pubdev_log", log)?;
            ctx.eval::<(), _>(PRELUDE)
        })
        .map_err(runtime_error)?;

        tracing::debug!(workspace = %workspace, memory_limit = config.memory_limit_bytes, "quickjs sandbox created");
        Ok(Box::new(QuickJsSandbox { context, deadline, _runtime: runtime }))
    }
}

fn runtime_error(e: rquickjs::Error) -> HostError {
    HostError::Runtime(e.to_string())
}

/// Deadline shared with the runtime's interrupt handler.
#[derive(Debug, Clone, Default)]
struct Deadline(Arc<Mutex<Option<Instant>>>);

impl Deadline {
    fn set(&self, at: Option<Instant>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = at;
        }
    }

    fn expired(&self) -> bool {
        self.0
            .lock()
            .ok()
            .and_then(|slot| *slot)
            .is_some_and(|at| Instant::now() >= at)
    }
}

/// One workspace's QuickJS runtime and context.
pub struct QuickJsSandbox {
    context: Context,
    deadline: Deadline,
    // The context keeps the runtime alive; held to make ownership explicit.
    _runtime: Runtime,
}

impl QuickJsSandbox {
    /// Evaluate a call into the prelude and decode its envelope.
    fn run(&self, path: &ScriptPath, code: &str, budget: Duration) -> Result<Value, HostError> {
        self.deadline.set(Some(Instant::now() + budget));
        let evaluated = self.context.with(|ctx| {
            ctx.eval::<String, _>(code)
                .catch(&ctx)
                .map_err(|e| e.to_string())
        });
        let timed_out = self.deadline.expired();
        self.deadline.set(None);

        match evaluated {
            Ok(envelope) => decode(path, &envelope),
            Err(_) if timed_out => Err(HostError::Timeout { path: path.to_string(), budget_ms: budget.as_millis() }),
            Err(message) => Err(HostError::Script { path: path.to_string(), kind: ErrorKind::Script, message }),
        }
    }
}

fn decode(path: &ScriptPath, envelope: &str) -> Result<Value, HostError> {
    let envelope: Envelope = serde_json::from_str(envelope).map_err(|e| HostError::Script {
        path: path.to_string(),
        kind: ErrorKind::Script,
        message: format!("unreadable result: {e}"),
    })?;
    match envelope {
        Envelope::Ok(value) => Ok(value),
        Envelope::Err(fault) => Err(HostError::Script {
            path: path.to_string(),
            kind: fault.error_kind().unwrap_or(ErrorKind::Script),
            message: fault.message,
        }),
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

impl Sandbox for QuickJsSandbox {
    fn load(&mut self, path: &ScriptPath, source: &str, budget: Duration) -> Result<ModuleInfo, HostError> {
        let code = format!("__pubdev.load({}, {})", quote(path.as_str()), quote(source));
        let value = self.run(path, &code, budget)?;
        serde_json::from_value(value).map_err(|e| HostError::Script {
            path: path.to_string(),
            kind: ErrorKind::Internal,
            message: format!("unreadable module description: {e}"),
        })
    }

    fn call(&mut self, path: &ScriptPath, function: &str, args: Vec<Value>, budget: Duration) -> Result<Value, HostError> {
        let args = Value::Array(args).to_string();
        let code = format!("__pubdev.invoke({}, {}, {})", quote(path.as_str()), quote(function), quote(&args));
        self.run(path, &code, budget)
    }

    fn unload(&mut self, path: &ScriptPath) {
        let code = format!("__pubdev.unload({})", quote(path.as_str()));
        if let Err(e) = self.run(path, &code, Duration::from_secs(1)) {
            tracing::warn!(path = %path, error = %e, "module unload failed");
        }
    }

    fn shared_state(&mut self) -> Result<Value, HostError> {
        self.run(&ScriptPath::root(), "__pubdev.sharedState()", Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CapabilityRegistry, GatewayMultiplexer, WorkspaceCapabilities};

    fn sandbox() -> Box<dyn Sandbox> {
        let workspace = match WorkspaceId::new("w1") {
            Ok(id) => id,
            Err(e) => panic!("bad workspace id: {e}"),
        };
        let registry = Arc::new(CapabilityRegistry::standard(Arc::new(GatewayMultiplexer::new())));
        let bridge = Bridge::new(Arc::new(WorkspaceCapabilities::new(workspace.clone(), registry)));
        match QuickJsBackend::new().create_sandbox(&workspace, bridge, &HostConfig::default()) {
            Ok(s) => s,
            Err(e) => panic!("sandbox creation failed: {e}"),
        }
    }

    fn path(p: &str) -> ScriptPath {
        match ScriptPath::new(p) {
            Ok(path) => path,
            Err(e) => panic!("bad path: {e}"),
        }
    }

    const BUDGET: Duration = Duration::from_secs(2);

    #[test]
    fn load_reports_exported_functions() {
        let mut sandbox = sandbox();
        let info = match sandbox.load(&path("a.js"), "module.exports = { get() { return 1; }, version: 2 };", BUDGET) {
            Ok(info) => info,
            Err(e) => panic!("load failed: {e}"),
        };
        assert_eq!(info, ModuleInfo::new(["get"]));
    }

    #[test]
    fn call_passes_json_arguments_and_returns_json() {
        let mut sandbox = sandbox();
        let source = "module.exports = { post(req) { return { status: 201, data: req.body.n * 2 }; } };";
        if let Err(e) = sandbox.load(&path("a.js"), source, BUDGET) {
            panic!("load failed: {e}");
        }
        let result = sandbox.call(&path("a.js"), "post", vec![serde_json::json!({ "body": { "n": 21 } })], BUDGET);
        match result {
            Ok(v) => assert_eq!(v, serde_json::json!({ "status": 201, "data": 42 })),
            Err(e) => panic!("call failed: {e}"),
        }
    }

    #[test]
    fn syntax_errors_are_script_errors() {
        let mut sandbox = sandbox();
        let result = sandbox.load(&path("bad.js"), "module.exports = {", BUDGET);
        match result {
            Err(e) => assert_eq!(e.kind(), ErrorKind::Script),
            Ok(info) => panic!("broken module loaded: {info:?}"),
        }
    }

    #[test]
    fn engine_error_kinds_survive_the_script() {
        let mut sandbox = sandbox();
        let source = r#"
            const db = require('db:sql');
            module.exports = { get() { return db.select(db.ALL).from('missing').exec(); } };
        "#;
        if let Err(e) = sandbox.load(&path("a.js"), source, BUDGET) {
            panic!("load failed: {e}");
        }
        match sandbox.call(&path("a.js"), "get", vec![], BUDGET) {
            Err(e) => assert_eq!(e.kind(), ErrorKind::TableNotFound),
            Ok(v) => panic!("select on missing table returned {v}"),
        }
    }

    #[test]
    fn runaway_code_is_interrupted() {
        let mut sandbox = sandbox();
        if let Err(e) = sandbox.load(&path("spin.js"), "module.exports = { get() { for (;;) {} } };", BUDGET) {
            panic!("load failed: {e}");
        }
        let result = sandbox.call(&path("spin.js"), "get", vec![], Duration::from_millis(50));
        assert!(matches!(result, Err(HostError::Timeout { .. })), "got {result:?}");

        // The runtime stays usable after an interrupt.
        if let Err(e) = sandbox.load(&path("ok.js"), "module.exports = { get() { return 'fine'; } };", BUDGET) {
            panic!("load after interrupt failed: {e}");
        }
    }

    #[test]
    fn shared_state_is_visible_across_modules_and_unload_forgets_exports() {
        let mut sandbox = sandbox();
        let writer = "shared.count = (shared.count || 0) + 1; module.exports = { get() { return shared.count; } };";
        for name in ["a.js", "b.js"] {
            if let Err(e) = sandbox.load(&path(name), writer, BUDGET) {
                panic!("load failed: {e}");
            }
        }
        match sandbox.shared_state() {
            Ok(state) => assert_eq!(state, serde_json::json!({ "count": 2 })),
            Err(e) => panic!("shared state failed: {e}"),
        }
        sandbox.unload(&path("a.js"));
        match sandbox.call(&path("a.js"), "get", vec![], BUDGET) {
            Err(e) => assert_eq!(e.kind(), ErrorKind::Internal),
            Ok(v) => panic!("unloaded module answered {v}"),
        }
    }
}
