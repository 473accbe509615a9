//! Execution host: owns every workspace's sandbox and drives module
//! lifecycles.
//!
//! Modules are loaded lazily and cached per workspace until their file is
//! rewritten or deleted. Loading a gateway module (one exporting `message`)
//! wires the workspace's gateway to it; `setup` and `cleanup` hooks run on
//! load and before replacement.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pubdev_core::{ClientId, ScriptPath, WorkspaceId};
use serde_json::{json, Value};
use tokio::sync::{Mutex, OnceCell};

use crate::backend::{CLEANUP_HOOK, GATEWAY_EXPORT, SETUP_HOOK};
use crate::{
    Bridge, CapabilityRegistry, GatewayHandler, GatewayMultiplexer, HostConfig, HostError, ModuleInfo,
    SandboxHandle, ScriptBackend, WorkspaceCapabilities, WorkspaceStore,
};

/// Live state of one workspace.
pub(crate) struct WorkspaceRuntime {
    pub(crate) workspace: WorkspaceId,
    pub(crate) sandbox: SandboxHandle,
    pub(crate) capabilities: Arc<WorkspaceCapabilities>,
    modules: Mutex<HashMap<ScriptPath, ModuleInfo>>,
}

/// Result of a bulk [`ExecutionHost::setup_endpoints`] pass.
#[derive(Debug, Default)]
pub struct SetupReport {
    /// Scripts set up without error.
    pub ready: Vec<(WorkspaceId, ScriptPath)>,
    /// Scripts whose setup failed, with the error message.
    pub failed: Vec<(WorkspaceId, ScriptPath, String)>,
}

/// Hosts every workspace's endpoints.
///
/// All operations are safe to call concurrently. Evaluations within one
/// workspace are serialised on its sandbox; workspaces run in parallel.
pub struct ExecutionHost {
    config: HostConfig,
    backend: Arc<dyn ScriptBackend>,
    store: Arc<dyn WorkspaceStore>,
    registry: Arc<CapabilityRegistry>,
    multiplexer: Arc<GatewayMultiplexer>,
    runtimes: Mutex<HashMap<WorkspaceId, Arc<OnceCell<Arc<WorkspaceRuntime>>>>>,
}

impl ExecutionHost {
    /// Host with the standard capability set.
    #[must_use]
    pub fn new(config: HostConfig, backend: Arc<dyn ScriptBackend>, store: Arc<dyn WorkspaceStore>) -> Self {
        let multiplexer = Arc::new(GatewayMultiplexer::new());
        let registry = Arc::new(CapabilityRegistry::standard(Arc::clone(&multiplexer)));
        Self::with_registry(config, backend, store, registry, multiplexer)
    }

    /// Host with a custom capability registry. `multiplexer` must be the one
    /// the registry's gateway factory allocates from.
    #[must_use]
    pub fn with_registry(
        config: HostConfig,
        backend: Arc<dyn ScriptBackend>,
        store: Arc<dyn WorkspaceStore>,
        registry: Arc<CapabilityRegistry>,
        multiplexer: Arc<GatewayMultiplexer>,
    ) -> Self {
        Self { config, backend, store, registry, multiplexer, runtimes: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn WorkspaceStore> {
        &self.store
    }

    #[must_use]
    pub fn multiplexer(&self) -> &Arc<GatewayMultiplexer> {
        &self.multiplexer
    }

    /// Number of workspaces with a running sandbox.
    pub async fn active_count(&self) -> usize {
        self.runtimes.lock().await.values().filter(|cell| cell.initialized()).count()
    }

    /// The workspace's capabilities, starting its sandbox if needed.
    ///
    /// # Errors
    /// Propagates sandbox creation failures.
    pub async fn capabilities(&self, workspace: &WorkspaceId) -> Result<Arc<WorkspaceCapabilities>, HostError> {
        Ok(Arc::clone(&self.runtime(workspace).await?.capabilities))
    }

    /// Snapshot of the workspace's shared state object.
    ///
    /// # Errors
    /// Propagates sandbox failures.
    pub async fn shared_state(&self, workspace: &WorkspaceId) -> Result<Value, HostError> {
        self.runtime(workspace).await?.sandbox.shared_state().await
    }

    /// The workspace's runtime, starting it on first use. Only the slot
    /// lookup holds the host-wide lock; startup runs under the workspace's
    /// own cell so other workspaces are not held up.
    pub(crate) async fn runtime(&self, workspace: &WorkspaceId) -> Result<Arc<WorkspaceRuntime>, HostError> {
        let cell = Arc::clone(self.runtimes.lock().await.entry(workspace.clone()).or_default());
        let runtime = cell.get_or_try_init(|| self.start_runtime(workspace)).await?;
        Ok(Arc::clone(runtime))
    }

    async fn start_runtime(&self, workspace: &WorkspaceId) -> Result<Arc<WorkspaceRuntime>, HostError> {
        let capabilities = Arc::new(WorkspaceCapabilities::new(workspace.clone(), Arc::clone(&self.registry)));
        let sandbox = SandboxHandle::spawn(
            workspace.clone(),
            Arc::clone(&self.backend),
            Bridge::new(Arc::clone(&capabilities)),
            self.config.clone(),
        )
        .await?;
        Ok(Arc::new(WorkspaceRuntime {
            workspace: workspace.clone(),
            sandbox,
            capabilities,
            modules: Mutex::new(HashMap::new()),
        }))
    }

    /// Load the module at `path` unless it is already cached.
    pub(crate) async fn load_module(runtime: &WorkspaceRuntime, store: &dyn WorkspaceStore, path: &ScriptPath) -> Result<ModuleInfo, HostError> {
        let mut modules = runtime.modules.lock().await;
        if let Some(info) = modules.get(path) {
            return Ok(info.clone());
        }
        let source = store.read_route(&runtime.workspace, path).await?;
        let info = runtime.sandbox.load(path, source).await?;
        tracing::debug!(
            workspace = %runtime.workspace,
            path = %path,
            gateway = info.is_gateway(),
            exports = info.exports.len(),
            "module loaded"
        );
        modules.insert(path.clone(), info.clone());
        Ok(info)
    }

    async fn invalidate(runtime: &WorkspaceRuntime, path: &ScriptPath) {
        if runtime.modules.lock().await.remove(path).is_some() {
            runtime.sandbox.unload(path);
        }
    }

    /// Load a module and bring its endpoint up: open its gateway if it is a
    /// gateway module, then run its `setup` hook.
    ///
    /// A load failure is returned alone. Failures of the two later steps are
    /// collected into one error.
    ///
    /// # Errors
    /// [`HostError::NotFound`], [`HostError::Script`],
    /// [`HostError::GatewayConflict`], [`HostError::Timeout`], or
    /// [`HostError::Collected`] when both later steps failed.
    pub async fn setup_endpoint(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<(), HostError> {
        let runtime = self.runtime(workspace).await?;
        let info = Self::load_module(&runtime, self.store.as_ref(), path).await?;
        let mut errors = Vec::new();

        if info.is_gateway() {
            match self.multiplexer.allocate(workspace, path) {
                Ok(gateway) => {
                    let handler = ScriptGateway {
                        runtime: Arc::clone(&runtime),
                        script: path.clone(),
                        info: info.clone(),
                    };
                    gateway.create_server(Arc::new(handler));
                }
                Err(e) => errors.push(e),
            }
        }
        if info.exports(SETUP_HOOK) {
            if let Err(e) = runtime.sandbox.call(path, SETUP_HOOK, Vec::new()).await {
                errors.push(e);
            }
        }
        HostError::collect(errors)
    }

    /// Bring an endpoint down: close its gateway if it owns one, then run
    /// its `cleanup` hook. Errors are collected like in
    /// [`ExecutionHost::setup_endpoint`].
    ///
    /// # Errors
    /// As for [`ExecutionHost::setup_endpoint`].
    pub async fn cleanup_endpoint(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<(), HostError> {
        let runtime = self.runtime(workspace).await?;
        let info = Self::load_module(&runtime, self.store.as_ref(), path).await?;
        let mut errors = Vec::new();

        if info.is_gateway() && self.multiplexer.release(workspace, path).await {
            tracing::info!(workspace = %workspace, path = %path, "gateway released");
        }
        if info.exports(CLEANUP_HOOK) {
            if let Err(e) = runtime.sandbox.call(path, CLEANUP_HOOK, Vec::new()).await {
                errors.push(e);
            }
        }
        HostError::collect(errors)
    }

    /// Set up every script of every listed workspace. Individual failures
    /// are logged and reported, never propagated.
    pub async fn setup_endpoints(&self, workspaces: &[WorkspaceId]) -> SetupReport {
        let mut report = SetupReport::default();
        for workspace in workspaces {
            let scripts = match self.store.list_routes(workspace).await {
                Ok(tree) => tree.scripts(),
                Err(e) => {
                    tracing::warn!(workspace = %workspace, error = %e, "cannot list routes");
                    continue;
                }
            };
            for script in scripts {
                match self.setup_endpoint(workspace, &script).await {
                    Ok(()) => report.ready.push((workspace.clone(), script)),
                    Err(e) => {
                        tracing::warn!(workspace = %workspace, path = %script, error = %e, "endpoint setup failed");
                        report.failed.push((workspace.clone(), script, e.to_string()));
                    }
                }
            }
        }
        tracing::info!(ready = report.ready.len(), failed = report.failed.len(), "endpoints set up");
        report
    }

    /// Replace a route file. For scripts the old module is cleaned up first
    /// and the new one set up after, so its side effects apply at once.
    ///
    /// # Errors
    /// Store I/O errors are returned directly. Cleanup and setup failures are
    /// both reported in [`HostError::Lifecycle`]; the file is written either way.
    pub async fn write_script(&self, workspace: &WorkspaceId, path: &ScriptPath, source: &str) -> Result<(), HostError> {
        if !path.is_script() {
            return self.store.write_route(workspace, path, source).await;
        }
        let cleanup = if self.store.is_route(workspace, path).await? {
            self.cleanup_endpoint(workspace, path).await.err()
        } else {
            None
        };
        self.store.write_route(workspace, path, source).await?;
        let runtime = self.runtime(workspace).await?;
        Self::invalidate(&runtime, path).await;
        let setup = self.setup_endpoint(workspace, path).await.err();
        tracing::info!(
            workspace = %workspace,
            path = %path,
            cleanup_ok = cleanup.is_none(),
            setup_ok = setup.is_none(),
            "script replaced"
        );
        lifecycle(cleanup, setup)
    }

    /// Remove a route file, cleaning up its module first.
    ///
    /// # Errors
    /// [`HostError::NotFound`] if the file does not exist; store I/O errors;
    /// [`HostError::Lifecycle`] if cleanup failed (the file is still removed).
    pub async fn delete_script(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<(), HostError> {
        if !self.store.is_route(workspace, path).await? {
            return Err(HostError::NotFound(format!("{workspace}/{path}")));
        }
        let cleanup = if path.is_script() {
            let cleanup = self.cleanup_endpoint(workspace, path).await.err();
            let runtime = self.runtime(workspace).await?;
            Self::invalidate(&runtime, path).await;
            cleanup
        } else {
            None
        };
        self.store.delete_route(workspace, path).await?;
        tracing::info!(workspace = %workspace, path = %path, "script deleted");
        lifecycle(cleanup, None)
    }

    /// Drop a workspace's sandbox, stores and gateway.
    pub async fn discard_workspace(&self, workspace: &WorkspaceId) -> bool {
        self.multiplexer.remove(workspace).await;
        let removed = self
            .runtimes
            .lock()
            .await
            .remove(workspace)
            .is_some_and(|cell| cell.initialized());
        if removed {
            tracing::info!(workspace = %workspace, "workspace discarded");
        }
        removed
    }
}

fn lifecycle(cleanup: Option<HostError>, setup: Option<HostError>) -> Result<(), HostError> {
    if cleanup.is_none() && setup.is_none() {
        return Ok(());
    }
    Err(HostError::Lifecycle { cleanup: cleanup.map(Box::new), setup: setup.map(Box::new) })
}

/// Routes gateway traffic into the owning module's callbacks.
struct ScriptGateway {
    runtime: Arc<WorkspaceRuntime>,
    script: ScriptPath,
    info: ModuleInfo,
}

impl ScriptGateway {
    async fn invoke(&self, callback: &str, args: Vec<Value>) {
        if !self.info.exports(callback) {
            return;
        }
        if let Err(e) = self.runtime.sandbox.call(&self.script, callback, args).await {
            tracing::warn!(
                workspace = %self.runtime.workspace,
                path = %self.script,
                callback,
                error = %e,
                "gateway callback failed"
            );
        }
    }
}

#[async_trait]
impl GatewayHandler for ScriptGateway {
    async fn on_connect(&self, client: ClientId) {
        self.invoke("connect", vec![json!(client.to_string())]).await;
    }

    async fn on_message(&self, client: ClientId, message: String) {
        self.invoke(GATEWAY_EXPORT, vec![json!(client.to_string()), json!(message)]).await;
    }

    async fn on_disconnect(&self, client: ClientId, reason: String) {
        self.invoke("disconnect", vec![json!(client.to_string()), json!(reason)]).await;
    }
}
