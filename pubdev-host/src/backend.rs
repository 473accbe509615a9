//! Script engine abstraction.
//!
//! Allows swapping the embedded JavaScript engine (or a scripted test double)
//! without changing the hosting logic.

use std::collections::BTreeSet;
use std::time::Duration;

use pubdev_core::{ScriptPath, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Bridge, HostConfig, HostError};

/// Export that marks a module as a gateway module.
pub const GATEWAY_EXPORT: &str = "message";

/// Lifecycle hook run after a module loads.
pub const SETUP_HOOK: &str = "setup";

/// Lifecycle hook run before a module is unloaded or replaced.
pub const CLEANUP_HOOK: &str = "cleanup";

/// What a loaded module exports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Names of exported functions.
    pub exports: BTreeSet<String>,
}

impl ModuleInfo {
    pub fn new<I, S>(exports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { exports: exports.into_iter().map(Into::into).collect() }
    }

    /// Whether the module exports a function under this name.
    #[must_use]
    pub fn exports(&self, name: &str) -> bool {
        self.exports.contains(name)
    }

    /// A module exporting `message` is a gateway module; every other
    /// module is an API module.
    #[must_use]
    pub fn is_gateway(&self) -> bool {
        self.exports(GATEWAY_EXPORT)
    }
}

/// Factory for per-workspace sandboxes.
///
/// Implementations must be `Send + Sync`; the sandboxes they create are not,
/// and live on the worker thread that created them.
pub trait ScriptBackend: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Create an isolated runtime for `workspace`. Capability calls made by
    /// scripts inside it go through `bridge`.
    ///
    /// # Errors
    /// Returns [`HostError::Runtime`] if the engine cannot be initialised.
    fn create_sandbox(
        &self,
        workspace: &WorkspaceId,
        bridge: Bridge,
        config: &HostConfig,
    ) -> Result<Box<dyn Sandbox>, HostError>;
}

/// One workspace's isolated script runtime.
///
/// Module exports and the shared state object live inside the sandbox. Every
/// method runs to completion or is interrupted once `budget` elapses.
pub trait Sandbox {
    /// Evaluate `source` as the module at `path`, replacing any module
    /// previously cached there.
    ///
    /// # Errors
    /// [`HostError::Script`] if the source fails to parse or its top level
    /// throws; [`HostError::Timeout`] if it runs past `budget`.
    fn load(&mut self, path: &ScriptPath, source: &str, budget: Duration) -> Result<ModuleInfo, HostError>;

    /// Call an exported function of a loaded module with JSON arguments.
    ///
    /// # Errors
    /// [`HostError::Script`] when the function throws (carrying the engine
    /// kind if the thrown error came from a store call);
    /// [`HostError::Timeout`] if it runs past `budget`.
    fn call(&mut self, path: &ScriptPath, function: &str, args: Vec<Value>, budget: Duration) -> Result<Value, HostError>;

    /// Drop the cached exports of the module at `path`.
    fn unload(&mut self, path: &ScriptPath);

    /// Snapshot of the workspace's shared state object.
    ///
    /// # Errors
    /// [`HostError::Script`] if the state cannot be serialised.
    fn shared_state(&mut self) -> Result<Value, HostError>;
}
