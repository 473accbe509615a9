//! Typed capability registry.
//!
//! Scripts reach host services only through `require(name)`. Names map to a
//! closed set of [`Capability`] values; each workspace materialises an
//! instance per capability on first use.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use pubdev_core::{ScriptPath, WorkspaceId};
use pubdev_db::{DocumentStore, RelationalStore};

use crate::{Gateway, GatewayMultiplexer, HostError};

/// A host service a script may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `db:sql`, the workspace's relational store.
    Sql,
    /// `db:nosql`, the workspace's document store.
    NoSql,
    /// `wss`, the workspace's websocket gateway.
    Gateway,
}

impl Capability {
    /// Resolve a `require` name.
    ///
    /// # Errors
    /// Returns [`HostError::CapabilityNotFound`] for any other name.
    pub fn parse(name: &str) -> Result<Self, HostError> {
        match name {
            "db:sql" => Ok(Capability::Sql),
            "db:nosql" => Ok(Capability::NoSql),
            "wss" => Ok(Capability::Gateway),
            other => Err(HostError::CapabilityNotFound(other.to_owned())),
        }
    }

    /// The `require` name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Capability::Sql => "db:sql",
            Capability::NoSql => "db:nosql",
            Capability::Gateway => "wss",
        }
    }

    /// Stores are materialised once per workspace; the gateway is looked up
    /// per requiring script so the one-path rule is checked every time.
    fn cached_per_workspace(self) -> bool {
        !matches!(self, Capability::Gateway)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A materialised capability for one workspace.
#[derive(Debug, Clone)]
pub enum CapabilityInstance {
    Sql(Arc<Mutex<RelationalStore>>),
    NoSql(Arc<Mutex<DocumentStore>>),
    Gateway(Arc<Gateway>),
}

/// Builds a capability instance for a workspace and requiring script.
pub type CapabilityFactory =
    Box<dyn Fn(&WorkspaceId, &ScriptPath) -> Result<CapabilityInstance, HostError> + Send + Sync>;

/// Process-wide capability definitions.
pub struct CapabilityRegistry {
    factories: HashMap<Capability, CapabilityFactory>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Registry with no capabilities; every `require` fails.
    #[must_use]
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// The standard set: fresh in-memory stores per workspace, and gateways
    /// allocated through `multiplexer`.
    #[must_use]
    pub fn standard(multiplexer: Arc<GatewayMultiplexer>) -> Self {
        let mut registry = Self::empty();
        registry.register(
            Capability::Sql,
            Box::new(|_, _| Ok(CapabilityInstance::Sql(Arc::new(Mutex::new(RelationalStore::new()))))),
        );
        registry.register(
            Capability::NoSql,
            Box::new(|_, _| Ok(CapabilityInstance::NoSql(Arc::new(Mutex::new(DocumentStore::new()))))),
        );
        registry.register(
            Capability::Gateway,
            Box::new(move |workspace, script| {
                multiplexer.allocate(workspace, script).map(CapabilityInstance::Gateway)
            }),
        );
        registry
    }

    /// Install or replace the factory for `capability`.
    pub fn register(&mut self, capability: Capability, factory: CapabilityFactory) {
        self.factories.insert(capability, factory);
    }

    fn build(
        &self,
        capability: Capability,
        workspace: &WorkspaceId,
        script: &ScriptPath,
    ) -> Result<CapabilityInstance, HostError> {
        let factory = self
            .factories
            .get(&capability)
            .ok_or_else(|| HostError::CapabilityNotFound(capability.name().to_owned()))?;
        factory(workspace, script)
    }
}

/// One workspace's view of the registry, caching instances.
#[derive(Debug)]
pub struct WorkspaceCapabilities {
    workspace: WorkspaceId,
    registry: Arc<CapabilityRegistry>,
    cache: Mutex<HashMap<Capability, CapabilityInstance>>,
}

impl WorkspaceCapabilities {
    #[must_use]
    pub fn new(workspace: WorkspaceId, registry: Arc<CapabilityRegistry>) -> Self {
        Self { workspace, registry, cache: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    /// Resolve `capability` on behalf of the script at `script`.
    ///
    /// # Errors
    /// Returns [`HostError::CapabilityNotFound`] if the registry lacks it, or
    /// whatever the factory reports (e.g. [`HostError::GatewayConflict`]).
    ///
    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    pub fn resolve(&self, capability: Capability, script: &ScriptPath) -> Result<CapabilityInstance, HostError> {
        if !capability.cached_per_workspace() {
            return self.registry.build(capability, &self.workspace, script);
        }
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut cache = self.cache.lock().expect("capability cache lock poisoned");
        if let Some(instance) = cache.get(&capability) {
            return Ok(instance.clone());
        }
        let instance = self.registry.build(capability, &self.workspace, script)?;
        cache.insert(capability, instance.clone());
        tracing::debug!(workspace = %self.workspace, capability = %capability, "capability materialised");
        Ok(instance)
    }

    /// The workspace's relational store.
    ///
    /// # Errors
    /// See [`WorkspaceCapabilities::resolve`].
    pub fn sql(&self) -> Result<Arc<Mutex<RelationalStore>>, HostError> {
        match self.resolve(Capability::Sql, &ScriptPath::root())? {
            CapabilityInstance::Sql(store) => Ok(store),
            other => Err(mismatch(Capability::Sql, &other)),
        }
    }

    /// The workspace's document store.
    ///
    /// # Errors
    /// See [`WorkspaceCapabilities::resolve`].
    pub fn nosql(&self) -> Result<Arc<Mutex<DocumentStore>>, HostError> {
        match self.resolve(Capability::NoSql, &ScriptPath::root())? {
            CapabilityInstance::NoSql(store) => Ok(store),
            other => Err(mismatch(Capability::NoSql, &other)),
        }
    }
}

fn mismatch(capability: Capability, instance: &CapabilityInstance) -> HostError {
    HostError::Runtime(format!("factory for {capability} produced {instance:?}"))
}
