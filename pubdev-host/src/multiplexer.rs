//! Websocket gateway multiplexing.
//!
//! One listening port serves every workspace's gateway. The multiplexer owns
//! the workspace to gateway mapping and routes upgrade requests by path; each
//! [`Gateway`] owns its connected clients and the script callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pubdev_core::{ClientId, ScriptPath, WorkspaceId};
use tokio::sync::mpsc;

use crate::HostError;

/// Frame queued for delivery to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text message.
    Text(String),
    /// Close the connection with this reason.
    Close(String),
}

/// Reason reported to clients and scripts when the server side closes.
pub const CLOSE_REASON: &str = "gateway closed";

/// Sending half of a client's outbound queue.
pub type ClientSender = mpsc::UnboundedSender<Outbound>;

/// Script callbacks driven by gateway traffic.
#[async_trait]
pub trait GatewayHandler: Send + Sync {
    /// A client finished the upgrade.
    async fn on_connect(&self, client: ClientId);

    /// A client sent a message.
    async fn on_message(&self, client: ClientId, message: String);

    /// A client disconnected.
    async fn on_disconnect(&self, client: ClientId, reason: String);
}

#[derive(Debug)]
struct ClientEntry {
    sender: ClientSender,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct GatewayState {
    handler: Option<Arc<dyn GatewayHandler>>,
    clients: HashMap<ClientId, ClientEntry>,
}

/// A workspace's websocket server, bound to the script that owns it.
pub struct Gateway {
    workspace: WorkspaceId,
    script: ScriptPath,
    state: Mutex<GatewayState>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("workspace", &self.workspace)
            .field("script", &self.script)
            .field("open", &self.has_server())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    fn new(workspace: WorkspaceId, script: ScriptPath) -> Self {
        Self { workspace, script, state: Mutex::new(GatewayState::default()) }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.state.lock().expect("gateway state lock poisoned")
    }

    /// Workspace that owns this gateway.
    #[must_use]
    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    /// Script path the gateway is bound to.
    #[must_use]
    pub fn script(&self) -> &ScriptPath {
        &self.script
    }

    /// Unique key, `<workspace>/<script>`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.workspace, self.script)
    }

    /// Whether upgrades are currently accepted.
    #[must_use]
    pub fn has_server(&self) -> bool {
        self.state().handler.is_some()
    }

    /// Start (or restart) accepting upgrades, dispatching to `handler`.
    pub fn create_server(&self, handler: Arc<dyn GatewayHandler>) {
        self.state().handler = Some(handler);
        tracing::info!(workspace = %self.workspace, script = %self.script, "gateway server opened");
    }

    /// Stop accepting upgrades and close every connected client, running the
    /// disconnect callback for each. Returns the number of clients closed.
    pub async fn close_server(&self) -> usize {
        let (handler, clients): (_, Vec<(ClientId, ClientEntry)>) = {
            let mut state = self.state();
            (state.handler.take(), state.clients.drain().collect())
        };
        for (_, entry) in &clients {
            let _ = entry.sender.send(Outbound::Close(CLOSE_REASON.to_owned()));
        }
        if let Some(handler) = handler {
            for (client, _) in &clients {
                handler.on_disconnect(*client, CLOSE_REASON.to_owned()).await;
            }
        }
        tracing::info!(
            workspace = %self.workspace,
            script = %self.script,
            closed = clients.len(),
            "gateway server closed"
        );
        clients.len()
    }

    /// Register a freshly upgraded client and run the connect callback.
    ///
    /// # Errors
    /// Returns [`HostError::NotFound`] if the server is closed.
    pub async fn connect(&self, sender: ClientSender) -> Result<ClientId, HostError> {
        let client = ClientId::new();
        let handler = {
            let mut state = self.state();
            let handler = state
                .handler
                .clone()
                .ok_or_else(|| HostError::NotFound(format!("{}/{}", self.workspace, self.script)))?;
            state.clients.insert(client, ClientEntry { sender, connected_at: Utc::now() });
            handler
        };
        tracing::debug!(workspace = %self.workspace, client = %client, "gateway client connected");
        handler.on_connect(client).await;
        Ok(client)
    }

    /// Deliver an inbound message to the script. Messages from clients that
    /// are no longer registered are dropped.
    pub async fn message(&self, client: ClientId, message: String) {
        let handler = {
            let state = self.state();
            if !state.clients.contains_key(&client) {
                return;
            }
            state.handler.clone()
        };
        if let Some(handler) = handler {
            handler.on_message(client, message).await;
        }
    }

    /// Unregister a client and run the disconnect callback.
    pub async fn disconnect(&self, client: ClientId, reason: String) {
        let (entry, handler) = {
            let mut state = self.state();
            (state.clients.remove(&client), state.handler.clone())
        };
        let Some(entry) = entry else {
            return;
        };
        let connected_for = Utc::now().signed_duration_since(entry.connected_at);
        tracing::debug!(
            workspace = %self.workspace,
            client = %client,
            seconds = connected_for.num_seconds(),
            "gateway client disconnected"
        );
        if let Some(handler) = handler {
            handler.on_disconnect(client, reason).await;
        }
    }

    /// Send `message` to every connected client. Returns how many were reached.
    pub fn broadcast(&self, message: &str) -> usize {
        self.state()
            .clients
            .values()
            .filter(|entry| entry.sender.send(Outbound::Text(message.to_owned())).is_ok())
            .count()
    }

    /// Send `message` to one client. Returns `false` if it is not connected.
    pub fn send(&self, client: ClientId, message: &str) -> bool {
        self.state()
            .clients
            .get(&client)
            .is_some_and(|entry| entry.sender.send(Outbound::Text(message.to_owned())).is_ok())
    }

    /// Currently connected clients.
    #[must_use]
    pub fn clients(&self) -> Vec<ClientId> {
        self.state().clients.keys().copied().collect()
    }
}

/// Registry of gateways, at most one per workspace.
#[derive(Debug, Default)]
pub struct GatewayMultiplexer {
    gateways: RwLock<HashMap<WorkspaceId, Arc<Gateway>>>,
}

impl GatewayMultiplexer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the workspace's gateway, creating it bound to `script` on
    /// first use.
    ///
    /// # Errors
    /// Returns [`HostError::GatewayConflict`] if the workspace's gateway is
    /// bound to a different script.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub fn allocate(&self, workspace: &WorkspaceId, script: &ScriptPath) -> Result<Arc<Gateway>, HostError> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut gateways = self.gateways.write().expect("gateway registry write lock poisoned");
        if let Some(existing) = gateways.get(workspace) {
            if existing.script() == script {
                return Ok(Arc::clone(existing));
            }
            return Err(HostError::GatewayConflict {
                workspace: workspace.to_string(),
                existing: existing.script().to_string(),
                requested: script.to_string(),
            });
        }
        let gateway = Arc::new(Gateway::new(workspace.clone(), script.clone()));
        gateways.insert(workspace.clone(), Arc::clone(&gateway));
        tracing::info!(workspace = %workspace, script = %script, "gateway allocated");
        Ok(gateway)
    }

    /// The workspace's gateway, if one was allocated.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn get(&self, workspace: &WorkspaceId) -> Option<Arc<Gateway>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.gateways
            .read()
            .expect("gateway registry read lock poisoned")
            .get(workspace)
            .cloned()
    }

    /// Find the open gateway serving an upgrade at `tail` under `workspace`.
    /// `tail` matches the bound script as written, without `.js`, or as the
    /// directory holding an `index.js` gateway.
    #[must_use]
    pub fn resolve(&self, workspace: &WorkspaceId, tail: &ScriptPath) -> Option<Arc<Gateway>> {
        let gateway = self.get(workspace)?;
        let candidates = [tail.clone(), tail.with_suffix(".js"), tail.child("index.js")];
        let bound = candidates.iter().any(|candidate| candidate == gateway.script());
        (bound && gateway.has_server()).then_some(gateway)
    }

    /// Unbind the workspace's gateway if it belongs to `script`, closing it.
    /// Returns `true` if a gateway was released.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub async fn release(&self, workspace: &WorkspaceId, script: &ScriptPath) -> bool {
        let removed = {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut gateways = self.gateways.write().expect("gateway registry write lock poisoned");
            match gateways.get(workspace) {
                Some(existing) if existing.script() == script => gateways.remove(workspace),
                _ => None,
            }
        };
        match removed {
            Some(gateway) => {
                gateway.close_server().await;
                true
            }
            None => false,
        }
    }

    /// Drop the workspace's gateway, closing all of its clients.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub async fn remove(&self, workspace: &WorkspaceId) -> Option<Arc<Gateway>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let removed = self
            .gateways
            .write()
            .expect("gateway registry write lock poisoned")
            .remove(workspace);
        if let Some(gateway) = &removed {
            gateway.close_server().await;
        }
        removed
    }

    /// Number of allocated gateways.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.gateways.read().expect("gateway registry read lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
