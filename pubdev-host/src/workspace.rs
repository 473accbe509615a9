//! Workspace content: route scripts and pages, and public static assets.
//!
//! On disk a workspace is `<root>/<workspace>/routes/...` plus
//! `<root>/<workspace>/public/...`.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::RwLock;

use async_trait::async_trait;
use pubdev_core::{Directory, ScriptPath, StaticResource, WorkspaceId};

use crate::HostError;

const ROUTES_DIR: &str = "routes";
const PUBLIC_DIR: &str = "public";

/// Read and write access to workspace files.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Whether the workspace exists at all.
    async fn exists(&self, workspace: &WorkspaceId) -> Result<bool, HostError>;

    /// Every known workspace, sorted.
    async fn list_workspaces(&self) -> Result<Vec<WorkspaceId>, HostError>;

    /// Whether `path` is a file under the workspace's routes.
    async fn is_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError>;

    /// Whether `path` is a file under the workspace's public assets.
    async fn is_static_resource(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError>;

    /// Text of a route file.
    ///
    /// # Errors
    /// [`HostError::NotFound`] if it does not exist.
    async fn read_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<String, HostError>;

    /// Bytes of a public asset.
    ///
    /// # Errors
    /// [`HostError::NotFound`] if it does not exist.
    async fn read_static_resource(
        &self,
        workspace: &WorkspaceId,
        path: &ScriptPath,
    ) -> Result<StaticResource, HostError>;

    /// The routes tree. Empty for a workspace without routes.
    async fn list_routes(&self, workspace: &WorkspaceId) -> Result<Directory, HostError>;

    /// Create or replace a route file, creating the workspace if needed.
    async fn write_route(&self, workspace: &WorkspaceId, path: &ScriptPath, content: &str) -> Result<(), HostError>;

    /// Remove a route file. Returns `false` if it did not exist.
    async fn delete_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError>;
}

/// Workspaces stored as directories under a root.
#[derive(Debug, Clone)]
pub struct FsWorkspaceStore {
    root: PathBuf,
}

impl FsWorkspaceStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workspace_dir(&self, workspace: &WorkspaceId) -> PathBuf {
        self.root.join(workspace.as_str())
    }

    fn route_file(&self, workspace: &WorkspaceId, path: &ScriptPath) -> PathBuf {
        self.workspace_dir(workspace).join(ROUTES_DIR).join(path.as_str())
    }

    fn public_file(&self, workspace: &WorkspaceId, path: &ScriptPath) -> PathBuf {
        self.workspace_dir(workspace).join(PUBLIC_DIR).join(path.as_str())
    }
}

async fn is_file(path: &Path) -> Result<bool, HostError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn not_found<'a>(workspace: &'a WorkspaceId, path: &'a ScriptPath) -> impl FnOnce(io::Error) -> HostError + 'a {
    move |e| {
        if e.kind() == io::ErrorKind::NotFound {
            HostError::NotFound(format!("{workspace}/{path}"))
        } else {
            e.into()
        }
    }
}

fn read_tree(dir: PathBuf, name: String) -> Pin<Box<dyn Future<Output = io::Result<Directory>> + Send>> {
    Box::pin(async move {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_name = entry.file_name().to_string_lossy().into_owned();
            let kind = entry.file_type().await?;
            if kind.is_dir() {
                dirs.push(read_tree(entry.path(), entry_name).await?);
            } else if kind.is_file() {
                files.push(entry_name);
            }
        }
        files.sort();
        dirs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Directory::new(name, files, dirs))
    })
}

#[async_trait]
impl WorkspaceStore for FsWorkspaceStore {
    async fn exists(&self, workspace: &WorkspaceId) -> Result<bool, HostError> {
        match tokio::fs::metadata(self.workspace_dir(workspace)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceId>, HostError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut workspaces = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match WorkspaceId::new(name.clone()) {
                Ok(id) => workspaces.push(id),
                Err(e) => tracing::warn!(name = %name, error = %e, "skipping directory with invalid workspace name"),
            }
        }
        workspaces.sort();
        Ok(workspaces)
    }

    async fn is_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError> {
        if path.is_root() {
            return Ok(false);
        }
        is_file(&self.route_file(workspace, path)).await
    }

    async fn is_static_resource(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError> {
        if path.is_root() {
            return Ok(false);
        }
        is_file(&self.public_file(workspace, path)).await
    }

    async fn read_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<String, HostError> {
        tokio::fs::read_to_string(self.route_file(workspace, path))
            .await
            .map_err(not_found(workspace, path))
    }

    async fn read_static_resource(
        &self,
        workspace: &WorkspaceId,
        path: &ScriptPath,
    ) -> Result<StaticResource, HostError> {
        let bytes = tokio::fs::read(self.public_file(workspace, path))
            .await
            .map_err(not_found(workspace, path))?;
        Ok(StaticResource::new(path.as_str(), bytes))
    }

    async fn list_routes(&self, workspace: &WorkspaceId) -> Result<Directory, HostError> {
        let dir = self.workspace_dir(workspace).join(ROUTES_DIR);
        match read_tree(dir, ROUTES_DIR.to_owned()).await {
            Ok(tree) => Ok(tree),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Directory::new(ROUTES_DIR, Vec::new(), Vec::new())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_route(&self, workspace: &WorkspaceId, path: &ScriptPath, content: &str) -> Result<(), HostError> {
        if path.is_root() {
            return Err(HostError::NotFound(format!("{workspace}/")));
        }
        let file = self.route_file(workspace, path);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, content).await?;
        tracing::debug!(workspace = %workspace, path = %path, bytes = content.len(), "route written");
        Ok(())
    }

    async fn delete_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError> {
        if path.is_root() {
            return Ok(false);
        }
        match tokio::fs::remove_file(self.route_file(workspace, path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryWorkspace {
    routes: BTreeMap<ScriptPath, String>,
    public: BTreeMap<ScriptPath, Vec<u8>>,
}

/// Workspaces held in memory; for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryWorkspaceStore {
    workspaces: RwLock<BTreeMap<WorkspaceId, MemoryWorkspace>>,
}

impl MemoryWorkspaceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route file, creating the workspace if needed.
    #[must_use]
    pub fn with_route(self, workspace: &WorkspaceId, path: &ScriptPath, source: impl Into<String>) -> Self {
        self.write(|all| {
            all.entry(workspace.clone()).or_default().routes.insert(path.clone(), source.into());
        });
        self
    }

    /// Add a public asset, creating the workspace if needed.
    #[must_use]
    pub fn with_static(self, workspace: &WorkspaceId, path: &ScriptPath, bytes: impl Into<Vec<u8>>) -> Self {
        self.write(|all| {
            all.entry(workspace.clone()).or_default().public.insert(path.clone(), bytes.into());
        });
        self
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<WorkspaceId, MemoryWorkspace>) -> R) -> R {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let guard = self.workspaces.read().expect("workspace store read lock poisoned");
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut BTreeMap<WorkspaceId, MemoryWorkspace>) -> R) -> R {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut guard = self.workspaces.write().expect("workspace store write lock poisoned");
        f(&mut guard)
    }
}

fn insert_path(dir: &mut Directory, segments: &[&str]) {
    match segments {
        [] => {}
        [file] => dir.files.push((*file).to_owned()),
        [head, rest @ ..] => {
            let index = match dir.dirs.iter().position(|d| d.name == *head) {
                Some(index) => index,
                None => {
                    dir.dirs.push(Directory::new(*head, Vec::new(), Vec::new()));
                    dir.dirs.len() - 1
                }
            };
            insert_path(&mut dir.dirs[index], rest);
        }
    }
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspaceStore {
    async fn exists(&self, workspace: &WorkspaceId) -> Result<bool, HostError> {
        Ok(self.read(|all| all.contains_key(workspace)))
    }

    async fn list_workspaces(&self) -> Result<Vec<WorkspaceId>, HostError> {
        Ok(self.read(|all| all.keys().cloned().collect()))
    }

    async fn is_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError> {
        Ok(self.read(|all| all.get(workspace).is_some_and(|ws| ws.routes.contains_key(path))))
    }

    async fn is_static_resource(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError> {
        Ok(self.read(|all| all.get(workspace).is_some_and(|ws| ws.public.contains_key(path))))
    }

    async fn read_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<String, HostError> {
        self.read(|all| all.get(workspace).and_then(|ws| ws.routes.get(path)).cloned())
            .ok_or_else(|| HostError::NotFound(format!("{workspace}/{path}")))
    }

    async fn read_static_resource(
        &self,
        workspace: &WorkspaceId,
        path: &ScriptPath,
    ) -> Result<StaticResource, HostError> {
        self.read(|all| all.get(workspace).and_then(|ws| ws.public.get(path)).cloned())
            .map(|bytes| StaticResource::new(path.as_str(), bytes))
            .ok_or_else(|| HostError::NotFound(format!("{workspace}/{path}")))
    }

    async fn list_routes(&self, workspace: &WorkspaceId) -> Result<Directory, HostError> {
        let paths: Vec<ScriptPath> = self.read(|all| {
            all.get(workspace).map(|ws| ws.routes.keys().cloned().collect()).unwrap_or_default()
        });
        let mut tree = Directory::new(ROUTES_DIR, Vec::new(), Vec::new());
        for path in &paths {
            let segments: Vec<&str> = path.as_str().split('/').collect();
            insert_path(&mut tree, &segments);
        }
        Ok(tree)
    }

    async fn write_route(&self, workspace: &WorkspaceId, path: &ScriptPath, content: &str) -> Result<(), HostError> {
        if path.is_root() {
            return Err(HostError::NotFound(format!("{workspace}/")));
        }
        self.write(|all| {
            all.entry(workspace.clone()).or_default().routes.insert(path.clone(), content.to_owned());
        });
        Ok(())
    }

    async fn delete_route(&self, workspace: &WorkspaceId, path: &ScriptPath) -> Result<bool, HostError> {
        Ok(self.write(|all| {
            all.get_mut(workspace).is_some_and(|ws| ws.routes.remove(path).is_some())
        }))
    }
}
