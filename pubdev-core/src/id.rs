use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Opaque identifier of a tenant workspace.
///
/// Workspace ids become directory names and URL segments, so they may not be
/// empty, contain a `/` or `\`, or be a relative directory reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Validate and wrap a workspace name.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidWorkspaceId`] for empty names, names with
    /// path separators, and `.`/`..`.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("must not be empty")
        } else if id.contains('/') || id.contains('\\') {
            Some("must not contain a path separator")
        } else if id == "." || id == ".." {
            Some("must not be a relative directory reference")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CoreError::InvalidWorkspaceId {
                value: id,
                reason: reason.to_owned(),
            }),
            None => Ok(Self(id)),
        }
    }

    /// Returns the workspace name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkspaceId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkspaceId> for String {
    fn from(id: WorkspaceId) -> Self {
        id.0
    }
}

/// A normalized, workspace-relative path to a script or resource.
///
/// Leading and duplicate separators are removed; `..` segments are rejected so
/// a path can never leave its workspace. The empty path names the workspace
/// root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScriptPath(String);

impl ScriptPath {
    /// Normalize and validate a path.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidPath`] if any segment is `..` or the path
    /// contains a backslash or NUL byte.
    pub fn new(path: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = path.as_ref();
        if raw.contains('\\') || raw.contains('\0') {
            return Err(CoreError::InvalidPath {
                value: raw.to_owned(),
                reason: "contains a forbidden character".to_owned(),
            });
        }
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    return Err(CoreError::InvalidPath {
                        value: raw.to_owned(),
                        reason: "parent directory references are not allowed".to_owned(),
                    })
                }
                other => segments.push(other),
            }
        }
        Ok(Self(segments.join("/")))
    }

    /// The workspace root.
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Returns the normalized path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the workspace root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a literal suffix to the last segment (`todos` + `.js`).
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self(format!("{}{suffix}", self.0))
    }

    /// Append a child segment (`todos` / `index.js`).
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_owned())
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    /// File extension of the last segment, if any.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let name = self.0.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty()).then_some(ext)
    }

    /// True if the path names a script module (`.js`).
    #[must_use]
    pub fn is_script(&self) -> bool {
        self.extension() == Some("js")
    }
}

impl fmt::Display for ScriptPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ScriptPath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScriptPath> for String {
    fn from(path: ScriptPath) -> Self {
        path.0
    }
}

/// Identifies one websocket client connected to a workspace gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Creates a new random `ClientId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ClientId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
