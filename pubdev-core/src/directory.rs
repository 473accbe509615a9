use serde::{Deserialize, Serialize};

use crate::id::ScriptPath;

/// A directory listing of a workspace tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Directory {
    /// Directory name (the workspace name for the root).
    pub name: String,
    /// Names of the files directly inside.
    pub files: Vec<String>,
    /// Nested directories.
    pub dirs: Vec<Directory>,
}

impl Directory {
    /// Creates a directory node.
    #[must_use]
    pub fn new(name: impl Into<String>, files: Vec<String>, dirs: Vec<Directory>) -> Self {
        Self { name: name.into(), files, dirs }
    }

    /// Every script (`.js`) in the tree, as paths relative to this directory,
    /// depth first with files before subdirectories.
    #[must_use]
    pub fn scripts(&self) -> Vec<ScriptPath> {
        let mut out = Vec::new();
        self.collect_scripts(&ScriptPath::root(), &mut out);
        out
    }

    fn collect_scripts(&self, prefix: &ScriptPath, out: &mut Vec<ScriptPath>) {
        for file in &self.files {
            let path = prefix.child(file);
            if path.is_script() {
                out.push(path);
            }
        }
        for dir in &self.dirs {
            dir.collect_scripts(&prefix.child(&dir.name), out);
        }
    }
}
