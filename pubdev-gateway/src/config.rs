//! Server configuration loaded from the environment.

use std::path::PathBuf;

use pubdev_host::HostConfig;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3456";
const DEFAULT_ROOT: &str = "workspaces";

/// Settings for the `pubdev-gateway` binary.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ServerConfig {
    /// Socket address to bind (`PUBDEV_LISTEN_ADDR`).
    pub listen_addr: String,
    /// Directory holding one subdirectory per workspace (`PUBDEV_ROOT`).
    pub root: PathBuf,
    /// Sandbox limits (`PUBDEV_HANDLER_TIMEOUT_MS`, `PUBDEV_MEMORY_LIMIT_MB`).
    pub host: HostConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            root: PathBuf::from(DEFAULT_ROOT),
            host: HostConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by whichever variables are set.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: std::env::var("PUBDEV_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            root: std::env::var_os("PUBDEV_ROOT").map_or(defaults.root, PathBuf::from),
            host: HostConfig::from_env(),
        }
    }
}
