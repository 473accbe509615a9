//! Sandbox limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default budget for one handler invocation or module load.
const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default heap limit per workspace runtime: 64 MiB.
const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Limits applied to every workspace sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HostConfig {
    /// Wall-clock budget for a single evaluation (module load, handler call,
    /// gateway callback). Expiry interrupts the script.
    pub handler_timeout: Duration,

    /// Heap limit of each workspace's script runtime, in bytes.
    pub memory_limit_bytes: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl HostConfig {
    /// Config with a custom handler timeout and default memory limit.
    #[must_use]
    pub fn with_timeout(handler_timeout: Duration) -> Self {
        Self { handler_timeout, ..Self::default() }
    }

    /// Read overrides from `PUBDEV_HANDLER_TIMEOUT_MS` and
    /// `PUBDEV_MEMORY_LIMIT_MB`. Unparsable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_number("PUBDEV_HANDLER_TIMEOUT_MS") {
            config.handler_timeout = Duration::from_millis(ms);
        }
        if let Some(mb) = env_number("PUBDEV_MEMORY_LIMIT_MB") {
            config.memory_limit_bytes = usize::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX);
        }
        config
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(var = name, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}
