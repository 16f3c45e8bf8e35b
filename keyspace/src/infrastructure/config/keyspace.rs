//! Registry configuration.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::ExpiryBasis;

pub(super) const DEFAULT_TIMEOUT_MS: u64 = 30 * 60 * 1000;
pub(super) const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;

/// Settings for the key registry.
#[derive(Debug, Deserialize, Clone)]
pub struct KeyspaceSettings {
    /// Directory owned by the registry. Wiped on startup.
    pub root_dir: PathBuf,
    /// Idle timeout in milliseconds.
    pub timeout_ms: u64,
    /// Whether the timeout counts from issuance or from the last access.
    #[serde(default)]
    pub expiry_basis: ExpiryBasis,
    /// How often the daemon sweeps expired keys, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Working directory for commands run against keys. Defaults to the
    /// process's current directory.
    #[serde(default)]
    pub exec_dir: Option<PathBuf>,
}

impl KeyspaceSettings {
    /// Idle timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sweep period, never shorter than one millisecond.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
