//! Types for key space management.
//!
//! This module provides the error taxonomy and the read-only views handed
//! out by the [`Registry`](crate::registry::Registry).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during key space operations.
#[derive(Debug, Error)]
pub enum KeyspaceError {
    /// The root directory cannot be owned by a registry.
    #[error("Invalid root directory: {0}")]
    InvalidRoot(PathBuf),
    /// The root directory could not be deleted or recreated.
    #[error("Failed to reset root directory {path}: {source}")]
    RootReset {
        /// Root directory that was being reset.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },
    /// The token is not a single safe directory name.
    #[error("Invalid token: {0:?}")]
    InvalidToken(String),
    /// The relative path does not name a file inside the key space.
    #[error("Rejected path '{path}': {reason}")]
    InvalidRelativePath {
        /// Path as supplied by the caller.
        path: String,
        /// Why the path was rejected.
        reason: &'static str,
    },
    /// A filesystem operation inside a key space failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path the operation was acting on.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },
    /// Failed to remove a key directory.
    #[error("Failed to cleanup key directory {path}: {source}")]
    CleanupFailed {
        /// Path of the key directory.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },
    /// Failed to list the root directory.
    #[error("Failed to read directory: {0}")]
    ReadDirectoryFailed(String),
}

impl KeyspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Which timestamp the idle timeout is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpiryBasis {
    /// Keys expire a fixed time after issuance, no matter how often they are used.
    #[default]
    Creation,
    /// Every successful access against a live key pushes its expiry forward.
    LastAccess,
}

/// Snapshot of one tracked key.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    /// The issued token.
    pub token: String,
    /// Wall-clock issuance time.
    pub issued_at: DateTime<Utc>,
    /// Time since the key was last refreshed.
    pub idle: Duration,
    /// Whether the key had expired when the snapshot was taken.
    pub expired: bool,
}

/// Outcome of a [`purge_expired`](crate::registry::Registry::purge_expired) sweep.
#[derive(Debug, Default)]
pub struct PurgeReport {
    /// Tokens that were forgotten by this sweep.
    pub purged: Vec<String>,
    /// Directory removals that failed. The tokens involved are still forgotten.
    pub failures: Vec<KeyspaceError>,
}

impl PurgeReport {
    /// Number of tokens purged.
    #[must_use]
    pub fn purged_count(&self) -> usize {
        self.purged.len()
    }

    /// Returns `true` if every purged directory was removed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
