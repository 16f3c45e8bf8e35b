//! Configuration management for keyspace.
//!
//! Settings are layered: built-in defaults, then an optional TOML file named
//! by `KEYSPACE_CONFIG`, then `KEYSPACE__`-prefixed environment variables.
//!
//! # Example
//!
//! ```no_run
//! use keyspace::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! ```

pub mod keyspace;
pub mod telemetry;

pub use keyspace::KeyspaceSettings;
pub use telemetry::TelemetrySettings;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_FILE_ENV: &str = "KEYSPACE_CONFIG";

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Registry settings.
    pub keyspace: KeyspaceSettings,
    /// Telemetry settings.
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Creates a new settings instance from defaults, the file named by
    /// `KEYSPACE_CONFIG` if set, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load(file.as_deref().map(Path::new))
    }

    /// Like [`new`](Self::new) but with an explicit configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// merged configuration cannot be deserialized.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let default_root = std::env::temp_dir().join("keyspace");

        let mut builder = Config::builder()
            .set_default("keyspace.root_dir", default_root.to_string_lossy().into_owned())?
            .set_default("keyspace.timeout_ms", keyspace::DEFAULT_TIMEOUT_MS)?
            .set_default("keyspace.expiry_basis", "creation")?
            .set_default("keyspace.sweep_interval_ms", keyspace::DEFAULT_SWEEP_INTERVAL_MS)?
            .set_default("telemetry.service_name", "keyspace")?
            .set_default("telemetry.log_level", "info")?
            .set_default("telemetry.json", true)?
            .set_default("telemetry.sampling_ratio", 1.0)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }

        let s = builder
            .add_source(Environment::with_prefix("KEYSPACE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
