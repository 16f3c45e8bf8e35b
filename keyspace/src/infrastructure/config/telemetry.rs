//! Telemetry configuration.
//!
//! This module defines logging, OpenTelemetry and metrics settings.

use serde::Deserialize;

/// Telemetry configuration settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    /// Service name for telemetry.
    pub service_name: String,
    /// Default log filter, overridden by `RUST_LOG`.
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
    /// OTLP endpoint for traces.
    pub otlp_endpoint: Option<String>,
    /// Sampling ratio for traces.
    #[serde(default = "default_sampling")]
    pub sampling_ratio: f64,
    /// Address for the Prometheus scrape endpoint, e.g. `127.0.0.1:9464`.
    pub metrics_addr: Option<String>,
}

pub(super) fn default_sampling() -> f64 {
    1.0
}
