/// Audit logging for key lifecycle events.
pub mod audit;
/// Configuration management.
pub mod config;
/// Telemetry setup for logging, tracing, and metrics.
pub mod telemetry;
