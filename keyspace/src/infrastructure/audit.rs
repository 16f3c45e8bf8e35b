use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, info_span};

/// Domain event for audit logging.
/// Structured for JSON serialization to enable machine-readable audit trails.
/// Tokens are bearer credentials, so events only ever carry [`token_prefix`].
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A process component came up.
    SystemStartup {
        /// Component name.
        component: String,
    },
    /// A process component is going down.
    SystemShutdown {
        /// Why the component stopped.
        reason: String,
    },
    /// A new token was handed out.
    KeyIssued {
        /// Leading characters of the token.
        token: String,
    },
    /// A token was forgotten and its directory removed.
    KeyPurged {
        /// Leading characters of the token.
        token: String,
        /// `expired` or `revoked`.
        cause: String,
    },
    /// A command was refused because its token is expired or unknown.
    ExecDenied {
        /// Leading characters of the token.
        token: String,
    },
    /// A file operation was refused by the path policy.
    PathRejected {
        /// Leading characters of the token.
        token: String,
        /// Path as supplied by the caller.
        path: String,
    },
}

/// Returns the first eight characters of a token, enough to correlate log
/// lines without exposing the credential.
#[must_use]
pub fn token_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}

/// Returns `path` relative to `root`, with the leading token component cut
/// down to its [`token_prefix`]. Paths outside `root`, and `root` itself, are
/// returned unchanged.
#[must_use]
pub fn redact_key_path(root: &Path, path: &Path) -> PathBuf {
    let Ok(relative) = path.strip_prefix(root) else {
        return path.to_path_buf();
    };
    let mut components = relative.components();
    let Some(token) = components.next() else {
        return path.to_path_buf();
    };

    let mut redacted = PathBuf::from(format!(
        "{}\u{2026}",
        token_prefix(&token.as_os_str().to_string_lossy())
    ));
    let rest = components.as_path();
    if !rest.as_os_str().is_empty() {
        redacted.push(rest);
    }
    redacted
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a secure file.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Security Audit Event");
}
