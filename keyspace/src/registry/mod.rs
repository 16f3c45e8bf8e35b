//! The key registry.
//!
//! A [`Registry`] issues tokens, decides whether they are still usable, and
//! maps each one to its own directory `root/<token>`. It exclusively owns its
//! root directory: constructing a registry deletes whatever was there.
//!
//! Expired keys are not swept automatically. Whoever owns the registry calls
//! [`Registry::purge_expired`] on a schedule.

mod dirs;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::exec::ExecCommand;
use crate::infrastructure::audit::{log_audit, redact_key_path, token_prefix, AuditEvent};
use crate::infrastructure::config::KeyspaceSettings;
use crate::policy;
use crate::session::{Clock, Session, SystemClock};
use crate::types::{ExpiryBasis, KeyInfo, KeyspaceError, PurgeReport};

/// A tracked session plus the lock serializing I/O on its directory.
struct Entry {
    session: Session,
    io: Arc<Mutex<()>>,
}

/// Construction parameters for a [`Registry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    root: PathBuf,
    timeout: Duration,
    expiry_basis: ExpiryBasis,
    exec_dir: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl RegistryOptions {
    /// Options with creation-based expiry, the system clock, and commands run
    /// from the current directory.
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
            expiry_basis: ExpiryBasis::default(),
            exec_dir: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Options taken from configuration.
    #[must_use]
    pub fn from_settings(settings: &KeyspaceSettings) -> Self {
        let mut options = Self::new(settings.root_dir.clone(), settings.timeout())
            .with_expiry_basis(settings.expiry_basis);
        if let Some(dir) = &settings.exec_dir {
            options = options.with_exec_dir(dir.clone());
        }
        options
    }

    /// Sets what the idle timeout is measured from.
    #[must_use]
    pub fn with_expiry_basis(mut self, basis: ExpiryBasis) -> Self {
        self.expiry_basis = basis;
        self
    }

    /// Sets the working directory for commands run against keys.
    #[must_use]
    pub fn with_exec_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exec_dir = Some(dir.into());
        self
    }

    /// Replaces the clock used for expiry decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Owns issued keys and the directory tree backing them.
///
/// All methods take `&self`; share a registry between threads as
/// `Arc<Registry>`. Operations on the same key are serialized, operations on
/// different keys do not contend beyond brief map lookups.
pub struct Registry {
    sessions: RwLock<HashMap<String, Entry>>,
    /// I/O locks for tokens written without being issued. Only locks that are
    /// still held by someone survive the next lookup.
    untracked_io: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    root: PathBuf,
    timeout: Duration,
    expiry_basis: ExpiryBasis,
    exec_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("tracked_keys", &self.sessions.read().len())
            .field("root", &self.root)
            .field("timeout", &self.timeout)
            .field("expiry_basis", &self.expiry_basis)
            .field("exec_dir", &self.exec_dir)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Creates a registry owning `root`, with creation-based expiry.
    ///
    /// **Destructive:** anything already at `root` is deleted and replaced by
    /// an empty directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is empty or a filesystem root, or if it
    /// cannot be deleted and recreated.
    pub fn new(timeout: Duration, root: impl Into<PathBuf>) -> Result<Self, KeyspaceError> {
        Self::with_options(RegistryOptions::new(root, timeout))
    }

    /// Creates a registry from configuration. Destructive, like [`Registry::new`].
    ///
    /// # Errors
    ///
    /// See [`Registry::new`].
    pub fn from_settings(settings: &KeyspaceSettings) -> Result<Self, KeyspaceError> {
        Self::with_options(RegistryOptions::from_settings(settings))
    }

    /// Creates a registry from explicit options. Destructive, like [`Registry::new`].
    ///
    /// # Errors
    ///
    /// See [`Registry::new`].
    #[instrument(skip(options), fields(root = ?options.root))]
    pub fn with_options(options: RegistryOptions) -> Result<Self, KeyspaceError> {
        let cwd = std::env::current_dir();

        let mut root = options.root;
        if root.as_os_str().is_empty() {
            return Err(KeyspaceError::InvalidRoot(root));
        }
        if root.is_relative() {
            match &cwd {
                Ok(cwd) => root = cwd.join(root),
                Err(e) => {
                    return Err(KeyspaceError::RootReset {
                        path: root,
                        source: std::io::Error::new(e.kind(), e.to_string()),
                    })
                }
            }
        }
        if root.parent().is_none() {
            return Err(KeyspaceError::InvalidRoot(root));
        }

        let root = dirs::reset_root(&root)?;
        let exec_dir = options
            .exec_dir
            .or_else(|| cwd.ok())
            .unwrap_or_else(|| PathBuf::from("."));

        info!(
            "Registry owns {:?} (timeout {:?}, expiry from {:?})",
            root, options.timeout, options.expiry_basis
        );

        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            untracked_io: Mutex::new(HashMap::new()),
            root,
            timeout: options.timeout,
            expiry_basis: options.expiry_basis,
            exec_dir,
            clock: options.clock,
        })
    }

    /// The canonical root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The idle timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// What the idle timeout is measured from.
    #[must_use]
    pub fn expiry_basis(&self) -> ExpiryBasis {
        self.expiry_basis
    }

    /// Working directory for commands run against keys.
    #[must_use]
    pub fn exec_dir(&self) -> &Path {
        &self.exec_dir
    }

    /// Issues a new key and returns its token. The key's directory is created
    /// on first use, not here.
    #[instrument(skip(self))]
    pub fn issue_token(&self) -> String {
        let mut sessions = self.sessions.write();
        let session = loop {
            let candidate = Session::starting_at(self.clock.now());
            let taken = sessions.contains_key(candidate.token())
                || fs::symlink_metadata(self.root.join(candidate.token())).is_ok();
            if !taken {
                break candidate;
            }
            warn!("Token collision, regenerating");
        };

        let token = session.token().to_string();
        sessions.insert(
            token.clone(),
            Entry {
                session,
                io: Arc::default(),
            },
        );
        let tracked = sessions.len();
        drop(sessions);

        metrics::counter!("keyspace_tokens_issued_total").increment(1);
        record_tracked(tracked);
        info!(token = %token_prefix(&token), "Issued key");
        log_audit(&AuditEvent::KeyIssued {
            token: token_prefix(&token),
        });
        token
    }

    /// Returns `true` if the key is unknown or has been idle longer than the
    /// timeout. Unknown keys count as expired.
    #[must_use]
    pub fn is_expired(&self, token: &str) -> bool {
        let now = self.clock.now();
        self.sessions
            .read()
            .get(token)
            .map_or(true, |entry| entry.session.is_expired_at(now, self.timeout))
    }

    /// Returns the directory of a tracked key, whether or not it exists yet.
    #[must_use]
    pub fn key_path(&self, token: &str) -> Option<PathBuf> {
        if self.sessions.read().contains_key(token) {
            Some(self.root.join(token))
        } else {
            None
        }
    }

    /// Returns the number of tracked keys, including expired keys that have
    /// not been purged yet.
    #[must_use]
    pub fn tracked_key_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns a snapshot of all tracked keys.
    #[must_use]
    pub fn list_keys(&self) -> Vec<KeyInfo> {
        let now = self.clock.now();
        self.sessions
            .read()
            .iter()
            .map(|(token, entry)| KeyInfo {
                token: token.clone(),
                issued_at: entry.session.issued_at(),
                idle: entry.session.idle_for(now),
                expired: entry.session.is_expired_at(now, self.timeout),
            })
            .collect()
    }

    /// Forgets every expired key and deletes its directory.
    ///
    /// Expired tokens are collected first and removed afterwards, one at a
    /// time. A directory that cannot be removed is reported in the result;
    /// its token is forgotten regardless.
    #[instrument(skip(self))]
    pub fn purge_expired(&self) -> PurgeReport {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.session.is_expired_at(now, self.timeout))
            .map(|(token, _)| token.clone())
            .collect();

        let mut report = PurgeReport::default();
        for token in expired {
            // Expiry is terminal, so the entry can only have gone missing
            // through a concurrent purge or revoke.
            let Some(entry) = self.sessions.write().remove(&token) else {
                continue;
            };

            if let Err(e) = remove_guarded(&self.root, &token, &entry.io) {
                warn!(token = %token_prefix(&token), "Failed to remove expired key directory: {}", e);
                report.failures.push(e);
            }
            log_audit(&AuditEvent::KeyPurged {
                token: token_prefix(&token),
                cause: "expired".into(),
            });
            report.purged.push(token);
        }

        if !report.purged.is_empty() {
            metrics::counter!("keyspace_tokens_purged_total")
                .increment(report.purged.len() as u64);
            info!("Purged {} expired keys", report.purged.len());
        }
        record_tracked(self.tracked_key_count());
        report
    }

    /// Forgets a key immediately, expired or not, and deletes its directory.
    /// Returns `false` if the key was not tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed. The key is
    /// forgotten even then.
    #[instrument(skip(self, token), fields(token = %token_prefix(token)))]
    pub fn revoke(&self, token: &str) -> Result<bool, KeyspaceError> {
        let Some(entry) = self.sessions.write().remove(token) else {
            return Ok(false);
        };

        log_audit(&AuditEvent::KeyPurged {
            token: token_prefix(token),
            cause: "revoked".into(),
        });
        metrics::counter!("keyspace_tokens_purged_total").increment(1);
        record_tracked(self.tracked_key_count());
        info!("Revoked key");

        remove_guarded(&self.root, token, &entry.io)?;
        Ok(true)
    }

    /// Removes directories under the root that belong to no tracked key,
    /// such as ones written through an unknown token.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be listed or an orphan cannot be removed.
    #[instrument(skip(self))]
    pub fn purge_orphaned(&self) -> Result<usize, KeyspaceError> {
        dirs::cleanup_orphaned(&self.root, |name| self.sessions.read().contains_key(name))
    }

    /// Returns `true` if a regular file exists at `relative_path` in the key's
    /// directory. Invalid tokens, escaping paths and missing directories all
    /// yield `false`.
    #[instrument(skip(self, token), fields(token = %token_prefix(token)))]
    pub fn exists(&self, token: &str, relative_path: &str) -> bool {
        let path = match self.locate(token, relative_path) {
            Ok(path) => path,
            Err(e) => {
                self.note_rejection(token, relative_path, &e);
                return false;
            }
        };

        let guard = self.io_guard(token);
        let found = {
            let _held = guard.lock();
            path.is_file()
        };

        if found {
            self.touch(token);
        }
        found
    }

    /// Reads the file at `relative_path` in the key's directory as UTF-8.
    ///
    /// Returns `None` if the file is absent or cannot be read, and for
    /// invalid tokens or escaping paths. Expiry is not checked here; callers
    /// that need an expiry-gated read check [`is_expired`](Self::is_expired) first.
    #[instrument(skip(self, token), fields(token = %token_prefix(token)))]
    pub fn read(&self, token: &str, relative_path: &str) -> Option<String> {
        let path = match self.locate(token, relative_path) {
            Ok(path) => path,
            Err(e) => {
                self.note_rejection(token, relative_path, &e);
                return None;
            }
        };

        let guard = self.io_guard(token);
        let result = {
            let _held = guard.lock();
            fs::read_to_string(&path)
        };

        match result {
            Ok(contents) => {
                debug!(bytes = contents.len(), path = relative_path, "Read file");
                self.touch(token);
                Some(contents)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = relative_path, "Failed to read file: {}", e);
                None
            }
        }
    }

    /// Writes `data` to `relative_path` in the key's directory, replacing any
    /// existing file. The key directory and any intermediate directories are
    /// created as needed. Expiry is not checked here.
    ///
    /// # Errors
    ///
    /// Returns an error if the token or path is rejected by the path policy,
    /// or if a directory or the file cannot be written.
    #[instrument(skip(self, token, data), fields(token = %token_prefix(token)))]
    pub fn write(&self, token: &str, relative_path: &str, data: &str) -> Result<(), KeyspaceError> {
        let path = self.locate(token, relative_path).map_err(|e| {
            self.note_rejection(token, relative_path, &e);
            e
        })?;

        let guard = self.io_guard(token);
        {
            let _held = guard.lock();

            let key_dir = dirs::ensure_key_dir(&self.root, token)?;
            if let Some(parent) = path.parent().filter(|p| *p != key_dir.as_path()) {
                fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
            }
            policy::ensure_contained(&key_dir, &path, relative_path)?;
            fs::write(&path, data).map_err(|e| self.io_error(&path, e))?;
        }

        debug!(bytes = data.len(), path = relative_path, "Wrote file");
        self.touch(token);
        Ok(())
    }

    /// Runs a whitespace-separated command line against a live key.
    ///
    /// See [`exec_command`](Self::exec_command). A blank command line yields `false`.
    pub fn exec_against_key(&self, command: &str, token: &str) -> bool {
        if self.deny_if_expired(token) {
            return false;
        }
        match ExecCommand::parse(command) {
            Ok(command) => self.run_against_key(&command, token),
            Err(e) => {
                warn!("Refusing to run command {:?}: {}", command, e);
                false
            }
        }
    }

    /// Runs `command` with the key's directory appended as its final argument.
    ///
    /// Returns `false` straight away, without touching the disk, if the key is
    /// expired or unknown. Otherwise the key directory is created if needed
    /// and the command runs in [`exec_dir`](Self::exec_dir) with inherited
    /// standard streams, blocking until it exits. Returns `true` only on a
    /// zero exit status; spawn failures and non-zero exits yield `false`.
    pub fn exec_command(&self, command: &ExecCommand, token: &str) -> bool {
        if self.deny_if_expired(token) {
            return false;
        }
        self.run_against_key(command, token)
    }

    #[instrument(skip(self, token), fields(token = %token_prefix(token), command = %command))]
    fn run_against_key(&self, command: &ExecCommand, token: &str) -> bool {
        let key_dir = {
            let guard = self.io_guard(token);
            let _held = guard.lock();
            match dirs::ensure_key_dir(&self.root, token) {
                Ok(key_dir) => key_dir,
                Err(e) => {
                    warn!("Cannot prepare key directory: {}", e);
                    metrics::counter!("keyspace_exec_total", "outcome" => "failure").increment(1);
                    return false;
                }
            }
        };

        match command.run(&key_dir, &self.exec_dir) {
            Ok(()) => {
                metrics::counter!("keyspace_exec_total", "outcome" => "success").increment(1);
                debug!("Command succeeded");
                self.touch(token);
                true
            }
            Err(e) => {
                metrics::counter!("keyspace_exec_total", "outcome" => "failure").increment(1);
                warn!("Command failed: {}", e);
                false
            }
        }
    }

    fn deny_if_expired(&self, token: &str) -> bool {
        if !self.is_expired(token) {
            return false;
        }
        metrics::counter!("keyspace_exec_total", "outcome" => "denied").increment(1);
        info!(token = %token_prefix(token), "Refusing to run command against expired or unknown key");
        log_audit(&AuditEvent::ExecDenied {
            token: token_prefix(token),
        });
        true
    }

    /// Resolves `relative_path` inside the key's directory.
    fn locate(&self, token: &str, relative_path: &str) -> Result<PathBuf, KeyspaceError> {
        policy::validate_token(token)?;
        let relative = policy::normalize_relative(relative_path)?;
        let key_dir = self.root.join(token);
        let path = key_dir.join(relative);
        policy::ensure_contained(&key_dir, &path, relative_path)?;
        Ok(path)
    }

    fn note_rejection(&self, token: &str, relative_path: &str, error: &KeyspaceError) {
        match error {
            KeyspaceError::InvalidRelativePath { .. } => {
                warn!("{}", error);
                log_audit(&AuditEvent::PathRejected {
                    token: token_prefix(token),
                    path: relative_path.to_string(),
                });
            }
            _ => debug!("{}", error),
        }
    }

    /// Returns the lock serializing I/O on `token`'s directory.
    ///
    /// Tracked keys carry their own lock. Untracked tokens share one lock per
    /// token for as long as any caller holds it.
    fn io_guard(&self, token: &str) -> Arc<Mutex<()>> {
        if let Some(entry) = self.sessions.read().get(token) {
            return entry.io.clone();
        }

        let mut untracked = self.untracked_io.lock();
        untracked.retain(|_, io| Arc::strong_count(io) > 1);
        untracked.entry(token.to_string()).or_default().clone()
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> KeyspaceError {
        KeyspaceError::io(redact_key_path(&self.root, path), source)
    }

    /// Refreshes a live key's access time under [`ExpiryBasis::LastAccess`].
    /// Expired keys stay expired.
    fn touch(&self, token: &str) {
        if self.expiry_basis != ExpiryBasis::LastAccess {
            return;
        }
        let now = self.clock.now();
        if let Some(entry) = self.sessions.write().get_mut(token) {
            if !entry.session.is_expired_at(now, self.timeout) {
                entry.session.touch(now);
            }
        }
    }
}

fn remove_guarded(root: &Path, token: &str, io: &Mutex<()>) -> Result<bool, KeyspaceError> {
    let _held = io.lock();
    dirs::remove_key_dir(root, token)
}

#[allow(clippy::cast_precision_loss)]
fn record_tracked(count: usize) {
    metrics::gauge!("keyspace_tracked_tokens").set(count as f64);
}
