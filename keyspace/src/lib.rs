//! Keyspace - short-lived, token-keyed working directories.
//!
//! A [`Registry`] hands out opaque tokens. Each token names a private
//! directory under the registry's root that callers read, write, and run
//! commands against until the token goes idle for longer than the configured
//! timeout. Expired tokens are swept by [`Registry::purge_expired`].
//!
//! ```no_run
//! use keyspace::Registry;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), keyspace::KeyspaceError> {
//! let registry = Registry::new(Duration::from_secs(60), "/tmp/keyspace")?;
//! let token = registry.issue_token();
//! registry.write(&token, "notes.txt", "hello")?;
//! assert_eq!(registry.read(&token, "notes.txt").as_deref(), Some("hello"));
//! assert!(registry.exec_against_key("ls -l", &token));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Commands run against key directories.
pub mod exec;
/// Infrastructure components (config, telemetry, audit).
pub mod infrastructure;
/// Token and path validation.
pub mod policy;
/// The key registry.
pub mod registry;
/// Issued sessions and clocks.
pub mod session;
/// Shared error and view types.
pub mod types;

pub use exec::{ExecCommand, ExecError};
pub use registry::{Registry, RegistryOptions};
pub use session::{Clock, ManualClock, Session, SystemClock};
pub use types::{ExpiryBasis, KeyInfo, KeyspaceError, PurgeReport};
