//! Issued key sessions.
//!
//! A [`Session`] is the record behind one token: when it was issued, when it
//! was last refreshed, and whether it has been idle for longer than a timeout.
//! Expiry is computed against a [`Clock`] so the registry can be driven by a
//! [`ManualClock`] in tests.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Source of monotonic time for expiry decisions.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// The process's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when [`advance`](Self::advance) is called.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// One issued token and its timestamps.
#[derive(Debug, Clone)]
pub struct Session {
    token: String,
    created_at: Instant,
    last_accessed_at: Instant,
    issued_at: DateTime<Utc>,
}

impl Session {
    /// Issues a new session against the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Issues a new session whose timestamps are both `now`.
    #[must_use]
    pub fn starting_at(now: Instant) -> Self {
        Self {
            token: generate_token(),
            created_at: now,
            last_accessed_at: now,
            issued_at: Utc::now(),
        }
    }

    /// The token naming this session and its directory.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the session was issued.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the session was last refreshed.
    #[must_use]
    pub fn last_accessed_at(&self) -> Instant {
        self.last_accessed_at
    }

    /// Wall-clock issuance time, for reporting only.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Time elapsed since the last refresh.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed_at)
    }

    /// Returns `true` once the session has been idle for strictly longer than
    /// `timeout` as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant, timeout: Duration) -> bool {
        self.idle_for(now) > timeout
    }

    /// [`is_expired_at`](Self::is_expired_at) against the system clock.
    #[must_use]
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.is_expired_at(Instant::now(), timeout)
    }

    /// Records an access at `now`. Never moves the timestamp backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Random v4 UUID, hyphenated. Only `[0-9a-f-]` ever appears.
fn generate_token() -> String {
    Uuid::new_v4().to_string()
}
