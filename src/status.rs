//! Per-key refresh state.
//!
//! [`StatusTracker`] owns the map from key to [`KeyStatus`] that decides
//! whether a miss may start a refresh. Only `InProgress`, `Done` and `Error`
//! are ever stored; `NotPresent` and `InvalidKey` are answers synthesized
//! for absent and empty keys.
//!
//! # State machine
//!
//! ```text
//!   NotPresent ──(coordinator admits refresh)──► InProgress
//!   InProgress ──(loader ok)─────────────────► Done
//!   InProgress ──(loader failed)─────────────► Error
//!   any stored ──(sweep, now > deadline)─────► removed (NotPresent)
//! ```
//!
//! Every `set` restarts the entry's deadline at `now + purge_interval`, so
//! an entry ages out `purge_interval` after its last change. The sweep
//! reports an `InProgress` entry that reaches its deadline as
//! [`HuginnError::RefreshStalled`]: the refresh may still be running, and
//! the next miss on that key will start another one.
//!
//! # Check-then-set
//!
//! [`StatusTracker::lock()`] hands out a [`StatusGuard`] holding the write
//! lock, so the coordinator can read the state and claim the key in one
//! critical section. The guard releases the lock on drop.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockWriteGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::telemetry;
use crate::{HuginnError, Result};

/// Refresh state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    /// Not tracked.
    NotPresent,
    /// A background refresh is running.
    InProgress,
    /// The last refresh succeeded; the store holds its value.
    Done,
    /// The last refresh failed.
    Error,
    /// The key was empty.
    InvalidKey,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::NotPresent => "not_present",
            KeyStatus::InProgress => "in_progress",
            KeyStatus::Done => "done",
            KeyStatus::Error => "error",
            KeyStatus::InvalidKey => "invalid_key",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback receiving background failures as `(key, error)`.
pub type ErrorObserver = Arc<dyn Fn(&str, &HuginnError) + Send + Sync>;

/// Default observer: logs the failure at `error` level.
pub fn log_error(key: &str, err: &HuginnError) {
    error!(key, error = %err, "background refresh failed");
}

#[derive(Debug, Clone, Copy)]
struct StatusEntry {
    status: KeyStatus,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

type StatusMap = HashMap<String, StatusEntry>;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed.
    pub evicted: usize,
    /// Removed entries that were still `InProgress`.
    pub stalled: usize,
}

/// Locked map of key states with a deadline sweep.
pub struct StatusTracker {
    entries: Arc<RwLock<StatusMap>>,
    purge_interval: Duration,
    observer: ErrorObserver,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StatusTracker {
    /// Create a tracker.
    ///
    /// A non-zero `purge_interval` both bounds each entry's lifetime and
    /// spawns the sweep on the current tokio runtime; it fails with
    /// [`HuginnError::Configuration`] when there is none. A zero interval
    /// disables the sweep and entries never expire.
    pub fn new(purge_interval: Duration, observer: ErrorObserver) -> Result<Self> {
        let entries = Arc::new(RwLock::new(StatusMap::new()));
        let sweeper = if purge_interval.is_zero() {
            None
        } else {
            spawn_sweeper(
                Arc::downgrade(&entries),
                purge_interval,
                Arc::clone(&observer),
            )?
        };
        Ok(Self {
            entries,
            purge_interval,
            observer,
            sweeper: Mutex::new(sweeper),
        })
    }

    pub fn purge_interval(&self) -> Duration {
        self.purge_interval
    }

    /// Current state of `key`.
    pub fn get(&self, key: &str) -> KeyStatus {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        lookup(&entries, key)
    }

    /// Record `status` for `key` and restart its deadline.
    ///
    /// Ignored for an empty key or `InvalidKey`. Setting `NotPresent`
    /// removes the entry.
    pub fn set(&self, key: &str, status: KeyStatus) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        upsert(&mut entries, key, status, self.purge_interval);
    }

    /// Take the exclusive lock for a check-then-set.
    pub fn lock(&self) -> StatusGuard<'_> {
        StatusGuard {
            entries: self.entries.write().unwrap_or_else(PoisonError::into_inner),
            purge_interval: self.purge_interval,
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one sweep pass now.
    pub fn sweep_now(&self) -> SweepReport {
        sweep(&self.entries, &self.observer)
    }

    /// Stop the background sweep. Idempotent.
    pub fn shutdown(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for StatusTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive access to the status map.
///
/// Obtained from [`StatusTracker::lock()`]; releases the lock on drop.
pub struct StatusGuard<'a> {
    entries: RwLockWriteGuard<'a, StatusMap>,
    purge_interval: Duration,
}

impl StatusGuard<'_> {
    pub fn get(&self, key: &str) -> KeyStatus {
        lookup(&self.entries, key)
    }

    pub fn set(&mut self, key: &str, status: KeyStatus) {
        upsert(&mut self.entries, key, status, self.purge_interval);
    }
}

fn lookup(entries: &StatusMap, key: &str) -> KeyStatus {
    if key.is_empty() {
        return KeyStatus::InvalidKey;
    }
    entries
        .get(key)
        .map_or(KeyStatus::NotPresent, |entry| entry.status)
}

fn upsert(entries: &mut StatusMap, key: &str, status: KeyStatus, purge_interval: Duration) {
    if key.is_empty() {
        return;
    }
    match status {
        KeyStatus::InvalidKey => {}
        KeyStatus::NotPresent => {
            entries.remove(key);
        }
        status => {
            // Overflow means the deadline is unreachable.
            let expires_at = if purge_interval.is_zero() {
                None
            } else {
                Instant::now().checked_add(purge_interval)
            };
            entries.insert(key.to_owned(), StatusEntry { status, expires_at });
        }
    }
}

fn sweep(entries: &RwLock<StatusMap>, observer: &ErrorObserver) -> SweepReport {
    let now = Instant::now();
    let mut stalled = Vec::new();
    let mut evicted = 0;
    {
        let mut entries = entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|key, entry| {
            let expired = entry.expires_at.is_some_and(|at| now > at);
            if expired {
                evicted += 1;
                if entry.status == KeyStatus::InProgress {
                    stalled.push(key.clone());
                }
            }
            !expired
        });
    }

    // Observers run outside the lock so they may call back into the tracker.
    for key in &stalled {
        warn!(key = %key, "refresh outlived its deadline");
        observer(key, &HuginnError::RefreshStalled { key: key.clone() });
    }

    if evicted > 0 {
        metrics::counter!(telemetry::SWEEP_EVICTIONS_TOTAL).increment(evicted as u64);
        metrics::counter!(telemetry::STALLED_REFRESHES_TOTAL).increment(stalled.len() as u64);
        debug!(evicted, stalled = stalled.len(), "status sweep");
    }

    SweepReport {
        evicted,
        stalled: stalled.len(),
    }
}

fn spawn_sweeper(
    entries: Weak<RwLock<StatusMap>>,
    every: Duration,
    observer: ErrorObserver,
) -> Result<Option<JoinHandle<()>>> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
        HuginnError::Configuration(format!("status sweep requires a tokio runtime: {e}"))
    })?;
    // A first tick past the end of time never fires.
    let Some(start) = Instant::now().checked_add(every) else {
        return Ok(None);
    };
    Ok(Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(entries) = entries.upgrade() else {
                break;
            };
            sweep(&entries, &observer);
        }
    })))
}
