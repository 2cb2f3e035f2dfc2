//! In-memory store with per-entry expiry and periodic cleanup.
//!
//! Entries are kept in a moka cache without moka's own TTL, because an
//! expired entry must stay readable as [`Lookup::Stale`] until cleanup
//! removes it. Expiry is tracked per entry and checked on read; a tokio
//! task removes expired entries every `cleanup_interval`.
//!
//! Writes and cleanup evictions both go through moka's per-key compute
//! lock, so an eviction re-checks the entry it removes and never drops a
//! value written after the cleanup pass looked at the key.

use std::sync::Mutex;
use std::time::Duration;

use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::{Lookup, Store};
use crate::expiration::Expiration;
use crate::{HuginnError, Result};

#[derive(Debug, Clone)]
struct Stamped<V> {
    value: V,
    inserted_at: Instant,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

impl<V> Stamped<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// Thread-safe in-memory store.
///
/// ```rust
/// # use huginn::{Expiration, Lookup, MemoryStore, Store};
/// # use std::time::Duration;
/// // A zero cleanup interval disables the background task.
/// let store = MemoryStore::new(Duration::from_secs(60), Duration::ZERO).unwrap();
/// store.set("PROF_1", "profile", Expiration::Default);
/// assert_eq!(store.get("PROF_1"), Lookup::Fresh("profile"));
/// ```
pub struct MemoryStore<V> {
    entries: Cache<String, Stamped<V>>,
    default_expiration: Duration,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a store.
    ///
    /// A non-zero `cleanup_interval` spawns the cleanup task on the current
    /// tokio runtime and fails with [`HuginnError::Configuration`] when there
    /// is none.
    pub fn new(default_expiration: Duration, cleanup_interval: Duration) -> Result<Self> {
        let entries: Cache<String, Stamped<V>> = Cache::builder().build();
        let cleanup = if cleanup_interval.is_zero() {
            None
        } else {
            spawn_cleanup(entries.clone(), cleanup_interval)?
        };
        Ok(Self {
            entries,
            default_expiration,
            cleanup: Mutex::new(cleanup),
        })
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }

    /// When `key` was last written, if present.
    pub fn inserted_at(&self, key: &str) -> Option<Instant> {
        self.entries.get(key).map(|e| e.inserted_at)
    }

    /// Number of entries, fresh or stale.
    pub fn len(&self) -> usize {
        self.entries.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Store<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Lookup<V> {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => Lookup::Stale(entry.value),
            Some(entry) => Lookup::Fresh(entry.value),
            None => Lookup::Missing,
        }
    }

    fn set(&self, key: &str, value: V, expiration: Expiration) {
        let now = Instant::now();
        // A time-to-live past the end of the clock never expires.
        let expires_at = expiration
            .resolve(self.default_expiration)
            .and_then(|ttl| now.checked_add(ttl));
        let stamped = Stamped {
            value,
            inserted_at: now,
            expires_at,
        };
        self.entries
            .entry(key.to_owned())
            .and_upsert_with(|_| stamped);
    }

    fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    fn default_expiration(&self) -> Duration {
        self.default_expiration
    }

    fn shutdown(&self) {
        let handle = self
            .cleanup
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl<V> Drop for MemoryStore<V> {
    fn drop(&mut self) {
        let handle = self
            .cleanup
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

fn purge<V>(entries: &Cache<String, Stamped<V>>) -> usize
where
    V: Clone + Send + Sync + 'static,
{
    let now = Instant::now();
    let mut removed = 0;
    for (key, entry) in entries.iter() {
        if entry.is_expired(now) && evict_if_expired(entries, String::clone(&key), now) {
            removed += 1;
        }
    }
    removed
}

/// Remove `key` only if the entry currently stored is expired at `now`.
fn evict_if_expired<V>(entries: &Cache<String, Stamped<V>>, key: String, now: Instant) -> bool
where
    V: Clone + Send + Sync + 'static,
{
    let outcome = entries
        .entry(key)
        .and_compute_with(|current| match current {
            Some(entry) if entry.value().is_expired(now) => Op::Remove,
            _ => Op::Nop,
        });
    matches!(outcome, CompResult::Removed(_))
}

fn spawn_cleanup<V>(
    entries: Cache<String, Stamped<V>>,
    every: Duration,
) -> Result<Option<JoinHandle<()>>>
where
    V: Clone + Send + Sync + 'static,
{
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
        HuginnError::Configuration(format!("store cleanup requires a tokio runtime: {e}"))
    })?;
    let Some(start) = Instant::now().checked_add(every) else {
        return Ok(None);
    };
    Ok(Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = purge(&entries);
            if removed > 0 {
                debug!(removed, "store cleanup removed expired entries");
            }
        }
    })))
}
