//! Expiring key/value storage behind the cache.
//!
//! [`AsyncCache`](crate::AsyncCache) only needs three things from a store:
//! a lookup that distinguishes fresh from stale entries, a write with an
//! [`Expiration`], and the store's default time-to-live. Those live on the
//! [`Store`] trait so callers can inject their own backend via
//! [`AsyncCacheBuilder::store()`](crate::AsyncCacheBuilder::store).
//!
//! [`MemoryStore`] is the bundled in-memory implementation.

pub mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use crate::expiration::Expiration;

/// Result of a store lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// Present and within its time-to-live.
    Fresh(V),
    /// Present but past its time-to-live, not yet cleaned up.
    Stale(V),
    /// Absent.
    Missing,
}

impl<V> Lookup<V> {
    /// The value, fresh or stale.
    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Fresh(v) | Lookup::Stale(v) => Some(v),
            Lookup::Missing => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Lookup::Fresh(_))
    }
}

/// Thread-safe expiring store.
pub trait Store<V>: Send + Sync {
    /// Look up `key` without changing it.
    fn get(&self, key: &str) -> Lookup<V>;

    /// Insert or overwrite `key`. `Expiration::Default` resolves to
    /// [`default_expiration()`](Self::default_expiration).
    fn set(&self, key: &str, value: V, expiration: Expiration);

    /// Remove `key` if present.
    fn remove(&self, key: &str);

    /// Time-to-live applied to `Expiration::Default` writes.
    fn default_expiration(&self) -> Duration;

    /// Stop any background work owned by the store.
    fn shutdown(&self) {}
}
