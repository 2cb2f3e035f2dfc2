//! Read-through cache with single-flight background refresh.
//!
//! [`AsyncCache`] composes a [`Store`], a [`LoaderRegistry`] and a
//! [`StatusTracker`]:
//!
//! ```text
//! get(key)
//!   │
//!   ├─ "" ──────────────────────────────► (None, InvalidKey)
//!   ├─ store: Fresh(v) ─────────────────► (Some(v), Done)        tracker untouched
//!   └─ store: Stale(v) / Missing
//!        │  tracker.lock()
//!        ├─ InProgress ─────────────────► (stale, InProgress)    nothing spawned
//!        └─ NotPresent / Done / Error
//!             set InProgress, unlock, spawn refresh
//!             ├─ stale present ─────────► (Some(stale), Done)
//!             └─ nothing cached ────────► (None, InProgress)
//! ```
//!
//! The refresh task is the only writer of its key's terminal state: on
//! success it writes the store and then marks the key `Done`; on failure it
//! marks the key `Error`, leaves the store alone, and notifies the error
//! observer. Callers never see async failures as errors, only as
//! [`KeyStatus::Error`].
//!
//! # Retry policy
//!
//! A key in `Error` state is retried by the next miss, the same as
//! `NotPresent`. Only `InProgress` suppresses a new refresh.

pub mod builder;

pub use builder::AsyncCacheBuilder;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::expiration::Expiration;
use crate::loader::LoaderRegistry;
use crate::status::{ErrorObserver, KeyStatus, StatusTracker};
use crate::store::{Lookup, Store};
use crate::telemetry;
use crate::{HuginnError, Result};

/// Answer to a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<V> {
    /// Cached value, fresh or stale, if any.
    pub value: Option<V>,
    /// What the caller should make of `value`:
    /// `Done` is usable, `InProgress` means retry shortly,
    /// `Error` means the data source is failing.
    pub status: KeyStatus,
}

impl<V> Fetched<V> {
    fn done(value: V) -> Self {
        Self {
            value: Some(value),
            status: KeyStatus::Done,
        }
    }

    fn in_progress(value: Option<V>) -> Self {
        Self {
            value,
            status: KeyStatus::InProgress,
        }
    }

    fn invalid() -> Self {
        Self {
            value: None,
            status: KeyStatus::InvalidKey,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == KeyStatus::Done
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }
}

type Reply<V> = oneshot::Sender<Result<V>>;

enum Admission<V> {
    /// Another refresh already owns the key.
    Busy,
    /// This call launched the refresh, with a completion handle if asked.
    Launched(Option<oneshot::Receiver<Result<V>>>),
}

/// Deduplicating read-through cache.
///
/// Cheap to clone; clones share the same store, loaders and state.
///
/// ```rust,no_run
/// use huginn::{AsyncCache, Config, KeyStatus};
///
/// # async fn run() -> huginn::Result<()> {
/// let cache: AsyncCache<String> = AsyncCache::builder()
///     .config(Config::new().prefix_len(4))
///     .build()?;
/// cache
///     .loaders()
///     .register_fn("PROF", |key| async move { Ok(format!("profile for {key}")) })?;
///
/// let first = cache.get("PROF_1");
/// assert_eq!(first.status, KeyStatus::InProgress);
/// # Ok(())
/// # }
/// ```
pub struct AsyncCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for AsyncCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<V> {
    store: Arc<dyn Store<V>>,
    loaders: Arc<LoaderRegistry<V>>,
    tracker: StatusTracker,
    observer: ErrorObserver,
    expiration: Expiration,
    fetch_timeout: Option<Duration>,
    runtime: Handle,
}

impl<V> AsyncCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a builder.
    pub fn builder() -> AsyncCacheBuilder<V> {
        AsyncCacheBuilder::new()
    }

    /// Read `key`, launching a background refresh on a miss or stale hit.
    ///
    /// Never blocks on the data source. Safe to call from any thread; the
    /// refresh runs on the runtime the cache was built in.
    pub fn get(&self, key: &str) -> Fetched<V> {
        if key.is_empty() {
            return Fetched::invalid();
        }
        let stale = match self.lookup(key) {
            Ok(value) => return Fetched::done(value),
            Err(stale) => stale,
        };
        match (self.admit(key, false), stale) {
            (Admission::Busy, stale) => Fetched::in_progress(stale),
            (Admission::Launched(_), Some(stale)) => {
                metrics::counter!(telemetry::STALE_SERVED_TOTAL).increment(1);
                Fetched::done(stale)
            }
            (Admission::Launched(_), None) => Fetched::in_progress(None),
        }
    }

    /// Like [`get()`](Self::get), but an empty key is an error.
    pub fn try_get(&self, key: &str) -> Result<Fetched<V>> {
        if key.is_empty() {
            return Err(HuginnError::InvalidKey);
        }
        Ok(self.get(key))
    }

    /// Read `key`, waiting for the data source on a cold miss.
    ///
    /// Fresh and stale hits answer immediately, as in [`get()`](Self::get).
    /// When nothing is cached, the caller that claims the key waits for the
    /// refresh and gets its value or its error. Concurrent callers that
    /// find the refresh already running return `InProgress` at once.
    pub async fn get_or_wait(&self, key: &str) -> Result<Fetched<V>> {
        if key.is_empty() {
            return Err(HuginnError::InvalidKey);
        }
        let stale = match self.lookup(key) {
            Ok(value) => return Ok(Fetched::done(value)),
            Err(stale) => stale,
        };
        match (self.admit(key, stale.is_none()), stale) {
            (Admission::Busy, stale) => Ok(Fetched::in_progress(stale)),
            (Admission::Launched(Some(reply)), _) => match reply.await {
                Ok(outcome) => outcome.map(Fetched::done),
                Err(_) => Err(HuginnError::RefreshCancelled {
                    key: key.to_owned(),
                }),
            },
            (Admission::Launched(None), Some(stale)) => {
                metrics::counter!(telemetry::STALE_SERVED_TOTAL).increment(1);
                Ok(Fetched::done(stale))
            }
            (Admission::Launched(None), None) => Ok(Fetched::in_progress(None)),
        }
    }

    /// Write `value` through to the store with the configured expiration
    /// and mark `key` as `Done`.
    ///
    /// A key with a refresh in flight keeps its `InProgress` state; that
    /// refresh still owns the terminal state and will overwrite the value.
    pub fn insert(&self, key: &str, value: V) -> Result<()> {
        if key.is_empty() {
            return Err(HuginnError::InvalidKey);
        }
        let mut guard = self.inner.tracker.lock();
        self.inner.store.set(key, value, self.inner.expiration);
        if guard.get(key) != KeyStatus::InProgress {
            guard.set(key, KeyStatus::Done);
        }
        Ok(())
    }

    /// Refresh state of `key`.
    pub fn status(&self, key: &str) -> KeyStatus {
        self.inner.tracker.get(key)
    }

    pub fn store(&self) -> &Arc<dyn Store<V>> {
        &self.inner.store
    }

    pub fn loaders(&self) -> &Arc<LoaderRegistry<V>> {
        &self.inner.loaders
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.inner.tracker
    }

    /// Stop the status sweep and the store's background cleanup.
    ///
    /// Refresh tasks already running are left to finish.
    pub fn shutdown(&self) {
        self.inner.tracker.shutdown();
        self.inner.store.shutdown();
    }

    /// `Ok` with a fresh value, otherwise `Err` with the stale one if any.
    fn lookup(&self, key: &str) -> std::result::Result<V, Option<V>> {
        match self.inner.store.get(key) {
            Lookup::Fresh(value) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Ok(value)
            }
            Lookup::Stale(value) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                Err(Some(value))
            }
            Lookup::Missing => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                Err(None)
            }
        }
    }

    /// Decide, under the tracker lock, whether this call starts the refresh.
    fn admit(&self, key: &str, want_reply: bool) -> Admission<V> {
        let mut guard = self.inner.tracker.lock();
        if guard.get(key) == KeyStatus::InProgress {
            return Admission::Busy;
        }
        guard.set(key, KeyStatus::InProgress);
        let (reply, waiter) = if want_reply {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        drop(guard);

        let inner = Arc::clone(&self.inner);
        self.inner
            .runtime
            .spawn(inner.refresh(key.to_owned(), reply));
        Admission::Launched(waiter)
    }
}

impl<V> Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn refresh(self: Arc<Self>, key: String, reply: Option<Reply<V>>) {
        debug!(key = %key, "refresh started");
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.fetch(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(HuginnError::LoaderPanicked { key: key.clone() }));
        metrics::histogram!(telemetry::REFRESH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok((value, expiration)) => {
                let reply = reply.map(|tx| (tx, value.clone()));
                self.store.set(&key, value, expiration.or(self.expiration));
                self.tracker.set(&key, KeyStatus::Done);
                metrics::counter!(telemetry::REFRESHES_TOTAL, "status" => "ok").increment(1);
                debug!(
                    key = %key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "refresh done"
                );
                if let Some((tx, value)) = reply {
                    let _ = tx.send(Ok(value));
                }
            }
            Err(err) => {
                self.tracker.set(&key, KeyStatus::Error);
                metrics::counter!(telemetry::REFRESHES_TOTAL, "status" => "error").increment(1);
                (self.observer)(&key, &err);
                if let Some(tx) = reply {
                    let _ = tx.send(Err(err));
                }
            }
        }
    }

    async fn fetch(&self, key: &str) -> Result<(V, Expiration)> {
        match self.fetch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.loaders.execute(key))
                .await
                .map_err(|_| HuginnError::FetchTimeout {
                    key: key.to_owned(),
                    timeout,
                })?,
            None => self.loaders.execute(key).await,
        }
    }
}
