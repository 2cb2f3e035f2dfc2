//! Builder for configuring cache instances

use std::sync::Arc;

use tokio::runtime::Handle;

use super::{AsyncCache, Inner};
use crate::config::Config;
use crate::loader::LoaderRegistry;
use crate::status::{ErrorObserver, StatusTracker, log_error};
use crate::store::{MemoryStore, Store};
use crate::{HuginnError, Result};

/// Builder for [`AsyncCache`].
///
/// Anything left unset is derived from the [`Config`]: a [`MemoryStore`]
/// with the configured default expiration and cleanup interval, an empty
/// [`LoaderRegistry`] with the configured prefix length, and an error
/// observer that logs.
pub struct AsyncCacheBuilder<V> {
    config: Config,
    loaders: Option<Arc<LoaderRegistry<V>>>,
    store: Option<Arc<dyn Store<V>>>,
    observer: Option<ErrorObserver>,
}

impl<V> AsyncCacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            loaders: None,
            store: None,
            observer: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use an existing loader registry. Its prefix length takes precedence
    /// over `Config::prefix_len`.
    pub fn loaders(mut self, loaders: Arc<LoaderRegistry<V>>) -> Self {
        self.loaders = Some(loaders);
        self
    }

    /// Use a custom store instead of the in-memory one.
    pub fn store(mut self, store: Arc<dyn Store<V>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Observe background failures and stalled refreshes.
    pub fn on_error<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str, &HuginnError) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Validate the config and start the cache.
    ///
    /// Must be called inside a tokio runtime: refreshes, the status sweep
    /// and the store cleanup all run on it.
    pub fn build(self) -> Result<AsyncCache<V>> {
        let config = self.config;
        config.validate()?;

        let runtime = Handle::try_current().map_err(|e| {
            HuginnError::Configuration(format!("AsyncCache must be built inside a tokio runtime: {e}"))
        })?;
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(log_error) as ErrorObserver);
        let store: Arc<dyn Store<V>> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new(
                config.default_expiration,
                config.cleanup_interval,
            )?),
        };
        let loaders = self
            .loaders
            .unwrap_or_else(|| Arc::new(LoaderRegistry::new(config.prefix_len)));
        let tracker = StatusTracker::new(config.purge_interval, Arc::clone(&observer))?;

        Ok(AsyncCache {
            inner: Arc::new(Inner {
                store,
                loaders,
                tracker,
                observer,
                expiration: config.expiration,
                fetch_timeout: config.fetch_timeout,
                runtime,
            }),
        })
    }
}

impl<V> Default for AsyncCacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
