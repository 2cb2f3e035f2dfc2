//! Prefix-routed loader registry.
//!
//! A [`LoaderRegistry`] maps a fixed-length key prefix to the [`Loader`]
//! that knows how to fetch keys of that family from the data source:
//!
//! ```text
//!   "PROF_201" ──► prefix "PROF" ──► profile loader ──► (value, expiration)
//!   "ADUN_7"   ──► prefix "ADUN" ──► ad-unit loader ──► (value, expiration)
//!   "XY"       ──► shorter than prefix ──► MalformedKey
//!   "ZZZZ_1"   ──► no binding          ──► UnknownPrefix
//! ```
//!
//! Each binding carries the [`Expiration`] chosen at registration time;
//! it is returned with every successful load and is not computed from the
//! key. A prefix length of zero routes every key to the `""` binding.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::expiration::Expiration;
use crate::{HuginnError, Result};

/// Fetches one key from the data source.
///
/// Errors are surfaced verbatim to the cache's error observer. Use
/// [`HuginnError::upstream`] to wrap data-source failures.
#[async_trait]
pub trait Loader<V>: Send + Sync {
    async fn load(&self, key: &str) -> Result<V>;
}

/// Adapter turning an async closure into a [`Loader`].
///
/// Created by [`LoaderRegistry::register_fn`], or directly when a closure
/// needs a per-prefix expiration.
pub struct FnLoader<F>(F);

impl<F> FnLoader<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<V, F, Fut> Loader<V> for FnLoader<F>
where
    V: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    async fn load(&self, key: &str) -> Result<V> {
        (self.0)(key.to_owned()).await
    }
}

struct Binding<V> {
    loader: Arc<dyn Loader<V>>,
    expiration: Expiration,
}

impl<V> Clone for Binding<V> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            expiration: self.expiration,
        }
    }
}

/// Registry of loaders keyed by fixed-length prefix.
///
/// Registration takes `&self`, so a registry shared with a running cache
/// can gain bindings at any time. The internal lock is never held while a
/// loader runs.
pub struct LoaderRegistry<V> {
    bindings: RwLock<HashMap<String, Binding<V>>>,
    prefix_len: usize,
}

impl<V: Send + 'static> LoaderRegistry<V> {
    /// Create an empty registry routing on the first `prefix_len` bytes.
    pub fn new(prefix_len: usize) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            prefix_len,
        }
    }

    /// Length in bytes of every registered prefix.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Bind `loader` to `prefix` with the store's default expiration.
    ///
    /// Fails with [`HuginnError::InvalidPrefix`] if the prefix length does
    /// not match; nothing is registered in that case. An existing binding
    /// for the same prefix is replaced.
    pub fn register(&self, prefix: impl Into<String>, loader: impl Loader<V> + 'static) -> Result<()> {
        self.register_with_expiration(prefix, Expiration::Default, loader)
    }

    /// Bind `loader` to `prefix`, overriding the expiration of every value
    /// it loads.
    pub fn register_with_expiration(
        &self,
        prefix: impl Into<String>,
        expiration: Expiration,
        loader: impl Loader<V> + 'static,
    ) -> Result<()> {
        let prefix = prefix.into();
        if prefix.len() != self.prefix_len {
            return Err(HuginnError::InvalidPrefix {
                prefix,
                expected: self.prefix_len,
            });
        }
        let binding = Binding {
            loader: Arc::new(loader),
            expiration,
        };
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prefix, binding);
        Ok(())
    }

    /// Bind an async closure to `prefix`.
    ///
    /// ```rust
    /// # use huginn::LoaderRegistry;
    /// let loaders = LoaderRegistry::<String>::new(4);
    /// loaders
    ///     .register_fn("PROF", |key| async move { Ok(format!("profile for {key}")) })
    ///     .unwrap();
    /// assert!(loaders.is_registered("PROF"));
    /// ```
    pub fn register_fn<F, Fut>(&self, prefix: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.register(prefix, FnLoader(f))
    }

    /// Remove the binding for `prefix`. Returns whether one existed.
    pub fn unregister(&self, prefix: &str) -> bool {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(prefix)
            .is_some()
    }

    pub fn is_registered(&self, prefix: &str) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(prefix)
    }

    /// Number of registered prefixes.
    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load `key` through the loader bound to its prefix.
    ///
    /// Invokes exactly one loader on success of the routing step. Returns
    /// the loaded value together with the binding's expiration.
    pub async fn execute(&self, key: &str) -> Result<(V, Expiration)> {
        let binding = self.route(key)?;
        let value = binding.loader.load(key).await?;
        Ok((value, binding.expiration))
    }

    fn route(&self, key: &str) -> Result<Binding<V>> {
        // `get` also rejects a prefix that would split a UTF-8 sequence.
        let prefix = key
            .get(..self.prefix_len)
            .ok_or_else(|| HuginnError::MalformedKey {
                key: key.to_owned(),
                prefix_len: self.prefix_len,
            })?;
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(prefix)
            .cloned()
            .ok_or_else(|| HuginnError::UnknownPrefix {
                key: key.to_owned(),
            })
    }
}

impl<V: Send + 'static> Default for LoaderRegistry<V> {
    fn default() -> Self {
        Self::new(0)
    }
}
