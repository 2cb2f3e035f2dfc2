//! Huginn - deduplicating read-through cache
//!
//! This crate sits in front of a slow data source and serves values from an
//! in-memory store. When a value is missing or stale, at most one
//! background refresh per key reaches the data source; every other caller
//! gets the stale value or an `InProgress` answer without waiting.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use huginn::{AsyncCache, Config, HuginnError, KeyStatus};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let cache: AsyncCache<String> = AsyncCache::builder()
//!         .config(Config::new().prefix_len(4).fetch_timeout(Duration::from_secs(2)))
//!         .on_error(|key, err| eprintln!("refresh of {key} failed: {err}"))
//!         .build()?;
//!
//!     cache.loaders().register_fn("PROF", |key| async move {
//!         // query the database here
//!         if key.ends_with("_0") {
//!             return Err(HuginnError::upstream("no such profile"));
//!         }
//!         Ok(format!("profile for {key}"))
//!     })?;
//!
//!     // Cold key: a refresh starts in the background.
//!     let first = cache.get("PROF_1");
//!     assert_eq!(first.status, KeyStatus::InProgress);
//!
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     let second = cache.get("PROF_1");
//!     assert_eq!(second.value.as_deref(), Some("profile for PROF_1"));
//!
//!     // Or wait for the first load instead of polling.
//!     let waited = cache.get_or_wait("PROF_2").await?;
//!     assert!(waited.is_done());
//!     Ok(())
//! }
//! ```
//!
//! # Components
//!
//! - [`AsyncCache`]: the coordinator and public surface.
//! - [`StatusTracker`]: per-key refresh state, swept on a deadline.
//! - [`LoaderRegistry`]: routes keys to loaders by fixed-length prefix.
//! - [`Store`] / [`MemoryStore`]: the expiring value store.

pub mod cache;
pub mod config;
pub mod error;
pub mod expiration;
pub mod loader;
pub mod status;
pub mod store;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{AsyncCache, AsyncCacheBuilder, Fetched};
pub use config::Config;
pub use error::{HuginnError, Result};
pub use expiration::Expiration;
pub use loader::{FnLoader, Loader, LoaderRegistry};
pub use status::{ErrorObserver, KeyStatus, StatusGuard, StatusTracker, SweepReport};
pub use store::{Lookup, MemoryStore, Store};

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
