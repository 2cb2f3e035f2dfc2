//! Cache configuration.
//!
//! [`Config`] is built in code with builder-style setters, or loaded from a
//! TOML file with a `[cache]` table:
//!
//! ```toml
//! [cache]
//! prefix_len = 4
//! purge_interval_secs = 300     # 0 disables the status sweep
//! expiry_secs = 0               # -1 never, 0 store default, > 0 explicit
//! default_expiration_secs = 300
//! cleanup_interval_secs = 300   # 0 disables store cleanup
//! fetch_timeout_ms = 2000       # optional
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::expiration::Expiration;
use crate::{HuginnError, Result};

/// Configuration for [`AsyncCache`](crate::AsyncCache).
///
/// ```rust
/// # use huginn::{Config, Expiration};
/// # use std::time::Duration;
/// let config = Config::new()
///     .prefix_len(4)
///     .purge_interval(Duration::from_secs(60))
///     .expiration(Expiration::After(Duration::from_secs(30)))
///     .fetch_timeout(Duration::from_secs(2));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Prefix length used to route keys to loaders. Default: 4.
    pub prefix_len: usize,
    /// Status sweep interval and status entry lifetime. Zero disables the
    /// sweep. Default: 5 minutes.
    pub purge_interval: Duration,
    /// Expiration for fetched values whose loader binding does not set one.
    /// Default: [`Expiration::Default`].
    pub expiration: Expiration,
    /// Store time-to-live for `Expiration::Default`. Default: 5 minutes.
    pub default_expiration: Duration,
    /// Store cleanup interval. Zero disables cleanup, so stale values stay
    /// servable until overwritten. Default: 5 minutes.
    pub cleanup_interval: Duration,
    /// Upper bound on a single loader call. Default: none.
    pub fetch_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix_len: default_prefix_len(),
            purge_interval: Duration::from_secs(default_interval_secs()),
            expiration: Expiration::Default,
            default_expiration: Duration::from_secs(default_interval_secs()),
            cleanup_interval: Duration::from_secs(default_interval_secs()),
            fetch_timeout: None,
        }
    }
}

impl Config {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix_len(mut self, len: usize) -> Self {
        self.prefix_len = len;
        self
    }

    pub fn purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    pub fn expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn default_expiration(mut self, ttl: Duration) -> Self {
        self.default_expiration = ttl;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Reject configurations the cache cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.default_expiration.is_zero() {
            return Err(HuginnError::Configuration(
                "default_expiration must be greater than zero".into(),
            ));
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(HuginnError::Configuration(
                "fetch_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(s)?;
        let config = Config::from(file.cache);
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cache: CacheSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSection {
    #[serde(default = "default_prefix_len")]
    prefix_len: usize,
    #[serde(default = "default_interval_secs")]
    purge_interval_secs: u64,
    #[serde(default)]
    expiry_secs: i64,
    #[serde(default = "default_interval_secs")]
    default_expiration_secs: u64,
    #[serde(default = "default_interval_secs")]
    cleanup_interval_secs: u64,
    #[serde(default)]
    fetch_timeout_ms: Option<u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            prefix_len: default_prefix_len(),
            purge_interval_secs: default_interval_secs(),
            expiry_secs: 0,
            default_expiration_secs: default_interval_secs(),
            cleanup_interval_secs: default_interval_secs(),
            fetch_timeout_ms: None,
        }
    }
}

impl From<CacheSection> for Config {
    fn from(section: CacheSection) -> Self {
        Self {
            prefix_len: section.prefix_len,
            purge_interval: Duration::from_secs(section.purge_interval_secs),
            expiration: Expiration::from_secs(section.expiry_secs),
            default_expiration: Duration::from_secs(section.default_expiration_secs),
            cleanup_interval: Duration::from_secs(section.cleanup_interval_secs),
            fetch_timeout: section.fetch_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn default_prefix_len() -> usize {
    4
}

fn default_interval_secs() -> u64 {
    300
}
