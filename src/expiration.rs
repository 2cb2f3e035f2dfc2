//! Expiration policy for cached values.

use std::time::Duration;

/// How long a value written to the store stays fresh.
///
/// Mirrors the integer convention used in config files:
/// `-1` never expires, `0` uses the store default, `> 0` is explicit.
///
/// ```rust
/// # use huginn::Expiration;
/// # use std::time::Duration;
/// assert_eq!(Expiration::from_secs(-1), Expiration::Never);
/// assert_eq!(Expiration::from_secs(0), Expiration::Default);
/// assert_eq!(Expiration::from_secs(30), Expiration::After(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Never goes stale, and is never removed by store cleanup.
    Never,
    /// Use whatever default the store was configured with.
    #[default]
    Default,
    /// Goes stale after the given duration.
    After(Duration),
}

impl Expiration {
    /// Decode the integer form used in config files.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Expiration::Never,
            0 => Expiration::Default,
            s => Expiration::After(Duration::from_secs(s.unsigned_abs())),
        }
    }

    /// Replace `Default` with `fallback`; explicit policies win.
    pub fn or(self, fallback: Expiration) -> Expiration {
        match self {
            Expiration::Default => fallback,
            explicit => explicit,
        }
    }

    /// Resolve to a concrete time-to-live. `None` means never expire.
    ///
    /// A zero `After` is treated like `Default`.
    pub fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Expiration::Never => None,
            Expiration::Default => Some(default),
            Expiration::After(d) if d.is_zero() => Some(default),
            Expiration::After(d) => Some(d),
        }
    }
}
