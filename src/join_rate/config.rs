//! # Policies and Engine Configuration
//!
//! This module holds the two configuration layers of the engine:
//!
//! - [`Policy`]: the persisted `{key, rate, window}` record an operator sets
//!   per key, plus the reserved `DEFAULT` record every other key falls back to.
//! - [`EngineConfig`]: process-level settings that are not persisted, such as
//!   the fallback values used the first time no `DEFAULT` record exists.
//!
//! ```text
//!     Two-tier policy model:
//!
//!     ┌────────────────────────────┐
//!     │ DEFAULT   5 joins / 5s     │ ◄── applies to every key without
//!     └────────────────────────────┘     an override
//!     ┌────────────────────────────┐
//!     │ #busy    50 joins / 10s    │ ◄── override
//!     │ #quiet   -1 joins / 0s     │ ◄── override, monitoring disabled
//!     └────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Key under which the default policy is stored.
pub const DEFAULT_KEY: &str = "DEFAULT";

/// Built-in rate used when no `DEFAULT` policy has ever been stored.
pub const FALLBACK_RATE: i64 = 5;

/// Built-in window (seconds) used when no `DEFAULT` policy has ever been stored.
pub const FALLBACK_WINDOW_SECS: i64 = 5;

/// Minimum spacing between two warnings for the same key (seconds).
pub const WARN_COOLDOWN_SECS: u64 = 30;

/// A rate/window pair governing how many arrivals a key may see per window.
///
/// A negative `rate` or `window` disables monitoring for the key.
///
/// # Example
///
/// ```rust
/// use joinrate::Policy;
///
/// let policy = Policy::new("#rust", 10, 60);
/// assert!(!policy.is_disabled());
/// assert!(Policy::new("#idle", -1, 0).is_disabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Normalized key this policy applies to, or [`DEFAULT_KEY`].
    pub key: String,

    /// Arrivals admitted per window; also the bucket capacity.
    pub rate: i64,

    /// Window length in seconds.
    pub window: i64,
}

impl Policy {
    /// Creates a policy for `key`.
    pub fn new(key: impl Into<String>, rate: i64, window: i64) -> Self {
        Self {
            key: key.into(),
            rate,
            window,
        }
    }

    /// Creates the `DEFAULT` policy with the given values.
    pub fn default_policy(rate: i64, window: i64) -> Self {
        Self::new(DEFAULT_KEY, rate, window)
    }

    /// Returns `true` if monitoring is switched off by this policy.
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.rate < 0 || self.window < 0
    }

    /// Returns `true` if this is the reserved `DEFAULT` record.
    #[inline]
    pub fn is_default(&self) -> bool {
        self.key == DEFAULT_KEY
    }

    /// Tokens earned over `elapsed` seconds, rounded down.
    ///
    /// A zero window has no meaningful quotient; any elapsed time
    /// earns the full rate instead.
    #[inline]
    pub(crate) fn refill_for(&self, elapsed: u64) -> i64 {
        if elapsed == 0 {
            return 0;
        }
        if self.window == 0 {
            return self.rate;
        }
        let elapsed = i64::try_from(elapsed).unwrap_or(i64::MAX);
        elapsed.saturating_mul(self.rate) / self.window
    }
}

/// Process-level engine settings.
///
/// These are not persisted; hosts typically deserialize them from their
/// own configuration file.
///
/// ## Examples
///
/// ```rust
/// use joinrate::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.fallback_rate, 5);
/// assert_eq!(config.warn_cooldown_secs, 30);
///
/// let strict = EngineConfig::default().with_fallback(3, 10);
/// assert!(strict.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rate written to the `DEFAULT` record when none was stored.
    pub fallback_rate: i64,

    /// Window written to the `DEFAULT` record when none was stored.
    pub fallback_window_secs: i64,

    /// Minimum spacing between warnings for the same key.
    pub warn_cooldown_secs: u64,
}

impl Default for EngineConfig {
    /// 5 joins in 5 seconds, warnings at most every 30 seconds.
    fn default() -> Self {
        Self {
            fallback_rate: FALLBACK_RATE,
            fallback_window_secs: FALLBACK_WINDOW_SECS,
            warn_cooldown_secs: WARN_COOLDOWN_SECS,
        }
    }
}

impl EngineConfig {
    /// Sets the fallback `DEFAULT` values.
    pub fn with_fallback(mut self, rate: i64, window_secs: i64) -> Self {
        self.fallback_rate = rate;
        self.fallback_window_secs = window_secs;
        self
    }

    /// Sets the warning cooldown.
    pub fn with_warn_cooldown_secs(mut self, secs: u64) -> Self {
        self.warn_cooldown_secs = secs;
        self
    }

    /// The `DEFAULT` policy synthesized from the fallback values.
    pub fn fallback_policy(&self) -> Policy {
        Policy::default_policy(self.fallback_rate, self.fallback_window_secs)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message if:
    /// - `fallback_rate` is negative (the fallback must monitor something)
    /// - `fallback_window_secs` is not positive
    /// - `warn_cooldown_secs` is 0
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.fallback_rate < 0 {
            return Err("fallback_rate must not be negative");
        }

        if self.fallback_window_secs <= 0 {
            return Err("fallback_window_secs must be greater than 0");
        }

        if self.warn_cooldown_secs == 0 {
            return Err("warn_cooldown_secs must be greater than 0");
        }

        Ok(())
    }
}
