//! # Utility Functions (utils.rs)
//!
//! Time source, key normalization and the spin hint used while waiting
//! for the initialization sequencer.

use super::config::DEFAULT_KEY;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// Monotonic time base so a wall-clock step does not move `now` backwards.
// We capture the epoch seconds at first use, then advance with `Instant`.
static START_TIME_BASE: OnceLock<(Instant, u64)> = OnceLock::new();

/// CPU relaxation hint for short spin loops.
#[inline(always)]
pub fn cpu_relax() {
    std::hint::spin_loop();
}

/// Returns the current time in whole seconds since UNIX epoch.
///
/// Anchored to a monotonic clock after the first call, so consecutive
/// readings never decrease within a process.
///
/// # Example
///
/// ```rust
/// use joinrate::current_time_secs;
///
/// let a = current_time_secs();
/// let b = current_time_secs();
/// assert!(b >= a);
/// ```
#[inline]
pub fn current_time_secs() -> u64 {
    let (start, base_secs) = START_TIME_BASE.get_or_init(|| {
        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        (Instant::now(), epoch_secs)
    });
    base_secs.saturating_add(start.elapsed().as_secs())
}

/// Normalizes a key for lookup.
///
/// Keys are compared case-insensitively; `DEFAULT` in any casing maps to
/// the reserved [`DEFAULT_KEY`].
///
/// ```rust
/// use joinrate::normalize_key;
///
/// assert_eq!(normalize_key("#Rust"), "#rust");
/// assert_eq!(normalize_key("default"), "DEFAULT");
/// ```
pub fn normalize_key(key: &str) -> String {
    if is_default_key(key) {
        DEFAULT_KEY.to_string()
    } else {
        key.to_lowercase()
    }
}

/// Returns `true` if `key` names the reserved default policy.
#[inline]
pub fn is_default_key(key: &str) -> bool {
    key.eq_ignore_ascii_case(DEFAULT_KEY)
}
