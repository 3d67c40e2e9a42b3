//! # Engine Statistics
//!
//! Lifetime counters for every decision the engine makes, plus the current
//! size of the bucket and override maps.
//!
//! ```text
//!     JoinRate Stats:
//!     ├─ Arrivals:
//!     │  ├─ Admitted: 1200
//!     │  ├─ Admitted (unmonitored): 40
//!     │  ├─ Warned: 3
//!     │  └─ Suppressed: 57
//!     └─ State:
//!        ├─ Tracked Buckets: 88
//!        └─ Overrides: 4
//! ```

use super::core::Decision;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic per-decision counters owned by the engine.
#[derive(Debug, Default)]
pub(crate) struct DecisionCounters {
    admitted: AtomicU64,
    admitted_silently: AtomicU64,
    warned: AtomicU64,
    suppressed: AtomicU64,
    rejected_uninitialized: AtomicU64,
}

impl DecisionCounters {
    #[inline]
    pub(crate) fn record(&self, decision: Decision) {
        let counter = match decision {
            Decision::Admit => &self.admitted,
            Decision::AdmitSilently => &self.admitted_silently,
            Decision::Warn => &self.warned,
            Decision::WarnSuppressedByPolicy => &self.suppressed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_uninitialized(&self) {
        self.rejected_uninitialized.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, tracked_buckets: usize, overrides: usize) -> EngineStats {
        EngineStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            admitted_silently: self.admitted_silently.load(Ordering::Relaxed),
            warned: self.warned.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            rejected_uninitialized: self.rejected_uninitialized.load(Ordering::Relaxed),
            tracked_buckets,
            overrides,
        }
    }
}

/// Snapshot of engine activity.
///
/// # Example
///
/// ```rust
/// use joinrate::{JoinRateBuilder, MemoryPolicyStore};
/// use std::sync::Arc;
///
/// let engine = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
///     .store_synced(true)
///     .build()
///     .unwrap();
/// engine.on_arrival("#rust", 0).unwrap();
///
/// let stats = engine.stats();
/// assert_eq!(stats.admitted, 1);
/// println!("{}", stats.summary());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Arrivals admitted against a budget.
    pub admitted: u64,

    /// Arrivals for keys whose policy disables monitoring.
    pub admitted_silently: u64,

    /// Over-budget arrivals that produced a warning.
    pub warned: u64,

    /// Over-budget arrivals inside the warning cooldown.
    pub suppressed: u64,

    /// Arrivals dropped because no default policy was installed yet.
    pub rejected_uninitialized: u64,

    /// Buckets currently tracked.
    pub tracked_buckets: usize,

    /// Per-key overrides currently configured.
    pub overrides: usize,
}

impl EngineStats {
    /// Arrivals that reached a decision.
    pub fn total_arrivals(&self) -> u64 {
        self.admitted + self.admitted_silently + self.warned + self.suppressed
    }

    /// Fraction of monitored arrivals that found the bucket empty.
    pub fn over_budget_ratio(&self) -> f64 {
        let over = self.warned + self.suppressed;
        let monitored = self.admitted + over;
        if monitored == 0 {
            0.0
        } else {
            over as f64 / monitored as f64
        }
    }

    /// Human-readable multi-line report.
    pub fn summary(&self) -> String {
        format!(
            "JoinRate Stats:\n\
             ├─ Arrivals:\n\
             │  ├─ Admitted: {}\n\
             │  ├─ Admitted (unmonitored): {}\n\
             │  ├─ Warned: {}\n\
             │  ├─ Suppressed: {}\n\
             │  └─ Dropped (uninitialized): {}\n\
             └─ State:\n\
                ├─ Tracked Buckets: {}\n\
                └─ Overrides: {}",
            self.admitted,
            self.admitted_silently,
            self.warned,
            self.suppressed,
            self.rejected_uninitialized,
            self.tracked_buckets,
            self.overrides
        )
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
