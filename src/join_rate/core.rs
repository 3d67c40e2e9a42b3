//! # Core Join-Rate Engine
//!
//! This module implements the arrival path: every arrival for a key spends
//! one token from that key's bucket, the bucket refills with elapsed time,
//! and an empty bucket raises a warning at most once per cooldown.
//!
//! ## The Token Bucket Step
//!
//! ```text
//!     on_arrival(key, now):
//!
//!     resolve policy ──► disabled? ──Yes──► AdmitSilently (no bucket)
//!                           │
//!                           No
//!                           ▼
//!     bucket.tokens unset? ──Yes──► tokens = rate
//!                           │
//!                           ▼
//!     tokens += floor(elapsed × rate / window), capped at rate
//!                           │
//!              tokens > 0 ──┼──► tokens -= 1, Admit
//!                           │
//!              cooldown over? ──Yes──► Warn (sink notified)
//!                           │
//!                           No ──► WarnSuppressedByPolicy
//! ```
//!
//! Refill uses integer division: the fraction of a token earned between two
//! arrivals is dropped rather than carried. With 5 joins per 5 seconds, an
//! arrival one second after the previous one earns exactly one token.
//!
//! ## Concurrency
//!
//! Policy resolution and the step run under the bucket's shard guard, so
//! arrivals for one key are serialized with each other and with admin
//! invalidation. The sink is called after the guard is released.

use super::config::{EngineConfig, Policy};
use super::error::{JoinRateError, Result};
use super::manager::{Bucket, BucketStore};
use super::metrics::{DecisionCounters, EngineStats};
use super::policy::PolicyRegistry;
use super::sequencer::InitSequencer;
use super::sink::{Warning, WarningSink};
use super::store::PolicyStore;
use super::utils::current_time_secs;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of a single arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// A token was available and has been spent.
    Admit,
    /// The key's policy disables monitoring; no bucket was touched.
    AdmitSilently,
    /// The bucket is empty but a warning was sent less than a cooldown ago.
    WarnSuppressedByPolicy,
    /// The bucket is empty and a warning has been sent to the sink.
    Warn,
}

impl Decision {
    /// Returns `true` for the two over-budget outcomes.
    #[inline]
    pub fn is_over_budget(&self) -> bool {
        matches!(self, Self::Warn | Self::WarnSuppressedByPolicy)
    }
}

/// An arrival as reported by the host, with the context needed to decide
/// whether it should be counted at all.
///
/// Arrivals seen while the host is still bursting state from a network
/// link, or that come from privileged service origins, are not counted.
///
/// ```rust
/// use joinrate::Arrival;
///
/// let arrival = Arrival::new("#rust", 1_700_000_000);
/// assert!(arrival.is_countable());
/// assert!(!arrival.during_burst().is_countable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival<'a> {
    /// Key the arrival belongs to.
    pub key: &'a str,

    /// Arrival time in seconds.
    pub at: u64,

    /// `false` while the network link is still synchronizing.
    pub network_synced: bool,

    /// `true` for arrivals originating from privileged services.
    pub privileged_origin: bool,
}

impl<'a> Arrival<'a> {
    /// An ordinary, countable arrival.
    pub fn new(key: &'a str, at: u64) -> Self {
        Self {
            key,
            at,
            network_synced: true,
            privileged_origin: false,
        }
    }

    /// Marks the arrival as happening during a network burst.
    pub fn during_burst(mut self) -> Self {
        self.network_synced = false;
        self
    }

    /// Marks the arrival as coming from a privileged origin.
    pub fn from_privileged_origin(mut self) -> Self {
        self.privileged_origin = true;
        self
    }

    /// Returns `true` if the arrival should be run through the engine.
    #[inline]
    pub fn is_countable(&self) -> bool {
        self.network_synced && !self.privileged_origin
    }
}

/// Applies one arrival to `bucket` under `policy`.
///
/// `policy` must not be disabled. Always records `now` as the bucket's
/// last arrival.
pub(crate) fn apply_arrival(
    bucket: &mut Bucket,
    policy: &Policy,
    now: u64,
    warn_cooldown_secs: u64,
) -> Decision {
    let mut tokens = bucket.tokens.unwrap_or(policy.rate);

    // A clock that moved backwards earns nothing.
    let elapsed = now.saturating_sub(bucket.last_arrival);
    tokens = tokens.saturating_add(policy.refill_for(elapsed)).min(policy.rate);

    let decision = if tokens > 0 {
        tokens -= 1;
        Decision::Admit
    } else {
        let cooled_down = bucket
            .last_warn
            .map_or(true, |last| now.saturating_sub(last) >= warn_cooldown_secs);
        if cooled_down {
            bucket.last_warn = Some(now);
            Decision::Warn
        } else {
            Decision::WarnSuppressedByPolicy
        }
    };

    bucket.tokens = Some(tokens);
    bucket.last_arrival = now;
    decision
}

/// The join-rate engine.
///
/// Owns the policy registry, the bucket store and the initialization
/// sequencer. Construct it with [`JoinRateBuilder`](crate::JoinRateBuilder)
/// and share it behind an `Arc`; every method takes `&self`.
///
/// ## Example
///
/// ```rust
/// use joinrate::{Decision, JoinRateBuilder, MemoryPolicyStore};
/// use std::sync::Arc;
///
/// let engine = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
///     .store_synced(true)
///     .build()
///     .unwrap();
///
/// // Built-in default: 5 joins in 5 seconds.
/// for _ in 0..5 {
///     assert_eq!(engine.on_arrival("#rust", 100).unwrap(), Decision::Admit);
/// }
/// assert_eq!(engine.on_arrival("#rust", 100).unwrap(), Decision::Warn);
/// ```
pub struct JoinRate {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn PolicyStore>,
    pub(crate) sink: Arc<dyn WarningSink>,
    pub(crate) policies: PolicyRegistry,
    pub(crate) buckets: BucketStore,
    pub(crate) sequencer: InitSequencer,
    pub(crate) counters: DecisionCounters,
}

impl JoinRate {
    /// Assembles an engine. When `store_synced` is set the store is
    /// hydrated and `DEFAULT` ensured immediately.
    pub(crate) fn from_parts(
        config: EngineConfig,
        store: Arc<dyn PolicyStore>,
        sink: Arc<dyn WarningSink>,
        store_synced: bool,
    ) -> Result<Self> {
        config.validate().map_err(JoinRateError::InvalidConfig)?;

        let engine = Self {
            config,
            store,
            sink,
            policies: PolicyRegistry::new(),
            buckets: BucketStore::new(),
            sequencer: InitSequencer::new(),
            counters: DecisionCounters::default(),
        };

        if store_synced {
            engine.store_loaded()?;
        }
        Ok(engine)
    }

    /// Signals that the host's policy store has finished loading.
    ///
    /// The caller that claims initialization hydrates the registry from the
    /// store and installs `DEFAULT`, persisting the built-in fallback if
    /// none was stored. Returns
    /// `Ok(true)` if this call completed initialization; once the engine is
    /// ready further calls are no-ops returning `Ok(false)`.
    pub fn store_loaded(&self) -> Result<bool> {
        if self.sequencer.is_ready() {
            return Ok(false);
        }

        let initialized =
            self.sequencer
                .ensure_default(&self.policies, self.store.as_ref(), &self.config)?;
        if initialized {
            info!(
                "Join rate monitoring ready ({} overrides)",
                self.policies.override_count()
            );
        }
        Ok(initialized)
    }

    /// Returns `true` once a default policy is installed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.sequencer.is_ready()
    }

    /// Processes one arrival for `key` at `now` (seconds).
    ///
    /// # Errors
    ///
    /// [`JoinRateError::UninitializedDefault`] if the engine is not ready.
    /// The arrival is dropped and no bucket is created.
    pub fn on_arrival(&self, key: &str, now: u64) -> Result<Decision> {
        if !self.sequencer.is_ready() && !self.sequencer.wait_ready() {
            return Err(self.reject_uninitialized(key));
        }

        // Disabled keys never get a bucket.
        if self.resolve_or_reject(key)?.is_disabled() {
            self.counters.record(Decision::AdmitSilently);
            return Ok(Decision::AdmitSilently);
        }

        // Resolve again under the shard guard: admin mutations invalidate
        // through the same guard, so a re-seed always sees the new policy.
        let cooldown = self.config.warn_cooldown_secs;
        let (decision, policy) = self.buckets.with_bucket(key, now, |bucket| {
            let policy = self.resolve_or_reject(key)?;
            let decision = if policy.is_disabled() {
                Decision::AdmitSilently
            } else {
                apply_arrival(bucket, &policy, now, cooldown)
            };
            Ok::<_, JoinRateError>((decision, policy))
        })?;
        self.counters.record(decision);

        if decision == Decision::Warn {
            self.sink.emit(Warning {
                key: key.to_string(),
                rate: policy.rate,
                window: policy.window,
            });
        } else if decision == Decision::WarnSuppressedByPolicy {
            debug!("{} over budget, warning suppressed", key);
        }

        Ok(decision)
    }

    /// Processes one arrival at the current time.
    pub fn on_arrival_now(&self, key: &str) -> Result<Decision> {
        self.on_arrival(key, current_time_secs())
    }

    /// Processes a host arrival, ignoring ones that should not be counted.
    ///
    /// Returns `Ok(None)` for arrivals during a network burst or from a
    /// privileged origin.
    pub fn observe(&self, arrival: &Arrival<'_>) -> Result<Option<Decision>> {
        if !arrival.is_countable() {
            return Ok(None);
        }
        self.on_arrival(arrival.key, arrival.at).map(Some)
    }

    fn resolve_or_reject(&self, key: &str) -> Result<Policy> {
        match self.policies.resolve(key) {
            Err(JoinRateError::UninitializedDefault) => Err(self.reject_uninitialized(key)),
            other => other,
        }
    }

    fn reject_uninitialized(&self, key: &str) -> JoinRateError {
        self.counters.record_uninitialized();
        error!(
            "Arrival for {} delivered before the default policy was initialized; dropping it",
            key
        );
        JoinRateError::UninitializedDefault
    }

    /// Copy of the bucket for `key`, if one has been created.
    pub fn bucket(&self, key: &str) -> Option<Bucket> {
        self.buckets.snapshot(key)
    }

    /// Current activity counters.
    pub fn stats(&self) -> EngineStats {
        self.counters
            .snapshot(self.buckets.len(), self.policies.override_count())
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for JoinRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinRate")
            .field("config", &self.config)
            .field("state", &self.sequencer.state())
            .field("policies", &self.policies)
            .field("buckets", &self.buckets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join_rate::sink::ChannelSink;
    use crate::join_rate::store::MemoryPolicyStore;

    fn engine_with(
        store: MemoryPolicyStore,
    ) -> (JoinRate, std::sync::mpsc::Receiver<Warning>) {
        let (sink, rx) = ChannelSink::new();
        let engine = JoinRate::from_parts(
            EngineConfig::default(),
            Arc::new(store),
            Arc::new(sink),
            true,
        )
        .unwrap();
        (engine, rx)
    }

    #[test]
    fn test_reference_scenario() {
        let (engine, rx) = engine_with(MemoryPolicyStore::new());
        let times = [0, 0, 0, 0, 0, 0, 1, 1, 1];
        let decisions: Vec<Decision> = times
            .iter()
            .map(|&t| engine.on_arrival("chan", t).unwrap())
            .collect();

        use Decision::*;
        assert_eq!(
            decisions,
            vec![Admit, Admit, Admit, Admit, Admit, Warn, Admit, WarnSuppressedByPolicy, WarnSuppressedByPolicy]
        );

        let warning = rx.try_recv().unwrap();
        assert_eq!(warning, Warning { key: "chan".into(), rate: 5, window: 5 });
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.bucket("chan").unwrap().tokens, Some(0));
    }

    #[test]
    fn test_apply_arrival_seeds_and_clamps() {
        let policy = Policy::new("#a", 3, 3);
        let mut bucket = Bucket::new(0);

        assert_eq!(apply_arrival(&mut bucket, &policy, 0, 30), Decision::Admit);
        assert_eq!(bucket.tokens, Some(2));

        // A long idle period refills to capacity, not beyond.
        assert_eq!(apply_arrival(&mut bucket, &policy, 1_000, 30), Decision::Admit);
        assert_eq!(bucket.tokens, Some(2));
        assert_eq!(bucket.last_arrival, 1_000);
    }

    #[test]
    fn test_apply_arrival_clock_regression() {
        let policy = Policy::new("#a", 2, 1);
        let mut bucket = Bucket::new(100);
        bucket.tokens = Some(0);
        bucket.last_warn = Some(100);

        let decision = apply_arrival(&mut bucket, &policy, 50, 30);
        assert!(decision.is_over_budget());
        assert_eq!(bucket.tokens, Some(0));
        assert_eq!(bucket.last_arrival, 50);
    }

    #[test]
    fn test_apply_arrival_zero_rate_always_over_budget() {
        let policy = Policy::new("#a", 0, 10);
        let mut bucket = Bucket::new(0);

        assert_eq!(apply_arrival(&mut bucket, &policy, 0, 30), Decision::Warn);
        assert_eq!(
            apply_arrival(&mut bucket, &policy, 29, 30),
            Decision::WarnSuppressedByPolicy
        );
        assert_eq!(apply_arrival(&mut bucket, &policy, 30, 30), Decision::Warn);
    }

    #[test]
    fn test_disabled_policy_is_inert() {
        let store = MemoryPolicyStore::with_policies([Policy::new("#off", -1, 5)]);
        let (engine, rx) = engine_with(store);

        for t in 0..20 {
            assert_eq!(engine.on_arrival("#OFF", t).unwrap(), Decision::AdmitSilently);
        }
        assert!(engine.bucket("#off").is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.stats().admitted_silently, 20);
    }

    #[test]
    fn test_not_ready_fails_closed() {
        let (sink, _rx) = ChannelSink::new();
        let engine = JoinRate::from_parts(
            EngineConfig::default(),
            Arc::new(MemoryPolicyStore::new()),
            Arc::new(sink),
            false,
        )
        .unwrap();

        assert!(!engine.is_ready());
        assert!(matches!(
            engine.on_arrival("#early", 0),
            Err(JoinRateError::UninitializedDefault)
        ));
        assert!(engine.bucket("#early").is_none());
        assert_eq!(engine.stats().rejected_uninitialized, 1);

        assert!(engine.store_loaded().unwrap());
        assert!(!engine.store_loaded().unwrap());
        assert_eq!(engine.on_arrival("#early", 0).unwrap(), Decision::Admit);
    }

    #[test]
    fn test_observe_skips_uncountable() {
        let (engine, _rx) = engine_with(MemoryPolicyStore::new());

        assert_eq!(engine.observe(&Arrival::new("#a", 0).during_burst()).unwrap(), None);
        assert_eq!(
            engine
                .observe(&Arrival::new("#a", 0).from_privileged_origin())
                .unwrap(),
            None
        );
        assert!(engine.bucket("#a").is_none());

        assert_eq!(
            engine.observe(&Arrival::new("#a", 0)).unwrap(),
            Some(Decision::Admit)
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (sink, _rx) = ChannelSink::new();
        let result = JoinRate::from_parts(
            EngineConfig::default().with_warn_cooldown_secs(0),
            Arc::new(MemoryPolicyStore::new()),
            Arc::new(sink),
            true,
        );
        assert!(matches!(result, Err(JoinRateError::InvalidConfig(_))));
    }

    #[test]
    fn test_override_change_never_reseeds_from_stale_policy() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let (engine, _rx) = engine_with(MemoryPolicyStore::new());
        let engine = Arc::new(engine);
        let stop = Arc::new(AtomicBool::new(false));
        engine.set("#k", 1000, 1000).unwrap();

        let arrivals: Vec<_> = (0..3)
            .map(|_| {
                let (engine, stop) = (engine.clone(), stop.clone());
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        engine.on_arrival("#k", 0).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..2_000 {
            engine.set("#k", 1000, 1000).unwrap();
            engine.set("#k", 1, 1000).unwrap();
            let tokens = engine.bucket("#k").and_then(|b| b.tokens);
            assert!(tokens.map_or(true, |t| t <= 1), "tokens {:?} above rate 1", tokens);
        }

        stop.store(true, Ordering::Relaxed);
        for handle in arrivals {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_on_arrival_now() {
        let (engine, _rx) = engine_with(MemoryPolicyStore::new());
        assert_eq!(engine.on_arrival_now("#live").unwrap(), Decision::Admit);
        assert!(engine.bucket("#live").unwrap().last_arrival > 0);
    }
}
