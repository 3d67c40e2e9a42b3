//! # Joinrate - Per-Channel Join Rate Monitoring
//!
//! Watches how fast users join each channel and raises a warning when a
//! channel exceeds its configured budget. Nothing is ever blocked: the
//! engine only decides whether an arrival was within budget and, when it
//! was not, whether operators should hear about it again yet.
//!
//! ## The Token Bucket Algorithm
//!
//! Each channel gets a bucket holding at most `rate` tokens. Every join
//! spends one token; tokens come back at `rate` per `window` seconds.
//!
//! ```text
//!     Policy: 5 joins in 5s
//!
//!     t=0   5 joins    [●●●●●] → [     ]   Admit × 5
//!     t=0   6th join   [     ]             Warn  (operators notified)
//!     t=1   join       [●    ] → [     ]   Admit (1s earned 1 token)
//!     t=1   join       [     ]             Suppressed (within 30s cooldown)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use joinrate::{Decision, JoinRateBuilder, MemoryPolicyStore};
//! use std::sync::Arc;
//!
//! let engine = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
//!     .store_synced(true)
//!     .build()
//!     .unwrap();
//!
//! // Per-channel override: 2 joins in 10 seconds.
//! engine.set("#quiet", 2, 10).unwrap();
//!
//! assert_eq!(engine.on_arrival("#quiet", 0).unwrap(), Decision::Admit);
//! assert_eq!(engine.on_arrival("#quiet", 0).unwrap(), Decision::Admit);
//! assert_eq!(engine.on_arrival("#quiet", 0).unwrap(), Decision::Warn);
//! ```
//!
//! ## Operator Commands
//!
//! ```rust
//! use joinrate::{AdminCommand, JoinRateBuilder, MemoryPolicyStore};
//! use std::sync::Arc;
//!
//! let engine = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
//!     .store_synced(true)
//!     .build()
//!     .unwrap();
//!
//! let reply = engine
//!     .execute(&AdminCommand::parse(&["GET", "#rust"]).unwrap())
//!     .unwrap();
//! assert_eq!(
//!     reply.to_string(),
//!     "Joinrate warning threshold for #rust is set to 5 joins in 5s (default)"
//! );
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │     Host (IRC daemon)   │
//!                    └──────────┬──────────────┘
//!                               │ arrivals, admin commands, "store loaded"
//!                    ┌──────────▼──────────────┐
//!                    │        JoinRate         │
//!                    ├─────────────────────────┤
//!                    │  • on_arrival()         │
//!                    │  • get() / set()        │
//!                    │  • reset()              │
//!                    │  • store_loaded()       │
//!                    └──────────┬──────────────┘
//!                               │
//!         ┌─────────────────────┼──────────────────────┐
//!         │                     │                      │
//!  ┌──────▼───────┐    ┌────────▼────────┐    ┌────────▼────────┐
//!  │ BucketStore  │    │ PolicyRegistry  │    │  InitSequencer  │
//!  ├──────────────┤    ├─────────────────┤    ├─────────────────┤
//!  │ • per key    │    │ • overrides     │    │ • CAS claim     │
//!  │ • lazy       │    │ • DEFAULT       │    │ • fallback 5/5  │
//!  └──────────────┘    └────────┬────────┘    └─────────────────┘
//!                               │
//!                      ┌────────▼────────┐
//!                      │   PolicyStore   │
//!                      └─────────────────┘
//! ```
//!
//! ## Initialization
//!
//! Arrivals are rejected with [`JoinRateError::UninitializedDefault`] until a
//! `DEFAULT` policy exists. The host triggers initialization either by
//! building with [`JoinRateBuilder::store_synced`] or by calling
//! [`JoinRate::store_loaded`] once its store has been read. If no `DEFAULT`
//! was stored, the built-in fallback of 5 joins in 5 seconds is persisted.
//!
//! ## Thread Safety
//!
//! [`JoinRate`] is `Send + Sync`; share it via [`SharedJoinRate`]. Arrivals
//! for the same key are serialized on the bucket's shard, arrivals for
//! different keys proceed in parallel.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod join_rate;

// Public re-exports
pub use join_rate::{
    cpu_relax, current_time_secs, is_default_key, normalize_key, AdminCommand, Arrival, Bucket,
    BucketStore, ChannelSink, Decision, EffectivePolicy, EngineConfig, EngineStats, InitSequencer,
    InitState, JoinRate, JoinRateError, JsonFilePolicyStore, MemoryPolicyStore, Policy,
    PolicyRegistry, PolicyStore, Reply, Result, StoreError, TracingSink, Warning, WarningSink,
    ADMIN_SYNTAX, DEFAULT_KEY, FALLBACK_RATE, FALLBACK_WINDOW_SECS, WARN_COOLDOWN_SECS,
};

use std::sync::Arc;

/// An engine wrapped in `Arc` for sharing between the host's threads.
///
/// # Example
/// ```rust
/// use joinrate::{JoinRateBuilder, MemoryPolicyStore, SharedJoinRate};
/// use std::sync::Arc;
///
/// let shared: SharedJoinRate = Arc::new(
///     JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
///         .store_synced(true)
///         .build()
///         .unwrap(),
/// );
///
/// let engine = shared.clone();
/// std::thread::spawn(move || {
///     engine.on_arrival("#rust", 0).unwrap();
/// })
/// .join()
/// .unwrap();
/// ```
pub type SharedJoinRate = Arc<JoinRate>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// ```rust
/// use joinrate::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for embedding the engine in a host.

    pub use crate::{
        AdminCommand, Arrival, Decision, JoinRate, JoinRateBuilder, JoinRateError,
        JsonFilePolicyStore, MemoryPolicyStore, Policy, PolicyStore, Reply, SharedJoinRate,
        Warning, WarningSink,
    };
}

/// Builder for [`JoinRate`].
///
/// # Example
///
/// ```rust
/// use joinrate::{ChannelSink, JoinRateBuilder, MemoryPolicyStore};
/// use std::sync::Arc;
///
/// let (sink, warnings) = ChannelSink::new();
/// let engine = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
///     .fallback_policy(3, 10)       // DEFAULT when none is stored
///     .warn_cooldown_secs(60)       // Repeat warnings at most once a minute
///     .sink(sink)
///     .store_synced(true)
///     .build()
///     .unwrap();
///
/// for _ in 0..4 {
///     engine.on_arrival("#rust", 0).unwrap();
/// }
/// assert_eq!(warnings.try_recv().unwrap().rate, 3);
///
/// // Invalid settings are rejected.
/// let result = JoinRateBuilder::new(Arc::new(MemoryPolicyStore::new()))
///     .fallback_policy(5, 0)
///     .build();
/// assert!(result.is_err());
/// ```
pub struct JoinRateBuilder {
    config: EngineConfig,
    store: Arc<dyn PolicyStore>,
    sink: Arc<dyn WarningSink>,
    store_synced: bool,
}

impl JoinRateBuilder {
    /// Creates a builder over `store` with default settings.
    ///
    /// Defaults:
    /// - fallback `DEFAULT` of 5 joins in 5 seconds
    /// - 30 second warning cooldown
    /// - warnings logged through [`TracingSink`]
    /// - store not yet synced
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            config: EngineConfig::default(),
            store,
            sink: Arc::new(TracingSink),
            store_synced: false,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the policy installed when the store holds no `DEFAULT`.
    pub fn fallback_policy(mut self, rate: i64, window_secs: i64) -> Self {
        self.config = self.config.with_fallback(rate, window_secs);
        self
    }

    /// Sets the minimum interval between two warnings for one key.
    pub fn warn_cooldown_secs(mut self, secs: u64) -> Self {
        self.config = self.config.with_warn_cooldown_secs(secs);
        self
    }

    /// Sets where warnings are delivered.
    pub fn sink(mut self, sink: impl WarningSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Declares whether the store has already been loaded.
    ///
    /// When `true`, [`build`](Self::build) initializes the engine right
    /// away. Otherwise the host must call [`JoinRate::store_loaded`].
    pub fn store_synced(mut self, synced: bool) -> Self {
        self.store_synced = synced;
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// - [`JoinRateError::InvalidConfig`] if the configuration is invalid.
    /// - [`JoinRateError::Store`] if the store was declared synced and
    ///   reading it or persisting the fallback failed.
    pub fn build(self) -> Result<JoinRate> {
        JoinRate::from_parts(self.config, self.store, self.sink, self.store_synced)
    }
}

impl std::fmt::Debug for JoinRateBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinRateBuilder")
            .field("config", &self.config)
            .field("store_synced", &self.store_synced)
            .finish_non_exhaustive()
    }
}
