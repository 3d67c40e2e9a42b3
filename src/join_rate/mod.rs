//! # Join Rate Module
//!
//! Internal implementation of the join-rate monitor. Each submodule owns a
//! single concern; only the types re-exported below are part of the public
//! API.
//!
//! ## Module Structure
//!
//! ```text
//!     join_rate/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── admin.rs        (GET / SET / RESET operator commands)
//!     ├── config.rs       (Policy records and engine settings)
//!     ├── core.rs         (Arrival handling and the token bucket step)
//!     ├── error.rs        (Error types)
//!     ├── manager.rs      (Per-key bucket store)
//!     ├── metrics.rs      (Decision counters)
//!     ├── policy.rs       (Override / DEFAULT resolution)
//!     ├── sequencer.rs    (One-shot DEFAULT initialization)
//!     ├── sink.rs         (Warning delivery)
//!     ├── store.rs        (Durable policy storage)
//!     └── utils.rs        (Clock, key normalization, spin hint)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Host arrival                       Operator command
//!          │                                    │
//!          ▼                                    ▼
//!     ┌──────────┐   resolve    ┌──────────┐ write-through ┌─────────┐
//!     │   Core   │ ───────────► │  Policy  │ ◄──────────── │  Admin  │
//!     └────┬─────┘              └────┬─────┘               └────┬────┘
//!          │                         │ hydrate                  │
//!          ▼                         ▼                          ▼
//!     ┌──────────┐              ┌──────────┐               ┌─────────┐
//!     │ Manager  │              │  Store   │               │ Manager │
//!     │ (bucket) │              └──────────┘               │ (inval) │
//!     └────┬─────┘                                         └─────────┘
//!          │ Warn
//!          ▼
//!     ┌──────────┐
//!     │   Sink   │
//!     └──────────┘
//! ```

mod admin;
mod config;
mod core;
mod error;
mod manager;
mod metrics;
mod policy;
mod sequencer;
mod sink;
mod store;
mod utils;

/// Operator command parsing and replies
pub use admin::{AdminCommand, Reply, ADMIN_SYNTAX};

/// Policy records and engine settings
pub use config::{
    EngineConfig, Policy, DEFAULT_KEY, FALLBACK_RATE, FALLBACK_WINDOW_SECS, WARN_COOLDOWN_SECS,
};

/// The engine and its per-arrival types
pub use core::{Arrival, Decision, JoinRate};

/// Error types
pub use error::{JoinRateError, Result, StoreError};

/// Per-key runtime state
pub use manager::{Bucket, BucketStore};

/// Activity counters
pub use metrics::EngineStats;

/// Policy resolution
pub use policy::{EffectivePolicy, PolicyRegistry};

/// Initialization state machine
pub use sequencer::{InitSequencer, InitState};

/// Warning delivery
pub use sink::{ChannelSink, TracingSink, Warning, WarningSink};

/// Durable storage port and implementations
pub use store::{JsonFilePolicyStore, MemoryPolicyStore, PolicyStore};

/// Clock and key helpers
pub use utils::{cpu_relax, current_time_secs, is_default_key, normalize_key};
