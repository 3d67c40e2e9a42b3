//! # Initialization Sequencer
//!
//! The host's policy store may finish loading after the engine has been
//! constructed, and possibly after the first arrival has already been
//! delivered. The sequencer guarantees that a `DEFAULT` policy is installed
//! exactly once, whichever trigger gets there first.
//!
//! ```text
//!     NotReady ──claim (CAS)──► Initializing ──install DEFAULT──► Ready
//!        ▲                          │
//!        └──── persist failed ──────┘
//! ```
//!
//! Triggers:
//!
//! 1. the constructor, when the host reports its store is already synced;
//! 2. the host's "store loaded" signal.
//!
//! Both call [`InitSequencer::ensure_default`]. One compare-exchange picks
//! the winner; losers that see `Initializing` wait briefly for `Ready`.

use super::config::EngineConfig;
use super::error::{JoinRateError, Result};
use super::policy::PolicyRegistry;
use super::store::PolicyStore;
use super::utils::cpu_relax;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use tracing::{debug, info};

/// Spins before falling back to `yield_now` while another thread initializes.
const SPIN_LIMIT: u32 = 64;

/// Total wait attempts before giving up on a concurrent initialization.
const MAX_WAIT_ATTEMPTS: u32 = 10_000;

/// Sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitState {
    /// No `DEFAULT` installed yet.
    NotReady = 0,
    /// A caller has claimed the transition and is installing `DEFAULT`.
    Initializing = 1,
    /// `DEFAULT` is installed; arrivals may be processed.
    Ready = 2,
}

impl InitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotReady,
            1 => Self::Initializing,
            _ => Self::Ready,
        }
    }
}

/// One-shot transition to a state where `DEFAULT` is guaranteed to exist.
#[derive(Debug)]
pub struct InitSequencer {
    state: AtomicU8,
}

impl InitSequencer {
    /// Creates a sequencer in [`InitState::NotReady`].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(InitState::NotReady as u8),
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> InitState {
        InitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` once `DEFAULT` is installed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state() == InitState::Ready
    }

    /// Makes sure a `DEFAULT` policy is installed in `registry`.
    ///
    /// Only the caller that wins the claim touches `registry`: it hydrates
    /// it from `store`, then, if no `DEFAULT` was stored, persists the
    /// fallback from `config` and installs it.
    ///
    /// Returns `Ok(true)` if this call performed the transition and
    /// `Ok(false)` if the sequencer was already ready (or became ready
    /// while waiting).
    ///
    /// # Errors
    ///
    /// - A store failure while hydrating or persisting the fallback. The
    ///   state returns to `NotReady` so a later trigger can retry.
    /// - [`JoinRateError::UninitializedDefault`] if another caller was
    ///   initializing and did not reach `Ready` (it failed, or the wait
    ///   timed out).
    pub fn ensure_default(
        &self,
        registry: &PolicyRegistry,
        store: &dyn PolicyStore,
        config: &EngineConfig,
    ) -> Result<bool> {
        match self.state.compare_exchange(
            InitState::NotReady as u8,
            InitState::Initializing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) if current == InitState::Ready as u8 => return Ok(false),
            Err(_) => {
                return if self.wait_ready() {
                    Ok(false)
                } else {
                    Err(JoinRateError::UninitializedDefault)
                };
            }
        }

        let outcome = Self::install_default(registry, store, config);
        let next = match outcome {
            Ok(()) => InitState::Ready,
            Err(_) => InitState::NotReady,
        };
        self.state.store(next as u8, Ordering::Release);
        outcome.map(|()| true)
    }

    fn install_default(
        registry: &PolicyRegistry,
        store: &dyn PolicyStore,
        config: &EngineConfig,
    ) -> Result<()> {
        registry.hydrate(store)?;

        if let Some(existing) = registry.default_policy() {
            debug!(
                "Using stored default policy ({} joins in {}s)",
                existing.rate, existing.window
            );
            return Ok(());
        }

        info!("Default policy has not been initialized; installing built-in fallback");
        let fallback = config.fallback_policy();
        store.upsert(&fallback)?;
        registry.install_default(fallback);
        Ok(())
    }

    /// Waits for a concurrent initialization to finish.
    ///
    /// Returns `true` if the sequencer is ready afterwards. The wait is
    /// bounded; installing `DEFAULT` involves at most one store write.
    pub fn wait_ready(&self) -> bool {
        let mut attempts = 0;
        loop {
            match self.state() {
                InitState::Ready => return true,
                InitState::NotReady => return false,
                InitState::Initializing => {}
            }

            attempts += 1;
            if attempts >= MAX_WAIT_ATTEMPTS {
                return self.is_ready();
            }
            if attempts > SPIN_LIMIT {
                thread::yield_now();
            } else {
                cpu_relax();
            }
        }
    }
}

impl Default for InitSequencer {
    fn default() -> Self {
        Self::new()
    }
}
