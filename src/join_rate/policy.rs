//! # Policy Resolver
//!
//! In-memory view of the policy store. Overrides live in a sharded map so
//! resolving one key never contends with admin writes to another; the single
//! `DEFAULT` record sits behind a read-write lock.
//!
//! ```text
//!     resolve("#chan"):
//!
//!     overrides ──► hit?  ──Yes──► override
//!                    │
//!                    No
//!                    ▼
//!                 default ──► installed? ──Yes──► DEFAULT
//!                                 │
//!                                 No ──► UninitializedDefault
//! ```

use super::config::Policy;
use super::error::{JoinRateError, Result};
use super::store::PolicyStore;
use super::utils::{is_default_key, normalize_key};
use dashmap::DashMap;
use std::sync::RwLock;
use tracing::debug;

/// Effective policy for a key, as reported to admin callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePolicy {
    /// Key as requested.
    pub key: String,

    /// Effective rate.
    pub rate: i64,

    /// Effective window in seconds.
    pub window: i64,

    /// `true` when no override exists and `DEFAULT` applies.
    pub is_default: bool,
}

/// Override and default policies, keyed by normalized key.
pub struct PolicyRegistry {
    overrides: DashMap<String, Policy, ahash::RandomState>,
    default: RwLock<Option<Policy>>,
}

impl PolicyRegistry {
    /// Creates an empty registry with no default installed.
    pub fn new() -> Self {
        Self {
            overrides: DashMap::with_hasher(ahash::RandomState::new()),
            default: RwLock::new(None),
        }
    }

    /// Replaces the in-memory view with the contents of `store`.
    ///
    /// The `DEFAULT` record, if stored, is installed as the default; every
    /// other record becomes an override.
    pub fn hydrate(&self, store: &dyn PolicyStore) -> Result<usize> {
        let records = store.load_all()?;
        let count = records.len();

        self.overrides.clear();
        for mut policy in records {
            policy.key = normalize_key(&policy.key);
            if policy.is_default() {
                self.install_default(policy);
            } else {
                self.overrides.insert(policy.key.clone(), policy);
            }
        }

        debug!("Hydrated {} policy records ({} overrides)", count, self.overrides.len());
        Ok(count)
    }

    /// Returns the effective policy for `key`.
    ///
    /// # Errors
    ///
    /// [`JoinRateError::UninitializedDefault`] if `key` has no override and
    /// the default has not been installed yet.
    pub fn resolve(&self, key: &str) -> Result<Policy> {
        let key = normalize_key(key);
        if let Some(policy) = self.overrides.get(&key) {
            return Ok(policy.clone());
        }
        self.default_policy().ok_or(JoinRateError::UninitializedDefault)
    }

    /// Like [`resolve`](Self::resolve), annotated for display.
    pub fn effective(&self, key: &str) -> Result<EffectivePolicy> {
        let normalized = normalize_key(key);
        let (policy, is_default) = match self.overrides.get(&normalized) {
            Some(policy) => (policy.clone(), false),
            None => (
                self.default_policy().ok_or(JoinRateError::UninitializedDefault)?,
                true,
            ),
        };
        Ok(EffectivePolicy {
            key: key.to_string(),
            rate: policy.rate,
            window: policy.window,
            is_default: is_default && !is_default_key(key),
        })
    }

    /// The installed default, if any.
    pub fn default_policy(&self) -> Option<Policy> {
        self.default
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Installs or replaces the default policy.
    pub fn install_default(&self, policy: Policy) {
        *self
            .default
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(policy);
    }

    /// Looks up an override without falling back.
    pub fn get_override(&self, key: &str) -> Option<Policy> {
        self.overrides.get(&normalize_key(key)).map(|p| p.clone())
    }

    /// Returns `true` if `key` has an override.
    pub fn has_override(&self, key: &str) -> bool {
        self.overrides.contains_key(&normalize_key(key))
    }

    /// Creates or replaces the override for `policy.key`.
    pub fn upsert_override(&self, policy: Policy) {
        self.overrides.insert(policy.key.clone(), policy);
    }

    /// Removes the override for `key`, returning it if one existed.
    pub fn remove_override(&self, key: &str) -> Option<Policy> {
        self.overrides.remove(&normalize_key(key)).map(|(_, policy)| policy)
    }

    /// Number of overrides.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("overrides", &self.override_count())
            .field("default", &self.default_policy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join_rate::store::MemoryPolicyStore;

    #[test]
    fn test_resolve_without_default_fails() {
        let registry = PolicyRegistry::new();
        assert!(matches!(
            registry.resolve("#chan"),
            Err(JoinRateError::UninitializedDefault)
        ));
    }

    #[test]
    fn test_override_wins_over_default() {
        let registry = PolicyRegistry::new();
        registry.install_default(Policy::default_policy(5, 5));
        registry.upsert_override(Policy::new("#busy", 50, 10));

        assert_eq!(registry.resolve("#BUSY").unwrap(), Policy::new("#busy", 50, 10));
        assert_eq!(registry.resolve("#other").unwrap(), Policy::default_policy(5, 5));
    }

    #[test]
    fn test_effective_annotation() {
        let registry = PolicyRegistry::new();
        registry.install_default(Policy::default_policy(7, 3));
        registry.upsert_override(Policy::new("#busy", 50, 10));

        let fallback = registry.effective("#Quiet").unwrap();
        assert_eq!(fallback.key, "#Quiet");
        assert_eq!((fallback.rate, fallback.window), (7, 3));
        assert!(fallback.is_default);

        assert!(!registry.effective("#busy").unwrap().is_default);
        assert!(!registry.effective("DEFAULT").unwrap().is_default);
    }

    #[test]
    fn test_hydrate_splits_default() {
        let store = MemoryPolicyStore::with_policies([
            Policy::default_policy(9, 9),
            Policy::new("#A", 1, 1),
            Policy::new("#b", 2, 2),
        ]);
        let registry = PolicyRegistry::new();
        registry.upsert_override(Policy::new("#stale", 1, 1));

        assert_eq!(registry.hydrate(&store).unwrap(), 3);
        assert_eq!(registry.default_policy(), Some(Policy::default_policy(9, 9)));
        assert_eq!(registry.override_count(), 2);
        assert!(registry.has_override("#a"));
        assert!(!registry.has_override("#stale"));
    }

    #[test]
    fn test_remove_override() {
        let registry = PolicyRegistry::new();
        registry.upsert_override(Policy::new("#a", 1, 1));
        assert!(registry.remove_override("#A").is_some());
        assert!(registry.remove_override("#a").is_none());
        assert_eq!(registry.get_override("#a"), None);
    }
}
