//! # Per-Key Bucket Store
//!
//! Runtime token-bucket state for every key that has produced an arrival.
//! Buckets are created lazily and live for the lifetime of the process;
//! the key space is bounded by the number of distinct channels.
//!
//! ```text
//!     Bucket Store:
//!
//!     "#rust"  ──┐
//!     "#help"  ──┼──► DashMap (sharded) ──► Bucket { tokens, last_arrival, last_warn }
//!     "#chat"  ──┘         │
//!                          └─ each closure runs under its shard's write guard,
//!                             so two arrivals for one key never interleave
//! ```
//!
//! Policies are not referenced from here. A bucket whose governing policy
//! changes is *invalidated*: its token count is dropped and re-seeded from
//! the effective policy on the next arrival.

use super::utils::normalize_key;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Runtime state for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Available tokens; `None` means the bucket must be re-seeded to the
    /// full policy rate on the next arrival.
    pub tokens: Option<i64>,

    /// Time of the previous arrival (seconds).
    pub last_arrival: u64,

    /// Time of the last emitted warning, or `None` if never warned.
    pub last_warn: Option<u64>,
}

impl Bucket {
    /// A fresh, unseeded bucket created at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            tokens: None,
            last_arrival: now,
            last_warn: None,
        }
    }

    /// Drops the token count so the next arrival re-seeds it.
    #[inline]
    pub fn invalidate(&mut self) {
        self.tokens = None;
    }

    /// Returns `true` if the bucket will be re-seeded on the next arrival.
    #[inline]
    pub fn is_invalidated(&self) -> bool {
        self.tokens.is_none()
    }
}

/// Concurrent map from normalized key to [`Bucket`].
pub struct BucketStore {
    buckets: DashMap<String, Bucket, ahash::RandomState>,
    total_created: AtomicU64,
}

impl BucketStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        // More shards = less contention on unrelated keys.
        let num_shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .saturating_mul(4)
            .next_power_of_two()
            .clamp(4, 64);

        Self {
            buckets: DashMap::with_hasher_and_shard_amount(ahash::RandomState::new(), num_shards),
            total_created: AtomicU64::new(0),
        }
    }

    /// Runs `f` with exclusive access to the bucket for `key`, creating
    /// the bucket at `now` if it does not exist.
    pub fn with_bucket<R>(&self, key: &str, now: u64, f: impl FnOnce(&mut Bucket) -> R) -> R {
        let key = normalize_key(key);
        let mut created = false;
        let mut entry = self.buckets.entry(key).or_insert_with(|| {
            created = true;
            Bucket::new(now)
        });
        if created {
            let total = self.total_created.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Created bucket for {} (total: {})", entry.key(), total);
        }
        f(entry.value_mut())
    }

    /// Invalidates the bucket for `key`. Returns `false` if none exists.
    pub fn invalidate(&self, key: &str) -> bool {
        match self.buckets.get_mut(&normalize_key(key)) {
            Some(mut bucket) => {
                bucket.invalidate();
                debug!("Invalidated bucket for {}", bucket.key());
                true
            }
            None => false,
        }
    }

    /// Invalidates every bucket whose key satisfies `pred`.
    ///
    /// Returns the number of buckets invalidated.
    pub fn invalidate_where(&self, mut pred: impl FnMut(&str) -> bool) -> usize {
        let mut count = 0;
        for mut entry in self.buckets.iter_mut() {
            if pred(entry.key()) {
                entry.value_mut().invalidate();
                count += 1;
            }
        }
        if count > 0 {
            debug!("Invalidated {} buckets", count);
        }
        count
    }

    /// Copy of the bucket for `key`, if one exists.
    pub fn snapshot(&self, key: &str) -> Option<Bucket> {
        self.buckets.get(&normalize_key(key)).map(|b| b.clone())
    }

    /// Returns `true` if a bucket exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(&normalize_key(key))
    }

    /// Number of tracked buckets.
    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no bucket has been created.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Buckets created since startup.
    #[inline]
    pub fn total_created(&self) -> u64 {
        self.total_created.load(Ordering::Relaxed)
    }
}

impl Default for BucketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStore")
            .field("tracked", &self.len())
            .field("total_created", &self.total_created())
            .finish()
    }
}
