//! # Policy Storage Port
//!
//! The engine never talks to a storage technology directly. It hydrates
//! from [`PolicyStore::load_all`] once the host reports the store loaded,
//! and writes every admin mutation through [`PolicyStore::upsert`] /
//! [`PolicyStore::delete`] before touching its in-memory view.
//!
//! Two adapters ship with the crate:
//!
//! - [`MemoryPolicyStore`]: a map guarded by a mutex, for tests and hosts
//!   that persist elsewhere.
//! - [`JsonFilePolicyStore`]: a JSON array of [`Policy`] records, rewritten
//!   through a temporary file and a rename on every mutation.

use super::config::Policy;
use super::error::StoreError;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Durable mapping from key to [`Policy`].
///
/// Implementations must be safe to call from several threads; the engine
/// holds them behind an `Arc<dyn PolicyStore>`.
pub trait PolicyStore: Send + Sync {
    /// Returns every stored record, including `DEFAULT` if present.
    fn load_all(&self) -> Result<Vec<Policy>, StoreError>;

    /// Creates or replaces the record for `policy.key`.
    fn upsert(&self, policy: &Policy) -> Result<(), StoreError>;

    /// Removes the record for `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process store backed by an ordered map.
///
/// # Example
///
/// ```rust
/// use joinrate::{MemoryPolicyStore, Policy, PolicyStore};
///
/// let store = MemoryPolicyStore::with_policies([Policy::new("#rust", 10, 60)]);
/// assert_eq!(store.load_all().unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    records: Mutex<BTreeMap<String, Policy>>,
}

impl MemoryPolicyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `policies`.
    pub fn with_policies(policies: impl IntoIterator<Item = Policy>) -> Self {
        let records = policies
            .into_iter()
            .map(|policy| (policy.key.clone(), policy))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    /// Looks up a single record.
    pub fn get(&self, key: &str) -> Option<Policy> {
        self.lock().get(key).cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Policy>> {
        // A panic while holding the lock cannot leave a half-written map.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn load_all(&self) -> Result<Vec<Policy>, StoreError> {
        Ok(self.lock().values().cloned().collect())
    }

    fn upsert(&self, policy: &Policy) -> Result<(), StoreError> {
        self.lock().insert(policy.key.clone(), policy.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Store persisting records as a JSON array in a single file.
///
/// A missing file reads as an empty store. Each mutation rewrites the
/// whole file via `<path>.tmp` and an atomic rename.
#[derive(Debug)]
pub struct JsonFilePolicyStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFilePolicyStore {
    /// Creates a store reading from and writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_records(&self) -> Result<BTreeMap<String, Policy>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        let policies: Vec<Policy> = serde_json::from_slice(&bytes)?;
        Ok(policies
            .into_iter()
            .map(|policy| (policy.key.clone(), policy))
            .collect())
    }

    fn write_records(&self, records: &BTreeMap<String, Policy>) -> Result<(), StoreError> {
        let policies: Vec<&Policy> = records.values().collect();
        let encoded = serde_json::to_vec_pretty(&policies)?;

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        debug!("Wrote {} policy records to {}", policies.len(), self.path.display());
        Ok(())
    }

    fn modify(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, Policy>) -> bool,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut records = self.read_records()?;
        if change(&mut records) {
            self.write_records(&records)?;
        }
        Ok(())
    }
}

impl PolicyStore for JsonFilePolicyStore {
    fn load_all(&self) -> Result<Vec<Policy>, StoreError> {
        Ok(self.read_records()?.into_values().collect())
    }

    fn upsert(&self, policy: &Policy) -> Result<(), StoreError> {
        self.modify(|records| {
            records.insert(policy.key.clone(), policy.clone());
            true
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.modify(|records| records.remove(key).is_some())
    }
}
