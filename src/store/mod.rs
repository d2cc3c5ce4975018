//! Synchronous key/value persistence.
//!
//! Everything the client remembers between runs (credential, preferences,
//! the single in-flight job record, cached outputs) goes through
//! [`KeyValueStore`] as JSON strings. A failed write is never fatal: callers
//! get a [`QuotaExceeded`] back, log it and carry on with in-memory state.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

pub mod file;

pub use file::FileStore;

pub const CREDENTIAL_KEY: &str = "fal_api_key";
pub const PREFS_KEY: &str = "generation_prefs";
pub const REFERENCE_IMAGES_KEY: &str = "reference_images";
pub const OUTPUT_IMAGES_KEY: &str = "output_images";
pub const JOB_RECORD_KEY: &str = "generation_state";
pub const CUSTOM_PROMPTS_KEY: &str = "custom_prompts";
pub const LIBRARY_IMAGES_KEY: &str = "library_images";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub key: String,
    pub detail: String,
}

impl std::fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "storage full while writing '{}': {}", self.key, self.detail)
    }
}

impl std::error::Error for QuotaExceeded {}

/// Failure of [`save_json`]: the value could not be encoded, or the store
/// refused the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    Serialize { key: String, detail: String },
    Quota(QuotaExceeded),
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::Serialize { key, detail } => {
                write!(f, "could not encode '{key}': {detail}")
            }
            SaveError::Quota(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<QuotaExceeded> for SaveError {
    fn from(err: QuotaExceeded) -> Self {
        SaveError::Quota(err)
    }
}

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), QuotaExceeded>;
    fn remove(&mut self, key: &str);
}

/// Read and decode a JSON value. Undecodable entries are treated as absent.
pub fn load_json<S, T>(store: &S, key: &str) -> Option<T>
where
    S: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, %err, "ignoring undecodable stored value");
            None
        }
    }
}

pub fn save_json<S, T>(store: &mut S, key: &str, value: &T) -> Result<(), SaveError>
where
    S: KeyValueStore + ?Sized,
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string(value).map_err(|err| SaveError::Serialize {
        key: key.to_string(),
        detail: err.to_string(),
    })?;
    store.set(key, &json)?;
    Ok(())
}

/// In-process store with an optional byte budget, counted over keys and values.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota: Some(bytes),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), QuotaExceeded> {
        if let Some(limit) = self.quota {
            let replaced = self.entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let needed = self.used_bytes() - replaced + key.len() + value.len();
            if needed > limit {
                return Err(QuotaExceeded {
                    key: key.to_string(),
                    detail: format!("{needed} bytes needed, {limit} available"),
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::{load_json, save_json, KeyValueStore, MemoryStore, SaveError};
    use std::collections::HashMap;

    #[test]
    fn quota_rejects_write_and_keeps_previous_value() {
        let mut store = MemoryStore::with_quota(16);
        store.set("k", "small").expect("fits");
        let err = store.set("k", "this value is far too long").unwrap_err();
        assert_eq!(err.key, "k");
        assert_eq!(store.get("k").as_deref(), Some("small"));
    }

    #[test]
    fn replacing_a_value_only_counts_the_difference() {
        let mut store = MemoryStore::with_quota(10);
        store.set("k", "123456789").expect("fits exactly");
        store.set("k", "987654321").expect("same size replacement fits");
    }

    #[test]
    fn undecodable_json_reads_as_absent() {
        let mut store = MemoryStore::new();
        store.set("numbers", "not json").unwrap();
        assert_eq!(load_json::<_, Vec<u32>>(&store, "numbers"), None);

        save_json(&mut store, "numbers", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(load_json::<_, Vec<u32>>(&store, "numbers"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn encode_failure_is_not_reported_as_full_storage() {
        let mut store = MemoryStore::new();
        let mut unencodable = HashMap::new();
        unencodable.insert((1u8, 2u8), "tuple keys are not JSON object keys");

        let err = save_json(&mut store, "pairs", &unencodable).unwrap_err();

        assert!(matches!(err, SaveError::Serialize { ref key, .. } if key == "pairs"));
        assert!(store.get("pairs").is_none());
    }

    #[test]
    fn refused_write_surfaces_the_quota_error() {
        let mut store = MemoryStore::with_quota(8);
        let err = save_json(&mut store, "numbers", &vec![1u32, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(err, SaveError::Quota(ref quota) if quota.key == "numbers"));
    }
}
