//! Persisted key-value store.
//!
//! Everything that must survive a process restart is written here as JSON
//! text. Values are plain nested maps/lists/scalars; no live handles are
//! ever stored.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

pub const CONFIG_KEY: &str = "config";

pub fn layout_key(colony: &str) -> String {
    format!("colonies.{}.layout", colony)
}

pub fn colony_state_key(colony: &str) -> String {
    format!("colonies.{}.state", colony)
}

pub const WORKER_PREFIX: &str = "workers.";

pub fn worker_key(name: &str) -> String {
    format!("{}{}", WORKER_PREFIX, name)
}

/// Raw access to the host's persisted memory.
pub trait PersistentStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: String);

    fn remove(&mut self, key: &str);

    /// All keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// Decode the record stored at `key`, if any.
pub fn load<T: DeserializeOwned>(
    store: &dyn PersistentStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key) {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                key: key.to_owned(),
                source,
            }),
        None => Ok(None),
    }
}

pub fn save<T: Serialize>(
    store: &mut dyn PersistentStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_owned(),
        source,
    })?;
    store.set(key, raw);
    Ok(())
}

/// In-process store, used offline and in tests. Cloning it models the
/// host memory surviving a process restart.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_owned(), value);
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let mut store = MemoryStore::new();
        store.set("workers.b", "1".into());
        store.set("workers.a", "2".into());
        store.set("workersz", "3".into());
        store.set("config", "{}".into());

        assert_eq!(
            store.keys_with_prefix(WORKER_PREFIX),
            vec!["workers.a".to_string(), "workers.b".to_string()]
        );
    }

    #[test]
    fn undecodable_record_is_an_error_not_a_panic() {
        let mut store = MemoryStore::new();
        store.set("colonies.W1N1.state", "{not json".into());
        let result: Result<Option<u32>, _> = load(&store, "colonies.W1N1.state");
        assert!(result.is_err());
        let missing: Option<u32> = load(&store, "nope").unwrap();
        assert!(missing.is_none());
    }
}
