//! Persisted per-worker memory.
//!
//! Operators edit these records by hand, so decoding is field-by-field: a
//! malformed optional field is logged and replaced by its default rather
//! than discarding the whole worker.

use crate::mining::SlotBinding;
use crate::store::{self, PersistentStore, WORKER_PREFIX};
use crate::workforce::Role;
use crate::world::ColonyKey;
use log::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkerMemory {
    pub role: Role,
    pub colony: ColonyKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_colony: Option<ColonyKey>,
    pub spawned_at: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub recycle: bool,
    /// Fixed memory from the role descriptor plus any operator-added keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

const KNOWN_KEYS: [&str; 6] = [
    "role",
    "colony",
    "slot",
    "target_colony",
    "spawned_at",
    "recycle",
];

impl WorkerMemory {
    pub fn new(role: Role, colony: impl Into<ColonyKey>, spawned_at: u32) -> Self {
        WorkerMemory {
            role,
            colony: colony.into(),
            slot: None,
            target_colony: None,
            spawned_at,
            recycle: false,
            extra: BTreeMap::new(),
        }
    }

    /// Decode a raw record. Returns `None` only when the role or owning
    /// colony cannot be determined.
    pub fn decode(name: &str, raw: &str) -> Option<WorkerMemory> {
        let object: Map<String, Value> = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            Ok(_) | Err(_) => {
                warn!("Memory of worker {} is not an object, ignoring it", name);
                return None;
            }
        };

        let role = match object
            .get("role")
            .and_then(|v| serde_json::from_value::<Role>(v.clone()).ok())
        {
            Some(role) => role,
            None => {
                warn!("Worker {} has no recognizable role", name);
                return None;
            }
        };

        let colony = match object.get("colony").and_then(|v| v.as_str()) {
            Some(colony) => colony.to_owned(),
            None => {
                warn!("Worker {} has no owning colony", name);
                return None;
            }
        };

        let slot = match object.get("slot") {
            None | Some(Value::Null) => None,
            Some(v) => match serde_json::from_value::<SlotBinding>(v.clone()) {
                Ok(binding) => Some(binding),
                Err(err) => {
                    warn!("Worker {} has a malformed slot binding ({}), reassigning", name, err);
                    None
                }
            },
        };

        let target_colony = match object.get("target_colony") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                warn!("Worker {} has a malformed target colony {}", name, other);
                None
            }
        };

        let spawned_at = object
            .get("spawned_at")
            .and_then(|v| v.as_u64())
            .map(|t| t.min(u32::MAX as u64) as u32)
            .unwrap_or(0);

        let recycle = object.get("recycle").and_then(|v| v.as_bool()).unwrap_or(false);

        let extra = object
            .into_iter()
            .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
            .collect();

        Some(WorkerMemory {
            role,
            colony,
            slot,
            target_colony,
            spawned_at,
            recycle,
            extra,
        })
    }
}

/// Every decodable worker record, keyed by worker name.
pub fn load_all(store: &dyn PersistentStore) -> BTreeMap<String, WorkerMemory> {
    store
        .keys_with_prefix(WORKER_PREFIX)
        .into_iter()
        .filter_map(|key| {
            let name = key[WORKER_PREFIX.len()..].to_owned();
            let raw = store.get(&key)?;
            WorkerMemory::decode(&name, &raw).map(|memory| (name, memory))
        })
        .collect()
}

pub fn save(store: &mut dyn PersistentStore, name: &str, memory: &WorkerMemory) {
    if let Err(err) = store::save(store, &store::worker_key(name), memory) {
        warn!("Failed to persist memory of worker {}: {}", name, err);
    }
}

pub fn forget(store: &mut dyn PersistentStore, name: &str) {
    store.remove(&store::worker_key(name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::SlotTier;
    use crate::store::MemoryStore;

    #[test]
    fn round_trips_through_the_store() {
        let mut store = MemoryStore::new();
        let mut memory = WorkerMemory::new(Role::DropMiner, "W1N1", 12);
        memory.slot = Some(SlotBinding {
            tier: SlotTier::Drop,
            node: 1,
            position: 0,
        });
        memory.extra.insert("note".into(), Value::from("operator"));
        save(&mut store, "dm-1", &memory);

        let loaded = load_all(&store);
        assert_eq!(loaded.get("dm-1"), Some(&memory));
    }

    #[test]
    fn operator_garbage_in_optional_fields_is_tolerated() {
        let memory = WorkerMemory::decode(
            "h-1",
            r#"{"role": "basic-harvest", "colony": "W1N1", "slot": "left one", "spawned_at": "yesterday", "recycle": 3}"#,
        )
        .unwrap();

        assert_eq!(memory.role, Role::BasicHarvest);
        assert_eq!(memory.slot, None);
        assert_eq!(memory.spawned_at, 0);
        assert!(!memory.recycle);
    }

    #[test]
    fn unknown_role_is_skipped() {
        assert!(WorkerMemory::decode("x", r#"{"role": "juggler", "colony": "W1N1"}"#).is_none());
        assert!(WorkerMemory::decode("x", r#"[1, 2]"#).is_none());
        assert!(WorkerMemory::decode("x", r#"{"role": "hauler"}"#).is_none());
    }
}
