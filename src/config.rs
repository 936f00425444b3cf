use crate::error::ConfigError;
use crate::store::{self, PersistentStore, CONFIG_KEY};
use crate::workforce::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A colony-specific workforce entry, appended after the tier list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub role: Role,
    /// Replaces the standard quota when set.
    #[serde(default)]
    pub quota: Option<u32>,
    /// Spawn even when the eligibility predicate says no.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub target_colony: Option<String>,
}

/// Operator-tunable settings, read from the `config` record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    /// One colony in every N recomputes its lowest-health structure each tick.
    pub repair_scan_interval: u32,
    /// Workers with fewer ticks to live are told to remit and retire.
    pub remit_ticks: u32,
    pub max_sites_per_tick: u32,
    pub planning_interval: u32,
    pub fortification_radius: u8,
    pub priority_upgrade_range: u8,
    pub basic_slots_per_node: usize,
    /// Structures below this fraction of max hits are repair candidates.
    pub repair_threshold: f32,
    pub colony_overrides: BTreeMap<String, Vec<OverrideEntry>>,
}

impl Default for OverseerConfig {
    fn default() -> Self {
        OverseerConfig {
            repair_scan_interval: 3,
            remit_ticks: 50,
            max_sites_per_tick: 5,
            planning_interval: 100,
            fortification_radius: 6,
            priority_upgrade_range: 3,
            basic_slots_per_node: 3,
            repair_threshold: 0.75,
            colony_overrides: BTreeMap::new(),
        }
    }
}

impl OverseerConfig {
    /// Read the persisted config, falling back to defaults when absent. An
    /// undecodable record is a configuration bug and refuses to load.
    pub fn load(store: &dyn PersistentStore) -> Result<OverseerConfig, ConfigError> {
        Ok(store::load::<OverseerConfig>(store, CONFIG_KEY)?.unwrap_or_default())
    }

    pub fn overrides_for(&self, colony: &str) -> &[OverrideEntry] {
        self.colony_overrides
            .get(colony)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
