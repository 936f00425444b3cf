//! Colony state cache.
//!
//! Everything here is safe to throw away and rebuild from the persisted
//! layout, the persisted colony record and live world queries. Only opaque
//! IDs are held between ticks.

pub mod placement;
pub mod structures;

pub use structures::StructureIndex;

use crate::config::OverseerConfig;
use crate::constants::*;
use crate::construction::{ConstructionTracker, ConstructionTriggers};
use crate::layout::{ensure_layout, ColonyLayout};
use crate::location::Location;
use crate::mining::{MiningSlots, SlotChanges, SlotTier};
use crate::store::{self, PersistentStore};
use crate::threat::ThreatTable;
use crate::workforce::Role;
use crate::world::{ColonyKey, Entity, EntityId, StructureInfo, WorldQuery};
use itertools::Itertools;
use log::*;
use screeps::constants::StructureType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The part of a colony's state that must survive a restart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColonyRecord {
    pub construction: ConstructionTracker,
    pub fill_cursor: usize,
    pub fill_target: Option<EntityId>,
    pub low_health_target: Option<EntityId>,
    pub presence_ticks: u32,
    pub last_tier: u8,
    pub retired: Vec<(SlotTier, usize)>,
    pub last_planned: Option<u32>,
    pub planned_tier: u8,
}

/// What a tick's construction pass produced.
#[derive(Clone, Debug, Default)]
pub struct ConstructionOutcome {
    pub registered: Vec<StructureInfo>,
    pub slot_changes: SlotChanges,
}

pub struct ColonyState {
    pub key: ColonyKey,
    pub tier: u8,
    pub layout: Option<ColonyLayout>,
    pub controller: Option<EntityId>,
    pub slots: MiningSlots,
    pub structures: StructureIndex,
    pub construction: ConstructionTracker,
    pub threats: ThreatTable,
    pub counts: BTreeMap<Role, u32>,
    pub fill_cursor: usize,
    pub fill_target: Option<EntityId>,
    pub low_health_target: Option<EntityId>,
    last_tier: u8,
    last_planned: Option<u32>,
    planned_tier: u8,
}

impl ColonyState {
    /// Rebuild a colony from its persisted records and the live world. The
    /// layout is computed and persisted first if it is missing. A colony
    /// whose layout cannot be computed is still returned, with no slots.
    #[cfg_attr(feature = "profile", screeps_timing_annotate::timing)]
    pub fn initialize(
        key: &str,
        world: &dyn WorldQuery,
        store: &mut dyn PersistentStore,
        config: &OverseerConfig,
    ) -> ColonyState {
        let record = match store::load::<ColonyRecord>(store, &store::colony_state_key(key)) {
            Ok(record) => record.unwrap_or_default(),
            Err(err) => {
                warn!("{}: discarding unreadable colony record: {}", key, err);
                ColonyRecord::default()
            }
        };

        let layout = ensure_layout(store, world, key, config);

        let controller = world.controller(key);
        if controller.is_none() {
            warn!("{}: no controller visible", key);
        }
        let tier = controller
            .as_ref()
            .map(|c| c.level.clamp(MIN_TIER, MAX_TIER))
            .unwrap_or(MIN_TIER);

        let structures = StructureIndex::from_structures(&world.structures(key));

        let slots = derive_slots(layout.as_ref(), &record.retired, world, key);

        let mut construction = record.construction;
        construction.raise(ConstructionTriggers::PROCESS_START);
        if record.last_tier != 0 && record.last_tier != tier {
            construction.raise(ConstructionTriggers::TIER_CHANGED);
        }

        ColonyState {
            key: key.to_owned(),
            tier,
            layout,
            controller: controller.map(|c| c.id),
            slots,
            structures,
            construction,
            threats: ThreatTable::with_presence(record.presence_ticks),
            counts: BTreeMap::new(),
            fill_cursor: record.fill_cursor,
            fill_target: record.fill_target,
            low_health_target: record.low_health_target,
            last_tier: tier,
            last_planned: record.last_planned,
            planned_tier: record.planned_tier,
        }
    }

    /// Compute the layout of a colony that was set up without one, once the
    /// world allows it, and derive its slots and structure index. Returns
    /// true when the layout was obtained this call.
    pub fn retry_layout(
        &mut self,
        world: &dyn WorldQuery,
        store: &mut dyn PersistentStore,
        config: &OverseerConfig,
    ) -> bool {
        if self.layout.is_some() {
            return false;
        }
        let layout = match ensure_layout(store, world, &self.key, config) {
            Some(layout) => layout,
            None => return false,
        };
        info!("{}: layout computed", self.key);

        self.slots = derive_slots(Some(&layout), &self.slots.retired_markers(), world, &self.key);
        self.structures = StructureIndex::from_structures(&world.structures(&self.key));
        self.layout = Some(layout);
        true
    }

    pub fn record(&self) -> ColonyRecord {
        ColonyRecord {
            construction: self.construction.clone(),
            fill_cursor: self.fill_cursor,
            fill_target: self.fill_target.clone(),
            low_health_target: self.low_health_target.clone(),
            presence_ticks: self.threats.presence_ticks,
            last_tier: self.tier,
            retired: self.slots.retired_markers(),
            last_planned: self.last_planned,
            planned_tier: self.planned_tier,
        }
    }

    pub fn persist(&self, store: &mut dyn PersistentStore) {
        if let Err(err) = store::save(store, &store::colony_state_key(&self.key), &self.record()) {
            warn!("{}: failed to persist colony record: {}", self.key, err);
        }
    }

    pub fn nerve_center(&self) -> Option<Location> {
        self.layout.as_ref().map(|l| l.nerve_center)
    }

    pub fn count(&self, role: Role) -> u32 {
        self.counts.get(&role).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, role: Role) {
        *self.counts.entry(role).or_insert(0) += 1;
    }

    pub fn decrement(&mut self, role: Role) {
        if let Some(count) = self.counts.get_mut(&role) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(&role);
            }
        }
    }

    /// Re-resolve cached IDs and recompute this tick's transient facts.
    /// `index` is the colony's position in the overseer, used to spread the
    /// lowest-health scan across ticks.
    #[cfg_attr(feature = "profile", screeps_timing_annotate::timing)]
    pub fn refresh_tick(
        &mut self,
        world: &dyn WorldQuery,
        config: &OverseerConfig,
        index: usize,
        tick: u32,
    ) -> SlotChanges {
        match world.controller(&self.key) {
            Some(controller) => {
                let tier = controller.level.clamp(MIN_TIER, MAX_TIER);
                if tier != self.last_tier {
                    info!("{}: tier {} -> {}", self.key, self.last_tier, tier);
                    self.construction.raise(ConstructionTriggers::TIER_CHANGED);
                    self.last_tier = tier;
                }
                self.tier = tier;
                self.controller = Some(controller.id);
            }
            None => {
                self.controller = None;
            }
        }

        self.structures.retain_resolving(world);
        let changes = self.slots.sync_with_world(world, &self.key);

        self.refresh_fill_target(world);

        let interval = config.repair_scan_interval.max(1) as usize;
        if (tick as usize + index) % interval == 0 {
            self.low_health_target = self.lowest_health(world, config.repair_threshold);
        } else if let Some(target) = &self.low_health_target {
            let still_damaged = match world.resolve(target) {
                Some(Entity::Structure(s)) => s.is_damaged(),
                _ => false,
            };
            if !still_damaged {
                self.low_health_target = None;
            }
        }

        changes
    }

    /// Keep the current fill target until it is full or gone, then move
    /// the cursor round-robin to the next structure with free capacity.
    fn refresh_fill_target(&mut self, world: &dyn WorldQuery) {
        let fillables: Vec<EntityId> = self.structures.fillables().into_iter().cloned().collect();
        if fillables.is_empty() {
            self.fill_target = None;
            self.fill_cursor = 0;
            return;
        }

        let has_room = |id: &EntityId| match world.resolve(id) {
            Some(Entity::Structure(s)) => s.free_capacity() > 0,
            _ => false,
        };

        if let Some(current) = &self.fill_target {
            if has_room(current) {
                return;
            }
        }

        let start = self.fill_cursor % fillables.len();
        for step in 0..fillables.len() {
            let at = (start + step) % fillables.len();
            let candidate = &fillables[at];
            if self.fill_target.as_ref() == Some(candidate) {
                continue;
            }
            if has_room(candidate) {
                self.fill_cursor = at;
                self.fill_target = Some(candidate.clone());
                return;
            }
        }

        self.fill_target = None;
    }

    /// The tracked structure with the lowest hits ratio below `threshold`.
    fn lowest_health(&self, world: &dyn WorldQuery, threshold: f32) -> Option<EntityId> {
        world
            .structures(&self.key)
            .into_iter()
            .filter(|s| s.hits_max > 0)
            .map(|s| (s.hits as f32 / s.hits_max as f32, s.id))
            .filter(|(ratio, _)| *ratio < threshold)
            .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, id)| id)
    }

    /// Classify this tick's hostiles. Skipped, with a warning, without a
    /// layout to measure distances from.
    pub fn scan_threats(&mut self, world: &dyn WorldQuery) -> bool {
        let center = match self.nerve_center() {
            Some(center) => center,
            None => {
                warn!("{}: no layout, threat scan skipped", self.key);
                return false;
            }
        };
        let hostiles = world.hostiles(&self.key);
        self.threats.scan(&self.key, center, &hostiles)
    }

    /// Rescan building sites when a trigger is raised, then move every
    /// category's focus forward and register what was completed.
    #[cfg_attr(feature = "profile", screeps_timing_annotate::timing)]
    pub fn advance_construction(&mut self, world: &dyn WorldQuery, tick: u32) -> ConstructionOutcome {
        let mut registrations = Vec::new();

        if self.construction.needs_scan() {
            debug!("{}: construction rescan ({:?})", self.key, self.construction.triggers);
            let sites = world.building_sites(&self.key);
            for site in &sites {
                self.slots.register_site(site);
            }
            registrations.extend(self.construction.scan(world, &self.key, &sites, tick));
        }
        registrations.extend(self.construction.advance_focus(world, &self.key));

        let mut outcome = ConstructionOutcome::default();
        for structure in registrations {
            outcome.slot_changes.merge(self.register_structure(&structure));
            outcome.registered.push(structure);
        }
        outcome
    }

    /// Fold a newly completed structure into the cache.
    pub fn register_structure(&mut self, structure: &StructureInfo) -> SlotChanges {
        let mut changes = SlotChanges::default();
        if self.structures.insert(structure) {
            info!(
                "{}: registered {:?} {} at {}",
                self.key, structure.structure_type, structure.id, structure.location
            );
        }
        if matches!(structure.structure_type, StructureType::Container | StructureType::Link) {
            if let Some(displaced) = self.slots.register_structure(structure) {
                changes.displaced = displaced;
            }
        }
        changes
    }

    /// Place building sites for newly unlocked structures when due: on the
    /// first call for a colony, on a tier change, and every
    /// `planning_interval` ticks.
    pub fn place_planned(&mut self, world: &mut dyn WorldQuery, config: &OverseerConfig, tick: u32) -> u32 {
        let due = match self.last_planned {
            None => true,
            Some(last) => {
                tick.saturating_sub(last) >= config.planning_interval || self.planned_tier != self.tier
            }
        };
        if !due {
            return 0;
        }
        let layout = match &self.layout {
            Some(layout) => layout,
            None => return 0,
        };

        self.last_planned = Some(tick);
        self.planned_tier = self.tier;
        let placed = placement::place_planned_sites(world, &self.key, layout, self.tier, config.max_sites_per_tick);
        if placed > 0 {
            self.construction.raise(ConstructionTriggers::SITES_PLACED);
        }
        placed
    }

    /// One-line human readable status.
    pub fn summary(&self, world: &dyn WorldQuery) -> String {
        let workers = if self.counts.is_empty() {
            "none".to_owned()
        } else {
            self.counts
                .iter()
                .map(|(role, count)| format!("{}:{}", role, count))
                .join(" ")
        };
        format!(
            "{} tier {} | workers {} | construction {}%",
            self.key,
            self.tier,
            workers,
            self.construction.progress_percent(world)
        )
    }
}

fn derive_slots(
    layout: Option<&ColonyLayout>,
    retired: &[(SlotTier, usize)],
    world: &dyn WorldQuery,
    key: &str,
) -> MiningSlots {
    let mut slots = layout.map(MiningSlots::from_layout).unwrap_or_else(MiningSlots::empty);
    slots.apply_retired_markers(retired);
    slots.resolve_precedence();
    slots.sync_with_world(world, key);
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::terrain::FastRoomTerrain;
    use crate::world::SimWorld;

    fn world() -> (SimWorld, EntityId) {
        let mut world = SimWorld::new();
        world.add_colony("W1N1", FastRoomTerrain::enclosed(), Location::from_xy(25, 10), 2);
        let spawn = world.add_structure("W1N1", StructureType::Spawn, Location::from_xy(25, 25));
        world.add_node("W1N1", Location::from_xy(40, 40));
        (world, spawn)
    }

    #[test]
    fn missing_layout_leaves_derived_fields_empty() {
        let mut world = SimWorld::new();
        world.add_colony("W1N1", FastRoomTerrain::enclosed(), Location::from_xy(25, 10), 1);
        let mut store = MemoryStore::new();
        let mut colony = ColonyState::initialize("W1N1", &world, &mut store, &OverseerConfig::default());

        assert!(colony.layout.is_none());
        assert_eq!(colony.slots.node_count(), 0);
        assert!(!colony.scan_threats(&world));
    }

    #[test]
    fn layout_is_retried_once_a_spawn_appears() {
        let mut world = SimWorld::new();
        world.add_colony("W1N1", FastRoomTerrain::enclosed(), Location::from_xy(25, 10), 1);
        world.add_node("W1N1", Location::from_xy(40, 40));
        let mut store = MemoryStore::new();
        let config = OverseerConfig::default();
        let mut colony = ColonyState::initialize("W1N1", &world, &mut store, &config);
        assert!(!colony.retry_layout(&world, &mut store, &config));

        let spawn = world.add_structure("W1N1", StructureType::Spawn, Location::from_xy(25, 25));
        assert!(colony.retry_layout(&world, &mut store, &config));
        assert!(!colony.retry_layout(&world, &mut store, &config));

        assert_eq!(colony.slots.node_count(), 1);
        assert_eq!(colony.slots.active_tier(0), Some(SlotTier::Basic));
        assert_eq!(colony.structures.spawns, vec![spawn]);
        assert_eq!(colony.nerve_center(), Some(Location::from_xy(25, 25)));
        assert!(store.get(&store::layout_key("W1N1")).is_some());
    }

    #[test]
    fn fill_cursor_moves_only_when_target_fills() {
        let (mut world, spawn) = world();
        let ext = world.add_structure("W1N1", StructureType::Extension, Location::from_xy(27, 27));
        let mut store = MemoryStore::new();
        let config = OverseerConfig::default();
        let mut colony = ColonyState::initialize("W1N1", &world, &mut store, &config);

        colony.refresh_tick(&world, &config, 0, 1);
        assert_eq!(colony.fill_target, Some(spawn.clone()));
        colony.refresh_tick(&world, &config, 0, 2);
        assert_eq!(colony.fill_target, Some(spawn.clone()));

        world.set_stored_energy(&spawn, 300);
        colony.refresh_tick(&world, &config, 0, 3);
        assert_eq!(colony.fill_target, Some(ext.clone()));

        world.set_stored_energy(&ext, 50);
        colony.refresh_tick(&world, &config, 0, 4);
        assert_eq!(colony.fill_target, None);
    }

    #[test]
    fn lowest_health_scan_is_amortized() {
        let (mut world, spawn) = world();
        let mut store = MemoryStore::new();
        let config = OverseerConfig::default();
        let mut colony = ColonyState::initialize("W1N1", &world, &mut store, &config);
        world.set_hits(&spawn, 100);

        colony.refresh_tick(&world, &config, 0, 1);
        assert_eq!(colony.low_health_target, None);
        colony.refresh_tick(&world, &config, 0, 3);
        assert_eq!(colony.low_health_target, Some(spawn.clone()));

        world.set_hits(&spawn, 1000);
        colony.refresh_tick(&world, &config, 0, 4);
        assert_eq!(colony.low_health_target, None);
    }

    #[test]
    fn completed_container_promotes_its_node() {
        let (mut world, _) = world();
        let mut store = MemoryStore::new();
        let config = OverseerConfig::default();
        let mut colony = ColonyState::initialize("W1N1", &world, &mut store, &config);
        let container = colony.layout.as_ref().unwrap().nodes.value[0].container.unwrap();
        let site = world.add_site("W1N1", StructureType::Container, container);

        let outcome = colony.advance_construction(&world, 1);
        assert!(outcome.registered.is_empty());
        assert_eq!(colony.slots.active_tier(0), Some(SlotTier::Basic));

        world.complete_site(&site);
        let outcome = colony.advance_construction(&world, 2);
        assert_eq!(outcome.registered.len(), 1);
        assert_eq!(colony.slots.active_tier(0), Some(SlotTier::Drop));
        assert_eq!(colony.structures.containers.len(), 1);
    }

    #[test]
    fn record_round_trips_through_the_store() {
        let (world, _) = world();
        let mut store = MemoryStore::new();
        let config = OverseerConfig::default();
        let mut colony = ColonyState::initialize("W1N1", &world, &mut store, &config);
        colony.fill_cursor = 3;
        colony.persist(&mut store);

        let reloaded = ColonyState::initialize("W1N1", &world, &mut store, &config);
        assert_eq!(reloaded.fill_cursor, 3);
        assert_eq!(reloaded.construction.categories, colony.construction.categories);
        assert!(reloaded.summary(&world).starts_with("W1N1 tier 2"));
    }
}
