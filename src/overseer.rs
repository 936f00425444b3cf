//! The per-process context object. Owns every colony's cached state and the
//! worker memory cache, and runs one tick of control flow at a time.

use crate::colony::ColonyState;
use crate::config::OverseerConfig;
use crate::construction::SiteCategory;
use crate::error::OverseerError;
use crate::location::Location;
use crate::memory::{self, WorkerMemory};
use crate::mining::{MiningSlots, SlotBinding, SlotChanges};
use crate::store::{self, PersistentStore};
use crate::threat::{Threat, ThreatClass};
use crate::workforce::{schedule_colony, Quota, RoleRegistry, SchedulerContext, SpawnAttempt};
use crate::world::{ColonyKey, EntityId, StructureInfo, WorkerInfo, WorldQuery};
use log::*;
use std::collections::{BTreeMap, BTreeSet};

/// Told to a worker so it can wind down on its own terms.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Close to the end of its lifetime: return carried resources.
    Remit,
    /// No longer needed: return resources and self-terminate.
    Recycle,
}

/// What the core exposes to a worker's behavior each tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub colony: ColonyKey,
    pub slot: Option<(SlotBinding, Location)>,
    /// Current focus site per construction category, idle categories omitted.
    pub focus: Vec<(SiteCategory, EntityId)>,
    pub fill_target: Option<EntityId>,
    pub repair_target: Option<EntityId>,
    /// Nearest hostile of the most urgent class, for towers and defenders.
    pub tower_target: Option<EntityId>,
    pub threats: Vec<(ThreatClass, Threat)>,
    pub target_colony: Option<ColonyKey>,
    pub signal: Option<LifecycleSignal>,
}

#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub tick: u32,
    pub founded: Vec<ColonyKey>,
    pub lost: Vec<ColonyKey>,
    /// Colonies the scheduler ran for.
    pub serviced: Vec<ColonyKey>,
    pub spawns: Vec<SpawnAttempt>,
    pub registrations: Vec<(ColonyKey, StructureInfo)>,
    pub reaped: Vec<String>,
    /// Workers whose slot was retired this tick.
    pub recycled: Vec<String>,
    pub sites_placed: u32,
    pub signals: Vec<(String, LifecycleSignal)>,
}

pub struct Overseer {
    registry: RoleRegistry,
    config: OverseerConfig,
    colonies: BTreeMap<ColonyKey, ColonyState>,
    workers: BTreeMap<String, WorkerMemory>,
    ticks_run: u32,
    next_colony: usize,
}

impl Overseer {
    /// Validate configuration and rebuild every held colony from the store
    /// and the live world. Configuration errors refuse to start.
    pub fn boot(
        registry: RoleRegistry,
        world: &dyn WorldQuery,
        store: &mut dyn PersistentStore,
    ) -> Result<Overseer, OverseerError> {
        let config = OverseerConfig::load(store)?;
        registry.validate(&config)?;

        let mut overseer = Overseer {
            registry,
            config,
            colonies: BTreeMap::new(),
            workers: memory::load_all(store),
            ticks_run: 0,
            next_colony: 0,
        };

        for key in held_colonies(world) {
            overseer.found(&key, world, store);
        }

        info!(
            "Overseer booted with {} colonies and {} workers",
            overseer.colonies.len(),
            overseer.workers.len()
        );

        Ok(overseer)
    }

    pub fn config(&self) -> &OverseerConfig {
        &self.config
    }

    pub fn colony(&self, key: &str) -> Option<&ColonyState> {
        self.colonies.get(key)
    }

    pub fn colonies(&self) -> impl Iterator<Item = &ColonyState> {
        self.colonies.values()
    }

    pub fn workers(&self) -> &BTreeMap<String, WorkerMemory> {
        &self.workers
    }

    pub fn ticks_run(&self) -> u32 {
        self.ticks_run
    }

    fn found(&mut self, key: &str, world: &dyn WorldQuery, store: &mut dyn PersistentStore) {
        let mut colony = ColonyState::initialize(key, world, store, &self.config);
        adopt_workers(&mut colony, &mut self.workers, store);
        self.colonies.insert(key.to_owned(), colony);
    }

    /// Run one tick over every colony and worker.
    #[cfg_attr(feature = "profile", screeps_timing_annotate::timing)]
    pub fn tick(&mut self, world: &mut dyn WorldQuery, store: &mut dyn PersistentStore) -> TickReport {
        let tick = world.time();
        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        self.sync_colonies(&*world, store, &mut report);
        self.reload_operator_edits(store);

        let live = world.workers();
        self.reap(&live, store, &mut report);

        for (index, colony) in self.colonies.values_mut().enumerate() {
            if colony.retry_layout(&*world, store, &self.config) {
                restore_bindings(colony, &mut self.workers, store);
            }
            let changes = colony.refresh_tick(&*world, &self.config, index, tick);
            report
                .recycled
                .extend(settle_slot_changes(colony, &mut self.workers, store, changes));
            colony.scan_threats(&*world);
        }

        for colony in self.colonies.values_mut() {
            let outcome = colony.advance_construction(&*world, tick);
            report
                .recycled
                .extend(settle_slot_changes(colony, &mut self.workers, store, outcome.slot_changes));
            report
                .registrations
                .extend(outcome.registered.into_iter().map(|s| (colony.key.clone(), s)));
            rebind_unslotted(colony, &mut self.workers, store);
        }

        let keys: Vec<ColonyKey> = self.colonies.keys().cloned().collect();
        let serviced = if self.ticks_run == 0 {
            keys
        } else if keys.is_empty() {
            Vec::new()
        } else {
            let key = keys[self.next_colony % keys.len()].clone();
            self.next_colony = (self.next_colony + 1) % keys.len();
            vec![key]
        };
        for key in &serviced {
            if let Some(colony) = self.colonies.get_mut(key) {
                let mut ctx = SchedulerContext {
                    registry: &self.registry,
                    config: &self.config,
                    world: &mut *world,
                    store: &mut *store,
                    workers: &mut self.workers,
                };
                report.spawns.extend(schedule_colony(colony, &mut ctx));
            }
        }
        report.serviced = serviced;

        for colony in self.colonies.values_mut() {
            report.sites_placed += colony.place_planned(&mut *world, &self.config, tick);
            colony.persist(store);
            info!("{}", colony.summary(&*world));
        }

        report.signals = self.dispatch(&live);

        self.ticks_run += 1;
        report
    }

    /// Drop colonies whose control was lost and pick up newly held ones.
    fn sync_colonies(&mut self, world: &dyn WorldQuery, store: &mut dyn PersistentStore, report: &mut TickReport) {
        let held = held_colonies(world);

        let lost: Vec<ColonyKey> = self
            .colonies
            .keys()
            .filter(|k| !held.contains(*k))
            .cloned()
            .collect();
        for key in lost {
            warn!("{}: territory lost, dropping colony", key);
            self.colonies.remove(&key);
            report.lost.push(key);
        }

        for key in held {
            if !self.colonies.contains_key(&key) {
                info!("{}: new territory", key);
                self.found(&key, world, store);
                report.founded.push(key);
            }
        }
    }

    /// Pick up operator edits to the persisted memory of known workers. The
    /// cached slot binding, role and colony stay authoritative.
    fn reload_operator_edits(&mut self, store: &mut dyn PersistentStore) {
        for (name, cached) in self.workers.iter_mut() {
            let key = store::worker_key(name);
            let raw = match store.get(&key) {
                Some(raw) => raw,
                None => continue,
            };
            if serde_json::to_string(&*cached).ok().as_deref() == Some(raw.as_str()) {
                continue;
            }
            if let Some(edited) = WorkerMemory::decode(name, &raw) {
                cached.target_colony = edited.target_colony;
                cached.extra = edited.extra;
                if edited.recycle && !cached.recycle {
                    info!("Worker {} marked for recycling", name);
                    cached.recycle = true;
                    if let Some(colony) = self.colonies.get_mut(&cached.colony) {
                        colony.slots.release(name, cached);
                    }
                }
            }
            memory::save(store, name, cached);
        }
    }

    /// Forget every worker that no longer exists.
    fn reap(&mut self, live: &[WorkerInfo], store: &mut dyn PersistentStore, report: &mut TickReport) {
        let alive: BTreeSet<&str> = live.iter().map(|w| w.name.as_str()).collect();
        let dead: Vec<String> = self
            .workers
            .keys()
            .filter(|name| !alive.contains(name.as_str()))
            .cloned()
            .collect();

        for name in dead {
            if let Some(mut memory) = self.workers.remove(&name) {
                if let Some(colony) = self.colonies.get_mut(&memory.colony) {
                    colony.slots.release(&name, &mut memory);
                    colony.decrement(memory.role);
                }
                debug!("Reaped worker {}", name);
            }
            memory::forget(store, &name);
            report.reaped.push(name);
        }
    }

    /// The view of the colony handed to `worker`'s behavior.
    pub fn directive(&self, worker: &WorkerInfo) -> Option<Directive> {
        let memory = self.workers.get(&worker.name)?;
        let colony = self.colonies.get(&memory.colony)?;

        let recycle = memory.recycle || self.surplus(colony).contains(&worker.name);
        let remit = worker
            .ticks_to_live
            .map(|ttl| ttl < self.config.remit_ticks)
            .unwrap_or(false);
        let signal = if recycle {
            Some(LifecycleSignal::Recycle)
        } else if remit {
            Some(LifecycleSignal::Remit)
        } else {
            None
        };

        Some(Directive {
            colony: colony.key.clone(),
            slot: memory
                .slot
                .and_then(|b| slot_location(&colony.slots, b).map(|l| (b, l))),
            focus: SiteCategory::ALL
                .iter()
                .filter_map(|c| colony.construction.focus(*c).map(|s| (*c, s.id.clone())))
                .collect(),
            fill_target: colony.fill_target.clone(),
            repair_target: colony.low_health_target.clone(),
            tower_target: colony.threats.primary_target().map(|t| t.id.clone()),
            threats: colony.threats.threats(),
            target_colony: memory.target_colony.clone(),
            signal,
        })
    }

    /// Workers beyond their role's quota in the colony's current priority
    /// list, newest first.
    fn surplus(&self, colony: &ColonyState) -> BTreeSet<String> {
        let list = self.registry.priority_list(colony.tier, &colony.key, &self.config);
        let mut surplus = BTreeSet::new();

        for role in colony.counts.keys() {
            let descriptors: Vec<_> = list.iter().filter(|d| d.role == *role).collect();
            if descriptors.is_empty() || descriptors.iter().any(|d| d.quota == Quota::Unbounded) {
                continue;
            }
            let limit = descriptors
                .iter()
                .filter_map(|d| match d.quota {
                    Quota::Limited(max) => Some(max),
                    Quota::Unbounded => None,
                })
                .max()
                .unwrap_or(0) as usize;

            let mut members: Vec<(&String, &WorkerMemory)> = self
                .workers
                .iter()
                .filter(|(_, m)| m.colony == colony.key && m.role == *role && !m.recycle)
                .collect();
            if members.len() <= limit {
                continue;
            }
            members.sort_by(|a, b| b.1.spawned_at.cmp(&a.1.spawned_at).then_with(|| b.0.cmp(a.0)));
            let excess = members.len() - limit;
            surplus.extend(members.into_iter().take(excess).map(|(n, _)| n.clone()));
        }

        surplus
    }

    fn dispatch(&self, live: &[WorkerInfo]) -> Vec<(String, LifecycleSignal)> {
        let mut signals = Vec::new();
        for worker in live {
            let directive = match self.directive(worker) {
                Some(directive) => directive,
                None => continue,
            };
            if let Some(signal) = directive.signal {
                signals.push((worker.name.clone(), signal));
            }
            if let Some(memory) = self.workers.get(&worker.name) {
                if let Some(behavior) = self.registry.behavior(memory.role) {
                    behavior(&worker.name, memory, &directive);
                }
            }
        }
        signals
    }

    /// Manual recovery after a higher-tier structure was lost: lift the
    /// retirements on `node` so the best tier still standing serves it again.
    /// Returns false when the colony or node is unknown.
    pub fn demote_node(&mut self, colony: &str, node: usize, store: &mut dyn PersistentStore) -> bool {
        let state = match self.colonies.get_mut(colony) {
            Some(state) => state,
            None => return false,
        };
        if node >= state.slots.node_count() {
            return false;
        }

        let displaced = state.slots.reopen_node(node);
        info!("{}: node {} demoted to {:?}", colony, node, state.slots.active_tier(node));
        settle_slot_changes(
            state,
            &mut self.workers,
            store,
            SlotChanges {
                displaced,
                unbound: Vec::new(),
            },
        );
        rebind_unslotted(state, &mut self.workers, store);
        state.persist(store);
        true
    }
}

fn held_colonies(world: &dyn WorldQuery) -> Vec<ColonyKey> {
    world
        .owned_colonies()
        .into_iter()
        .filter(|k| world.is_controlled(k))
        .collect()
}

fn slot_location(slots: &MiningSlots, binding: SlotBinding) -> Option<Location> {
    slots
        .table(binding.tier)
        .nodes
        .get(binding.node)?
        .as_ref()?
        .slots
        .get(binding.position)
        .map(|s| s.location)
}

/// Count a freshly initialized colony's workers and put their recorded slot
/// bindings back.
fn adopt_workers(
    colony: &mut ColonyState,
    workers: &mut BTreeMap<String, WorkerMemory>,
    store: &mut dyn PersistentStore,
) {
    let key = colony.key.clone();
    for memory in workers.values().filter(|m| m.colony == key) {
        colony.increment(memory.role);
    }
    restore_bindings(colony, workers, store);
}

/// Recommit the colony's workers to their recorded slots. Bound workers go
/// first so their slots are restored before anyone is reassigned.
fn restore_bindings(
    colony: &mut ColonyState,
    workers: &mut BTreeMap<String, WorkerMemory>,
    store: &mut dyn PersistentStore,
) {
    let names: Vec<String> = workers
        .iter()
        .filter(|(_, m)| m.colony == colony.key)
        .map(|(n, _)| n.clone())
        .collect();

    for bound in [true, false] {
        for name in &names {
            let memory = match workers.get_mut(name) {
                Some(memory) => memory,
                None => continue,
            };
            if memory.slot.is_some() != bound {
                continue;
            }
            if memory.recycle {
                if memory.slot.take().is_some() {
                    memory::save(store, name, memory);
                }
                continue;
            }
            if memory.role.slot_tier().is_none() && memory.slot.is_none() {
                continue;
            }
            let before = memory.slot;
            colony.slots.recommit(name, memory);
            if memory.slot != before {
                memory::save(store, name, memory);
            }
        }
    }
}

/// Apply slot evictions to worker memory. Displaced workers are told to
/// recycle; unbound ones are reassigned. Returns the displaced names.
fn settle_slot_changes(
    colony: &mut ColonyState,
    workers: &mut BTreeMap<String, WorkerMemory>,
    store: &mut dyn PersistentStore,
    changes: SlotChanges,
) -> Vec<String> {
    let mut recycled = Vec::new();

    for name in changes.displaced {
        if let Some(memory) = workers.get_mut(&name) {
            memory.slot = None;
            memory.recycle = true;
            memory::save(store, &name, memory);
            info!("{}: worker {} displaced, recycling", colony.key, name);
            recycled.push(name);
        }
    }

    for name in changes.unbound {
        if let Some(memory) = workers.get_mut(&name) {
            memory.slot = None;
            colony.slots.recommit(&name, memory);
            memory::save(store, &name, memory);
        }
    }

    recycled
}

/// Give every slot-bound role without a slot another try.
fn rebind_unslotted(
    colony: &mut ColonyState,
    workers: &mut BTreeMap<String, WorkerMemory>,
    store: &mut dyn PersistentStore,
) {
    for (name, memory) in workers.iter_mut() {
        if memory.colony != colony.key || memory.recycle || memory.slot.is_some() {
            continue;
        }
        let tier = match memory.role.slot_tier() {
            Some(tier) => tier,
            None => continue,
        };
        if colony.slots.assign_least_loaded(tier, name, memory).is_some() {
            memory::save(store, name, memory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::SlotTier;
    use crate::store::MemoryStore;
    use crate::terrain::FastRoomTerrain;
    use crate::workforce::{roles, Role};
    use crate::world::SimWorld;
    use screeps::constants::StructureType;
    use screeps::Part;
    use std::cell::RefCell;

    thread_local! {
        static SEEN: RefCell<Vec<(String, Directive)>> = RefCell::new(Vec::new());
    }

    fn record(name: &str, _memory: &WorkerMemory, directive: &Directive) {
        SEEN.with(|seen| seen.borrow_mut().push((name.to_owned(), directive.clone())));
    }

    fn last_seen(name: &str) -> Option<Directive> {
        SEEN.with(|seen| {
            seen.borrow()
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, d)| d.clone())
        })
    }

    fn world(level: u8) -> SimWorld {
        let mut world = SimWorld::new();
        world.add_colony("W1N1", FastRoomTerrain::enclosed(), Location::from_xy(25, 10), level);
        world.add_structure("W1N1", StructureType::Spawn, Location::from_xy(25, 25));
        world.add_node("W1N1", Location::from_xy(40, 40));
        world
    }

    fn run(overseer: &mut Overseer, world: &mut SimWorld, store: &mut MemoryStore, ticks: u32) {
        for _ in 0..ticks {
            overseer.tick(world, store);
            world.advance();
        }
    }

    #[test]
    fn dead_workers_are_reaped() {
        let mut world = world(1);
        let mut store = MemoryStore::new();
        let mut overseer = Overseer::boot(roles::standard_registry(), &world, &mut store).unwrap();

        run(&mut overseer, &mut world, &mut store, 1);
        let name = world.worker_names()[0].clone();
        assert_eq!(overseer.colony("W1N1").unwrap().count(Role::BasicHarvest), 1);

        world.kill_worker(&name);
        let report = overseer.tick(&mut world, &mut store);

        assert_eq!(report.reaped, vec![name.clone()]);
        assert!(!overseer.workers().contains_key(&name));
        assert!(store.get(&store::worker_key(&name)).is_none());
        assert!(!overseer.colony("W1N1").unwrap().slots.bindings().contains_key(&name));
        assert_eq!(overseer.colony("W1N1").unwrap().count(Role::BasicHarvest), 0);
    }

    #[test]
    fn lost_territory_is_dropped_and_regained() {
        let mut world = world(1);
        let mut store = MemoryStore::new();
        let mut overseer = Overseer::boot(roles::standard_registry(), &world, &mut store).unwrap();

        world.set_controlled("W1N1", false);
        let report = overseer.tick(&mut world, &mut store);
        assert_eq!(report.lost, vec!["W1N1".to_owned()]);
        assert!(report.spawns.is_empty());
        assert!(overseer.colony("W1N1").is_none());

        world.set_controlled("W1N1", true);
        let report = overseer.tick(&mut world, &mut store);
        assert_eq!(report.founded, vec!["W1N1".to_owned()]);
        assert!(overseer.colony("W1N1").is_some());
    }

    #[test]
    fn remit_signal_near_end_of_life() {
        let mut world = world(1);
        let mut store = MemoryStore::new();
        let mut overseer = Overseer::boot(roles::standard_registry(), &world, &mut store).unwrap();
        run(&mut overseer, &mut world, &mut store, 1);
        let name = world.worker_names()[0].clone();

        let worker = WorkerInfo {
            name: name.clone(),
            id: EntityId::new("w"),
            ticks_to_live: Some(10),
            spawning: false,
        };
        let directive = overseer.directive(&worker).unwrap();
        assert_eq!(directive.signal, Some(LifecycleSignal::Remit));
        assert_eq!(directive.colony, "W1N1");
        assert_eq!(directive.slot.map(|(b, _)| b.tier), Some(SlotTier::Basic));
    }

    #[test]
    fn operator_recycle_flag_frees_the_slot() {
        let mut world = world(1);
        let mut store = MemoryStore::new();
        let mut overseer = Overseer::boot(roles::standard_registry(), &world, &mut store).unwrap();
        run(&mut overseer, &mut world, &mut store, 1);
        let name = world.worker_names()[0].clone();

        let key = store::worker_key(&name);
        let mut raw: serde_json::Value = serde_json::from_str(&store.get(&key).unwrap()).unwrap();
        raw["recycle"] = serde_json::Value::Bool(true);
        raw["note"] = serde_json::Value::String("manual".into());
        store.set(&key, raw.to_string());

        let report = overseer.tick(&mut world, &mut store);

        let memory = &overseer.workers()[&name];
        assert!(memory.recycle);
        assert_eq!(memory.extra.get("note"), Some(&serde_json::Value::String("manual".into())));
        assert!(report
            .signals
            .iter()
            .any(|(n, s)| *n == name && *s == LifecycleSignal::Recycle));
        assert!(!overseer.colony("W1N1").unwrap().slots.bindings().contains_key(&name));
    }

    #[test]
    fn demote_reopens_lower_tiers() {
        let mut world = world(2);
        let mut store = MemoryStore::new();
        let mut overseer = Overseer::boot(roles::standard_registry(), &world, &mut store).unwrap();
        let container = overseer.colony("W1N1").unwrap().layout.as_ref().unwrap().nodes.value[0]
            .container
            .unwrap();
        let built = world.add_structure("W1N1", StructureType::Container, container);
        run(&mut overseer, &mut world, &mut store, 1);
        assert_eq!(overseer.colony("W1N1").unwrap().slots.active_tier(0), Some(SlotTier::Drop));

        world.destroy(&built);
        run(&mut overseer, &mut world, &mut store, 1);
        assert_eq!(overseer.colony("W1N1").unwrap().slots.active_tier(0), None);

        assert!(overseer.demote_node("W1N1", 0, &mut store));
        assert_eq!(overseer.colony("W1N1").unwrap().slots.active_tier(0), Some(SlotTier::Basic));
        assert!(!overseer.demote_node("W1N1", 7, &mut store));
        assert!(!overseer.demote_node("W9N9", 0, &mut store));
    }

    #[test]
    fn behaviors_receive_their_directive() {
        let mut world = world(2);
        world.add_site("W1N1", StructureType::Road, Location::from_xy(30, 30));
        let hostile = world.add_hostile("W1N1", Location::from_xy(30, 20), vec![Part::Attack, Part::Move]);
        let mut registry = roles::standard_registry();
        registry.set_behavior(Role::BasicHarvest, record);
        let mut store = MemoryStore::new();
        let mut overseer = Overseer::boot(registry, &world, &mut store).unwrap();

        run(&mut overseer, &mut world, &mut store, 2);
        let name = world.worker_names()[0].clone();
        let directive = last_seen(&name).unwrap();
        let colony = overseer.colony("W1N1").unwrap();

        assert_eq!(directive.colony, "W1N1");
        assert_eq!(directive.slot.map(|(b, _)| b.tier), Some(SlotTier::Basic));
        assert!(directive.focus.iter().any(|(c, _)| *c == SiteCategory::Road));
        for (category, site) in &directive.focus {
            assert_eq!(colony.construction.focus(*category).map(|s| &s.id), Some(site));
        }
        assert_eq!(directive.fill_target.as_ref(), colony.structures.spawns.first());
        assert_eq!(directive.tower_target, Some(hostile.clone()));
        assert_eq!(directive.threats.len(), 1);
        assert_eq!(directive.threats[0].0, ThreatClass::Melee);
        assert_eq!(directive.threats[0].1.id, hostile);
        assert_eq!(directive.signal, None);

        let key = store::worker_key(&name);
        let mut raw: serde_json::Value = serde_json::from_str(&store.get(&key).unwrap()).unwrap();
        raw["recycle"] = serde_json::Value::Bool(true);
        store.set(&key, raw.to_string());
        run(&mut overseer, &mut world, &mut store, 1);

        let directive = last_seen(&name).unwrap();
        assert_eq!(directive.signal, Some(LifecycleSignal::Recycle));
        assert_eq!(directive.slot, None);
    }

    #[test]
    fn malformed_config_refuses_to_boot() {
        let world = world(1);
        let mut store = MemoryStore::new();
        store.set(store::CONFIG_KEY, "{\"remit_ticks\": []}".into());
        assert!(Overseer::boot(roles::standard_registry(), &world, &mut store).is_err());
    }
}
