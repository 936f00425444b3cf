//! Budget-gated spawning.
//!
//! For each spawn point the colony's priority list is walked in order and
//! at most one worker is instantiated. When the first spawn point that
//! gets to try yields nothing the colony's remaining spawn points sit the
//! tick out.

use super::*;
use crate::error::SpawnError;
use crate::memory;
use crate::store::PersistentStore;
use crate::world::{body_cost, ColonyKey, Entity, EntityId, WorldQuery};
use log::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpawnOutcome {
    Success { name: String },
    DeclinedInsufficientBudget,
    DeclinedIneligible,
    /// A required descriptor could not be afforded; the spawn point stops.
    DeclinedRequiredUnmet,
    DeclinedSpawnBusy,
    DeclinedTargetColonyGone,
    DeclinedUnknownFailure(SpawnError),
}

impl SpawnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SpawnOutcome::Success { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnAttempt {
    pub colony: ColonyKey,
    pub spawn: EntityId,
    /// The descriptor the outcome refers to, if any got that far.
    pub role: Option<Role>,
    pub outcome: SpawnOutcome,
}

/// Everything one scheduling pass needs besides the colony itself.
pub struct SchedulerContext<'a> {
    pub registry: &'a RoleRegistry,
    pub config: &'a OverseerConfig,
    pub world: &'a mut dyn WorldQuery,
    pub store: &'a mut dyn PersistentStore,
    pub workers: &'a mut BTreeMap<String, WorkerMemory>,
}

#[cfg_attr(feature = "profile", screeps_timing_annotate::timing)]
pub fn schedule_colony(colony: &mut ColonyState, ctx: &mut SchedulerContext) -> Vec<SpawnAttempt> {
    let list = ctx.registry.priority_list(colony.tier, &colony.key, ctx.config);
    let mut budget = ctx.world.energy_available(&colony.key);
    let capacity = ctx.world.energy_capacity(&colony.key);

    let mut attempts = Vec::new();
    let mut tried = false;

    for (index, spawn_id) in colony.structures.spawns.clone().into_iter().enumerate() {
        let spawn = match ctx.world.resolve(&spawn_id) {
            Some(Entity::Structure(s)) => s,
            _ => continue,
        };

        if spawn.spawning {
            attempts.push(SpawnAttempt {
                colony: colony.key.clone(),
                spawn: spawn_id,
                role: None,
                outcome: SpawnOutcome::DeclinedSpawnBusy,
            });
            continue;
        }

        let (role, outcome) = attempt_at_spawn(colony, ctx, &list, &spawn_id, index, &mut budget, capacity);
        let success = outcome.is_success();
        attempts.push(SpawnAttempt {
            colony: colony.key.clone(),
            spawn: spawn_id,
            role,
            outcome,
        });

        let first = !tried;
        tried = true;
        if first && !success {
            break;
        }
    }

    attempts
}

fn attempt_at_spawn(
    colony: &mut ColonyState,
    ctx: &mut SchedulerContext,
    list: &[WorkforceDescriptor],
    spawn: &EntityId,
    index: usize,
    budget: &mut u32,
    capacity: u32,
) -> (Option<Role>, SpawnOutcome) {
    let mut fallback = (None, SpawnOutcome::DeclinedIneligible);

    for descriptor in list {
        let role = descriptor.role;
        let count = colony.count(role);

        if !descriptor.quota.allows(count) {
            continue;
        }
        if !descriptor.force && !(descriptor.eligible)(colony, count) {
            continue;
        }

        if let Some(target) = &descriptor.target_colony {
            if ctx.world.controller(target).is_none() {
                debug!("{}: target colony {} of {} is gone", colony.key, target, role);
                fallback = (Some(role), SpawnOutcome::DeclinedTargetColonyGone);
                continue;
            }
        }

        let body = descriptor
            .body
            .create_body(capacity)
            .filter(|body| body_cost(body) <= *budget);
        let body = match body {
            Some(body) => body,
            None if descriptor.required => {
                return (Some(role), SpawnOutcome::DeclinedRequiredUnmet);
            }
            None => {
                fallback = (Some(role), SpawnOutcome::DeclinedInsufficientBudget);
                continue;
            }
        };

        let tick = ctx.world.time();
        let name = format!("{}-{}-{}-{}", role, colony.key, tick, index);
        let cost = body_cost(&body);

        return match ctx.world.spawn_worker(spawn, &name, &body) {
            Ok(()) => {
                *budget -= cost;
                let mut memory = WorkerMemory::new(role, colony.key.clone(), tick);
                memory.target_colony = descriptor.target_colony.clone();
                for (key, value) in &descriptor.fixed_memory {
                    memory.extra.insert((*key).to_owned(), value.clone());
                }
                colony.increment(role);
                if let Some(hook) = descriptor.on_birth {
                    hook(colony, &name, &mut memory);
                }
                memory::save(ctx.store, &name, &memory);
                ctx.workers.insert(name.clone(), memory);
                info!("{}: spawning {} ({} parts, {} energy)", colony.key, name, body.len(), cost);
                (Some(role), SpawnOutcome::Success { name })
            }
            Err(SpawnError::Busy) => (Some(role), SpawnOutcome::DeclinedSpawnBusy),
            Err(SpawnError::NotEnoughEnergy) => (Some(role), SpawnOutcome::DeclinedInsufficientBudget),
            Err(err) => {
                error!(
                    "{}: spawn {} failed to instantiate {} as {} (body {:?}, cost {}, budget {}): {}",
                    colony.key, spawn, role, name, body, cost, budget, err
                );
                (Some(role), SpawnOutcome::DeclinedUnknownFailure(err))
            }
        };
    }

    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colony::ColonyState;
    use crate::location::Location;
    use crate::store::MemoryStore;
    use crate::terrain::FastRoomTerrain;
    use crate::world::SimWorld;
    use screeps::constants::StructureType;

    fn setup(spawns: usize) -> (SimWorld, MemoryStore, ColonyState, OverseerConfig) {
        let mut world = SimWorld::new();
        world.add_colony("W1N1", FastRoomTerrain::enclosed(), Location::from_xy(25, 10), 1);
        for i in 0..spawns {
            world.add_structure("W1N1", StructureType::Spawn, Location::from_xy(20 + 4 * i as u8, 25));
        }
        world.add_node("W1N1", Location::from_xy(40, 40));
        let mut store = MemoryStore::new();
        let config = OverseerConfig::default();
        let colony = ColonyState::initialize("W1N1", &world, &mut store, &config);
        (world, store, colony, config)
    }

    fn run(
        colony: &mut ColonyState,
        registry: &RoleRegistry,
        config: &OverseerConfig,
        world: &mut SimWorld,
        store: &mut MemoryStore,
        workers: &mut BTreeMap<String, WorkerMemory>,
    ) -> Vec<SpawnAttempt> {
        let mut ctx = SchedulerContext {
            registry,
            config,
            world,
            store,
            workers,
        };
        schedule_colony(colony, &mut ctx)
    }

    fn single_tier_registry(first: WorkforceDescriptor) -> RoleRegistry {
        let tiers = (1..=MAX_TIER)
            .map(|_| {
                vec![
                    first.clone(),
                    WorkforceDescriptor::new(
                        Role::Upgrader,
                        BodyDefinition::fixed(&[Part::Work, Part::Carry, Part::Move]),
                        Quota::Unbounded,
                        |_, _| true,
                    ),
                ]
            })
            .collect();
        RoleRegistry::new(tiers, Vec::new())
    }

    #[test]
    fn bootstrap_spawns_one_basic_harvester() {
        let (mut world, mut store, mut colony, config) = setup(1);
        let registry = roles::standard_registry();
        let mut workers = BTreeMap::new();

        let attempts = run(&mut colony, &registry, &config, &mut world, &mut store, &mut workers);

        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].role, Some(Role::BasicHarvest));
        assert!(attempts[0].outcome.is_success());
        assert_eq!(colony.count(Role::BasicHarvest), 1);
        assert_eq!(world.worker_names().len(), 1);
        let memory = workers.values().next().unwrap();
        assert_eq!(memory.role, Role::BasicHarvest);
        assert!(memory.slot.is_some());
    }

    #[test]
    fn unaffordable_required_descriptor_stops_the_spawn_point() {
        let (mut world, mut store, mut colony, config) = setup(1);
        let required = WorkforceDescriptor::new(
            Role::BasicHarvest,
            BodyDefinition::fixed(&[Part::Work, Part::Work, Part::Work, Part::Carry, Part::Move]),
            Quota::Unbounded,
            |_, _| true,
        )
        .required();
        let registry = single_tier_registry(required);
        let mut workers = BTreeMap::new();

        let attempts = run(&mut colony, &registry, &config, &mut world, &mut store, &mut workers);

        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, SpawnOutcome::DeclinedRequiredUnmet);
        assert!(world.worker_names().is_empty());
        assert_eq!(colony.count(Role::Upgrader), 0);
    }

    #[test]
    fn unaffordable_optional_descriptor_falls_through() {
        let (mut world, mut store, mut colony, config) = setup(1);
        let optional = WorkforceDescriptor::new(
            Role::Hauler,
            BodyDefinition::fixed(&[Part::Work, Part::Work, Part::Work, Part::Carry, Part::Move]),
            Quota::Unbounded,
            |_, _| true,
        );
        let registry = single_tier_registry(optional);
        let mut workers = BTreeMap::new();

        let attempts = run(&mut colony, &registry, &config, &mut world, &mut store, &mut workers);

        assert_eq!(attempts[0].role, Some(Role::Upgrader));
        assert!(attempts[0].outcome.is_success());
    }

    #[test]
    fn first_empty_spawn_point_skips_the_rest() {
        let (mut world, mut store, mut colony, config) = setup(2);
        world.set_energy("W1N1", 0, 300);
        let registry = roles::standard_registry();
        let mut workers = BTreeMap::new();

        let attempts = run(&mut colony, &registry, &config, &mut world, &mut store, &mut workers);

        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, SpawnOutcome::DeclinedRequiredUnmet);
    }

    #[test]
    fn busy_spawn_is_passed_over() {
        let (mut world, mut store, mut colony, config) = setup(2);
        let busy = colony.structures.spawns[0].clone();
        world.set_spawning(&busy, true);
        let registry = roles::standard_registry();
        let mut workers = BTreeMap::new();

        let attempts = run(&mut colony, &registry, &config, &mut world, &mut store, &mut workers);

        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, SpawnOutcome::DeclinedSpawnBusy);
        assert!(attempts[1].outcome.is_success());
    }

    #[test]
    fn host_anomaly_is_reported() {
        let (mut world, mut store, mut colony, config) = setup(1);
        world.fail_next_spawn(SpawnError::Other(-99));
        let registry = roles::standard_registry();
        let mut workers = BTreeMap::new();

        let attempts = run(&mut colony, &registry, &config, &mut world, &mut store, &mut workers);

        assert_eq!(
            attempts[0].outcome,
            SpawnOutcome::DeclinedUnknownFailure(SpawnError::Other(-99))
        );
        assert_eq!(colony.count(Role::BasicHarvest), 0);
        assert!(workers.is_empty());
    }

    #[test]
    fn vanished_target_colony_is_declined() {
        let (mut world, mut store, mut colony, mut config) = setup(1);
        config.colony_overrides.insert(
            "W1N1".into(),
            vec![crate::config::OverrideEntry {
                role: Role::Claimer,
                quota: Some(1),
                force: true,
                target_colony: Some("W9N9".into()),
            }],
        );
        let gone = WorkforceDescriptor::new(
            Role::BasicHarvest,
            BodyDefinition::fixed(&[Part::Work, Part::Carry, Part::Move]),
            Quota::Limited(0),
            |_, _| true,
        );
        let mut tiers: Vec<Vec<WorkforceDescriptor>> = Vec::new();
        for _ in MIN_TIER..=MAX_TIER {
            tiers.push(vec![gone.clone()]);
        }
        let registry = RoleRegistry::new(tiers, roles::standard_registry().extras);
        let mut workers = BTreeMap::new();

        let attempts = run(&mut colony, &registry, &config, &mut world, &mut store, &mut workers);

        assert_eq!(attempts[0].role, Some(Role::Claimer));
        assert_eq!(attempts[0].outcome, SpawnOutcome::DeclinedTargetColonyGone);
    }
}
