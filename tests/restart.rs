mod common;

use common::*;
use proptest::prelude::*;
use screeps::constants::StructureType;
use screeps::Part;
use screeps_overseer::location::Location;
use screeps_overseer::mining::SlotTier;
use screeps_overseer::world::structure_at;
use screeps_overseer::{MemoryStore, Overseer, SimWorld, WorldQuery};

fn assert_equivalent(before: &Overseer, after: &Overseer) {
    let keys: Vec<_> = before.colonies().map(|c| c.key.clone()).collect();
    let reloaded: Vec<_> = after.colonies().map(|c| c.key.clone()).collect();
    assert_eq!(keys, reloaded);

    for colony in before.colonies() {
        let other = after.colony(&colony.key).unwrap();
        assert_eq!(colony.slots.bindings(), other.slots.bindings(), "{}", colony.key);
        assert_eq!(colony.slots.retired_markers(), other.slots.retired_markers(), "{}", colony.key);
        assert_eq!(colony.construction.categories, other.construction.categories, "{}", colony.key);
        assert_eq!(colony.counts, other.counts, "{}", colony.key);
        assert_eq!(colony.fill_cursor, other.fill_cursor, "{}", colony.key);
        assert_eq!(colony.threats.presence_ticks, other.threats.presence_ticks, "{}", colony.key);
    }
    assert_eq!(before.workers(), after.workers());
}

struct Tiles {
    container: Location,
    link: Location,
}

fn tiles(overseer: &Overseer) -> Tiles {
    let node = &overseer.colony("W1N1").unwrap().layout.as_ref().unwrap().nodes.value[0];
    Tiles {
        container: node.container.unwrap(),
        link: node.link.unwrap(),
    }
}

fn build_once(world: &mut SimWorld, structure_type: StructureType, location: Location) {
    if structure_at(&*world, "W1N1", location, structure_type).is_none() {
        world.add_structure("W1N1", structure_type, location);
    }
}

fn apply(world: &mut SimWorld, tiles: &Tiles, event: u8) {
    match event {
        1 => {
            if let Some(name) = world.worker_names().first().cloned() {
                world.kill_worker(&name);
            }
        }
        2 => {
            if let Some(site) = world.building_sites("W1N1").first().cloned() {
                world.complete_site(&site.id);
            }
        }
        3 => {
            world.add_hostile("W2N1", Location::from_xy(12, 12), vec![Part::Attack]);
        }
        4 => world.clear_hostiles("W2N1"),
        5 => {
            let doomed = world
                .structures("W1N1")
                .into_iter()
                .find(|s| matches!(s.structure_type, StructureType::Container | StructureType::Link));
            if let Some(structure) = doomed {
                world.destroy(&structure.id);
            }
        }
        6 => {
            world.set_energy("W1N1", 300, 300);
            world.set_energy("W2N1", 300, 300);
        }
        7 => build_once(world, StructureType::Container, tiles.container),
        8 => build_once(world, StructureType::Link, tiles.link),
        _ => {}
    }
}

fn two_colonies() -> SimWorld {
    let mut world = single_colony(5);
    add_colony(&mut world, "W2N1", 2);
    world
}

#[test]
fn restart_after_promotion_keeps_retirements() {
    let mut world = two_colonies();
    let mut store = MemoryStore::new();
    let mut overseer = boot(&world, &mut store);
    let tiles = tiles(&overseer);

    step(&mut overseer, &mut world, &mut store);
    apply(&mut world, &tiles, 7);
    step(&mut overseer, &mut world, &mut store);

    let rebooted = boot(&world, &mut store.clone());
    assert_equivalent(&overseer, &rebooted);

    let colony = rebooted.colony("W1N1").unwrap();
    assert_eq!(colony.slots.active_tier(0), Some(SlotTier::Drop));
    assert!(colony.slots.retired_markers().contains(&(SlotTier::Basic, 0)));
    assert!(rebooted
        .workers()
        .values()
        .filter(|m| m.recycle)
        .all(|m| m.slot.is_none()));
}

#[test]
fn booting_twice_from_the_same_store_is_stable() {
    let mut world = two_colonies();
    let mut store = MemoryStore::new();
    let mut overseer = boot(&world, &mut store);
    for _ in 0..5 {
        step(&mut overseer, &mut world, &mut store);
    }

    let first = boot(&world, &mut store);
    let snapshot = store.clone();
    let second = boot(&world, &mut store);

    assert_equivalent(&first, &second);
    assert_eq!(store, snapshot);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn restart_reproduces_colony_state(events in prop::collection::vec(0u8..9, 1..30)) {
        let mut world = two_colonies();
        let mut store = MemoryStore::new();
        let mut overseer = boot(&world, &mut store);
        let tiles = tiles(&overseer);

        for event in events {
            apply(&mut world, &tiles, event);
            overseer.tick(&mut world, &mut store);

            let rebooted = boot(&world, &mut store.clone());
            assert_equivalent(&overseer, &rebooted);

            world.advance();
        }
    }
}
