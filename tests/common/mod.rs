#![allow(dead_code)]

use screeps::constants::StructureType;
use screeps_overseer::location::Location;
use screeps_overseer::terrain::FastRoomTerrain;
use screeps_overseer::workforce::roles;
use screeps_overseer::{MemoryStore, Overseer, SimWorld, TickReport};

/// A walled room with one spawn point and one extraction node far from the
/// controller.
pub fn add_colony(world: &mut SimWorld, key: &str, level: u8) {
    world.add_colony(key, FastRoomTerrain::enclosed(), Location::from_xy(25, 10), level);
    world.add_structure(key, StructureType::Spawn, Location::from_xy(25, 25));
    world.add_node(key, Location::from_xy(40, 40));
}

pub fn single_colony(level: u8) -> SimWorld {
    let mut world = SimWorld::new();
    add_colony(&mut world, "W1N1", level);
    world
}

pub fn boot(world: &SimWorld, store: &mut MemoryStore) -> Overseer {
    Overseer::boot(roles::standard_registry(), world, store).unwrap()
}

/// Tick once and step the world forward.
pub fn step(overseer: &mut Overseer, world: &mut SimWorld, store: &mut MemoryStore) -> TickReport {
    let report = overseer.tick(world, store);
    world.advance();
    report
}
