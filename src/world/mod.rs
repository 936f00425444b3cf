//! World Query Interface.
//!
//! The host recreates every live object each tick, so nothing here hands out
//! references that outlive a call: queries return owned snapshots and every
//! entity is addressed by an opaque [`EntityId`] that may stop resolving at
//! any tick.

pub mod sim;

pub use sim::SimWorld;

use crate::error::SpawnError;
use crate::location::*;
use crate::terrain::FastRoomTerrain;
use screeps::constants::StructureType;
use screeps::Part;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of an owned territory.
pub type ColonyKey = String;

/// Opaque handle re-resolved against the live world every tick.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: impl Into<String>) -> Self {
        EntityId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct ControllerInfo {
    pub id: EntityId,
    pub location: Location,
    pub level: u8,
}

#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub id: EntityId,
    pub location: Location,
}

#[derive(Clone, Debug)]
pub struct StructureInfo {
    pub id: EntityId,
    pub structure_type: StructureType,
    pub location: Location,
    pub hits: u32,
    pub hits_max: u32,
    /// Stored energy, 0 for structures without a store.
    pub energy: u32,
    pub energy_capacity: u32,
    /// Only meaningful for spawn points.
    pub spawning: bool,
}

impl StructureInfo {
    pub fn free_capacity(&self) -> u32 {
        self.energy_capacity.saturating_sub(self.energy)
    }

    pub fn is_damaged(&self) -> bool {
        self.hits < self.hits_max
    }
}

#[derive(Clone, Debug)]
pub struct SiteInfo {
    pub id: EntityId,
    pub structure_type: StructureType,
    pub location: Location,
    pub progress: u32,
    pub progress_total: u32,
}

#[derive(Clone, Debug)]
pub struct HostileInfo {
    pub id: EntityId,
    pub location: Location,
    pub body: Vec<Part>,
}

#[derive(Clone, Debug)]
pub struct WorkerInfo {
    pub name: String,
    pub id: EntityId,
    pub ticks_to_live: Option<u32>,
    pub spawning: bool,
}

/// Anything an [`EntityId`] can resolve to.
#[derive(Clone, Debug)]
pub enum Entity {
    Controller(ControllerInfo),
    Node(NodeInfo),
    Structure(StructureInfo),
    Site(SiteInfo),
    Hostile(HostileInfo),
    Worker(WorkerInfo),
}

impl Entity {
    pub fn as_site(&self) -> Option<&SiteInfo> {
        match self {
            Entity::Site(s) => Some(s),
            _ => None,
        }
    }
}

/// Live world access consumed by the core. Mutation commands are safe to
/// issue speculatively; their effect is only assumed visible next tick.
pub trait WorldQuery {
    fn time(&self) -> u32;

    /// Territories the manager currently holds.
    fn owned_colonies(&self) -> Vec<ColonyKey>;

    fn is_controlled(&self, colony: &str) -> bool;

    fn controller(&self, colony: &str) -> Option<ControllerInfo>;

    fn terrain(&self, colony: &str) -> Option<FastRoomTerrain>;

    fn extraction_nodes(&self, colony: &str) -> Vec<NodeInfo>;

    fn structures(&self, colony: &str) -> Vec<StructureInfo>;

    fn building_sites(&self, colony: &str) -> Vec<SiteInfo>;

    fn hostiles(&self, colony: &str) -> Vec<HostileInfo>;

    fn resolve(&self, id: &EntityId) -> Option<Entity>;

    fn entities_at(&self, colony: &str, location: Location) -> Vec<Entity>;

    fn entities_in_radius(&self, colony: &str, center: Location, radius: u8) -> Vec<Entity>;

    fn energy_available(&self, colony: &str) -> u32;

    fn energy_capacity(&self, colony: &str) -> u32;

    /// Every worker the manager owns, including ones still spawning.
    fn workers(&self) -> Vec<WorkerInfo>;

    fn spawn_worker(&mut self, spawn: &EntityId, name: &str, body: &[Part])
        -> Result<(), SpawnError>;

    /// Place a building site. Returns false when the host refuses.
    fn create_site(&mut self, colony: &str, location: Location, structure_type: StructureType)
        -> bool;
}

/// The completed structure of `structure_type` standing at `location`, if any.
pub fn structure_at(
    world: &dyn WorldQuery,
    colony: &str,
    location: Location,
    structure_type: StructureType,
) -> Option<StructureInfo> {
    world
        .entities_at(colony, location)
        .into_iter()
        .filter_map(|e| match e {
            Entity::Structure(s) if s.structure_type == structure_type => Some(s),
            _ => None,
        })
        .next()
}

pub fn body_cost(body: &[Part]) -> u32 {
    body.iter().map(|p| p.cost()).sum()
}
