use crate::world::{Entity, EntityId, StructureInfo, WorldQuery};
use log::*;
use screeps::constants::StructureType;

/// IDs of the colony's tracked structures, grouped by what the core uses
/// them for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructureIndex {
    /// Spawn points, lowest ID first.
    pub spawns: Vec<EntityId>,
    pub extensions: Vec<EntityId>,
    pub towers: Vec<EntityId>,
    pub storage: Option<EntityId>,
    pub containers: Vec<EntityId>,
    pub links: Vec<EntityId>,
    pub fortifications: Vec<EntityId>,
}

impl StructureIndex {
    pub fn from_structures(structures: &[StructureInfo]) -> StructureIndex {
        let mut index = StructureIndex::default();
        for structure in structures {
            index.insert(structure);
        }
        index
    }

    /// Track `structure`. Returns false when it was already tracked or is
    /// of a type the colony does not index.
    pub fn insert(&mut self, structure: &StructureInfo) -> bool {
        let id = structure.id.clone();
        let list = match structure.structure_type {
            StructureType::Spawn => &mut self.spawns,
            StructureType::Extension => &mut self.extensions,
            StructureType::Tower => &mut self.towers,
            StructureType::Container => &mut self.containers,
            StructureType::Link => &mut self.links,
            StructureType::Rampart | StructureType::Wall => &mut self.fortifications,
            StructureType::Storage => {
                if self.storage.as_ref() == Some(&id) {
                    return false;
                }
                self.storage = Some(id);
                return true;
            }
            _ => return false,
        };
        if list.contains(&id) {
            return false;
        }
        list.push(id);
        list.sort();
        true
    }

    /// Drop every ID that no longer resolves to a structure. Returns how
    /// many were dropped.
    pub fn retain_resolving(&mut self, world: &dyn WorldQuery) -> usize {
        let alive = |id: &EntityId| matches!(world.resolve(id), Some(Entity::Structure(_)));
        let mut dropped = 0;
        for list in [
            &mut self.spawns,
            &mut self.extensions,
            &mut self.towers,
            &mut self.containers,
            &mut self.links,
            &mut self.fortifications,
        ] {
            let before = list.len();
            list.retain(|id| alive(id));
            dropped += before - list.len();
        }
        if let Some(storage) = &self.storage {
            if !alive(storage) {
                self.storage = None;
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("Dropped {} stale structure IDs", dropped);
        }
        dropped
    }

    /// Energy sinks in fill order: spawns, then extensions, then towers.
    pub fn fillables(&self) -> Vec<&EntityId> {
        self.spawns
            .iter()
            .chain(self.extensions.iter())
            .chain(self.towers.iter())
            .collect()
    }
}
