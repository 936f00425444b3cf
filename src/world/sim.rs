//! In-memory host used for offline runs and tests.

use super::*;
use std::cell::Cell;
use std::collections::BTreeMap;

const DEFAULT_WORKER_LIFETIME: u32 = 1500;

struct SimColony {
    controlled: bool,
    controller: ControllerInfo,
    terrain: FastRoomTerrain,
    nodes: Vec<NodeInfo>,
    structures: Vec<StructureInfo>,
    sites: Vec<SiteInfo>,
    hostiles: Vec<HostileInfo>,
    energy_available: u32,
    energy_capacity: u32,
}

struct SimWorker {
    info: WorkerInfo,
    colony: ColonyKey,
    body: Vec<Part>,
}

/// A deterministic stand-in for the live host.
pub struct SimWorld {
    time: u32,
    colonies: BTreeMap<ColonyKey, SimColony>,
    workers: BTreeMap<String, SimWorker>,
    next_id: u64,
    queries: Cell<u64>,
    forced_spawn_error: Option<SpawnError>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    pub fn new() -> Self {
        SimWorld {
            time: 0,
            colonies: BTreeMap::new(),
            workers: BTreeMap::new(),
            next_id: 1,
            queries: Cell::new(0),
            forced_spawn_error: None,
        }
    }

    fn allocate_id(&mut self, prefix: &str) -> EntityId {
        let id = EntityId::new(format!("{}{}", prefix, self.next_id));
        self.next_id += 1;
        id
    }

    fn count_query(&self) {
        self.queries.set(self.queries.get() + 1);
    }

    /// Number of read queries served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.get()
    }

    pub fn set_time(&mut self, time: u32) {
        self.time = time;
    }

    /// Add a controlled territory with its controller at `controller`.
    pub fn add_colony(
        &mut self,
        colony: &str,
        terrain: FastRoomTerrain,
        controller: Location,
        level: u8,
    ) -> EntityId {
        let id = self.allocate_id("ctrl");
        self.colonies.insert(
            colony.to_owned(),
            SimColony {
                controlled: true,
                controller: ControllerInfo {
                    id: id.clone(),
                    location: controller,
                    level,
                },
                terrain,
                nodes: Vec::new(),
                structures: Vec::new(),
                sites: Vec::new(),
                hostiles: Vec::new(),
                energy_available: 300,
                energy_capacity: 300,
            },
        );
        id
    }

    pub fn set_controlled(&mut self, colony: &str, controlled: bool) {
        if let Some(c) = self.colonies.get_mut(colony) {
            c.controlled = controlled;
        }
    }

    pub fn set_level(&mut self, colony: &str, level: u8) {
        if let Some(c) = self.colonies.get_mut(colony) {
            c.controller.level = level;
        }
    }

    pub fn set_energy(&mut self, colony: &str, available: u32, capacity: u32) {
        if let Some(c) = self.colonies.get_mut(colony) {
            c.energy_available = available;
            c.energy_capacity = capacity;
        }
    }

    pub fn add_node(&mut self, colony: &str, location: Location) -> EntityId {
        let id = self.allocate_id("node");
        if let Some(c) = self.colonies.get_mut(colony) {
            c.nodes.push(NodeInfo {
                id: id.clone(),
                location,
            });
        }
        id
    }

    pub fn add_structure(
        &mut self,
        colony: &str,
        structure_type: StructureType,
        location: Location,
    ) -> EntityId {
        let id = self.allocate_id("s");
        let energy_capacity = match structure_type {
            StructureType::Spawn => 300,
            StructureType::Extension => 50,
            StructureType::Tower => 1000,
            StructureType::Link => 800,
            StructureType::Container => 2000,
            StructureType::Storage => 1_000_000,
            _ => 0,
        };
        let hits_max = match structure_type {
            StructureType::Road => 5000,
            StructureType::Rampart | StructureType::Wall => 300_000,
            _ => 1000,
        };
        if let Some(c) = self.colonies.get_mut(colony) {
            c.structures.push(StructureInfo {
                id: id.clone(),
                structure_type,
                location,
                hits: hits_max,
                hits_max,
                energy: 0,
                energy_capacity,
                spawning: false,
            });
        }
        id
    }

    pub fn add_site(
        &mut self,
        colony: &str,
        structure_type: StructureType,
        location: Location,
    ) -> EntityId {
        let id = self.allocate_id("site");
        if let Some(c) = self.colonies.get_mut(colony) {
            c.sites.push(SiteInfo {
                id: id.clone(),
                structure_type,
                location,
                progress: 0,
                progress_total: 3000,
            });
        }
        id
    }

    /// Finish a building site, replacing it with a structure. Returns the new
    /// structure's ID.
    pub fn complete_site(&mut self, site: &EntityId) -> Option<EntityId> {
        let (colony, structure_type, location) = self.colonies.iter_mut().find_map(|(k, c)| {
            let pos = c.sites.iter().position(|s| &s.id == site)?;
            let removed = c.sites.remove(pos);
            Some((k.clone(), removed.structure_type, removed.location))
        })?;
        Some(self.add_structure(&colony, structure_type, location))
    }

    /// Remove any entity (structure, site, hostile, node) by ID.
    pub fn destroy(&mut self, id: &EntityId) {
        for c in self.colonies.values_mut() {
            c.structures.retain(|s| &s.id != id);
            c.sites.retain(|s| &s.id != id);
            c.hostiles.retain(|h| &h.id != id);
            c.nodes.retain(|n| &n.id != id);
        }
    }

    pub fn set_site_progress(&mut self, id: &EntityId, progress: u32) {
        for c in self.colonies.values_mut() {
            if let Some(site) = c.sites.iter_mut().find(|s| &s.id == id) {
                site.progress = progress.min(site.progress_total);
            }
        }
    }

    pub fn set_hits(&mut self, id: &EntityId, hits: u32) {
        if let Some(s) = self.structure_mut(id) {
            s.hits = hits.min(s.hits_max);
        }
    }

    pub fn set_stored_energy(&mut self, id: &EntityId, energy: u32) {
        if let Some(s) = self.structure_mut(id) {
            s.energy = energy.min(s.energy_capacity);
        }
    }

    pub fn set_spawning(&mut self, id: &EntityId, spawning: bool) {
        if let Some(s) = self.structure_mut(id) {
            s.spawning = spawning;
        }
    }

    fn structure_mut(&mut self, id: &EntityId) -> Option<&mut StructureInfo> {
        self.colonies
            .values_mut()
            .flat_map(|c| c.structures.iter_mut())
            .find(|s| &s.id == id)
    }

    pub fn add_hostile(&mut self, colony: &str, location: Location, body: Vec<Part>) -> EntityId {
        let id = self.allocate_id("hostile");
        if let Some(c) = self.colonies.get_mut(colony) {
            c.hostiles.push(HostileInfo {
                id: id.clone(),
                location,
                body,
            });
        }
        id
    }

    pub fn clear_hostiles(&mut self, colony: &str) {
        if let Some(c) = self.colonies.get_mut(colony) {
            c.hostiles.clear();
        }
    }

    /// Add a live worker directly, bypassing spawning.
    pub fn add_worker(&mut self, name: &str, colony: &str, ticks_to_live: u32) -> EntityId {
        let id = self.allocate_id("w");
        self.workers.insert(
            name.to_owned(),
            SimWorker {
                info: WorkerInfo {
                    name: name.to_owned(),
                    id: id.clone(),
                    ticks_to_live: Some(ticks_to_live),
                    spawning: false,
                },
                colony: colony.to_owned(),
                body: Vec::new(),
            },
        );
        id
    }

    pub fn kill_worker(&mut self, name: &str) {
        self.workers.remove(name);
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    pub fn worker_colony(&self, name: &str) -> Option<&str> {
        self.workers.get(name).map(|w| w.colony.as_str())
    }

    pub fn worker_body(&self, name: &str) -> Option<&[Part]> {
        self.workers.get(name).map(|w| w.body.as_slice())
    }

    /// Make the next `spawn_worker` call fail with `error`.
    pub fn fail_next_spawn(&mut self, error: SpawnError) {
        self.forced_spawn_error = Some(error);
    }

    /// Step to the next tick: age workers, finish spawning, expire the dead.
    pub fn advance(&mut self) {
        self.time += 1;
        for c in self.colonies.values_mut() {
            for s in c.structures.iter_mut() {
                s.spawning = false;
            }
        }
        for w in self.workers.values_mut() {
            w.info.spawning = false;
            w.info.ticks_to_live = w.info.ticks_to_live.map(|t| t.saturating_sub(1));
        }
        self.workers
            .retain(|_, w| w.info.ticks_to_live.map(|t| t > 0).unwrap_or(true));
    }

    fn colony(&self, colony: &str) -> Option<&SimColony> {
        self.count_query();
        self.colonies.get(colony)
    }

    fn all_entities<'a>(&'a self, c: &'a SimColony) -> impl Iterator<Item = Entity> + 'a {
        std::iter::once(Entity::Controller(c.controller.clone()))
            .chain(c.nodes.iter().cloned().map(Entity::Node))
            .chain(c.structures.iter().cloned().map(Entity::Structure))
            .chain(c.sites.iter().cloned().map(Entity::Site))
            .chain(c.hostiles.iter().cloned().map(Entity::Hostile))
    }
}

fn entity_location(entity: &Entity) -> Option<Location> {
    match entity {
        Entity::Controller(c) => Some(c.location),
        Entity::Node(n) => Some(n.location),
        Entity::Structure(s) => Some(s.location),
        Entity::Site(s) => Some(s.location),
        Entity::Hostile(h) => Some(h.location),
        Entity::Worker(_) => None,
    }
}

impl WorldQuery for SimWorld {
    fn time(&self) -> u32 {
        self.time
    }

    fn owned_colonies(&self) -> Vec<ColonyKey> {
        self.count_query();
        self.colonies
            .iter()
            .filter(|(_, c)| c.controlled)
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn is_controlled(&self, colony: &str) -> bool {
        self.colony(colony).map(|c| c.controlled).unwrap_or(false)
    }

    fn controller(&self, colony: &str) -> Option<ControllerInfo> {
        self.colony(colony).map(|c| c.controller.clone())
    }

    fn terrain(&self, colony: &str) -> Option<FastRoomTerrain> {
        self.colony(colony).map(|c| c.terrain.clone())
    }

    fn extraction_nodes(&self, colony: &str) -> Vec<NodeInfo> {
        self.colony(colony).map(|c| c.nodes.clone()).unwrap_or_default()
    }

    fn structures(&self, colony: &str) -> Vec<StructureInfo> {
        self.colony(colony)
            .map(|c| c.structures.clone())
            .unwrap_or_default()
    }

    fn building_sites(&self, colony: &str) -> Vec<SiteInfo> {
        self.colony(colony).map(|c| c.sites.clone()).unwrap_or_default()
    }

    fn hostiles(&self, colony: &str) -> Vec<HostileInfo> {
        self.colony(colony)
            .map(|c| c.hostiles.clone())
            .unwrap_or_default()
    }

    fn resolve(&self, id: &EntityId) -> Option<Entity> {
        self.count_query();
        if let Some(w) = self.workers.values().find(|w| &w.info.id == id) {
            return Some(Entity::Worker(w.info.clone()));
        }
        self.colonies
            .values()
            .flat_map(|c| self.all_entities(c))
            .find(|e| match e {
                Entity::Controller(c) => &c.id == id,
                Entity::Node(n) => &n.id == id,
                Entity::Structure(s) => &s.id == id,
                Entity::Site(s) => &s.id == id,
                Entity::Hostile(h) => &h.id == id,
                Entity::Worker(w) => &w.id == id,
            })
    }

    fn entities_at(&self, colony: &str, location: Location) -> Vec<Entity> {
        self.entities_in_radius(colony, location, 0)
    }

    fn entities_in_radius(&self, colony: &str, center: Location, radius: u8) -> Vec<Entity> {
        match self.colony(colony) {
            Some(c) => self
                .all_entities(c)
                .filter(|e| {
                    entity_location(e)
                        .map(|l| l.distance_to(center) <= radius)
                        .unwrap_or(false)
                })
                .collect(),
            None => Vec::new(),
        }
    }

    fn energy_available(&self, colony: &str) -> u32 {
        self.colony(colony).map(|c| c.energy_available).unwrap_or(0)
    }

    fn energy_capacity(&self, colony: &str) -> u32 {
        self.colony(colony).map(|c| c.energy_capacity).unwrap_or(0)
    }

    fn workers(&self) -> Vec<WorkerInfo> {
        self.count_query();
        self.workers.values().map(|w| w.info.clone()).collect()
    }

    fn spawn_worker(
        &mut self,
        spawn: &EntityId,
        name: &str,
        body: &[Part],
    ) -> Result<(), SpawnError> {
        if let Some(err) = self.forced_spawn_error.take() {
            return Err(err);
        }
        if self.workers.contains_key(name) {
            return Err(SpawnError::NameExists(name.to_owned()));
        }
        let cost = body_cost(body);
        let (colony_key, colony) = self
            .colonies
            .iter_mut()
            .find(|(_, c)| c.structures.iter().any(|s| &s.id == spawn))
            .ok_or(SpawnError::InvalidTarget)?;
        let spawn_point = colony
            .structures
            .iter_mut()
            .find(|s| &s.id == spawn)
            .ok_or(SpawnError::InvalidTarget)?;
        if spawn_point.spawning {
            return Err(SpawnError::Busy);
        }
        if cost > colony.energy_available {
            return Err(SpawnError::NotEnoughEnergy);
        }
        spawn_point.spawning = true;
        colony.energy_available -= cost;
        let colony_key = colony_key.clone();

        let id = self.allocate_id("w");
        self.workers.insert(
            name.to_owned(),
            SimWorker {
                info: WorkerInfo {
                    name: name.to_owned(),
                    id,
                    ticks_to_live: Some(DEFAULT_WORKER_LIFETIME),
                    spawning: true,
                },
                colony: colony_key,
                body: body.to_vec(),
            },
        );
        Ok(())
    }

    fn create_site(
        &mut self,
        colony: &str,
        location: Location,
        structure_type: StructureType,
    ) -> bool {
        let blocked = match self.colonies.get(colony) {
            Some(c) => {
                c.terrain.is_wall_at(location)
                    || c.sites.iter().any(|s| s.location == location)
                    || c.structures.iter().any(|s| {
                        s.location == location
                            && (s.structure_type == structure_type
                                || (s.structure_type != StructureType::Road
                                    && s.structure_type != StructureType::Rampart
                                    && structure_type != StructureType::Rampart))
                    })
            }
            None => true,
        };
        if blocked {
            return false;
        }
        self.add_site(colony, structure_type, location);
        true
    }
}
