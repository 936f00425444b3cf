//! Persisted layout store.
//!
//! A colony's layout is computed once from terrain and live world data and
//! then read back on every restart. Each sub-record carries its own
//! `computed` flag so a restart part-way through never recomputes or
//! duplicates what is already persisted.

pub mod fortification;
pub mod paths;
pub mod template;

use crate::config::OverseerConfig;
use crate::constants::*;
use crate::location::*;
use crate::store::{self, PersistentStore};
use crate::terrain::*;
use crate::world::{EntityId, WorldQuery};
use itertools::Itertools;
use log::*;
use screeps::constants::StructureType;
use serde::{Deserialize, Serialize};

/// Build priority for construction ordering.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Ord, PartialOrd, Serialize, Deserialize)]
pub enum BuildPriority {
    VeryLow = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

/// A payload guarded by its own "has this been computed" flag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Computed<T> {
    pub computed: bool,
    #[serde(default)]
    pub value: T,
}

impl<T> Computed<T> {
    pub fn done(value: T) -> Self {
        Computed {
            computed: true,
            value,
        }
    }
}

/// Fixed geometry around one extraction node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeLayout {
    pub id: EntityId,
    pub location: Location,
    /// Walking distance from the nerve center, `None` when unreachable.
    pub walk_distance: Option<u32>,
    /// Drop-mining container tile.
    pub container: Option<Location>,
    /// Link-mining link tile, adjacent to the container.
    pub link: Option<Location>,
    /// Tiles a direct harvester may stand on, nearest first.
    pub harvest_spots: Vec<Location>,
}

/// One structure the colony intends to build once its tier allows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedStructure {
    pub location: Location,
    pub structure_type: StructureType,
    pub min_tier: u8,
    pub priority: BuildPriority,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColonyLayout {
    pub version: u32,
    pub nerve_center: Location,
    pub controller: Location,
    /// Extraction nodes ordered by walking distance to the nerve center.
    pub nodes: Computed<Vec<NodeLayout>>,
    /// Index into `nodes` of the node reserved for priority upgrading.
    #[serde(default)]
    pub priority_upgrade_node: Option<usize>,
    pub template: Computed<Vec<PlannedStructure>>,
    pub auto_paths: Computed<Vec<Location>>,
    pub fortifications: Computed<Vec<Location>>,
}

impl ColonyLayout {
    pub fn is_complete(&self) -> bool {
        self.version == LAYOUT_VERSION
            && self.nodes.computed
            && self.template.computed
            && self.auto_paths.computed
            && self.fortifications.computed
    }

    pub fn node_count(&self) -> usize {
        self.nodes.value.len()
    }

    /// Every structure the layout plans, in build-priority order (highest
    /// first, nearest first within a priority).
    pub fn planned_structures(&self) -> Vec<PlannedStructure> {
        let center = self.nerve_center;
        self.template
            .value
            .iter()
            .cloned()
            .chain(self.auto_paths.value.iter().map(|&location| PlannedStructure {
                location,
                structure_type: StructureType::Road,
                min_tier: 1,
                priority: BuildPriority::VeryLow,
            }))
            .chain(self.fortifications.value.iter().map(|&location| PlannedStructure {
                location,
                structure_type: StructureType::Rampart,
                min_tier: 4,
                priority: BuildPriority::Low,
            }))
            .sorted_by_key(|p| {
                (
                    std::cmp::Reverse(p.priority),
                    p.min_tier,
                    p.location.distance_to(center),
                    p.location,
                )
            })
            .collect()
    }
}

/// Load the colony's layout, computing and persisting any missing
/// sub-record first. When the record is already complete no world query
/// is made. Returns `None` (with a warning) when required data is missing.
#[cfg_attr(feature = "profile", screeps_timing_annotate::timing)]
pub fn ensure_layout(
    store: &mut dyn PersistentStore,
    world: &dyn WorldQuery,
    colony: &str,
    config: &OverseerConfig,
) -> Option<ColonyLayout> {
    let key = store::layout_key(colony);
    let existing: Option<ColonyLayout> = match store::load(store, &key) {
        Ok(layout) => layout.filter(|l: &ColonyLayout| l.version == LAYOUT_VERSION),
        Err(err) => {
            warn!("Discarding unreadable layout for {}: {}", colony, err);
            None
        }
    };

    if let Some(layout) = &existing {
        if layout.is_complete() {
            return existing;
        }
    }

    let terrain = match world.terrain(colony) {
        Some(t) => t,
        None => {
            warn!("No terrain for {}, layout not computed", colony);
            return existing;
        }
    };

    let mut layout = match existing {
        Some(layout) => layout,
        None => {
            let controller = match world.controller(colony) {
                Some(c) => c.location,
                None => {
                    warn!("No controller in {}, layout not computed", colony);
                    return None;
                }
            };
            let nerve_center = match find_nerve_center(world, colony) {
                Some(loc) => loc,
                None => {
                    warn!("No spawn point in {}, layout not computed", colony);
                    return None;
                }
            };
            ColonyLayout {
                version: LAYOUT_VERSION,
                nerve_center,
                controller,
                nodes: Computed::default(),
                priority_upgrade_node: None,
                template: Computed::default(),
                auto_paths: Computed::default(),
                fortifications: Computed::default(),
            }
        }
    };

    let (distances, _) = flood_fill_distance(&terrain, &[layout.nerve_center]);

    if !layout.nodes.computed {
        let nodes = order_nodes(world, colony, &terrain, &distances, config);
        layout.priority_upgrade_node =
            priority_upgrade_node(&nodes, layout.controller, config.priority_upgrade_range);
        debug!("{}: ordered {} extraction nodes", colony, nodes.len());
        layout.nodes = Computed::done(nodes);
    }

    if !layout.template.computed {
        let placements = template::place_template(&layout, &terrain, &distances);
        layout.template = Computed::done(placements);
    }

    if !layout.auto_paths.computed {
        let roads = paths::swamp_paving(&layout, &terrain);
        layout.auto_paths = Computed::done(roads);
    }

    if !layout.fortifications.computed {
        let ring = fortification::fortification_ring(&layout, &terrain, config.fortification_radius);
        layout.fortifications = Computed::done(ring);
    }

    if let Err(err) = store::save(store, &key, &layout) {
        warn!("Failed to persist layout for {}: {}", colony, err);
    }

    Some(layout)
}

/// The nerve center is the first spawn point (lowest ID for determinism).
fn find_nerve_center(world: &dyn WorldQuery, colony: &str) -> Option<Location> {
    world
        .structures(colony)
        .into_iter()
        .filter(|s| s.structure_type == StructureType::Spawn)
        .min_by(|a, b| a.id.cmp(&b.id))
        .map(|s| s.location)
}

fn order_nodes(
    world: &dyn WorldQuery,
    colony: &str,
    terrain: &FastRoomTerrain,
    distances: &RoomDataArray<Option<u32>>,
    config: &OverseerConfig,
) -> Vec<NodeLayout> {
    world
        .extraction_nodes(colony)
        .into_iter()
        .map(|node| {
            let walk_distance = walking_distance_to_feature(distances, node.location);

            let mut spots: Vec<Location> = node
                .location
                .neighbors()
                .filter(|n| n.is_buildable() && !terrain.is_wall_at(*n))
                .sorted_by_key(|n| (distances.at(*n).unwrap_or(u32::MAX), *n))
                .collect();

            let container = spots.first().copied();
            let link = container.and_then(|c| {
                c.neighbors()
                    .filter(|n| {
                        *n != node.location
                            && n.is_buildable()
                            && !terrain.is_wall_at(*n)
                            && n.distance_to(node.location) > 1
                    })
                    .min_by_key(|n| (distances.at(*n).unwrap_or(u32::MAX), *n))
            });

            spots.truncate(config.basic_slots_per_node.max(1));

            NodeLayout {
                id: node.id,
                location: node.location,
                walk_distance,
                container,
                link,
                harvest_spots: spots,
            }
        })
        .sorted_by(|a, b| {
            a.walk_distance
                .unwrap_or(u32::MAX)
                .cmp(&b.walk_distance.unwrap_or(u32::MAX))
                .then_with(|| a.id.cmp(&b.id))
        })
        .collect()
}

fn priority_upgrade_node(nodes: &[NodeLayout], controller: Location, range: u8) -> Option<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.location.distance_to(controller) <= range)
        .min_by_key(|(i, n)| (n.location.distance_to(controller), *i))
        .map(|(i, _)| i)
}
