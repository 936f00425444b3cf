//! Fixed coordinate template around the nerve center.
//!
//! ```text
//!   e r e r e r e r e
//!   r e r e r e r e r
//!   e r S r T r e r e
//!   r e r r r r r e r
//!   e r T r N r T r e
//!   r e r r r r r e r
//!   e r S r O r T r e
//!   r e r e r e r e r
//!   e r e r e r e r e
//! ```
//!
//! N = nerve center spawn, S = spawn, T = tower, O = storage, e = extension,
//! r = road. Tiles blocked by terrain or node infrastructure are skipped.

use super::*;
use fnv::FnvHashSet;

const TEMPLATE_RADIUS: i8 = 4;

/// A placement within a stamp: structure type at an offset from the anchor.
#[derive(Clone, Debug)]
pub struct StampPlacement {
    pub structure_type: StructureType,
    pub dx: i8,
    pub dy: i8,
}

#[derive(Clone, Debug)]
pub struct Stamp {
    pub name: &'static str,
    pub placements: Vec<StampPlacement>,
}

fn sp(structure_type: StructureType, dx: i8, dy: i8) -> StampPlacement {
    StampPlacement {
        structure_type,
        dx,
        dy,
    }
}

pub fn core_stamp() -> Stamp {
    let fixed = vec![
        sp(StructureType::Spawn, 0, 0),
        sp(StructureType::Storage, 0, 2),
        sp(StructureType::Tower, -2, 0),
        sp(StructureType::Tower, 2, 0),
        sp(StructureType::Tower, 0, -2),
        sp(StructureType::Tower, 2, 2),
        sp(StructureType::Tower, 2, -2),
        sp(StructureType::Spawn, -2, -2),
        sp(StructureType::Spawn, -2, 2),
    ];
    let reserved: FnvHashSet<(i8, i8)> = fixed.iter().map(|p| (p.dx, p.dy)).collect();

    let mut placements = fixed;
    for dy in -TEMPLATE_RADIUS..=TEMPLATE_RADIUS {
        for dx in -TEMPLATE_RADIUS..=TEMPLATE_RADIUS {
            if reserved.contains(&(dx, dy)) {
                continue;
            }
            let ring = dx.abs().max(dy.abs());
            let structure_type = if ring <= 1 || (dx + dy).rem_euclid(2) == 1 {
                StructureType::Road
            } else {
                StructureType::Extension
            };
            placements.push(sp(structure_type, dx, dy));
        }
    }

    Stamp {
        name: "core",
        placements,
    }
}

pub fn build_priority(structure_type: StructureType, tier: u8) -> BuildPriority {
    match structure_type {
        StructureType::Spawn => BuildPriority::Critical,
        StructureType::Extension => {
            if tier <= 2 {
                BuildPriority::Critical
            } else {
                BuildPriority::Medium
            }
        }
        StructureType::Storage => BuildPriority::Critical,
        StructureType::Tower => BuildPriority::Critical,
        StructureType::Container => BuildPriority::High,
        StructureType::Link => BuildPriority::High,
        StructureType::Wall | StructureType::Rampart => BuildPriority::Low,
        StructureType::Road => BuildPriority::VeryLow,
        _ => BuildPriority::Medium,
    }
}

/// Tiles the template must leave free for node infrastructure and the
/// controller.
fn reserved_tiles(layout: &ColonyLayout) -> FnvHashSet<Location> {
    let mut reserved = FnvHashSet::default();
    reserved.insert(layout.controller);
    reserved.extend(layout.controller.neighbors());
    for node in &layout.nodes.value {
        reserved.insert(node.location);
        reserved.extend(node.container);
        reserved.extend(node.link);
        reserved.extend(node.harvest_spots.iter().copied());
    }
    reserved
}

/// Resolve the core stamp plus node containers and links into concrete
/// planned structures with unlock tiers.
pub fn place_template(
    layout: &ColonyLayout,
    terrain: &FastRoomTerrain,
    distances: &RoomDataArray<Option<u32>>,
) -> Vec<PlannedStructure> {
    let reserved = reserved_tiles(layout);
    let center = layout.nerve_center;

    let mut candidates: Vec<(Location, StructureType)> = core_stamp()
        .placements
        .iter()
        .filter_map(|p| {
            let loc = center.checked_add(p.dx, p.dy)?;
            let fits = loc.is_buildable()
                && !terrain.is_wall_at(loc)
                && distances.at(loc).is_some()
                && (loc == center || !reserved.contains(&loc));
            if fits {
                Some((loc, p.structure_type))
            } else {
                None
            }
        })
        .collect();

    // Nearest structures unlock first.
    candidates.sort_by_key(|(loc, _)| (loc.distance_to(center), *loc));

    for node in &layout.nodes.value {
        candidates.extend(node.container.map(|c| (c, StructureType::Container)));
    }
    for node in &layout.nodes.value {
        candidates.extend(node.link.map(|l| (l, StructureType::Link)));
    }

    let mut counts: Vec<(StructureType, u32)> = Vec::new();
    candidates
        .into_iter()
        .filter_map(|(location, structure_type)| {
            let min_tier = match structure_type {
                StructureType::Road => 1,
                StructureType::Container => 2,
                _ => {
                    let nth = match counts.iter_mut().find(|(t, _)| *t == structure_type) {
                        Some((_, count)) => {
                            *count += 1;
                            *count
                        }
                        None => {
                            counts.push((structure_type, 1));
                            1
                        }
                    };
                    min_tier_for_nth(structure_type, nth)
                }
            };
            if min_tier > MAX_TIER {
                return None;
            }
            Some(PlannedStructure {
                location,
                structure_type,
                min_tier,
                priority: build_priority(structure_type, min_tier),
            })
        })
        .collect()
}
