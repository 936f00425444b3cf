//! Auto-paths: A* routes from the nerve center to each node and the
//! controller. Only the stretches that cross or skirt swamp are paved, since
//! plains already move at road speed for a balanced worker.

use super::*;
use fnv::FnvHashSet;
use pathfinding::directed::astar::astar;

/// Road tiles along every auto-path that are swamp or touch swamp.
pub fn swamp_paving(layout: &ColonyLayout, terrain: &FastRoomTerrain) -> Vec<Location> {
    let blocked: FnvHashSet<Location> = layout
        .template
        .value
        .iter()
        .filter(|p| p.structure_type != StructureType::Road)
        .map(|p| p.location)
        .chain(layout.nodes.value.iter().map(|n| n.location))
        .chain(std::iter::once(layout.controller))
        .collect();

    let mut destinations: Vec<Location> = layout
        .nodes
        .value
        .iter()
        .map(|n| n.container.unwrap_or(n.location))
        .collect();
    destinations.push(layout.controller);

    let mut paved: FnvHashSet<Location> = FnvHashSet::default();
    let mut roads: Vec<Location> = Vec::new();

    for dest in destinations {
        let path = match find_path(layout.nerve_center, dest, terrain, &blocked, &paved) {
            Some((path, _)) => path,
            None => continue,
        };
        for loc in path {
            if loc == layout.nerve_center || blocked.contains(&loc) || !loc.is_buildable() {
                continue;
            }
            let swampy = terrain.is_swamp_at(loc) || loc.neighbors().any(|n| terrain.is_swamp_at(n));
            if swampy && paved.insert(loc) {
                roads.push(loc);
            }
        }
    }

    roads
}

/// A* between two locations. Already-paved tiles cost 1, plains 2 and swamp
/// 10. The goal may itself be impassable (a node or controller); the path
/// then ends beside it.
fn find_path(
    start: Location,
    goal: Location,
    terrain: &FastRoomTerrain,
    blocked: &FnvHashSet<Location>,
    paved: &FnvHashSet<Location>,
) -> Option<(Vec<Location>, u32)> {
    astar(
        &start,
        |&loc| {
            loc.neighbors()
                .filter_map(|next| {
                    if terrain.is_wall_at(next) {
                        return None;
                    }
                    if next != goal && blocked.contains(&next) {
                        return None;
                    }
                    let cost = if paved.contains(&next) {
                        1
                    } else if terrain.is_swamp_at(next) {
                        10
                    } else {
                        2
                    };
                    Some((next, cost))
                })
                .collect::<Vec<_>>()
        },
        |&loc| loc.distance_to(goal) as u32,
        |&loc| loc.distance_to(goal) <= 1,
    )
    .map(|(mut path, cost)| {
        path.retain(|l| *l != goal);
        (path, cost)
    })
}
