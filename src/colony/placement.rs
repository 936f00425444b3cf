//! Turning the persisted layout into building sites as tiers unlock.

use crate::constants::max_structures_at_tier;
use crate::layout::ColonyLayout;
use crate::world::{Entity, WorldQuery};
use log::*;
use screeps::constants::StructureType;

/// Running per-type totals of structures and sites.
struct TypeCounts(Vec<(StructureType, u32)>);

impl TypeCounts {
    fn get(&self, structure_type: StructureType) -> u32 {
        self.0
            .iter()
            .find(|(t, _)| *t == structure_type)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    fn bump(&mut self, structure_type: StructureType) {
        match self.0.iter_mut().find(|(t, _)| *t == structure_type) {
            Some((_, count)) => *count += 1,
            None => self.0.push((structure_type, 1)),
        }
    }
}

/// Place building sites for planned structures unlocked at `tier`, highest
/// build priority first, stopping after `max_sites`. Returns how many were
/// placed.
#[cfg_attr(feature = "profile", screeps_timing_annotate::timing)]
pub fn place_planned_sites(
    world: &mut dyn WorldQuery,
    colony: &str,
    layout: &ColonyLayout,
    tier: u8,
    max_sites: u32,
) -> u32 {
    let mut counts = TypeCounts(Vec::new());
    for structure in world.structures(colony) {
        counts.bump(structure.structure_type);
    }
    for site in world.building_sites(colony) {
        counts.bump(site.structure_type);
    }

    let mut placed = 0;
    for planned in layout.planned_structures() {
        if placed >= max_sites {
            break;
        }
        if planned.min_tier > tier {
            continue;
        }
        if counts.get(planned.structure_type) >= max_structures_at_tier(planned.structure_type, tier) {
            continue;
        }

        let occupied = world
            .entities_at(colony, planned.location)
            .into_iter()
            .any(|e| match e {
                Entity::Structure(s) => s.structure_type == planned.structure_type,
                Entity::Site(_) => true,
                _ => false,
            });
        if occupied {
            continue;
        }

        if world.create_site(colony, planned.location, planned.structure_type) {
            counts.bump(planned.structure_type);
            placed += 1;
        }
    }

    if placed > 0 {
        info!("{}: placed {} building sites at tier {}", colony, placed, tier);
    }
    placed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverseerConfig;
    use crate::layout::ensure_layout;
    use crate::location::Location;
    use crate::store::MemoryStore;
    use crate::terrain::FastRoomTerrain;
    use crate::world::SimWorld;

    fn setup(level: u8) -> (SimWorld, ColonyLayout) {
        let mut world = SimWorld::new();
        world.add_colony("W1N1", FastRoomTerrain::enclosed(), Location::from_xy(25, 10), level);
        world.add_structure("W1N1", StructureType::Spawn, Location::from_xy(25, 25));
        world.add_node("W1N1", Location::from_xy(40, 40));
        let mut store = MemoryStore::new();
        let layout = ensure_layout(&mut store, &world, "W1N1", &OverseerConfig::default()).unwrap();
        (world, layout)
    }

    #[test]
    fn respects_the_per_tick_cap_and_tier_limits() {
        let (mut world, layout) = setup(2);

        let placed = place_planned_sites(&mut world, "W1N1", &layout, 2, 5);
        assert_eq!(placed, 5);

        for _ in 0..40 {
            place_planned_sites(&mut world, "W1N1", &layout, 2, 5);
        }
        let sites = world.building_sites("W1N1");
        let extensions = sites
            .iter()
            .filter(|s| s.structure_type == StructureType::Extension)
            .count() as u32;
        assert_eq!(extensions, max_structures_at_tier(StructureType::Extension, 2));
        assert!(sites.iter().all(|s| s.structure_type != StructureType::Tower));
    }

    #[test]
    fn nothing_new_at_tier_one_besides_roads() {
        let (mut world, layout) = setup(1);
        for _ in 0..100 {
            place_planned_sites(&mut world, "W1N1", &layout, 1, 5);
        }
        assert!(world
            .building_sites("W1N1")
            .iter()
            .all(|s| s.structure_type == StructureType::Road));
    }
}
