//! Construction lifecycle tracking.
//!
//! Building sites are grouped into categories. Each category exposes one
//! focus site at a time through a cursor into its site list; when the site
//! under the cursor stops resolving the cursor moves on, and the category
//! goes idle once the list is exhausted. Sites that must turn into a
//! tracked structure carry a pending registration checked on completion.

use crate::location::Location;
use crate::world::{structure_at, Entity, EntityId, SiteInfo, StructureInfo, WorldQuery};
use bitflags::bitflags;
use log::*;
use screeps::constants::StructureType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

bitflags! {
    /// Conditions that force a rescan of building sites.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ConstructionTriggers: u8 {
        /// The process (re)started and no scan has run yet.
        const PROCESS_START = 1;
        /// The colony placed new building sites itself.
        const SITES_PLACED = 2;
        /// The colony's tier changed, unlocking new structures.
        const TIER_CHANGED = 4;
    }
}

impl Default for ConstructionTriggers {
    fn default() -> Self {
        ConstructionTriggers::empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteCategory {
    Road,
    Fortification,
    Other,
}

impl SiteCategory {
    pub const ALL: [SiteCategory; 3] = [SiteCategory::Road, SiteCategory::Fortification, SiteCategory::Other];

    pub fn classify(structure_type: StructureType) -> SiteCategory {
        match structure_type {
            StructureType::Road => SiteCategory::Road,
            StructureType::Rampart | StructureType::Wall => SiteCategory::Fortification,
            _ => SiteCategory::Other,
        }
    }

    /// Whether completed sites of this category are registered as tracked
    /// structures.
    fn registers(self) -> bool {
        matches!(self, SiteCategory::Other)
    }
}

/// Late-binding payload: what should stand at `location` once the site
/// completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRegistration {
    pub structure_type: StructureType,
    pub location: Location,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSite {
    pub index: u32,
    pub id: EntityId,
    pub location: Location,
    pub discovered_at: u32,
    #[serde(default)]
    pub pending: Option<PendingRegistration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryState {
    pub sites: Vec<TrackedSite>,
    pub cursor: usize,
}

impl CategoryState {
    pub fn focus(&self) -> Option<&TrackedSite> {
        self.sites.get(self.cursor)
    }
}

/// Per-colony construction state. A category absent from the map is idle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionTracker {
    #[serde(default)]
    pub categories: BTreeMap<SiteCategory, CategoryState>,
    #[serde(default)]
    pub triggers: ConstructionTriggers,
}

impl ConstructionTracker {
    pub fn raise(&mut self, trigger: ConstructionTriggers) {
        self.triggers |= trigger;
    }

    pub fn needs_scan(&self) -> bool {
        !self.triggers.is_empty()
    }

    pub fn focus(&self, category: SiteCategory) -> Option<&TrackedSite> {
        self.categories.get(&category).and_then(|c| c.focus())
    }

    pub fn has_focus(&self) -> bool {
        SiteCategory::ALL.iter().any(|c| self.focus(*c).is_some())
    }

    pub fn is_idle(&self, category: SiteCategory) -> bool {
        !self.categories.contains_key(&category)
    }

    /// Build progress across every tracked site, in percent. Sites already
    /// passed by their cursor count as finished.
    pub fn progress_percent(&self, world: &dyn WorldQuery) -> u32 {
        let mut total = 0u64;
        let mut done = 0u64;
        for category in self.categories.values() {
            for (at, tracked) in category.sites.iter().enumerate() {
                total += 100;
                if at < category.cursor {
                    done += 100;
                } else if let Some(Entity::Site(site)) = world.resolve(&tracked.id) {
                    if site.progress_total > 0 {
                        done += site.progress.min(site.progress_total) as u64 * 100 / site.progress_total as u64;
                    }
                }
            }
        }
        if total == 0 {
            return 100;
        }
        (done * 100 / total) as u32
    }

    /// Rebuild every category from the current building sites. Tracked
    /// sites that vanished since the last scan are settled first so a
    /// completion is never lost. Returns the structures to register.
    pub fn scan(
        &mut self,
        world: &dyn WorldQuery,
        colony: &str,
        sites: &[SiteInfo],
        tick: u32,
    ) -> Vec<StructureInfo> {
        let mut registrations = Vec::new();
        let mut discovered: BTreeMap<EntityId, u32> = BTreeMap::new();

        for state in self.categories.values() {
            for tracked in state.sites.iter().skip(state.cursor) {
                if sites.iter().any(|s| s.id == tracked.id) {
                    discovered.insert(tracked.id.clone(), tracked.discovered_at);
                } else {
                    registrations.extend(settle(world, colony, tracked));
                }
            }
        }

        let mut categories: BTreeMap<SiteCategory, CategoryState> = BTreeMap::new();
        for site in sites {
            let category = SiteCategory::classify(site.structure_type);
            let state = categories.entry(category).or_default();
            let index = state.sites.len() as u32;
            state.sites.push(TrackedSite {
                index,
                id: site.id.clone(),
                location: site.location,
                discovered_at: discovered.get(&site.id).copied().unwrap_or(tick),
                pending: if category.registers() {
                    Some(PendingRegistration {
                        structure_type: site.structure_type,
                        location: site.location,
                    })
                } else {
                    None
                },
            });
        }

        debug!(
            "{}: scanned {} building sites into {} categories",
            colony,
            sites.len(),
            categories.len()
        );
        self.categories = categories;
        self.triggers = ConstructionTriggers::empty();
        registrations
    }

    /// Move every category's cursor past sites that no longer resolve,
    /// settling their pending registrations. Returns the structures to
    /// register.
    pub fn advance_focus(&mut self, world: &dyn WorldQuery, colony: &str) -> Vec<StructureInfo> {
        let mut registrations = Vec::new();
        let mut exhausted = Vec::new();

        for (category, state) in self.categories.iter_mut() {
            loop {
                let tracked = match state.sites.get(state.cursor) {
                    Some(tracked) => tracked,
                    None => {
                        exhausted.push(*category);
                        break;
                    }
                };
                let alive = world
                    .resolve(&tracked.id)
                    .map(|e| e.as_site().is_some())
                    .unwrap_or(false);
                if alive {
                    break;
                }

                registrations.extend(settle(world, colony, tracked));
                state.cursor += 1;
                debug!("{}: {:?} cursor at {}/{}", colony, category, state.cursor, state.sites.len());
            }
        }

        for category in exhausted {
            debug!("{}: {:?} construction idle", colony, category);
            self.categories.remove(&category);
        }

        registrations
    }
}

/// The structure a vanished site turned into, if it was completed rather
/// than destroyed.
fn settle(world: &dyn WorldQuery, colony: &str, tracked: &TrackedSite) -> Option<StructureInfo> {
    let pending = tracked.pending?;
    structure_at(world, colony, pending.location, pending.structure_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::FastRoomTerrain;
    use crate::world::SimWorld;

    fn world_with_sites(n: u8) -> (SimWorld, Vec<EntityId>) {
        let mut world = SimWorld::new();
        world.add_colony("W1N1", FastRoomTerrain::plains(), Location::from_xy(5, 5), 3);
        let ids = (0..n)
            .map(|i| world.add_site("W1N1", StructureType::Extension, Location::from_xy(10 + i, 10)))
            .collect();
        (world, ids)
    }

    #[test]
    fn cursor_visits_every_site_once_then_idles() {
        let (mut world, ids) = world_with_sites(4);
        let mut tracker = ConstructionTracker::default();
        tracker.raise(ConstructionTriggers::PROCESS_START);
        tracker.scan(&world, "W1N1", &world.building_sites("W1N1"), 0);
        assert!(!tracker.needs_scan());

        let mut seen = Vec::new();
        for id in &ids {
            let focus = tracker.focus(SiteCategory::Other).unwrap();
            assert_eq!(&focus.id, id);
            seen.push(focus.index);
            world.complete_site(id);
            let registered = tracker.advance_focus(&world, "W1N1");
            assert_eq!(registered.len(), 1);
            assert_eq!(registered[0].structure_type, StructureType::Extension);
        }

        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(tracker.is_idle(SiteCategory::Other));
        assert_eq!(tracker.progress_percent(&world), 100);
    }

    #[test]
    fn progress_counts_partial_sites() {
        let (mut world, ids) = world_with_sites(4);
        let mut tracker = ConstructionTracker::default();
        assert_eq!(tracker.progress_percent(&world), 100);
        tracker.scan(&world, "W1N1", &world.building_sites("W1N1"), 0);
        assert_eq!(tracker.progress_percent(&world), 0);

        world.complete_site(&ids[0]);
        tracker.advance_focus(&world, "W1N1");
        world.set_site_progress(&ids[1], 1500);

        assert_eq!(tracker.progress_percent(&world), 37);
    }

    #[test]
    fn triggers_survive_persistence() {
        let mut tracker = ConstructionTracker::default();
        tracker.raise(ConstructionTriggers::PROCESS_START | ConstructionTriggers::TIER_CHANGED);

        let encoded = serde_json::to_string(&tracker).unwrap();
        let decoded: ConstructionTracker = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.triggers, tracker.triggers);
        assert!(!decoded.triggers.contains(ConstructionTriggers::SITES_PLACED));
    }

    #[test]
    fn destroyed_site_skips_registration_silently() {
        let (mut world, ids) = world_with_sites(2);
        let mut tracker = ConstructionTracker::default();
        tracker.scan(&world, "W1N1", &world.building_sites("W1N1"), 0);

        world.destroy(&ids[0]);
        let registered = tracker.advance_focus(&world, "W1N1");

        assert!(registered.is_empty());
        assert_eq!(tracker.focus(SiteCategory::Other).unwrap().id, ids[1]);
    }

    #[test]
    fn roads_and_fortifications_never_register() {
        let mut world = SimWorld::new();
        world.add_colony("W1N1", FastRoomTerrain::plains(), Location::from_xy(5, 5), 3);
        let road = world.add_site("W1N1", StructureType::Road, Location::from_xy(10, 10));
        let rampart = world.add_site("W1N1", StructureType::Rampart, Location::from_xy(11, 10));
        let mut tracker = ConstructionTracker::default();
        tracker.scan(&world, "W1N1", &world.building_sites("W1N1"), 0);
        assert!(tracker.focus(SiteCategory::Road).is_some());
        assert!(tracker.focus(SiteCategory::Fortification).is_some());

        world.complete_site(&road);
        world.complete_site(&rampart);

        assert!(tracker.advance_focus(&world, "W1N1").is_empty());
        assert!(!tracker.has_focus());
    }

    #[test]
    fn rescan_keeps_discovery_tick_and_settles_vanished_sites() {
        let (mut world, ids) = world_with_sites(2);
        let mut tracker = ConstructionTracker::default();
        tracker.scan(&world, "W1N1", &world.building_sites("W1N1"), 5);

        world.complete_site(&ids[1]);
        world.add_site("W1N1", StructureType::Tower, Location::from_xy(20, 20));
        tracker.raise(ConstructionTriggers::SITES_PLACED);
        let registered = tracker.scan(&world, "W1N1", &world.building_sites("W1N1"), 9);

        assert_eq!(registered.len(), 1);
        let other = &tracker.categories[&SiteCategory::Other];
        assert_eq!(other.sites.len(), 2);
        assert_eq!(other.sites[0].discovered_at, 5);
        assert_eq!(other.sites[1].discovered_at, 9);
        assert_eq!(other.cursor, 0);
    }
}
