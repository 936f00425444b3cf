//! Resource-site assignment.
//!
//! Every extraction node owns one slot table entry per mining tier. Only the
//! highest active tier serves a node; discovering a higher-tier structure
//! retires the lower tiers for that node and their occupants are told to
//! recycle. Retirement never reverses on its own, see
//! [`MiningSlots::reopen_node`].

use crate::layout::ColonyLayout;
use crate::location::Location;
use crate::memory::WorkerMemory;
use crate::world::{structure_at, Entity, EntityId, SiteInfo, StructureInfo, WorldQuery};
use log::*;
use screeps::constants::StructureType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Extraction strategy, in ascending order of precedence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotTier {
    Basic,
    Drop,
    Link,
    PriorityUpgrade,
}

impl SlotTier {
    pub const ALL: [SlotTier; 4] = [
        SlotTier::PriorityUpgrade,
        SlotTier::Link,
        SlotTier::Drop,
        SlotTier::Basic,
    ];

    /// The structure a tier waits on before its slots open.
    pub fn structure_type(self) -> Option<StructureType> {
        match self {
            SlotTier::Link => Some(StructureType::Link),
            SlotTier::Drop => Some(StructureType::Container),
            SlotTier::Basic | SlotTier::PriorityUpgrade => None,
        }
    }
}

/// Construction progress of the structure a tier depends on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteState {
    Unbuilt,
    SiteRegistered(EntityId),
    StructureRegistered(EntityId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub location: Location,
    pub occupants: BTreeSet<String>,
}

impl Slot {
    fn new(location: Location) -> Self {
        Slot {
            location,
            occupants: BTreeSet::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSlots {
    pub node: EntityId,
    /// Tile of the structure this tier depends on, if any.
    pub structure_tile: Option<Location>,
    pub state: SiteState,
    pub retired: bool,
    pub slots: Vec<Slot>,
}

/// One tier's slots, indexed by extraction-node position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotTable {
    pub tier: SlotTier,
    pub nodes: Vec<Option<NodeSlots>>,
}

impl SlotTable {
    fn empty(tier: SlotTier, node_count: usize) -> Self {
        SlotTable {
            tier,
            nodes: vec![None; node_count],
        }
    }

    pub fn is_active(&self, node: usize) -> bool {
        match self.nodes.get(node).and_then(|n| n.as_ref()) {
            Some(entry) if !entry.retired => match self.tier {
                SlotTier::Basic | SlotTier::PriorityUpgrade => true,
                SlotTier::Link | SlotTier::Drop => {
                    matches!(entry.state, SiteState::StructureRegistered(_))
                }
            },
            _ => false,
        }
    }

    pub fn has_active(&self) -> bool {
        (0..self.nodes.len()).any(|i| self.is_active(i))
    }

    /// Total positions across active entries.
    pub fn capacity(&self) -> usize {
        (0..self.nodes.len())
            .filter(|&i| self.is_active(i))
            .filter_map(|i| self.nodes[i].as_ref())
            .map(|n| n.slots.len())
            .sum()
    }

    fn slot_mut(&mut self, node: usize, position: usize) -> Option<&mut Slot> {
        self.nodes
            .get_mut(node)?
            .as_mut()?
            .slots
            .get_mut(position)
    }
}

/// A worker's recorded place in a slot table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBinding {
    pub tier: SlotTier,
    pub node: usize,
    pub position: usize,
}

/// Workers evicted while re-deriving slot state from the world.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotChanges {
    /// Evicted by a promotion; their strategy is obsolete.
    pub displaced: Vec<String>,
    /// Evicted because their slot stopped being active; reassign them.
    pub unbound: Vec<String>,
}

impl SlotChanges {
    pub fn merge(&mut self, other: SlotChanges) {
        self.displaced.extend(other.displaced);
        self.unbound.extend(other.unbound);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiningSlots {
    pub priority_upgrade: SlotTable,
    pub link: SlotTable,
    pub drop: SlotTable,
    pub basic: SlotTable,
}

impl MiningSlots {
    /// Slot tables for a colony without a layout.
    pub fn empty() -> MiningSlots {
        MiningSlots {
            priority_upgrade: SlotTable::empty(SlotTier::PriorityUpgrade, 0),
            link: SlotTable::empty(SlotTier::Link, 0),
            drop: SlotTable::empty(SlotTier::Drop, 0),
            basic: SlotTable::empty(SlotTier::Basic, 0),
        }
    }

    /// Build unbuilt slot tables from the layout's node geometry.
    pub fn from_layout(layout: &ColonyLayout) -> MiningSlots {
        let count = layout.node_count();
        let mut slots = MiningSlots {
            priority_upgrade: SlotTable::empty(SlotTier::PriorityUpgrade, count),
            link: SlotTable::empty(SlotTier::Link, count),
            drop: SlotTable::empty(SlotTier::Drop, count),
            basic: SlotTable::empty(SlotTier::Basic, count),
        };

        for (i, node) in layout.nodes.value.iter().enumerate() {
            let entry = |structure_tile: Option<Location>, positions: Vec<Location>| NodeSlots {
                node: node.id.clone(),
                structure_tile,
                state: SiteState::Unbuilt,
                retired: false,
                slots: positions.into_iter().map(Slot::new).collect(),
            };

            if !node.harvest_spots.is_empty() {
                slots.basic.nodes[i] = Some(entry(None, node.harvest_spots.clone()));
            }
            if let Some(container) = node.container {
                slots.drop.nodes[i] = Some(entry(Some(container), vec![container]));
                if let Some(link) = node.link {
                    slots.link.nodes[i] = Some(entry(Some(link), vec![container]));
                }
            }
            if layout.priority_upgrade_node == Some(i) {
                if let Some(spot) = node.harvest_spots.first() {
                    slots.priority_upgrade.nodes[i] = Some(entry(None, vec![*spot]));
                }
            }
        }

        slots
    }

    pub fn table(&self, tier: SlotTier) -> &SlotTable {
        match tier {
            SlotTier::PriorityUpgrade => &self.priority_upgrade,
            SlotTier::Link => &self.link,
            SlotTier::Drop => &self.drop,
            SlotTier::Basic => &self.basic,
        }
    }

    pub fn table_mut(&mut self, tier: SlotTier) -> &mut SlotTable {
        match tier {
            SlotTier::PriorityUpgrade => &mut self.priority_upgrade,
            SlotTier::Link => &mut self.link,
            SlotTier::Drop => &mut self.drop,
            SlotTier::Basic => &mut self.basic,
        }
    }

    pub fn node_count(&self) -> usize {
        self.basic.nodes.len()
    }

    pub fn is_active(&self, tier: SlotTier, node: usize) -> bool {
        self.table(tier).is_active(node)
    }

    /// The single tier currently serving `node`, if any.
    pub fn active_tier(&self, node: usize) -> Option<SlotTier> {
        SlotTier::ALL
            .iter()
            .copied()
            .find(|&tier| self.is_active(tier, node))
    }

    /// Retire every tier below the highest active one on each node. Returns
    /// the names of workers displaced from retired slots.
    pub fn resolve_precedence(&mut self) -> Vec<String> {
        let mut displaced = Vec::new();
        for node in 0..self.node_count() {
            let top = match self.active_tier(node) {
                Some(tier) => tier,
                None => continue,
            };
            for tier in SlotTier::ALL.iter().copied().filter(|t| *t < top) {
                if let Some(entry) = self.table_mut(tier).nodes[node].as_mut() {
                    if entry.retired {
                        continue;
                    }
                    entry.retired = true;
                    let mut evicted: Vec<String> = entry
                        .slots
                        .iter_mut()
                        .flat_map(|s| std::mem::take(&mut s.occupants))
                        .collect();
                    info!(
                        "Node {} promoted to {:?}, retiring {:?} slots ({} occupants)",
                        entry.node,
                        top,
                        tier,
                        evicted.len()
                    );
                    displaced.append(&mut evicted);
                }
            }
        }
        displaced
    }

    /// Manual demotion: lift every retirement on `node` and let precedence
    /// settle again from the structures currently registered.
    pub fn reopen_node(&mut self, node: usize) -> Vec<String> {
        for tier in SlotTier::ALL {
            if let Some(entry) = self.table_mut(tier).nodes.get_mut(node).and_then(|n| n.as_mut()) {
                entry.retired = false;
            }
        }
        self.resolve_precedence()
    }

    /// `(tier, node)` pairs currently retired, for persistence.
    pub fn retired_markers(&self) -> Vec<(SlotTier, usize)> {
        let mut markers = Vec::new();
        for tier in SlotTier::ALL {
            for (node, entry) in self.table(tier).nodes.iter().enumerate() {
                if entry.as_ref().map(|e| e.retired).unwrap_or(false) {
                    markers.push((tier, node));
                }
            }
        }
        markers
    }

    pub fn apply_retired_markers(&mut self, markers: &[(SlotTier, usize)]) {
        for &(tier, node) in markers {
            if let Some(entry) = self.table_mut(tier).nodes.get_mut(node).and_then(|n| n.as_mut()) {
                entry.retired = true;
            }
        }
    }

    /// Bind `name` to the least-occupied active slot of `tier`. Ties go to
    /// the first slot found. The binding is written to both the slot and the
    /// worker's memory.
    pub fn assign_least_loaded(
        &mut self,
        tier: SlotTier,
        name: &str,
        memory: &mut WorkerMemory,
    ) -> Option<SlotBinding> {
        self.release(name, memory);

        let table = self.table(tier);
        let mut best: Option<(usize, SlotBinding)> = None;
        for node in 0..table.nodes.len() {
            if !table.is_active(node) {
                continue;
            }
            let entry = match &table.nodes[node] {
                Some(entry) => entry,
                None => continue,
            };
            for (position, slot) in entry.slots.iter().enumerate() {
                let load = slot.occupants.len();
                if best.map(|(b, _)| load < b).unwrap_or(true) {
                    best = Some((
                        load,
                        SlotBinding {
                            tier,
                            node,
                            position,
                        },
                    ));
                }
            }
        }

        let (_, binding) = best?;
        if let Some(slot) = self.table_mut(tier).slot_mut(binding.node, binding.position) {
            slot.occupants.insert(name.to_owned());
        }
        memory.slot = Some(binding);
        Some(binding)
    }

    /// Restore a worker's recorded binding after a restart. A binding to a
    /// slot that no longer exists or is no longer active is cleared and the
    /// worker is reassigned on its role's tier.
    pub fn recommit(&mut self, name: &str, memory: &mut WorkerMemory) -> Option<SlotBinding> {
        if let Some(binding) = memory.slot {
            let table = self.table_mut(binding.tier);
            if table.is_active(binding.node) {
                if let Some(slot) = table.slot_mut(binding.node, binding.position) {
                    slot.occupants.insert(name.to_owned());
                    return Some(binding);
                }
            }
            debug!("Stale slot binding {:?} for {}, reassigning", binding, name);
            memory.slot = None;
        }

        let tier = memory.role.slot_tier()?;
        let binding = self.assign_least_loaded(tier, name, memory);
        if binding.is_none() {
            warn!("No active {:?} slot for {} to recommit to", tier, name);
        }
        binding
    }

    /// Remove a worker from its slot. A second call is a no-op.
    pub fn release(&mut self, name: &str, memory: &mut WorkerMemory) {
        if let Some(binding) = memory.slot.take() {
            if let Some(slot) = self
                .table_mut(binding.tier)
                .slot_mut(binding.node, binding.position)
            {
                slot.occupants.remove(name);
            }
        }
    }

    /// Everyone currently bound to `tier`, across all nodes.
    pub fn occupants(&self, tier: SlotTier) -> Vec<&str> {
        self.table(tier)
            .nodes
            .iter()
            .flatten()
            .flat_map(|n| n.slots.iter())
            .flat_map(|s| s.occupants.iter().map(|o| o.as_str()))
            .collect()
    }

    /// Every bound worker and where it sits.
    pub fn bindings(&self) -> BTreeMap<String, SlotBinding> {
        let mut bindings = BTreeMap::new();
        for tier in SlotTier::ALL {
            for (node, entry) in self.table(tier).nodes.iter().enumerate() {
                let entry = match entry {
                    Some(entry) => entry,
                    None => continue,
                };
                for (position, slot) in entry.slots.iter().enumerate() {
                    for name in &slot.occupants {
                        bindings.insert(
                            name.clone(),
                            SlotBinding {
                                tier,
                                node,
                                position,
                            },
                        );
                    }
                }
            }
        }
        bindings
    }

    fn entry_for_tile(
        &mut self,
        structure_type: StructureType,
        location: Location,
    ) -> Option<(SlotTier, &mut NodeSlots)> {
        let tier = [SlotTier::Link, SlotTier::Drop]
            .into_iter()
            .find(|t| t.structure_type() == Some(structure_type))?;
        self.table_mut(tier)
            .nodes
            .iter_mut()
            .flatten()
            .find(|n| n.structure_tile == Some(location))
            .map(|n| (tier, n))
    }

    /// Record a building site for a tier's structure. Returns true when the
    /// site belongs to a node.
    pub fn register_site(&mut self, site: &SiteInfo) -> bool {
        match self.entry_for_tile(site.structure_type, site.location) {
            Some((tier, entry)) => {
                if entry.state == SiteState::Unbuilt {
                    debug!("{:?} site {} registered for node {}", tier, site.id, entry.node);
                    entry.state = SiteState::SiteRegistered(site.id.clone());
                }
                true
            }
            None => false,
        }
    }

    /// Record a completed tier structure and settle precedence. Returns the
    /// workers displaced by the promotion, or `None` when the structure
    /// belongs to no node.
    pub fn register_structure(&mut self, structure: &StructureInfo) -> Option<Vec<String>> {
        let (tier, entry) = self.entry_for_tile(structure.structure_type, structure.location)?;
        let newly = !matches!(&entry.state, SiteState::StructureRegistered(id) if *id == structure.id);
        entry.state = SiteState::StructureRegistered(structure.id.clone());
        if newly {
            debug!("{:?} structure {} registered for node {}", tier, structure.id, entry.node);
        }
        Some(self.resolve_precedence())
    }

    /// Re-derive every link and drop entry's construction state from what
    /// stands on its tile right now.
    #[cfg_attr(feature = "profile", screeps_timing_annotate::timing)]
    pub fn sync_with_world(&mut self, world: &dyn WorldQuery, colony: &str) -> SlotChanges {
        let mut changes = SlotChanges::default();

        for tier in [SlotTier::Link, SlotTier::Drop] {
            let structure_type = match tier.structure_type() {
                Some(t) => t,
                None => continue,
            };
            for node in 0..self.node_count() {
                let (tile, state) = match self.table(tier).nodes[node].as_ref() {
                    Some(entry) => match entry.structure_tile {
                        Some(tile) => (tile, entry.state.clone()),
                        None => continue,
                    },
                    None => continue,
                };

                if let SiteState::StructureRegistered(id) = &state {
                    let alive = matches!(world.resolve(id), Some(Entity::Structure(_)));
                    if alive {
                        continue;
                    }
                    changes.unbound.extend(self.clear_stale(tier, node));
                }

                if let Some(structure) = structure_at(world, colony, tile, structure_type) {
                    if let Some(displaced) = self.register_structure(&structure) {
                        changes.displaced.extend(displaced);
                    }
                    continue;
                }

                let site = world.entities_at(colony, tile).into_iter().find_map(|e| match e {
                    Entity::Site(site) if site.structure_type == structure_type => Some(site),
                    _ => None,
                });
                match site {
                    Some(site) => {
                        self.register_site(&site);
                    }
                    None => {
                        if let SiteState::SiteRegistered(_) = state {
                            self.clear_stale(tier, node);
                        }
                    }
                }
            }
        }

        changes
    }

    /// Drop a registration whose ID stopped resolving and evict the
    /// occupants of the entry. The tier falls back to unbuilt; lower tiers
    /// stay retired until reopened.
    pub fn clear_stale(&mut self, tier: SlotTier, node: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        if let Some(entry) = self.table_mut(tier).nodes.get_mut(node).and_then(|n| n.as_mut()) {
            if entry.state != SiteState::Unbuilt {
                debug!("{:?} registration for node {} went stale", tier, entry.node);
                entry.state = SiteState::Unbuilt;
            }
            for slot in entry.slots.iter_mut() {
                evicted.extend(std::mem::take(&mut slot.occupants));
            }
        }
        if self.active_tier(node).is_none() && self.has_any_entry(node) {
            warn!(
                "Node {} has no active mining tier; demote it to reopen lower tiers",
                node
            );
        }
        evicted
    }

    fn has_any_entry(&self, node: usize) -> bool {
        SlotTier::ALL
            .iter()
            .any(|&t| self.table(t).nodes.get(node).map(|n| n.is_some()).unwrap_or(false))
    }
}
