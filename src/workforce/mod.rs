//! Workforce: roles, their descriptors and the per-tier priority lists the
//! scheduler walks.

pub mod roles;
pub mod scheduler;

pub use scheduler::*;

use crate::colony::ColonyState;
use crate::config::OverseerConfig;
use crate::constants::*;
use crate::error::ConfigError;
use crate::memory::WorkerMemory;
use crate::mining::SlotTier;
use crate::overseer::Directive;
use screeps::Part;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    BasicHarvest,
    DropMiner,
    LinkMiner,
    PriorityUpgrader,
    Hauler,
    Filler,
    Upgrader,
    Builder,
    Repairer,
    Defender,
    Claimer,
    Pioneer,
}

impl Role {
    pub const ALL: [Role; 12] = [
        Role::BasicHarvest,
        Role::DropMiner,
        Role::LinkMiner,
        Role::PriorityUpgrader,
        Role::Hauler,
        Role::Filler,
        Role::Upgrader,
        Role::Builder,
        Role::Repairer,
        Role::Defender,
        Role::Claimer,
        Role::Pioneer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Role::BasicHarvest => "basic-harvest",
            Role::DropMiner => "drop-miner",
            Role::LinkMiner => "link-miner",
            Role::PriorityUpgrader => "priority-upgrader",
            Role::Hauler => "hauler",
            Role::Filler => "filler",
            Role::Upgrader => "upgrader",
            Role::Builder => "builder",
            Role::Repairer => "repairer",
            Role::Defender => "defender",
            Role::Claimer => "claimer",
            Role::Pioneer => "pioneer",
        }
    }

    /// The mining tier a worker of this role occupies, if any.
    pub fn slot_tier(self) -> Option<SlotTier> {
        match self {
            Role::BasicHarvest => Some(SlotTier::Basic),
            Role::DropMiner => Some(SlotTier::Drop),
            Role::LinkMiner => Some(SlotTier::Link),
            Role::PriorityUpgrader => Some(SlotTier::PriorityUpgrade),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A memory key a descriptor needs populated at spawn time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryKey {
    TargetColony,
    Extra(&'static str),
}

/// Body composition. Repeating bodies grow with the colony's energy
/// capacity up to `max_repeats`.
#[derive(Clone, Debug, PartialEq)]
pub struct BodyDefinition {
    pub pre_parts: Vec<Part>,
    pub repeat_parts: Vec<Part>,
    pub post_parts: Vec<Part>,
    pub max_repeats: usize,
}

impl BodyDefinition {
    pub fn fixed(parts: &[Part]) -> Self {
        BodyDefinition {
            pre_parts: parts.to_vec(),
            repeat_parts: Vec::new(),
            post_parts: Vec::new(),
            max_repeats: 0,
        }
    }

    pub fn repeating(pre: &[Part], repeat: &[Part], max_repeats: usize) -> Self {
        BodyDefinition {
            pre_parts: pre.to_vec(),
            repeat_parts: repeat.to_vec(),
            post_parts: Vec::new(),
            max_repeats,
        }
    }

    /// Largest body affordable at `energy_capacity`, with at least one
    /// repeat when the definition has any. `None` when even that is too
    /// expensive or too long.
    pub fn create_body(&self, energy_capacity: u32) -> Option<Vec<Part>> {
        let fixed: Vec<Part> = self
            .pre_parts
            .iter()
            .chain(self.post_parts.iter())
            .copied()
            .collect();
        let fixed_cost: u32 = fixed.iter().map(|p| p.cost()).sum();
        let repeat_cost: u32 = self.repeat_parts.iter().map(|p| p.cost()).sum();

        let repeats = if self.repeat_parts.is_empty() || repeat_cost == 0 {
            0
        } else {
            let by_energy = (energy_capacity.saturating_sub(fixed_cost) / repeat_cost) as usize;
            let by_length = MAX_BODY_PARTS.saturating_sub(fixed.len()) / self.repeat_parts.len();
            let repeats = by_energy.min(by_length).min(self.max_repeats);
            if repeats == 0 {
                return None;
            }
            repeats
        };

        let mut body = self.pre_parts.clone();
        for _ in 0..repeats {
            body.extend_from_slice(&self.repeat_parts);
        }
        body.extend_from_slice(&self.post_parts);

        if body.is_empty() || body.len() > MAX_BODY_PARTS {
            return None;
        }
        Some(body)
    }

    /// Part count of the smallest body this definition can produce.
    pub fn min_parts(&self) -> usize {
        let repeat = if self.repeat_parts.is_empty() { 0 } else { self.repeat_parts.len() };
        self.pre_parts.len() + self.post_parts.len() + repeat
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Quota {
    Limited(u32),
    Unbounded,
}

impl Quota {
    pub fn allows(self, count: u32) -> bool {
        match self {
            Quota::Limited(max) => count < max,
            Quota::Unbounded => true,
        }
    }
}

/// Decides whether a role may spawn, given its colony and current count.
pub type EligibilityFn = fn(&ColonyState, u32) -> bool;

/// Runs once after a successful spawn, before memory is persisted.
pub type BirthHook = fn(&mut ColonyState, &str, &mut WorkerMemory);

/// Per-worker behavior, invoked during dispatch.
pub type BehaviorFn = fn(&str, &WorkerMemory, &Directive);

#[derive(Clone)]
pub struct WorkforceDescriptor {
    pub role: Role,
    pub body: BodyDefinition,
    pub quota: Quota,
    /// A required descriptor that cannot be afforded stops the spawn point.
    pub required: bool,
    /// Bypass the eligibility predicate.
    pub force: bool,
    pub eligible: EligibilityFn,
    pub required_memory: Vec<MemoryKey>,
    pub fixed_memory: Vec<(&'static str, serde_json::Value)>,
    pub target_colony: Option<String>,
    pub on_birth: Option<BirthHook>,
}

impl fmt::Debug for WorkforceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkforceDescriptor")
            .field("role", &self.role)
            .field("quota", &self.quota)
            .field("required", &self.required)
            .field("force", &self.force)
            .field("target_colony", &self.target_colony)
            .finish()
    }
}

impl WorkforceDescriptor {
    pub fn new(role: Role, body: BodyDefinition, quota: Quota, eligible: EligibilityFn) -> Self {
        WorkforceDescriptor {
            role,
            body,
            quota,
            required: false,
            force: false,
            eligible,
            required_memory: Vec::new(),
            fixed_memory: Vec::new(),
            target_colony: None,
            on_birth: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_birth_hook(mut self, hook: BirthHook) -> Self {
        self.on_birth = Some(hook);
        self
    }

    pub fn with_required_memory(mut self, key: MemoryKey) -> Self {
        self.required_memory.push(key);
        self
    }

    pub fn with_fixed_memory(mut self, key: &'static str, value: serde_json::Value) -> Self {
        self.fixed_memory.push((key, value));
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_body()?;
        for key in &self.required_memory {
            let supplied = match key {
                MemoryKey::TargetColony => self.target_colony.is_some(),
                MemoryKey::Extra(name) => self.fixed_memory.iter().any(|(k, _)| k == name),
            };
            if !supplied {
                return Err(ConfigError::MissingMemory {
                    role: self.role,
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Memory requirements of override-only roles are met per override, so
    /// only the body is checked up front.
    fn validate_body(&self) -> Result<(), ConfigError> {
        if self.body.min_parts() == 0 {
            return Err(ConfigError::EmptyBody { role: self.role });
        }
        if self.body.min_parts() > MAX_BODY_PARTS {
            return Err(ConfigError::BodyTooLong {
                role: self.role,
                parts: self.body.min_parts(),
                max: MAX_BODY_PARTS,
            });
        }
        Ok(())
    }
}

/// Every role's descriptor, resolved once at boot.
#[derive(Clone, Debug)]
pub struct RoleRegistry {
    /// Priority lists, index 0 is tier 1.
    tiers: Vec<Vec<WorkforceDescriptor>>,
    /// Roles spawned only through colony overrides.
    extras: Vec<WorkforceDescriptor>,
    behaviors: Vec<(Role, BehaviorFn)>,
}

impl RoleRegistry {
    pub fn new(tiers: Vec<Vec<WorkforceDescriptor>>, extras: Vec<WorkforceDescriptor>) -> Self {
        RoleRegistry {
            tiers,
            extras,
            behaviors: Vec::new(),
        }
    }

    /// Attach the behavior run for every worker of `role` during dispatch.
    pub fn set_behavior(&mut self, role: Role, behavior: BehaviorFn) {
        self.behaviors.retain(|(r, _)| *r != role);
        self.behaviors.push((role, behavior));
    }

    pub fn behavior(&self, role: Role) -> Option<BehaviorFn> {
        self.behaviors
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, b)| *b)
    }

    pub fn tier_list(&self, tier: u8) -> &[WorkforceDescriptor] {
        let index = tier.clamp(MIN_TIER, MAX_TIER) as usize - 1;
        self.tiers.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The standard descriptor for `role`: the highest tier that lists it,
    /// then the override-only extras.
    pub fn standard(&self, role: Role) -> Option<&WorkforceDescriptor> {
        self.tiers
            .iter()
            .rev()
            .flat_map(|list| list.iter())
            .chain(self.extras.iter())
            .find(|d| d.role == role)
    }

    /// Tier list for `tier` with the colony's overrides appended.
    pub fn priority_list(
        &self,
        tier: u8,
        colony: &str,
        config: &OverseerConfig,
    ) -> Vec<WorkforceDescriptor> {
        let mut list = self.tier_list(tier).to_vec();
        for entry in config.overrides_for(colony) {
            if let Some(base) = self.standard(entry.role) {
                let mut descriptor = base.clone();
                descriptor.required = false;
                descriptor.force = entry.force;
                if let Some(quota) = entry.quota {
                    descriptor.quota = Quota::Limited(quota);
                }
                if entry.target_colony.is_some() {
                    descriptor.target_colony = entry.target_colony.clone();
                }
                list.push(descriptor);
            }
        }
        list
    }

    /// Refuse any registry or override set that would leave scheduling
    /// behavior undefined.
    pub fn validate(&self, config: &OverseerConfig) -> Result<(), ConfigError> {
        for tier in MIN_TIER..=MAX_TIER {
            let list = match self.tiers.get(tier as usize - 1) {
                Some(list) => list,
                None => return Err(ConfigError::MissingTier { tier }),
            };
            for (i, descriptor) in list.iter().enumerate() {
                if list[..i].iter().any(|d| d.role == descriptor.role) {
                    return Err(ConfigError::DuplicateRole {
                        role: descriptor.role,
                        tier,
                    });
                }
                descriptor.validate()?;
            }
        }

        for (colony, entries) in &config.colony_overrides {
            for entry in entries {
                let base = self
                    .standard(entry.role)
                    .ok_or_else(|| ConfigError::UnknownOverrideRole {
                        colony: colony.clone(),
                        role: entry.role,
                    })?;
                let mut descriptor = base.clone();
                if entry.target_colony.is_some() {
                    descriptor.target_colony = entry.target_colony.clone();
                }
                descriptor.validate()?;
            }
        }

        for descriptor in &self.extras {
            descriptor.validate_body()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverrideEntry;

    #[test]
    fn role_names_match_their_serialized_form() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role));
        }
    }

    #[test]
    fn repeating_body_scales_with_capacity() {
        let def = BodyDefinition::repeating(&[Part::Move], &[Part::Work, Part::Carry], 10);
        assert_eq!(def.create_body(200), Some(vec![Part::Move, Part::Work, Part::Carry]));
        assert_eq!(def.create_body(500).map(|b| b.len()), Some(7));
        assert_eq!(def.create_body(100), None);
    }

    #[test]
    fn standard_registry_is_valid() {
        roles::standard_registry()
            .validate(&OverseerConfig::default())
            .unwrap();
    }

    #[test]
    fn empty_body_refuses_to_boot() {
        let mut tiers = roles::standard_registry().tiers;
        tiers[0].push(WorkforceDescriptor::new(
            Role::Pioneer,
            BodyDefinition::fixed(&[]),
            Quota::Unbounded,
            |_, _| true,
        ));
        let registry = RoleRegistry::new(tiers, Vec::new());
        assert!(matches!(
            registry.validate(&OverseerConfig::default()),
            Err(ConfigError::EmptyBody { role: Role::Pioneer })
        ));
    }

    #[test]
    fn oversized_extra_body_refuses_to_boot() {
        let tiers = roles::standard_registry().tiers;
        let extras = vec![WorkforceDescriptor::new(
            Role::Pioneer,
            BodyDefinition::fixed(&[Part::Move; 51]),
            Quota::Unbounded,
            |_, _| true,
        )];
        let registry = RoleRegistry::new(tiers, extras);
        assert!(matches!(
            registry.validate(&OverseerConfig::default()),
            Err(ConfigError::BodyTooLong {
                role: Role::Pioneer,
                parts: 51,
                max: 50
            })
        ));
    }

    #[test]
    fn missing_tier_refuses_to_boot() {
        let mut tiers = roles::standard_registry().tiers;
        tiers.truncate(5);
        let registry = RoleRegistry::new(tiers, Vec::new());
        assert!(matches!(
            registry.validate(&OverseerConfig::default()),
            Err(ConfigError::MissingTier { tier: 6 })
        ));
    }

    #[test]
    fn claimer_override_needs_a_target() {
        let registry = roles::standard_registry();
        let mut config = OverseerConfig::default();
        config.colony_overrides.insert(
            "W1N1".into(),
            vec![OverrideEntry {
                role: Role::Claimer,
                quota: Some(1),
                force: true,
                target_colony: None,
            }],
        );
        assert!(matches!(
            registry.validate(&config),
            Err(ConfigError::MissingMemory {
                role: Role::Claimer,
                key: MemoryKey::TargetColony
            })
        ));

        config.colony_overrides.get_mut("W1N1").unwrap()[0].target_colony = Some("W2N1".into());
        registry.validate(&config).unwrap();
        let list = registry.priority_list(1, "W1N1", &config);
        let last = list.last().unwrap();
        assert_eq!(last.role, Role::Claimer);
        assert_eq!(last.quota, Quota::Limited(1));
        assert!(last.force);
    }
}
