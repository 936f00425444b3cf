//! Standard per-tier priority lists.

use super::*;
use crate::constants::MAX_TIER;
use log::*;

fn claim_slot(colony: &mut ColonyState, name: &str, memory: &mut WorkerMemory) {
    if let Some(tier) = memory.role.slot_tier() {
        if colony.slots.assign_least_loaded(tier, name, memory).is_none() {
            warn!("{}: no free {:?} slot for newborn {}", colony.key, tier, name);
        }
    }
}

fn basic_harvest_eligible(colony: &ColonyState, count: u32) -> bool {
    let open = colony.slots.basic.capacity() > count as usize;
    // A colony with no miners at all still needs someone to bootstrap it.
    let bootstrap = count == 0 && !colony.slots.drop.has_active() && !colony.slots.link.has_active();
    open || bootstrap
}

fn drop_miner_eligible(colony: &ColonyState, count: u32) -> bool {
    colony.slots.drop.capacity() > count as usize
}

fn link_miner_eligible(colony: &ColonyState, count: u32) -> bool {
    colony.slots.link.capacity() > count as usize
}

fn priority_upgrader_eligible(colony: &ColonyState, count: u32) -> bool {
    colony.slots.priority_upgrade.capacity() > count as usize
}

fn hauler_eligible(colony: &ColonyState, _count: u32) -> bool {
    colony.slots.drop.has_active()
}

fn filler_eligible(colony: &ColonyState, _count: u32) -> bool {
    colony.structures.storage.is_some()
}

fn builder_eligible(colony: &ColonyState, _count: u32) -> bool {
    colony.construction.has_focus()
}

fn repairer_eligible(colony: &ColonyState, _count: u32) -> bool {
    colony.low_health_target.is_some()
}

fn defender_eligible(colony: &ColonyState, _count: u32) -> bool {
    colony.threats.sustained()
}

fn always(_colony: &ColonyState, _count: u32) -> bool {
    true
}

fn standard_tier(tier: u8) -> Vec<WorkforceDescriptor> {
    use screeps::Part::*;

    let mut list = Vec::new();

    let harvester_body = if tier == 1 {
        BodyDefinition::fixed(&[Work, Carry, Move, Move])
    } else {
        BodyDefinition::repeating(&[], &[Work, Carry, Move, Move], 3)
    };
    list.push(
        WorkforceDescriptor::new(Role::BasicHarvest, harvester_body, Quota::Unbounded, basic_harvest_eligible)
            .required()
            .with_birth_hook(claim_slot),
    );

    if tier >= 2 {
        list.push(
            WorkforceDescriptor::new(
                Role::DropMiner,
                BodyDefinition::repeating(&[Move], &[Work], 5),
                Quota::Unbounded,
                drop_miner_eligible,
            )
            .with_birth_hook(claim_slot),
        );
    }

    // Priority-upgrade claims hold from tier 1.
    list.push(
        WorkforceDescriptor::new(
            Role::PriorityUpgrader,
            BodyDefinition::repeating(&[Carry, Move], &[Work], 6),
            Quota::Unbounded,
            priority_upgrader_eligible,
        )
        .with_birth_hook(claim_slot),
    );

    if tier >= 5 {
        list.push(
            WorkforceDescriptor::new(
                Role::LinkMiner,
                BodyDefinition::repeating(&[Carry, Move], &[Work], 6),
                Quota::Unbounded,
                link_miner_eligible,
            )
            .with_birth_hook(claim_slot),
        );
    }

    if tier >= 2 {
        list.push(WorkforceDescriptor::new(
            Role::Hauler,
            BodyDefinition::repeating(&[], &[Carry, Carry, Move], 8),
            Quota::Limited(2),
            hauler_eligible,
        ));
    }

    if tier >= 4 {
        list.push(WorkforceDescriptor::new(
            Role::Filler,
            BodyDefinition::repeating(&[], &[Carry, Carry, Move], 6),
            Quota::Limited(1),
            filler_eligible,
        ));
    }

    if tier >= 3 {
        list.push(WorkforceDescriptor::new(
            Role::Defender,
            BodyDefinition::repeating(&[], &[Attack, Move], 10),
            Quota::Limited(2),
            defender_eligible,
        ));
    }

    list.push(WorkforceDescriptor::new(
        Role::Builder,
        if tier == 1 {
            BodyDefinition::fixed(&[Work, Carry, Move, Move])
        } else {
            BodyDefinition::repeating(&[], &[Work, Carry, Move, Move], 4)
        },
        Quota::Limited(if tier == 1 { 1 } else { 2 }),
        builder_eligible,
    ));

    if tier >= 3 {
        list.push(WorkforceDescriptor::new(
            Role::Repairer,
            BodyDefinition::repeating(&[], &[Work, Carry, Move, Move], 3),
            Quota::Limited(1),
            repairer_eligible,
        ));
    }

    list.push(WorkforceDescriptor::new(
        Role::Upgrader,
        if tier == 1 {
            BodyDefinition::fixed(&[Work, Carry, Move, Move])
        } else {
            BodyDefinition::repeating(&[], &[Work, Carry, Move, Move], 5)
        },
        Quota::Limited(match tier {
            1 => 1,
            2..=4 => 2,
            5..=7 => 3,
            _ => 1,
        }),
        always,
    ));

    list
}

/// Roles that only ever spawn through a colony override.
fn override_only() -> Vec<WorkforceDescriptor> {
    use screeps::Part::*;

    vec![
        WorkforceDescriptor::new(
            Role::Claimer,
            BodyDefinition::fixed(&[Claim, Move]),
            Quota::Limited(1),
            always,
        )
        .with_required_memory(MemoryKey::TargetColony),
        WorkforceDescriptor::new(
            Role::Pioneer,
            BodyDefinition::repeating(&[], &[Work, Carry, Move, Move], 4),
            Quota::Limited(2),
            always,
        )
        .with_required_memory(MemoryKey::TargetColony),
    ]
}

pub fn standard_registry() -> RoleRegistry {
    RoleRegistry::new((1..=MAX_TIER).map(standard_tier).collect(), override_only())
}
