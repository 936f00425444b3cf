pub const ROOM_WIDTH: u8 = 50;
pub const ROOM_HEIGHT: u8 = 50;

pub const MIN_TIER: u8 = 1;
pub const MAX_TIER: u8 = 8;

/// Consecutive ticks hostiles must stay present before a colony is
/// considered under sustained presence.
pub const SUSTAINED_PRESENCE_TICKS: u32 = 100;

/// Hard cap on body length imposed by the host.
pub const MAX_BODY_PARTS: usize = 50;

/// Version stamped into every persisted layout record. A record with a
/// different version is discarded and recomputed.
pub const LAYOUT_VERSION: u32 = 1;

use screeps::constants::StructureType;

/// Maximum number of a given structure type allowed at a given controller tier.
/// Returns 0 if the structure is not available at that tier.
///
/// Container and Road have no per-tier limits. Rampart and Wall share the
/// same limits.
pub fn max_structures_at_tier(structure_type: StructureType, tier: u8) -> u32 {
    match structure_type {
        StructureType::Spawn => match tier {
            0 => 0,
            1..=6 => 1,
            7 => 2,
            _ => 3,
        },
        StructureType::Extension => match tier {
            0 | 1 => 0,
            2 => 5,
            3 => 10,
            4 => 20,
            5 => 30,
            6 => 40,
            7 => 50,
            _ => 60,
        },
        StructureType::Link => match tier {
            0..=4 => 0,
            5 => 2,
            6 => 3,
            7 => 4,
            _ => 6,
        },
        StructureType::Storage => match tier {
            0..=3 => 0,
            _ => 1,
        },
        StructureType::Tower => match tier {
            0..=2 => 0,
            3..=4 => 1,
            5..=6 => 2,
            7 => 3,
            _ => 6,
        },
        StructureType::Rampart | StructureType::Wall => match tier {
            0 | 1 => 0,
            _ => 2500,
        },
        StructureType::Road | StructureType::Container => 2500,
        _ => 0,
    }
}

/// Minimum tier at which the Nth structure of a given type can be built.
/// `count` is 1-based. Returns 9 (never) if the count exceeds the tier-8 limit.
pub fn min_tier_for_nth(structure_type: StructureType, count: u32) -> u8 {
    if count == 0 {
        return 0;
    }
    for tier in MIN_TIER..=MAX_TIER {
        if max_structures_at_tier(structure_type, tier) >= count {
            return tier;
        }
    }
    MAX_TIER + 1
}
