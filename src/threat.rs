//! Threat scan: nearest hostile per capability class, plus a counter of how
//! long hostiles have stayed.

use crate::constants::SUSTAINED_PRESENCE_TICKS;
use crate::location::Location;
use crate::world::{EntityId, HostileInfo};
use bitflags::bitflags;
use log::*;
use screeps::Part;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const HEAL = 1;
        const RANGED_ATTACK = 2;
        const ATTACK = 4;
        const WORK = 8;
        const CLAIM = 16;
    }
}

impl Capabilities {
    pub fn from_body(body: &[Part]) -> Capabilities {
        body.iter().fold(Capabilities::empty(), |caps, part| {
            caps | match part {
                Part::Heal => Capabilities::HEAL,
                Part::RangedAttack => Capabilities::RANGED_ATTACK,
                Part::Attack => Capabilities::ATTACK,
                Part::Work => Capabilities::WORK,
                Part::Claim => Capabilities::CLAIM,
                _ => Capabilities::empty(),
            }
        })
    }
}

/// Priority classes, most urgent first. Every hostile lands in the first
/// class its capabilities match; `Other` catches the rest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreatClass {
    Healer,
    Ranged,
    Melee,
    Dismantler,
    Claimer,
    Other,
}

impl ThreatClass {
    pub const ALL: [ThreatClass; 6] = [
        ThreatClass::Healer,
        ThreatClass::Ranged,
        ThreatClass::Melee,
        ThreatClass::Dismantler,
        ThreatClass::Claimer,
        ThreatClass::Other,
    ];

    fn capability(self) -> Capabilities {
        match self {
            ThreatClass::Healer => Capabilities::HEAL,
            ThreatClass::Ranged => Capabilities::RANGED_ATTACK,
            ThreatClass::Melee => Capabilities::ATTACK,
            ThreatClass::Dismantler => Capabilities::WORK,
            ThreatClass::Claimer => Capabilities::CLAIM,
            ThreatClass::Other => Capabilities::all(),
        }
    }

    pub fn classify(capabilities: Capabilities) -> ThreatClass {
        ThreatClass::ALL
            .iter()
            .copied()
            .find(|c| *c == ThreatClass::Other || capabilities.intersects(c.capability()))
            .unwrap_or(ThreatClass::Other)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Threat {
    pub id: EntityId,
    pub location: Location,
    pub distance: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreatTable {
    /// Nearest hostile per class, indexed by `ThreatClass as usize`.
    nearest: [Option<Threat>; 6],
    /// Consecutive ticks with at least one hostile present.
    pub presence_ticks: u32,
    pub sustained: bool,
}

impl ThreatTable {
    /// Restore the persisted presence counter after a restart.
    pub fn with_presence(presence_ticks: u32) -> ThreatTable {
        ThreatTable {
            presence_ticks,
            sustained: presence_ticks >= SUSTAINED_PRESENCE_TICKS,
            ..Default::default()
        }
    }

    /// Classify this tick's hostiles. Returns true on the tick sustained
    /// presence begins.
    pub fn scan(&mut self, colony: &str, nerve_center: Location, hostiles: &[HostileInfo]) -> bool {
        self.nearest = Default::default();

        if hostiles.is_empty() {
            if self.presence_ticks > 0 {
                debug!("{}: hostiles gone after {} ticks", colony, self.presence_ticks);
            }
            self.presence_ticks = 0;
            self.sustained = false;
            return false;
        }

        for hostile in hostiles {
            let class = ThreatClass::classify(Capabilities::from_body(&hostile.body));
            let distance = hostile.location.manhattan_distance_to(nerve_center);
            let slot = &mut self.nearest[class as usize];
            let closer = slot.as_ref().map(|t| distance < t.distance).unwrap_or(true);
            if closer {
                *slot = Some(Threat {
                    id: hostile.id.clone(),
                    location: hostile.location,
                    distance,
                });
            }
        }

        self.presence_ticks = self.presence_ticks.saturating_add(1);
        if self.presence_ticks == SUSTAINED_PRESENCE_TICKS {
            warn!("{}: hostiles present for {} ticks", colony, self.presence_ticks);
            self.sustained = true;
            return true;
        }
        false
    }

    pub fn nearest(&self, class: ThreatClass) -> Option<&Threat> {
        self.nearest[class as usize].as_ref()
    }

    /// Every class's nearest hostile, most urgent class first.
    pub fn threats(&self) -> Vec<(ThreatClass, Threat)> {
        ThreatClass::ALL
            .iter()
            .filter_map(|c| self.nearest(*c).map(|t| (*c, t.clone())))
            .collect()
    }

    /// Target for defensive structures: the nearest hostile of the most
    /// urgent non-empty class.
    pub fn primary_target(&self) -> Option<&Threat> {
        self.nearest.iter().flatten().next()
    }

    pub fn any(&self) -> bool {
        self.nearest.iter().any(|t| t.is_some())
    }

    pub fn sustained(&self) -> bool {
        self.sustained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hostile(id: &str, x: u8, y: u8, body: Vec<Part>) -> HostileInfo {
        HostileInfo {
            id: EntityId::new(id),
            location: Location::from_xy(x, y),
            body,
        }
    }

    #[test]
    fn first_matching_class_wins() {
        assert_eq!(
            ThreatClass::classify(Capabilities::from_body(&[Part::Attack, Part::Heal])),
            ThreatClass::Healer
        );
        assert_eq!(
            ThreatClass::classify(Capabilities::from_body(&[Part::Work, Part::Move])),
            ThreatClass::Dismantler
        );
        assert_eq!(
            ThreatClass::classify(Capabilities::from_body(&[Part::Move, Part::Carry])),
            ThreatClass::Other
        );
    }

    #[test]
    fn classes_encode_as_kebab_case() {
        assert_eq!(serde_json::to_string(&ThreatClass::Dismantler).unwrap(), "\"dismantler\"");
        let decoded: ThreatClass = serde_json::from_str("\"claimer\"").unwrap();
        assert_eq!(decoded, ThreatClass::Claimer);
    }

    #[test]
    fn keeps_nearest_per_class_by_manhattan_distance() {
        let mut table = ThreatTable::default();
        let center = Location::from_xy(25, 25);
        table.scan(
            "W1N1",
            center,
            &[
                hostile("far", 30, 30, vec![Part::Attack]),
                hostile("near", 27, 28, vec![Part::Attack]),
                hostile("scout", 40, 40, vec![Part::Move]),
            ],
        );

        let melee = table.nearest(ThreatClass::Melee).unwrap();
        assert_eq!(melee.id, EntityId::new("near"));
        assert_eq!(melee.distance, 5);
        assert_eq!(table.primary_target().unwrap().id, EntityId::new("near"));
        assert_eq!(table.threats().len(), 2);
    }

    #[test]
    fn sustained_flag_set_exactly_on_the_hundredth_tick() {
        let mut table = ThreatTable::default();
        let center = Location::from_xy(25, 25);
        let present = [hostile("h", 10, 10, vec![Part::Attack])];

        for _ in 0..99 {
            assert!(!table.scan("W1N1", center, &present));
            assert!(!table.sustained());
        }
        assert!(table.scan("W1N1", center, &present));
        assert!(table.sustained());
        assert!(!table.scan("W1N1", center, &present));
        assert!(table.sustained());
    }

    #[test]
    fn absence_resets_presence() {
        let mut table = ThreatTable::default();
        let center = Location::from_xy(25, 25);
        let present = [hostile("h", 10, 10, vec![Part::Attack])];
        for _ in 0..99 {
            table.scan("W1N1", center, &present);
        }

        table.scan("W1N1", center, &[]);

        assert_eq!(table.presence_ticks, 0);
        assert!(!table.sustained());
        assert!(!table.any());
    }
}
