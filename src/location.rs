use crate::constants::*;
use serde::*;
use std::fmt;

/// Neighbor offsets for 8-directional movement.
pub const NEIGHBORS_8: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
];

/// A tile inside a single 50x50 room, packed into 16 bits.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Location {
    packed: u16,
}

impl Location {
    pub fn from_coords(x: u32, y: u32) -> Self {
        Location {
            packed: ((x << 8) | y) as u16,
        }
    }

    pub fn from_xy(x: u8, y: u8) -> Self {
        Self::from_coords(x as u32, y as u32)
    }

    #[inline]
    pub fn x(self) -> u8 {
        ((self.packed >> 8) & 0xFF) as u8
    }

    #[inline]
    pub fn y(self) -> u8 {
        (self.packed & 0xFF) as u8
    }

    #[inline]
    pub fn packed_repr(self) -> u16 {
        self.packed
    }

    #[inline]
    pub fn from_packed(packed: u16) -> Self {
        Location { packed }
    }

    /// Chebyshev distance, the number of moves between two tiles.
    pub fn distance_to(self, other: Self) -> u8 {
        let dx = (self.x() as i16) - (other.x() as i16);
        let dy = (self.y() as i16) - (other.y() as i16);

        dx.abs().max(dy.abs()) as u8
    }

    /// Manhattan distance, used for threat proximity ranking.
    pub fn manhattan_distance_to(self, other: Self) -> u32 {
        let dx = (self.x() as i32) - (other.x() as i32);
        let dy = (self.y() as i32) - (other.y() as i32);

        (dx.abs() + dy.abs()) as u32
    }

    /// Offset by (dx, dy), returning `None` outside the room.
    pub fn checked_add(self, dx: i8, dy: i8) -> Option<Location> {
        let x = self.x() as i16 + dx as i16;
        let y = self.y() as i16 + dy as i16;
        if (0..ROOM_WIDTH as i16).contains(&x) && (0..ROOM_HEIGHT as i16).contains(&y) {
            Some(Location::from_xy(x as u8, y as u8))
        } else {
            None
        }
    }

    pub fn neighbors(self) -> impl Iterator<Item = Location> {
        NEIGHBORS_8
            .iter()
            .filter_map(move |&(dx, dy)| self.checked_add(dx, dy))
    }

    /// True for tiles a structure may occupy (outside the exit border).
    pub fn is_buildable(self) -> bool {
        let (x, y) = (self.x(), self.y());
        x >= 1 && y >= 1 && x < ROOM_WIDTH - 1 && y < ROOM_HEIGHT - 1
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x(), self.y())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x(), self.y())
    }
}

impl Serialize for Location {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.packed_repr().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        u16::deserialize(deserializer).map(Location::from_packed)
    }
}
