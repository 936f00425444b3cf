use crate::constants::*;
use crate::location::*;
use bitflags::bitflags;
use std::collections::VecDeque;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TerrainFlags: u8 {
        const WALL = 1;
        const SWAMP = 2;
    }
}

const ROOM_AREA: usize = (ROOM_WIDTH as usize) * (ROOM_HEIGHT as usize);

/// Room terrain in the host's packed row-major byte layout.
#[derive(Clone)]
pub struct FastRoomTerrain {
    buffer: Vec<u8>,
}

impl FastRoomTerrain {
    /// Wrap a raw host terrain buffer, 2500 bytes row-major.
    pub fn new(buffer: Vec<u8>) -> FastRoomTerrain {
        FastRoomTerrain { buffer }
    }

    /// An all-plains room.
    pub fn plains() -> FastRoomTerrain {
        FastRoomTerrain {
            buffer: vec![0; ROOM_AREA],
        }
    }

    /// An all-plains room whose outermost ring is wall (no exits).
    pub fn enclosed() -> FastRoomTerrain {
        let mut terrain = Self::plains();
        for i in 0..ROOM_WIDTH {
            terrain.set_xy(i, 0, TerrainFlags::WALL);
            terrain.set_xy(i, ROOM_HEIGHT - 1, TerrainFlags::WALL);
            terrain.set_xy(0, i, TerrainFlags::WALL);
            terrain.set_xy(ROOM_WIDTH - 1, i, TerrainFlags::WALL);
        }
        terrain
    }

    pub fn set_xy(&mut self, x: u8, y: u8, flags: TerrainFlags) {
        let index = (y as usize * ROOM_WIDTH as usize) + (x as usize);
        if let Some(cell) = self.buffer.get_mut(index) {
            *cell = flags.bits();
        }
    }

    pub fn get_xy(&self, x: u8, y: u8) -> TerrainFlags {
        let index = (y as usize * ROOM_WIDTH as usize) + (x as usize);
        self.buffer
            .get(index)
            .map(|b| TerrainFlags::from_bits_truncate(*b))
            .unwrap_or(TerrainFlags::WALL)
    }

    pub fn is_wall(&self, x: u8, y: u8) -> bool {
        self.get_xy(x, y).contains(TerrainFlags::WALL)
    }

    pub fn is_wall_at(&self, loc: Location) -> bool {
        self.is_wall(loc.x(), loc.y())
    }

    pub fn is_swamp_at(&self, loc: Location) -> bool {
        self.get_xy(loc.x(), loc.y()).contains(TerrainFlags::SWAMP)
    }

    /// All passable exit tiles (room border tiles that are not walls).
    pub fn get_exits(&self) -> Vec<Location> {
        let mut exits = Vec::new();
        for x in 0..ROOM_WIDTH {
            if !self.is_wall(x, 0) {
                exits.push(Location::from_xy(x, 0));
            }
        }
        for y in 1..ROOM_HEIGHT - 1 {
            if !self.is_wall(ROOM_WIDTH - 1, y) {
                exits.push(Location::from_xy(ROOM_WIDTH - 1, y));
            }
        }
        for x in 0..ROOM_WIDTH {
            if !self.is_wall(x, ROOM_HEIGHT - 1) {
                exits.push(Location::from_xy(x, ROOM_HEIGHT - 1));
            }
        }
        for y in 1..ROOM_HEIGHT - 1 {
            if !self.is_wall(0, y) {
                exits.push(Location::from_xy(0, y));
            }
        }
        exits
    }
}

/// A 50x50 array for room-sized data.
#[derive(Clone)]
pub struct RoomDataArray<T: Copy> {
    data: Vec<T>,
}

impl<T: Copy> RoomDataArray<T> {
    pub fn new(initial: T) -> Self {
        RoomDataArray {
            data: vec![initial; ROOM_AREA],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        let index = y * (ROOM_WIDTH as usize) + x;
        &self.data[index]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        let index = y * (ROOM_WIDTH as usize) + x;
        &mut self.data[index]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        *self.get_mut(x, y) = value;
    }

    #[inline]
    pub fn at(&self, loc: Location) -> T {
        *self.get(loc.x() as usize, loc.y() as usize)
    }
}

/// BFS walking distance from a set of seed locations, respecting terrain walls.
/// Returns the distance map and the maximum distance reached.
pub fn flood_fill_distance(
    terrain: &FastRoomTerrain,
    seeds: &[Location],
) -> (RoomDataArray<Option<u32>>, u32) {
    let mut data: RoomDataArray<Option<u32>> = RoomDataArray::new(None);
    let mut queue = VecDeque::new();

    for seed in seeds {
        data.set(seed.x() as usize, seed.y() as usize, Some(0));
        queue.push_back((*seed, 0u32));
    }

    let mut max_distance = 0u32;

    while let Some((loc, dist)) = queue.pop_front() {
        let next_dist = dist + 1;
        for next in loc.neighbors() {
            let (ux, uy) = (next.x() as usize, next.y() as usize);
            if data.get(ux, uy).is_none() && !terrain.is_wall_at(next) {
                data.set(ux, uy, Some(next_dist));
                max_distance = max_distance.max(next_dist);
                queue.push_back((next, next_dist));
            }
        }
    }

    (data, max_distance)
}

/// Walking distance from `origin` to a resource tile. Resources sit on
/// impassable tiles, so the distance is taken to the best walkable neighbour
/// plus the final step.
pub fn walking_distance_to_feature(
    distances: &RoomDataArray<Option<u32>>,
    feature: Location,
) -> Option<u32> {
    feature
        .neighbors()
        .filter_map(|n| distances.at(n))
        .min()
        .map(|d| d + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_fill_routes_around_walls() {
        let mut terrain = FastRoomTerrain::enclosed();
        for y in 1..48 {
            terrain.set_xy(10, y, TerrainFlags::WALL);
        }
        let (dist, _) = flood_fill_distance(&terrain, &[Location::from_xy(5, 5)]);

        assert_eq!(dist.at(Location::from_xy(9, 5)), Some(4));
        // Must go around the wall via y = 48.
        assert_eq!(dist.at(Location::from_xy(11, 5)), Some(43 + 1 + 42));
        assert_eq!(dist.at(Location::from_xy(10, 5)), None);
    }

    #[test]
    fn enclosed_room_has_no_exits() {
        assert!(FastRoomTerrain::enclosed().get_exits().is_empty());
        assert_eq!(FastRoomTerrain::plains().get_exits().len(), 196);
    }
}
