//! Fortification ring: the smallest set of tiles separating every room exit
//! from the colony core, found with max-flow min-cut.
//!
//! Each passable tile becomes two nodes (in, out) joined by a capacity-1
//! edge; cutting that edge means fortifying the tile. Protected and border
//! tiles get an uncuttable edge instead. Adjacent tiles are
//! joined out→in with infinite capacity, a virtual source feeds every exit
//! and every protected tile drains into a virtual sink.

use super::*;
use fnv::FnvHashSet;
use rs_graph::builder::Builder;
use rs_graph::maxflow::dinic;
use rs_graph::traits::*;
use rs_graph::Net;

/// Infinite capacity sentinel for edges that must never be cut.
const INF_CAP: u32 = 50 * 50 + 1;

pub fn fortification_ring(layout: &ColonyLayout, terrain: &FastRoomTerrain, radius: u8) -> Vec<Location> {
    let protected = protected_region(layout, terrain, radius);
    let exits: FnvHashSet<Location> = terrain.get_exits().into_iter().collect();
    if exits.is_empty() {
        return Vec::new();
    }
    compute_min_cut(&protected, &exits, terrain)
}

/// The nerve center out to `radius`, plus every planned non-road structure.
fn protected_region(layout: &ColonyLayout, terrain: &FastRoomTerrain, radius: u8) -> FnvHashSet<Location> {
    let mut protected = FnvHashSet::default();
    let r = radius as i8;
    for dy in -r..=r {
        for dx in -r..=r {
            if let Some(loc) = layout.nerve_center.checked_add(dx, dy) {
                if !terrain.is_wall_at(loc) {
                    protected.insert(loc);
                }
            }
        }
    }
    protected.extend(
        layout
            .template
            .value
            .iter()
            .filter(|p| p.structure_type != StructureType::Road)
            .map(|p| p.location),
    );
    protected
}

fn compute_min_cut(
    protected: &FnvHashSet<Location>,
    exits: &FnvHashSet<Location>,
    terrain: &FastRoomTerrain,
) -> Vec<Location> {
    let mut tile_index: [[Option<usize>; 50]; 50] = [[None; 50]; 50];
    let mut tile_coords: Vec<Location> = Vec::new();

    for y in 0..ROOM_HEIGHT {
        for x in 0..ROOM_WIDTH {
            if !terrain.is_wall(x, y) {
                tile_index[x as usize][y as usize] = Some(tile_coords.len());
                tile_coords.push(Location::from_xy(x, y));
            }
        }
    }

    let num_tiles = tile_coords.len();
    if num_tiles == 0 {
        return Vec::new();
    }

    // Node layout: in-nodes, out-nodes, source, sink.
    let num_nodes = 2 * num_tiles + 2;
    let source_idx = 2 * num_tiles;
    let sink_idx = 2 * num_tiles + 1;
    let edge_estimate = 9 * num_tiles + exits.len() + protected.len();

    let mut builder =
        <Net as rs_graph::builder::Buildable>::Builder::with_capacities(num_nodes, edge_estimate);
    let nodes: Vec<_> = (0..num_nodes).map(|_| builder.add_node()).collect();
    let mut capacities: Vec<u32> = Vec::with_capacity(edge_estimate);

    let add_edge = |b: &mut <Net as rs_graph::builder::Buildable>::Builder,
                    caps: &mut Vec<u32>,
                    u: usize,
                    v: usize,
                    cap: u32| {
        b.add_edge(nodes[u], nodes[v]);
        caps.push(cap);
    };

    // Protected and border tiles can never hold a fortification.
    for (i, loc) in tile_coords.iter().enumerate() {
        let cap = if protected.contains(loc) || !loc.is_buildable() {
            INF_CAP
        } else {
            1
        };
        add_edge(&mut builder, &mut capacities, i, num_tiles + i, cap);
    }

    for (i, loc) in tile_coords.iter().enumerate() {
        for next in loc.neighbors() {
            if let Some(j) = tile_index[next.x() as usize][next.y() as usize] {
                add_edge(&mut builder, &mut capacities, num_tiles + i, j, INF_CAP);
            }
        }
    }

    for exit in exits {
        if let Some(i) = tile_index[exit.x() as usize][exit.y() as usize] {
            add_edge(&mut builder, &mut capacities, source_idx, i, INF_CAP);
        }
    }

    for loc in protected {
        if let Some(i) = tile_index[loc.x() as usize][loc.y() as usize] {
            add_edge(&mut builder, &mut capacities, num_tiles + i, sink_idx, INF_CAP);
        }
    }

    let graph = builder.into_graph();
    let src = nodes[source_idx];
    let snk = nodes[sink_idx];

    let (_value, _flow, mincut_nodes) = dinic(&graph, src, snk, |e| capacities[graph.edge_id(e)]);

    // A tile is cut when its in-node is on the source side and its out-node
    // is not.
    let source_side: FnvHashSet<usize> = mincut_nodes.iter().map(|n| graph.node_id(*n)).collect();

    let mut ring: Vec<Location> = (0..num_tiles)
        .filter(|&i| {
            source_side.contains(&graph.node_id(nodes[i]))
                && !source_side.contains(&graph.node_id(nodes[num_tiles + i]))
        })
        .map(|i| tile_coords[i])
        .filter(|loc| loc.is_buildable())
        .collect();
    ring.sort();
    ring
}
