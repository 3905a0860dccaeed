//! Triangle adjacency over shared edges
//!
//! Slot `3 * t + k` holds the triangle sharing edge `(v[k], v[(k + 1) % 3])`
//! with triangle `t`, or [`NO_NEIGHBOR`]. Only edges owned by exactly two
//! triangles produce neighbours. Boundary edges have one owner; edges with
//! more owners are non-manifold and are dropped, but counted in the report.

use crate::error::{EngineError, EngineResult};
use rustc_hash::FxHashMap;

/// Sentinel for "no neighbour across this edge"
pub const NO_NEIGHBOR: u32 = u32::MAX;

/// Edge statistics gathered while building the graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdjacencyReport {
    /// Edges with exactly two owners
    pub shared_edges: u32,
    /// Edges with a single owner
    pub boundary_edges: u32,
    /// Edges with more than two owners
    pub non_manifold_edges: u32,
    /// Triangle-edge slots left empty because their edge was non-manifold
    pub dropped_adjacencies: u32,
}

#[derive(Debug, Clone)]
pub struct AdjacencyGraph {
    pub neighbors: Vec<u32>,
    pub report: AdjacencyReport,
}

impl AdjacencyGraph {
    pub fn triangle_count(&self) -> usize {
        self.neighbors.len() / 3
    }

    /// Valid neighbours of `triangle`, in edge order
    pub fn neighbors_of(&self, triangle: u32) -> impl Iterator<Item = u32> + '_ {
        let base = triangle as usize * 3;
        self.neighbors[base..base + 3]
            .iter()
            .copied()
            .filter(|&n| n != NO_NEIGHBOR)
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgeOwners {
    /// (triangle, edge slot) of the first two distinct owners
    first: (u32, u32),
    second: Option<(u32, u32)>,
    count: u32,
}

#[inline]
fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Build the edge-adjacency graph of a triangle list
pub fn build_adjacency(indices: &[u32]) -> EngineResult<AdjacencyGraph> {
    if indices.len() % 3 != 0 {
        return Err(EngineError::InvalidMesh(format!(
            "index count {} is not a multiple of 3",
            indices.len()
        )));
    }

    let triangle_count = indices.len() / 3;
    let mut edges: FxHashMap<(u32, u32), EdgeOwners> = FxHashMap::default();
    edges.reserve(triangle_count * 3 / 2 + 1);

    for (triangle, tri) in indices.chunks_exact(3).enumerate() {
        let triangle = triangle as u32;
        for slot in 0..3u32 {
            let a = tri[slot as usize];
            let b = tri[((slot + 1) % 3) as usize];
            if a == b {
                continue;
            }

            edges
                .entry(edge_key(a, b))
                .and_modify(|owners| {
                    // A triangle repeating one of its own edges is not a neighbour of itself
                    if owners.first.0 == triangle
                        || owners.second.map_or(false, |s| s.0 == triangle)
                    {
                        return;
                    }
                    if owners.second.is_none() {
                        owners.second = Some((triangle, slot));
                    }
                    owners.count += 1;
                })
                .or_insert(EdgeOwners {
                    first: (triangle, slot),
                    second: None,
                    count: 1,
                });
        }
    }

    let mut neighbors = vec![NO_NEIGHBOR; triangle_count * 3];
    let mut report = AdjacencyReport::default();

    for owners in edges.values() {
        match (owners.count, owners.second) {
            (1, _) => report.boundary_edges += 1,
            (2, Some(second)) => {
                let first = owners.first;
                neighbors[(first.0 * 3 + first.1) as usize] = second.0;
                neighbors[(second.0 * 3 + second.1) as usize] = first.0;
                report.shared_edges += 1;
            }
            _ => {
                report.non_manifold_edges += 1;
                report.dropped_adjacencies += owners.count;
            }
        }
    }

    if report.non_manifold_edges > 0 {
        log::warn!(
            "[build_adjacency] {} non-manifold edges dropped ({} triangle edges left without neighbours)",
            report.non_manifold_edges,
            report.dropped_adjacencies
        );
    }

    log::debug!(
        "[build_adjacency] {} triangles: {} shared, {} boundary, {} non-manifold edges",
        triangle_count,
        report.shared_edges,
        report.boundary_edges,
        report.non_manifold_edges
    );

    Ok(AdjacencyGraph { neighbors, report })
}
