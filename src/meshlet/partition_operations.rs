//! Greedy meshlet partitioning
//!
//! Meshlets grow from a seed triangle across the adjacency graph. Candidates
//! are scored against the meshlet's running bounding sphere and normal axis
//! and the cheapest one is tried next. A candidate that does not fit is held
//! back and seeds a later meshlet, so every triangle is placed exactly once.

use super::meshlet_data::MeshletBuild;
use crate::config::ClusterConfig;
use crate::geometry::{compute_bounding_sphere, triangle_normal, AdjacencyGraph};
use bit_vec::BitVec;
use cgmath::{InnerSpace, Vector3};

/// Running estimate of the meshlet under construction
#[derive(Debug, Clone, Copy)]
struct RunningBounds {
    center: Vector3<f32>,
    radius_sq: f32,
    axis: Vector3<f32>,
}

impl Default for RunningBounds {
    fn default() -> Self {
        Self {
            center: Vector3::new(0.0, 0.0, 0.0),
            radius_sq: 0.0,
            axis: Vector3::new(0.0, 0.0, 0.0),
        }
    }
}

/// Partitioner working state
struct PartitionState {
    current: MeshletBuild,
    bounds: RunningBounds,
    /// Triangles already placed in a meshlet
    checklist: BitVec,
    /// Triangles sitting in `candidates` or `deferred`
    queued: BitVec,
    candidates: Vec<(u32, f32)>,
    deferred: Vec<u32>,
    cursor: usize,
}

#[inline]
fn triangle(indices: &[u32], t: u32) -> [u32; 3] {
    let base = t as usize * 3;
    [indices[base], indices[base + 1], indices[base + 2]]
}

/// Distinct vertices of a triangle in corner order
#[inline]
fn distinct_vertices(tri: [u32; 3]) -> impl Iterator<Item = (usize, u32)> {
    tri.into_iter()
        .enumerate()
        .filter(move |&(k, v)| !tri[..k].contains(&v))
}

/// Try to place triangle `t` into `meshlet`. Returns false when the vertex or
/// primitive budget would be exceeded, leaving the meshlet untouched.
pub fn add_to_meshlet(
    meshlet: &mut MeshletBuild,
    tri: [u32; 3],
    t: u32,
    config: &ClusterConfig,
) -> bool {
    if meshlet.triangles.len() as u32 >= config.max_triangles {
        return false;
    }

    let new_vertices = distinct_vertices(tri)
        .filter(|(_, v)| !meshlet.vertices.contains(v))
        .count() as u32;

    if meshlet.vertices.len() as u32 + new_vertices > config.max_vertices {
        return false;
    }

    for (_, v) in distinct_vertices(tri) {
        if !meshlet.vertices.contains(&v) {
            meshlet.vertices.push(v);
        }
    }
    meshlet.triangles.push(t);
    true
}

pub fn is_meshlet_full(meshlet: &MeshletBuild, config: &ClusterConfig) -> bool {
    meshlet.vertices.len() as u32 >= config.max_vertices
        || meshlet.triangles.len() as u32 >= config.max_triangles
}

/// Candidate score, lower is better
fn score_triangle(
    tri: [u32; 3],
    normal: Vector3<f32>,
    meshlet: &MeshletBuild,
    bounds: &RunningBounds,
    positions: &[[f32; 3]],
    config: &ClusterConfig,
) -> f32 {
    let reused = tri.iter().filter(|&&v| meshlet.vertices.contains(&v)).count() as f32;
    let reuse = 1.0 - reused / 3.0;

    let max_sq = tri
        .iter()
        .map(|&v| (Vector3::from(positions[v as usize]) - bounds.center).magnitude2())
        .fold(0.0f32, f32::max);
    let locality = if bounds.radius_sq > 0.0 {
        (max_sq / bounds.radius_sq + 1.0).log2()
    } else {
        0.0
    };

    // Zero normals (degenerate triangle or empty meshlet) score as perpendicular
    let orientation = (1.0 - normal.dot(bounds.axis)) * 0.5;

    config.reuse_weight * reuse
        + config.locality_weight * locality
        + config.orientation_weight * orientation
}

fn recompute_bounds(
    meshlet: &MeshletBuild,
    positions: &[[f32; 3]],
    normals: &[Vector3<f32>],
) -> RunningBounds {
    let sphere = compute_bounding_sphere(
        meshlet
            .vertices
            .iter()
            .map(|&v| Vector3::from(positions[v as usize])),
    );

    let cone = compute_bounding_sphere(
        meshlet
            .triangles
            .iter()
            .map(|&t| normals[t as usize])
            .filter(|n| n.magnitude2() > 0.0),
    );
    let axis_length = cone.center.magnitude();
    let axis = if axis_length > 0.0 {
        cone.center / axis_length
    } else {
        Vector3::new(0.0, 0.0, 0.0)
    };

    RunningBounds {
        center: sphere.center,
        radius_sq: sphere.radius * sphere.radius,
        axis,
    }
}

impl PartitionState {
    fn new(triangle_count: usize) -> Self {
        Self {
            current: MeshletBuild::default(),
            bounds: RunningBounds::default(),
            checklist: BitVec::from_elem(triangle_count, false),
            queued: BitVec::from_elem(triangle_count, false),
            candidates: Vec::new(),
            deferred: Vec::new(),
            cursor: 0,
        }
    }

    fn enqueue(&mut self, t: u32) {
        self.queued.set(t as usize, true);
        self.candidates.push((t, 0.0));
    }

    fn clear_candidates(&mut self) {
        for (t, _) in self.candidates.drain(..) {
            self.queued.set(t as usize, false);
        }
    }

    fn clear_deferred(&mut self) {
        for t in self.deferred.drain(..) {
            self.queued.set(t as usize, false);
        }
    }

    /// Close the current meshlet and start an empty one
    fn finish_meshlet(&mut self, meshlets: &mut Vec<MeshletBuild>) {
        if !self.current.triangles.is_empty() {
            meshlets.push(std::mem::take(&mut self.current));
        }
        self.bounds = RunningBounds::default();
    }

    fn next_unconsumed(&mut self) -> Option<u32> {
        while self.cursor < self.checklist.len() {
            if !self.checklist[self.cursor] {
                return Some(self.cursor as u32);
            }
            self.cursor += 1;
        }
        None
    }
}

/// Partition a triangle list into meshlets.
///
/// `indices` must be a whole number of triangles referring to `positions`;
/// `adjacency` must have been built from the same indices.
pub fn partition_meshlets(
    positions: &[[f32; 3]],
    indices: &[u32],
    adjacency: &AdjacencyGraph,
    config: &ClusterConfig,
) -> Vec<MeshletBuild> {
    let triangle_count = indices.len() / 3;
    let mut meshlets = Vec::with_capacity(triangle_count / config.max_triangles.max(1) as usize + 1);
    if triangle_count == 0 {
        return meshlets;
    }

    let normals: Vec<Vector3<f32>> = indices
        .chunks_exact(3)
        .map(|tri| {
            triangle_normal(
                positions[tri[0] as usize],
                positions[tri[1] as usize],
                positions[tri[2] as usize],
            )
            .unwrap_or_else(|| Vector3::new(0.0, 0.0, 0.0))
        })
        .collect();

    let mut state = PartitionState::new(triangle_count);
    let mut consumed = 0usize;

    while consumed < triangle_count {
        if state.candidates.is_empty() {
            if let Some(&seed) = state.deferred.first() {
                // Nothing left fits the current meshlet
                state.clear_deferred();
                state.finish_meshlet(&mut meshlets);
                state.enqueue(seed);
            } else if let Some(seed) = state.next_unconsumed() {
                // Disconnected piece: keep filling the current meshlet
                state.enqueue(seed);
            } else {
                break;
            }
        }

        let Some((t, _)) = state.candidates.pop() else {
            break;
        };

        let tri = triangle(indices, t);
        if !add_to_meshlet(&mut state.current, tri, t, config) {
            state.deferred.push(t);
            continue;
        }

        state.checklist.set(t as usize, true);
        consumed += 1;

        for n in adjacency.neighbors_of(t) {
            if !state.checklist[n as usize] && !state.queued[n as usize] {
                state.enqueue(n);
            }
        }

        state.bounds = recompute_bounds(&state.current, positions, &normals);

        for candidate in state.candidates.iter_mut() {
            let tri = triangle(indices, candidate.0);
            candidate.1 = score_triangle(
                tri,
                normals[candidate.0 as usize],
                &state.current,
                &state.bounds,
                positions,
                config,
            );
        }
        // Descending, so the best candidate sits at the back
        state.candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        if is_meshlet_full(&state.current, config) {
            let best = state.candidates.pop();
            state.clear_candidates();
            state.clear_deferred();
            state.finish_meshlet(&mut meshlets);
            if let Some((seed, _)) = best {
                state.enqueue(seed);
            }
        }
    }

    state.finish_meshlet(&mut meshlets);

    log::debug!(
        "[partition_meshlets] {} triangles -> {} meshlets",
        triangle_count,
        meshlets.len()
    );

    meshlets
}
