//! Meshlet data structures - Pure DOP
//!
//! NO METHODS beyond small accessors. Building happens in the *_operations
//! modules.

use crate::geometry::AdjacencyReport;

/// Normal cone bytes marking a meshlet that can never be cone culled
pub const DEGENERATE_NORMAL_CONE: [u8; 4] = [127, 127, 127, 255];

/// Partitioner output for one meshlet, before local index remapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshletBuild {
    /// Global vertex indices in first-use order
    pub vertices: Vec<u32>,
    /// Source triangle ids in insertion order
    pub triangles: Vec<u32>,
}

/// Meshlet descriptor: ranges into the shared vertex and primitive arrays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Meshlet {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub primitive_offset: u32,
    pub primitive_count: u32,
    /// Debug color, RGBA8 packed little-endian
    pub color: u32,
}

/// Per-meshlet culling metadata
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullData {
    /// xyz center, w radius
    pub bounding_sphere: [f32; 4],
    /// UNORM8 axis xyz and cutoff w
    pub normal_cone: [u8; 4],
    /// Distance from the sphere center to the cone apex along -axis
    pub apex_offset: f32,
}

impl Default for CullData {
    fn default() -> Self {
        Self {
            bounding_sphere: [0.0; 4],
            normal_cone: DEGENERATE_NORMAL_CONE,
            apex_offset: 0.0,
        }
    }
}

/// The three packed arrays a mesh is drawn from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedMeshlets {
    pub meshlets: Vec<Meshlet>,
    pub unique_vertex_indices: Vec<u32>,
    /// Three 10-bit local indices per entry
    pub packed_primitives: Vec<u32>,
}

/// Diagnostics returned alongside a built mesh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshletBuildReport {
    pub triangle_count: u32,
    pub vertex_count: u32,
    pub meshlet_count: u32,
    pub degenerate_cones: u32,
    pub adjacency: AdjacencyReport,
}

/// Everything derived from one source mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshletMesh {
    pub positions: Vec<[f32; 3]>,
    pub packed: PackedMeshlets,
    pub cull_data: Vec<CullData>,
    pub report: MeshletBuildReport,
}

impl MeshletMesh {
    pub fn meshlet_count(&self) -> u32 {
        self.packed.meshlets.len() as u32
    }
}
