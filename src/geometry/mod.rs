//! Geometry Module - source meshes and the pure helpers clustering needs
//!
//! - mesh_data.rs: flat position/index arrays handed over by the importer
//! - primitives.rs: procedural meshes for tests, benches and the demo
//! - adjacency.rs: triangle edge-adjacency graph
//! - bounding_sphere.rs: Ritter bounding sphere

pub mod adjacency;
pub mod bounding_sphere;
pub mod mesh_data;
pub mod primitives;

pub use adjacency::{build_adjacency, AdjacencyGraph, AdjacencyReport, NO_NEIGHBOR};
pub use bounding_sphere::{compute_bounding_sphere, BoundingSphere};
pub use mesh_data::{triangle_normal, validate_mesh, MeshData};
pub use primitives::{
    create_cube, create_disjoint_triangles, create_planar_grid, create_quad, create_single_triangle,
    create_uv_sphere,
};
