//! Meshlet Module - clustering, packing and cull data
//!
//! - meshlet_data.rs: plain data (builds, descriptors, cull data)
//! - partition_operations.rs: greedy clustering over the adjacency graph
//! - pack_operations.rs: local index remap and 10-bit primitive packing
//! - cull_data_operations.rs: bounding spheres and normal cones
//! - build_operations.rs: the mesh -> meshlet entry points
//! - store.rs: arena owning built meshes

pub mod build_operations;
pub mod cull_data_operations;
pub mod meshlet_data;
pub mod pack_operations;
pub mod partition_operations;
pub mod store;

pub use build_operations::{build_meshlets, build_meshlets_parallel};
pub use cull_data_operations::{
    compute_all_cull_data, compute_cull_data, dequantize_unorm8, quantization_error,
    quantize_unorm8, MIN_CONE_DOT,
};
pub use meshlet_data::{
    CullData, Meshlet, MeshletBuild, MeshletBuildReport, MeshletMesh, PackedMeshlets,
    DEGENERATE_NORMAL_CONE,
};
pub use pack_operations::{
    meshlet_debug_color, meshlet_triangles, pack_meshlets, pack_triangle, unpack_triangle,
};
pub use partition_operations::{add_to_meshlet, is_meshlet_full, partition_meshlets};
pub use store::{create_shared_store, MeshId, MeshletStore, SharedMeshletStore};
