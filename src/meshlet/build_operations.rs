//! Mesh -> meshlet pipeline entry points

use super::cull_data_operations::compute_all_cull_data;
use super::meshlet_data::{MeshletBuildReport, MeshletMesh};
use super::pack_operations::pack_meshlets;
use super::partition_operations::partition_meshlets;
use crate::config::ClusterConfig;
use crate::error::{EngineError, EngineResult};
use crate::geometry::{build_adjacency, validate_mesh, MeshData};
use rayon::prelude::*;

/// Build meshlets and cull data for one mesh.
///
/// Deterministic: the same input always yields byte-identical output.
pub fn build_meshlets(mesh: &MeshData, config: &ClusterConfig) -> EngineResult<MeshletMesh> {
    config.validate().map_err(|e| EngineError::InvalidConfig {
        field: "cluster".to_string(),
        value: format!("{:?}", config),
        reason: e.to_string(),
    })?;
    validate_mesh(mesh)?;

    let adjacency = build_adjacency(&mesh.indices)?;
    let builds = partition_meshlets(&mesh.positions, &mesh.indices, &adjacency, config);
    let packed = pack_meshlets(&builds, &mesh.indices)?;
    let cull_data = compute_all_cull_data(&mesh.positions, &packed);

    let report = MeshletBuildReport {
        triangle_count: mesh.triangle_count() as u32,
        vertex_count: mesh.vertex_count() as u32,
        meshlet_count: packed.meshlets.len() as u32,
        degenerate_cones: cull_data.iter().filter(|c| c.is_degenerate()).count() as u32,
        adjacency: adjacency.report,
    };

    log::info!(
        "[build_meshlets] {} triangles, {} vertices -> {} meshlets ({} degenerate cones, {} non-manifold edges)",
        report.triangle_count,
        report.vertex_count,
        report.meshlet_count,
        report.degenerate_cones,
        report.adjacency.non_manifold_edges
    );

    Ok(MeshletMesh {
        positions: mesh.positions.clone(),
        packed,
        cull_data,
        report,
    })
}

/// Build several independent meshes on the rayon pool. Output order matches
/// input order; the first failure is returned.
pub fn build_meshlets_parallel(
    meshes: &[MeshData],
    config: &ClusterConfig,
) -> EngineResult<Vec<MeshletMesh>> {
    meshes
        .par_iter()
        .map(|mesh| build_meshlets(mesh, config))
        .collect()
}
