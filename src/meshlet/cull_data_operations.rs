//! Per-meshlet cull data: bounding sphere, quantized normal cone, apex offset
//!
//! The cone is stored as UNORM8 bytes. Quantization error of the axis is
//! added to the cutoff before it is rounded up, so the 8-bit GPU test never
//! rejects a meshlet the exact test would keep.

use super::meshlet_data::{CullData, Meshlet, PackedMeshlets, DEGENERATE_NORMAL_CONE};
use super::pack_operations::meshlet_triangles;
use crate::geometry::{compute_bounding_sphere, triangle_normal};
use cgmath::{InnerSpace, Vector3};
use rayon::prelude::*;

/// Cones wider than this (cos of the half angle) are not worth testing
pub const MIN_CONE_DOT: f32 = 0.1;

#[inline]
pub fn quantize_unorm8(v: f32) -> u8 {
    ((v.clamp(-1.0, 1.0) * 0.5 + 0.5) * 255.0).round() as u8
}

#[inline]
pub fn dequantize_unorm8(b: u8) -> f32 {
    b as f32 / 255.0 * 2.0 - 1.0
}

impl CullData {
    /// Only the exact sentinel counts. A real cone may still round its
    /// cutoff up to 255, which the cull test treats as never culled too.
    pub fn is_degenerate(&self) -> bool {
        self.normal_cone == DEGENERATE_NORMAL_CONE
    }

    pub fn center(&self) -> Vector3<f32> {
        Vector3::new(
            self.bounding_sphere[0],
            self.bounding_sphere[1],
            self.bounding_sphere[2],
        )
    }

    pub fn radius(&self) -> f32 {
        self.bounding_sphere[3]
    }

    /// Dequantized cone axis and stored cutoff
    pub fn dequantized_cone(&self) -> (Vector3<f32>, f32) {
        (
            Vector3::new(
                dequantize_unorm8(self.normal_cone[0]),
                dequantize_unorm8(self.normal_cone[1]),
                dequantize_unorm8(self.normal_cone[2]),
            ),
            self.normal_cone[3] as f32 / 255.0,
        )
    }

    /// Normal cone as the little-endian word the GPU reads
    pub fn packed_normal_cone(&self) -> u32 {
        u32::from_le_bytes(self.normal_cone)
    }
}

/// L1 distance between an axis and its quantized form
pub fn quantization_error(axis: Vector3<f32>, quantized: [u8; 3]) -> f32 {
    (0..3)
        .map(|i| (dequantize_unorm8(quantized[i]) - axis[i]).abs())
        .sum()
}

/// Compute cull data for one meshlet
pub fn compute_cull_data(
    positions: &[[f32; 3]],
    packed: &PackedMeshlets,
    meshlet: &Meshlet,
) -> CullData {
    let vertices = &packed.unique_vertex_indices
        [meshlet.vertex_offset as usize..(meshlet.vertex_offset + meshlet.vertex_count) as usize];
    let sphere = compute_bounding_sphere(
        vertices
            .iter()
            .map(|&v| Vector3::from(positions[v as usize])),
    );

    let mut cull = CullData {
        bounding_sphere: sphere.to_array(),
        normal_cone: DEGENERATE_NORMAL_CONE,
        apex_offset: 0.0,
    };

    // (unit normal, first corner) of every triangle with non-zero area
    let faces: Vec<(Vector3<f32>, Vector3<f32>)> = meshlet_triangles(packed, meshlet)
        .filter_map(|[a, b, c]| {
            let (p0, p1, p2) = (
                positions[a as usize],
                positions[b as usize],
                positions[c as usize],
            );
            triangle_normal(p0, p1, p2).map(|n| (n, Vector3::from(p0)))
        })
        .collect();

    if faces.is_empty() {
        return cull;
    }

    let normal_sphere = compute_bounding_sphere(faces.iter().map(|(n, _)| *n));
    let axis_length = normal_sphere.center.magnitude();
    if axis_length <= 0.0 {
        return cull;
    }
    let axis = normal_sphere.center / axis_length;

    let min_dot = faces
        .iter()
        .map(|(n, _)| n.dot(axis))
        .fold(1.0f32, f32::min);

    if min_dot < MIN_CONE_DOT {
        return cull;
    }

    // Move the apex back along -axis until it lies behind every triangle plane
    let mut apex_offset = 0.0f32;
    for (n, corner) in &faces {
        let t = (sphere.center - *corner).dot(*n) / axis.dot(*n);
        apex_offset = apex_offset.max(t);
    }

    // The GPU test rotates the cone by 90 degrees: sin(a) = sqrt(1 - cos^2(a))
    let cutoff = (1.0 - min_dot * min_dot).max(0.0).sqrt();

    let quantized_axis = [
        quantize_unorm8(axis.x),
        quantize_unorm8(axis.y),
        quantize_unorm8(axis.z),
    ];
    let error = quantization_error(axis, quantized_axis);
    let quantized_cutoff = ((cutoff + error).clamp(0.0, 1.0) * 255.0).ceil() as u8;

    cull.normal_cone = [
        quantized_axis[0],
        quantized_axis[1],
        quantized_axis[2],
        quantized_cutoff,
    ];
    cull.apex_offset = apex_offset;
    cull
}

/// Cull data for every meshlet, in meshlet order. Meshlets are independent,
/// so they are processed on the rayon pool.
pub fn compute_all_cull_data(positions: &[[f32; 3]], packed: &PackedMeshlets) -> Vec<CullData> {
    packed
        .meshlets
        .par_iter()
        .map(|meshlet| compute_cull_data(positions, packed, meshlet))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::geometry::{
        build_adjacency, create_planar_grid, create_single_triangle, create_uv_sphere, MeshData,
    };
    use crate::meshlet::pack_operations::pack_meshlets;
    use crate::meshlet::partition_operations::partition_meshlets;

    fn pack(mesh: &MeshData) -> PackedMeshlets {
        let adjacency = build_adjacency(&mesh.indices).expect("valid indices");
        let builds = partition_meshlets(
            &mesh.positions,
            &mesh.indices,
            &adjacency,
            &ClusterConfig::default(),
        );
        pack_meshlets(&builds, &mesh.indices).expect("pack")
    }

    #[test]
    fn test_quantization_roundtrip_error_bounded() {
        for i in -100..=100 {
            let v = i as f32 / 100.0;
            assert!((dequantize_unorm8(quantize_unorm8(v)) - v).abs() <= 1.0 / 255.0 + 1e-6);
        }
        assert_eq!(quantize_unorm8(-1.0), 0);
        assert_eq!(quantize_unorm8(1.0), 255);
    }

    #[test]
    fn test_single_triangle_cone_is_tight() {
        let mesh = create_single_triangle();
        let packed = pack(&mesh);
        let cull = compute_cull_data(&mesh.positions, &packed, &packed.meshlets[0]);

        assert!(!cull.is_degenerate());
        let (axis, cutoff) = cull.dequantized_cone();
        assert!(axis.z > 0.99);
        // Exact cutoff is 0; only quantization slack remains
        assert!(cutoff < 0.05, "cutoff {}", cutoff);
        assert!(cull.apex_offset >= 0.0);
    }

    #[test]
    fn test_all_degenerate_triangles_give_sentinel() {
        let mesh = MeshData::new(vec![[0.0; 3], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]], vec![0, 1, 2]);
        let packed = pack(&mesh);
        let cull = compute_cull_data(&mesh.positions, &packed, &packed.meshlets[0]);
        assert_eq!(cull.normal_cone, DEGENERATE_NORMAL_CONE);
        assert!(cull.is_degenerate());
    }

    #[test]
    fn test_opposing_faces_give_sentinel() {
        // Two triangles facing +Z and -Z
        let mesh = MeshData::new(
            vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2, 0, 2, 1],
        );
        let packed = pack(&mesh);
        let cull = compute_cull_data(&mesh.positions, &packed, &packed.meshlets[0]);
        assert!(cull.is_degenerate());
    }

    #[test]
    fn test_spheres_contain_meshlet_vertices() {
        let mesh = create_uv_sphere(3.0, 30, 30);
        let packed = pack(&mesh);
        let cull = compute_all_cull_data(&mesh.positions, &packed);

        for (meshlet, cull) in packed.meshlets.iter().zip(&cull) {
            let start = meshlet.vertex_offset as usize;
            let end = start + meshlet.vertex_count as usize;
            for &v in &packed.unique_vertex_indices[start..end] {
                let p = Vector3::from(mesh.positions[v as usize]);
                assert!((p - cull.center()).magnitude() <= cull.radius() + 1e-4);
            }
        }
    }

    #[test]
    fn test_cones_are_conservative() {
        let mesh = create_uv_sphere(1.0, 24, 32);
        let packed = pack(&mesh);

        for meshlet in &packed.meshlets {
            let cull = compute_cull_data(&mesh.positions, &packed, meshlet);
            if cull.is_degenerate() {
                continue;
            }
            let (axis, cutoff) = cull.dequantized_cone();

            // Exact axis is unknown here, so allow the worst-case quantization slack
            let slack = 3.0 / 255.0;
            let min_dot = (1.0 - cutoff * cutoff).max(0.0).sqrt();
            for [a, b, c] in meshlet_triangles(&packed, meshlet) {
                if let Some(n) = triangle_normal(
                    mesh.positions[a as usize],
                    mesh.positions[b as usize],
                    mesh.positions[c as usize],
                ) {
                    assert!(n.dot(axis) + slack >= min_dot - 1e-4);
                }
            }
        }
    }

    #[test]
    fn test_planar_grid_cones_are_tight() {
        let grid = create_planar_grid(100, 100, 1.0);
        assert_eq!(grid.triangle_count(), 19_800);
        let packed = pack(&grid);
        for cull in compute_all_cull_data(&grid.positions, &packed) {
            assert!(!cull.is_degenerate());
            let (axis, cutoff) = cull.dequantized_cone();
            assert!(axis.y > 0.99);
            assert!(cutoff < 0.05);
        }
    }

    #[test]
    fn test_saturated_cutoff_is_not_the_sentinel() {
        let saturated = CullData {
            normal_cone: [127, 255, 127, 255],
            ..CullData::default()
        };
        assert!(!saturated.is_degenerate());
        assert!(CullData::default().is_degenerate());
    }

    #[test]
    fn test_apex_lies_behind_every_triangle() {
        let mesh = create_uv_sphere(1.0, 16, 16);
        let packed = pack(&mesh);

        for meshlet in &packed.meshlets {
            let cull = compute_cull_data(&mesh.positions, &packed, meshlet);
            if cull.is_degenerate() {
                continue;
            }
            let (axis, _) = cull.dequantized_cone();
            let axis = axis.normalize();
            let apex = cull.center() - axis * cull.apex_offset;
            for [a, b, c] in meshlet_triangles(&packed, meshlet) {
                let p0 = mesh.positions[a as usize];
                if let Some(n) = triangle_normal(p0, mesh.positions[b as usize], mesh.positions[c as usize]) {
                    // Small slack for the quantized axis
                    assert!((apex - Vector3::from(p0)).dot(n) <= 0.05 * (1.0 + cull.radius()));
                }
            }
        }
    }
}
