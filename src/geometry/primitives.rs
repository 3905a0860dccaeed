//! Procedural meshes
//! Pure functions that generate position/index data with outward,
//! counter-clockwise winding.

use super::mesh_data::MeshData;
use std::f32::consts::PI;

/// One triangle in the XY plane facing +Z
pub fn create_single_triangle() -> MeshData {
    MeshData::new(
        vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        vec![0, 1, 2],
    )
}

/// `count` triangles that share no vertex and no edge, spaced along +X
pub fn create_disjoint_triangles(count: u32, spacing: f32) -> MeshData {
    let mut positions = Vec::with_capacity(count as usize * 3);
    let mut indices = Vec::with_capacity(count as usize * 3);

    for i in 0..count {
        let x = i as f32 * spacing;
        let base = positions.len() as u32;
        positions.push([x, 0.0, 0.0]);
        positions.push([x + 1.0, 0.0, 0.0]);
        positions.push([x, 1.0, 0.0]);
        indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    MeshData::new(positions, indices)
}

/// Axis-aligned rectangle in the XY plane facing +Z
pub fn create_quad(center: [f32; 3], half_width: f32, half_height: f32) -> MeshData {
    let [cx, cy, cz] = center;
    MeshData::new(
        vec![
            [cx - half_width, cy - half_height, cz],
            [cx + half_width, cy - half_height, cz],
            [cx + half_width, cy + half_height, cz],
            [cx - half_width, cy + half_height, cz],
        ],
        vec![0, 1, 2, 0, 2, 3],
    )
}

/// Flat grid of `quads_x * quads_z` quads in the XZ plane, facing +Y,
/// centered on the origin. Vertices are shared between neighbouring quads.
pub fn create_planar_grid(quads_x: u32, quads_z: u32, spacing: f32) -> MeshData {
    let verts_x = quads_x + 1;
    let verts_z = quads_z + 1;
    let offset_x = quads_x as f32 * spacing * 0.5;
    let offset_z = quads_z as f32 * spacing * 0.5;

    let mut positions = Vec::with_capacity((verts_x * verts_z) as usize);
    for j in 0..verts_z {
        for i in 0..verts_x {
            positions.push([
                i as f32 * spacing - offset_x,
                0.0,
                j as f32 * spacing - offset_z,
            ]);
        }
    }

    let mut indices = Vec::with_capacity((quads_x * quads_z * 6) as usize);
    for j in 0..quads_z {
        for i in 0..quads_x {
            let a = j * verts_x + i;
            let b = a + 1;
            let d = a + verts_x;
            let c = d + 1;
            indices.extend_from_slice(&[a, d, c, a, c, b]);
        }
    }

    MeshData::new(positions, indices)
}

/// Closed UV sphere with single pole vertices.
/// Produces `2 * segments * (stacks - 1)` triangles.
pub fn create_uv_sphere(radius: f32, stacks: u32, segments: u32) -> MeshData {
    let stacks = stacks.max(2);
    let segments = segments.max(3);

    let mut positions = Vec::with_capacity(((stacks - 1) * segments + 2) as usize);
    positions.push([0.0, radius, 0.0]);
    for k in 1..stacks {
        let phi = PI * k as f32 / stacks as f32;
        for m in 0..segments {
            let theta = 2.0 * PI * m as f32 / segments as f32;
            positions.push([
                radius * phi.sin() * theta.cos(),
                radius * phi.cos(),
                radius * phi.sin() * theta.sin(),
            ]);
        }
    }
    positions.push([0.0, -radius, 0.0]);

    let ring = |k: u32, m: u32| 1 + (k - 1) * segments + (m % segments);
    let top = 0;
    let bottom = positions.len() as u32 - 1;

    let mut indices = Vec::with_capacity((2 * segments * (stacks - 1) * 3) as usize);
    for m in 0..segments {
        indices.extend_from_slice(&[top, ring(1, m + 1), ring(1, m)]);
    }
    for k in 1..stacks - 1 {
        for m in 0..segments {
            let a = ring(k, m);
            let b = ring(k, m + 1);
            let c = ring(k + 1, m);
            let d = ring(k + 1, m + 1);
            indices.extend_from_slice(&[a, b, c, b, d, c]);
        }
    }
    for m in 0..segments {
        indices.extend_from_slice(&[ring(stacks - 1, m), ring(stacks - 1, m + 1), bottom]);
    }

    MeshData::new(positions, indices)
}

/// Cube with 4 vertices per face (24 vertices, 36 indices)
pub fn create_cube(center: [f32; 3], half_size: f32) -> MeshData {
    // (normal, u, v) with u x v == normal
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
    ];
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

    let mut positions = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v) in faces.iter() {
        let base = positions.len() as u32;
        for (su, sv) in corners.iter() {
            let mut p = [0.0; 3];
            for axis in 0..3 {
                p[axis] = center[axis]
                    + half_size * (normal[axis] + su * u[axis] + sv * v[axis]);
            }
            positions.push(p);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData::new(positions, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh_data::{triangle_normal, validate_mesh};
    use cgmath::{InnerSpace, Vector3};

    fn assert_outward(mesh: &MeshData, center: [f32; 3]) {
        let c = Vector3::from(center);
        for tri in mesh.indices.chunks_exact(3) {
            let p = [
                mesh.positions[tri[0] as usize],
                mesh.positions[tri[1] as usize],
                mesh.positions[tri[2] as usize],
            ];
            let n = triangle_normal(p[0], p[1], p[2]).expect("no degenerate triangles");
            let centroid = (Vector3::from(p[0]) + Vector3::from(p[1]) + Vector3::from(p[2])) / 3.0;
            assert!(n.dot(centroid - c) > 0.0, "inward facing triangle {:?}", tri);
        }
    }

    #[test]
    fn test_uv_sphere_counts_and_winding() {
        let sphere = create_uv_sphere(1.0, 51, 50);
        assert_eq!(sphere.triangle_count(), 5000);
        assert!(validate_mesh(&sphere).is_ok());
        assert_outward(&sphere, [0.0; 3]);
    }

    #[test]
    fn test_cube_winding() {
        let cube = create_cube([1.0, 2.0, 3.0], 0.5);
        assert_eq!(cube.positions.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_outward(&cube, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_grid_faces_up() {
        let grid = create_planar_grid(4, 3, 1.0);
        assert_eq!(grid.triangle_count(), 24);
        assert_eq!(grid.vertex_count(), 20);
        for tri in grid.indices.chunks_exact(3) {
            let n = triangle_normal(
                grid.positions[tri[0] as usize],
                grid.positions[tri[1] as usize],
                grid.positions[tri[2] as usize],
            )
            .expect("non-degenerate");
            assert!((n - Vector3::new(0.0, 1.0, 0.0)).magnitude() < 1e-6);
        }
    }

    #[test]
    fn test_disjoint_triangles_share_nothing() {
        let mesh = create_disjoint_triangles(2, 10.0);
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);
    }
}
