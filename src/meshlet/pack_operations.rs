//! Meshlet packing
//!
//! Flattens partitioner output into the three arrays the GPU reads. Triangle
//! corners are remapped from global to meshlet-local vertex indices here and
//! nowhere else.

use super::meshlet_data::{Meshlet, MeshletBuild, PackedMeshlets};
use crate::error::{EngineError, EngineResult};

const LOCAL_INDEX_BITS: u32 = 10;
const LOCAL_INDEX_MASK: u32 = (1 << LOCAL_INDEX_BITS) - 1;

/// Pack three local indices (each < 1024) into one word
#[inline]
pub fn pack_triangle(i0: u32, i1: u32, i2: u32) -> u32 {
    debug_assert!(i0 <= LOCAL_INDEX_MASK && i1 <= LOCAL_INDEX_MASK && i2 <= LOCAL_INDEX_MASK);
    (i0 & LOCAL_INDEX_MASK)
        | ((i1 & LOCAL_INDEX_MASK) << LOCAL_INDEX_BITS)
        | ((i2 & LOCAL_INDEX_MASK) << (LOCAL_INDEX_BITS * 2))
}

#[inline]
pub fn unpack_triangle(packed: u32) -> [u32; 3] {
    [
        packed & LOCAL_INDEX_MASK,
        (packed >> LOCAL_INDEX_BITS) & LOCAL_INDEX_MASK,
        (packed >> (LOCAL_INDEX_BITS * 2)) & LOCAL_INDEX_MASK,
    ]
}

/// Deterministic debug color for a meshlet, RGBA8 with opaque alpha
pub fn meshlet_debug_color(meshlet_index: u32) -> u32 {
    // Integer hash (lowbias32) so neighbouring meshlets get unrelated colors
    let mut h = meshlet_index;
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    (h & 0x00ff_ffff) | 0xff00_0000
}

/// Global vertex indices of every triangle in a meshlet, in primitive order
pub fn meshlet_triangles<'a>(
    packed: &'a PackedMeshlets,
    meshlet: &'a Meshlet,
) -> impl Iterator<Item = [u32; 3]> + 'a {
    let vertices = &packed.unique_vertex_indices
        [meshlet.vertex_offset as usize..(meshlet.vertex_offset + meshlet.vertex_count) as usize];
    packed.packed_primitives
        [meshlet.primitive_offset as usize..(meshlet.primitive_offset + meshlet.primitive_count) as usize]
        .iter()
        .map(move |&p| unpack_triangle(p).map(|local| vertices[local as usize]))
}

/// Flatten meshlet builds into shared arrays
pub fn pack_meshlets(builds: &[MeshletBuild], indices: &[u32]) -> EngineResult<PackedMeshlets> {
    let vertex_total: usize = builds.iter().map(|b| b.vertices.len()).sum();
    let primitive_total: usize = builds.iter().map(|b| b.triangles.len()).sum();

    let mut packed = PackedMeshlets {
        meshlets: Vec::with_capacity(builds.len()),
        unique_vertex_indices: Vec::with_capacity(vertex_total),
        packed_primitives: Vec::with_capacity(primitive_total),
    };

    for (index, build) in builds.iter().enumerate() {
        if build.vertices.len() > LOCAL_INDEX_MASK as usize + 1 {
            return Err(EngineError::ResourceExhausted(format!(
                "meshlet {} has {} vertices, local indices hold at most {}",
                index,
                build.vertices.len(),
                LOCAL_INDEX_MASK + 1
            )));
        }

        let meshlet = Meshlet {
            vertex_offset: packed.unique_vertex_indices.len() as u32,
            vertex_count: build.vertices.len() as u32,
            primitive_offset: packed.packed_primitives.len() as u32,
            primitive_count: build.triangles.len() as u32,
            color: meshlet_debug_color(index as u32),
        };

        packed.unique_vertex_indices.extend_from_slice(&build.vertices);

        for &t in &build.triangles {
            let base = t as usize * 3;
            let mut local = [0u32; 3];
            for corner in 0..3 {
                let global = indices[base + corner];
                local[corner] = build
                    .vertices
                    .iter()
                    .position(|&v| v == global)
                    .ok_or_else(|| EngineError::Internal {
                        message: format!(
                            "triangle {} vertex {} missing from meshlet {}",
                            t, global, index
                        ),
                    })? as u32;
            }
            packed
                .packed_primitives
                .push(pack_triangle(local[0], local[1], local[2]));
        }

        packed.meshlets.push(meshlet);
    }

    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        assert_eq!(pack_triangle(1, 2, 3), 1 | (2 << 10) | (3 << 20));
        assert_eq!(unpack_triangle(pack_triangle(1023, 0, 512)), [1023, 0, 512]);
    }

    #[test]
    fn test_pack_remaps_to_local_indices() {
        // Two triangles of a quad, one meshlet each
        let indices = [10, 11, 12, 10, 12, 13];
        let builds = vec![
            MeshletBuild {
                vertices: vec![10, 11, 12],
                triangles: vec![0],
            },
            MeshletBuild {
                vertices: vec![10, 12, 13],
                triangles: vec![1],
            },
        ];

        let packed = pack_meshlets(&builds, &indices).expect("pack");
        assert_eq!(packed.unique_vertex_indices, vec![10, 11, 12, 10, 12, 13]);
        assert_eq!(packed.meshlets[1].vertex_offset, 3);
        assert_eq!(packed.meshlets[1].primitive_offset, 1);
        assert_eq!(unpack_triangle(packed.packed_primitives[0]), [0, 1, 2]);
        assert_eq!(unpack_triangle(packed.packed_primitives[1]), [0, 1, 2]);

        let restored: Vec<[u32; 3]> = packed
            .meshlets
            .iter()
            .flat_map(|m| meshlet_triangles(&packed, m))
            .collect();
        assert_eq!(restored, vec![[10, 11, 12], [10, 12, 13]]);
    }

    #[test]
    fn test_missing_vertex_is_an_error() {
        let builds = vec![MeshletBuild {
            vertices: vec![0, 1],
            triangles: vec![0],
        }];
        assert!(pack_meshlets(&builds, &[0, 1, 2]).is_err());
    }

    #[test]
    fn test_debug_colors_are_opaque_and_stable() {
        for i in 0..64 {
            assert_eq!(meshlet_debug_color(i) >> 24, 0xff);
            assert_eq!(meshlet_debug_color(i), meshlet_debug_color(i));
        }
        assert_ne!(meshlet_debug_color(0), meshlet_debug_color(1));
    }
}
