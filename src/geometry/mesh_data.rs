//! Mesh data - flat arrays as produced by the import front end
//!
//! NO METHODS beyond trivial accessors. Validation lives in free functions.

use crate::error::{EngineError, EngineResult};
use cgmath::{InnerSpace, Vector3};

/// Triangle list: three indices per triangle into `positions`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

/// Check that the index stream is a whole number of triangles and that every
/// index refers to an existing vertex.
pub fn validate_mesh(mesh: &MeshData) -> EngineResult<()> {
    if mesh.indices.len() % 3 != 0 {
        return Err(EngineError::InvalidMesh(format!(
            "index count {} is not a multiple of 3",
            mesh.indices.len()
        )));
    }

    if let Some(&index) = mesh
        .indices
        .iter()
        .find(|&&i| i as usize >= mesh.positions.len())
    {
        return Err(EngineError::VertexOutOfRange {
            index,
            vertex_count: mesh.positions.len(),
        });
    }

    if mesh.positions.iter().flatten().any(|c| !c.is_finite()) {
        return Err(EngineError::InvalidMesh(
            "vertex positions must be finite".to_string(),
        ));
    }

    Ok(())
}

/// Unit face normal of a triangle, or `None` for zero-area triangles.
pub fn triangle_normal(p0: [f32; 3], p1: [f32; 3], p2: [f32; 3]) -> Option<Vector3<f32>> {
    let a = Vector3::from(p0);
    let e1 = Vector3::from(p1) - a;
    let e2 = Vector3::from(p2) - a;
    let n = e1.cross(e2);
    let area = n.magnitude();

    if area > 0.0 && area.is_finite() {
        Some(n / area)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_partial_triangle() {
        let mesh = MeshData::new(vec![[0.0; 3]; 3], vec![0, 1]);
        assert!(matches!(
            validate_mesh(&mesh),
            Err(EngineError::InvalidMesh(_))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let mesh = MeshData::new(vec![[0.0; 3]; 3], vec![0, 1, 3]);
        assert!(matches!(
            validate_mesh(&mesh),
            Err(EngineError::VertexOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn test_triangle_normal() {
        let n = triangle_normal([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0])
            .expect("non-degenerate");
        assert!((n - Vector3::new(0.0, 0.0, 1.0)).magnitude() < 1e-6);

        assert!(triangle_normal([1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]).is_none());
    }
}
