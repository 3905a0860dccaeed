//! Instance Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in instance_operations.rs

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// One placed copy of a mesh. `transform` already includes `scale`; the
/// scale is repeated so culling can grow bounding radii without decomposing
/// the matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshletInstance {
    /// Column-major object-to-world matrix
    pub transform: [[f32; 4]; 4],
    pub scale: f32,
    pub _padding: [f32; 3],
}

const_assert_eq!(std::mem::size_of::<MeshletInstance>(), 80);

/// Random rock-field style placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterConfig {
    pub count: u32,
    /// Instances land in [-extent, extent] on X and Z
    pub extent: f32,
    pub height: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub seed: u64,
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            count: 256,
            extent: 50.0,
            height: 0.0,
            min_scale: 0.5,
            max_scale: 2.0,
            seed: 0x5eed,
        }
    }
}
