//! Camera data structures - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in camera_operations.rs

use cgmath::{Matrix4, Point3, Vector4};

/// Camera data structure - pure data, no methods
#[derive(Debug, Clone, Copy)]
pub struct CameraData {
    /// Camera position in world space
    pub position: Point3<f32>,

    /// Yaw rotation (radians, around Y axis)
    pub yaw_radians: f32,

    /// Pitch rotation (radians, around X axis)
    pub pitch_radians: f32,

    /// Field of view (vertical, radians)
    pub fov_radians: f32,

    /// Aspect ratio (width / height)
    pub aspect_ratio: f32,

    /// Near clipping plane distance
    pub near_plane: f32,

    /// Far clipping plane distance
    pub far_plane: f32,
}

/// Per-frame camera record consumed by culling
#[derive(Debug, Clone, Copy)]
pub struct CullCamera {
    pub view: Matrix4<f32>,
    /// Projection with depth mapped to [0, 1], 0 at the near plane
    pub projection: Matrix4<f32>,
    pub view_projection: Matrix4<f32>,
    /// Left, right, top, bottom, near, far. xyz points inside, normalized.
    pub frustum_planes: [Vector4<f32>; 6],
    pub position: Point3<f32>,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 0.0),
            yaw_radians: -std::f32::consts::FRAC_PI_2,
            pitch_radians: 0.0,
            fov_radians: 70.0_f32.to_radians(),
            aspect_ratio: 16.0 / 9.0,
            near_plane: 0.1,
            far_plane: 1000.0,
        }
    }
}
