//! Camera operations - Pure DOP functions
//!
//! All functions are pure: they take data, return new data, no side effects.
//! No methods, no self, just transformations.

use super::camera_data::{CameraData, CullCamera};
use cgmath::{InnerSpace, Matrix4, Point3, Rad, Vector3, Vector4};

/// Remaps cgmath's [-1, 1] clip depth to the [0, 1] range wgpu uses
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize camera with default settings
pub fn init_camera(position: Point3<f32>, yaw: f32, pitch: f32) -> CameraData {
    CameraData {
        position,
        yaw_radians: yaw,
        pitch_radians: pitch,
        ..Default::default()
    }
}

/// Camera at `position` facing `target`
pub fn init_camera_looking_at(position: Point3<f32>, target: Point3<f32>) -> CameraData {
    let dir = target - position;
    let length = dir.magnitude();
    if length <= 0.0 {
        return init_camera(position, -std::f32::consts::FRAC_PI_2, 0.0);
    }
    let dir = dir / length;

    let pitch = dir.y.clamp(-1.0, 1.0).asin();
    let yaw = dir.z.atan2(dir.x);
    init_camera(position, yaw, pitch)
}

// ============================================================================
// VIEW/PROJECTION MATRICES
// ============================================================================

/// Build view matrix from camera data
pub fn build_view_matrix(camera: &CameraData) -> Matrix4<f32> {
    let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
    let target = camera.position + forward;
    let up = Vector3::new(0.0, 1.0, 0.0);

    Matrix4::look_at_rh(camera.position, target, up)
}

/// Build projection matrix from camera data, depth in [0, 1]
pub fn build_projection_matrix(camera: &CameraData) -> Matrix4<f32> {
    OPENGL_TO_WGPU_MATRIX
        * cgmath::perspective(
            Rad(camera.fov_radians),
            camera.aspect_ratio,
            camera.near_plane,
            camera.far_plane,
        )
}

/// Build the per-frame culling record
pub fn build_cull_camera(camera: &CameraData) -> CullCamera {
    let view = build_view_matrix(camera);
    let projection = build_projection_matrix(camera);
    let view_projection = projection * view;

    CullCamera {
        view,
        projection,
        view_projection,
        frustum_planes: extract_frustum_planes(&view_projection),
        position: camera.position,
    }
}

/// Extract frustum planes from a view-projection matrix with [0, 1] depth
/// (Gribb-Hartmann). Plane xyz is the inward normal.
pub fn extract_frustum_planes(vp: &Matrix4<f32>) -> [Vector4<f32>; 6] {
    let m = vp;

    [
        // Left plane
        normalize_plane(Vector4::new(m.x.w + m.x.x, m.y.w + m.y.x, m.z.w + m.z.x, m.w.w + m.w.x)),
        // Right plane
        normalize_plane(Vector4::new(m.x.w - m.x.x, m.y.w - m.y.x, m.z.w - m.z.x, m.w.w - m.w.x)),
        // Top plane
        normalize_plane(Vector4::new(m.x.w - m.x.y, m.y.w - m.y.y, m.z.w - m.z.y, m.w.w - m.w.y)),
        // Bottom plane
        normalize_plane(Vector4::new(m.x.w + m.x.y, m.y.w + m.y.y, m.z.w + m.z.y, m.w.w + m.w.y)),
        // Near plane (z >= 0)
        normalize_plane(Vector4::new(m.x.z, m.y.z, m.z.z, m.w.z)),
        // Far plane
        normalize_plane(Vector4::new(m.x.w - m.x.z, m.y.w - m.y.z, m.z.w - m.z.z, m.w.w - m.w.z)),
    ]
}

fn normalize_plane(plane: Vector4<f32>) -> Vector4<f32> {
    let length = plane.truncate().magnitude();
    if length > 0.0 {
        plane / length
    } else {
        plane
    }
}

// ============================================================================
// UPDATES
// ============================================================================

/// Update aspect ratio (e.g., on window resize)
pub fn update_aspect_ratio(camera: &CameraData, width: u32, height: u32) -> CameraData {
    let mut new_camera = *camera;
    new_camera.aspect_ratio = width as f32 / height.max(1) as f32;
    new_camera
}

// ============================================================================
// UTILITIES
// ============================================================================

/// Calculate forward vector from yaw and pitch
pub fn calculate_forward_vector(yaw: f32, pitch: f32) -> Vector3<f32> {
    Vector3::new(
        yaw.cos() * pitch.cos(),
        pitch.sin(),
        yaw.sin() * pitch.cos(),
    )
    .normalize()
}

/// Log camera context for debugging
pub fn log_camera_context(camera: &CameraData) {
    log::debug!(
        "[Camera] Position: ({:.1}, {:.1}, {:.1}) | Yaw: {:.1}° | Pitch: {:.1}° | FOV: {:.1}°",
        camera.position.x,
        camera.position.y,
        camera.position.z,
        camera.yaw_radians.to_degrees(),
        camera.pitch_radians.to_degrees(),
        camera.fov_radians.to_degrees()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_distance(plane: Vector4<f32>, p: Vector3<f32>) -> f32 {
        plane.truncate().dot(p) + plane.w
    }

    #[test]
    fn test_default_camera_looks_down_negative_z() {
        let forward = calculate_forward_vector(-std::f32::consts::FRAC_PI_2, 0.0);
        assert!((forward - Vector3::new(0.0, 0.0, -1.0)).magnitude() < 1e-6);
    }

    #[test]
    fn test_looking_at_target() {
        let camera = init_camera_looking_at(Point3::new(0.0, 0.0, 5.0), Point3::new(0.0, 0.0, 0.0));
        let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
        assert!((forward - Vector3::new(0.0, 0.0, -1.0)).magnitude() < 1e-5);
    }

    #[test]
    fn test_projection_depth_range() {
        let camera = CameraData {
            near_plane: 1.0,
            far_plane: 100.0,
            ..Default::default()
        };
        let cull = build_cull_camera(&camera);

        let near = cull.view_projection * Vector4::new(0.0, 0.0, -1.0, 1.0);
        let far = cull.view_projection * Vector4::new(0.0, 0.0, -100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_frustum_planes_classify_points() {
        let camera = CameraData {
            near_plane: 1.0,
            far_plane: 100.0,
            aspect_ratio: 1.0,
            ..Default::default()
        };
        let cull = build_cull_camera(&camera);

        let inside = Vector3::new(0.0, 0.0, -10.0);
        for plane in cull.frustum_planes {
            assert!(plane_distance(plane, inside) > 0.0);
            assert!((plane.truncate().magnitude() - 1.0).abs() < 1e-5);
        }

        // Behind the camera: outside the near plane
        assert!(plane_distance(cull.frustum_planes[4], Vector3::new(0.0, 0.0, 1.0)) < 0.0);
        // Beyond the far plane
        let far = plane_distance(cull.frustum_planes[5], Vector3::new(0.0, 0.0, -150.0));
        assert!((far + 50.0).abs() < 0.1);
        // Far off to the left
        assert!(plane_distance(cull.frustum_planes[0], Vector3::new(-100.0, 0.0, -10.0)) < 0.0);
    }
}
