/// Camera Module - Data-Oriented Programming (DOP) style
///
/// This module follows pure DOP principles:
/// - camera_data.rs: Pure data structures with NO methods
/// - camera_operations.rs: Pure functions that operate on data
///
/// The culling code only ever sees a [`CullCamera`]: matrices, six
/// normalized clip planes and the eye position for one frame.

pub mod camera_data;
pub mod camera_operations;

pub use camera_data::{CameraData, CullCamera};

pub use camera_operations::{
    // Initialization
    init_camera,
    init_camera_looking_at,

    // View/projection
    build_view_matrix,
    build_projection_matrix,
    build_cull_camera,
    extract_frustum_planes,

    // Updates
    update_aspect_ratio,

    // Utilities
    calculate_forward_vector,
    log_camera_context,
    OPENGL_TO_WGPU_MATRIX,
};
