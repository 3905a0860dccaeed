// Hearth Meshlet - meshlet clustering and two-pass occlusion culling
//
// Data-Oriented Programming (DOP) layout, same as the rest of Hearth:
// - *_data.rs files hold plain data
// - *_operations.rs files hold pure functions over that data
// - GPU work goes through the `GpuSurface` trait so the whole frame protocol
//   runs against the software backend in tests
//
// Offline: MeshData -> build_meshlets -> MeshletMesh (meshlets, packed
// triangles, cull data). Per frame: TwoPassCullingOrchestrator runs the
// prepass, rebuilds the Hi-Z pyramid and runs the main pass.

// Core
pub mod config;
pub mod error;

// Offline clustering
pub mod geometry;
pub mod meshlet;

// Per-frame culling
pub mod camera;
pub mod culling;
pub mod instance;

// GPU surface and backends
pub mod gpu;

pub use camera::{build_cull_camera, CameraData, CullCamera};
pub use config::{ClusterConfig, CullingConfig, HiZConfig, MeshletEngineConfig};
pub use culling::{
    CullPhase, FrameState, HiZPyramid, InstanceUpdate, MeshletGroupId, RealtimeStats,
    TwoPassCullingOrchestrator,
};
pub use error::{EngineError, EngineResult, ErrorContext, OptionExt};
pub use geometry::MeshData;
pub use gpu::{GpuSurface, SoftwareSurface};
pub use instance::MeshletInstance;
pub use meshlet::{build_meshlets, build_meshlets_parallel, MeshletMesh, MeshletStore};

#[cfg(feature = "wgpu-backend")]
pub use gpu::WgpuSurface;

// Re-export wgpu for hosts that bring their own device
#[cfg(feature = "wgpu-backend")]
pub use wgpu;
