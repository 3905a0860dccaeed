//! GPU command surface and its backends
//!
//! - resource.rs: RAII buffer and texture handles
//! - surface.rs: the `GpuSurface` capability trait and kernel descriptions
//! - software_surface.rs: host reference backend
//! - wgpu_surface.rs: wgpu backend (feature `wgpu-backend`)

pub mod resource;
pub mod software_surface;
pub mod surface;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_surface;

pub use resource::{
    BufferDescriptor, BufferUsage, GpuBuffer, GpuTexture, ResourceId, ResourceTracker,
    TextureDescriptor, TextureKind,
};
pub use software_surface::SoftwareSurface;
pub use surface::{
    create_buffer_init, read_pod, upload_pod, CullBindings, DrawPass, FenceValue, GpuSurface,
    Kernel, MeshletDraw, SurfaceError,
};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_surface::WgpuSurface;
