//! GPU command surface
//!
//! The narrow capability interface the culling core is written against.
//! Every backend implements it once; nothing above this layer names a
//! concrete graphics API type.

use super::resource::{BufferDescriptor, GpuBuffer, GpuTexture, TextureDescriptor};
use crate::error::{EngineError, EngineResult};

/// Monotonic submission counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(pub u64);

/// Buffers a cull dispatch reads and writes
#[derive(Debug, Clone, Copy)]
pub struct CullBindings<'a> {
    pub uniform: &'a GpuBuffer,
    pub meshlets: &'a GpuBuffer,
    pub cull_data: &'a GpuBuffer,
    pub instances: &'a GpuBuffer,
    pub visibility: &'a GpuBuffer,
    pub draw_args: &'a GpuBuffer,
    pub visible_list: &'a GpuBuffer,
    pub stats: &'a GpuBuffer,
    pub pyramid: &'a GpuTexture,
    /// meshlet count * instance count
    pub invocations: u32,
}

/// Compute work the core dispatches
#[derive(Debug, Clone, Copy)]
pub enum Kernel<'a> {
    /// Copy the depth target into pyramid level 0
    CopyDepthToPyramid {
        depth: &'a GpuTexture,
        pyramid: &'a GpuTexture,
    },
    /// Max-reduce `source_level` into `source_level + 1`
    ReducePyramid {
        pyramid: &'a GpuTexture,
        source_level: u32,
    },
    /// One invocation per meshlet instance
    CullMeshlets(CullBindings<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPass {
    DepthOnly,
    Shaded,
}

/// Indirect draw of the meshlets a cull dispatch appended
#[derive(Debug, Clone, Copy)]
pub struct MeshletDraw<'a> {
    pub pass: DrawPass,
    pub depth: &'a GpuTexture,
    /// Required for [`DrawPass::Shaded`]
    pub color: Option<&'a GpuTexture>,
    pub uniform: &'a GpuBuffer,
    /// Flat xyz floats
    pub positions: &'a GpuBuffer,
    pub unique_vertex_indices: &'a GpuBuffer,
    pub primitives: &'a GpuBuffer,
    pub meshlets: &'a GpuBuffer,
    pub instances: &'a GpuBuffer,
    pub visible_list: &'a GpuBuffer,
    pub draw_args: &'a GpuBuffer,
}

pub trait GpuSurface {
    fn backend_name(&self) -> &'static str;

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<GpuBuffer>;

    /// Write `data` at byte `offset`. Offsets and lengths are multiples of 4.
    fn upload(&mut self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> EngineResult<()>;

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> EngineResult<GpuTexture>;

    fn clear_depth(&mut self, depth: &GpuTexture, value: f32) -> EngineResult<()>;

    fn clear_color(&mut self, color: &GpuTexture, rgba: [f32; 4]) -> EngineResult<()>;

    fn dispatch(&mut self, kernel: Kernel<'_>) -> EngineResult<()>;

    fn draw(&mut self, draw: &MeshletDraw<'_>) -> EngineResult<()>;

    fn copy_buffer(&mut self, src: &GpuBuffer, dst: &GpuBuffer, size: u64) -> EngineResult<()>;

    /// Submit everything recorded so far
    fn submit(&mut self) -> EngineResult<FenceValue>;

    /// Drop recorded but unsubmitted work. Eager backends have nothing to drop.
    fn discard_recorded(&mut self);

    /// Block until the submission behind `fence` has finished
    fn wait(&mut self, fence: FenceValue) -> EngineResult<()>;

    /// Contents of a buffer after all submitted work. Blocks.
    fn read_buffer(&mut self, buffer: &GpuBuffer) -> EngineResult<Vec<u8>>;

    /// One level of an R32Float pyramid or the depth target, row-major
    fn read_texture_level(&mut self, texture: &GpuTexture, level: u32) -> EngineResult<Vec<f32>>;

    /// Free allocations whose handles were dropped. Returns how many.
    fn collect_garbage(&mut self) -> usize;
}

/// Backend-side failures
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("unknown {kind} handle {id}")]
    UnknownResource { kind: &'static str, id: u64 },

    #[error("write of {len} bytes at offset {offset} overflows buffer of {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("unaligned access: offset {offset}, length {len}")]
    Unaligned { offset: u64, len: u64 },

    #[error("buffer {id} holds {size} bytes, not a whole number of {element}")]
    LayoutMismatch {
        id: u64,
        size: u64,
        element: &'static str,
    },

    #[error("fence {requested} has not been submitted (last is {submitted})")]
    FenceNotSubmitted { requested: u64, submitted: u64 },

    #[error("texture level {level} out of range ({levels} levels)")]
    InvalidLevel { level: u32, levels: u32 },

    #[error("{0}")]
    Unsupported(String),
}

impl From<SurfaceError> for EngineError {
    fn from(error: SurfaceError) -> Self {
        match error {
            SurfaceError::UnknownResource { kind, id } => EngineError::ResourceNotFound {
                resource_type: kind.to_string(),
                id: id.to_string(),
            },
            SurfaceError::OutOfBounds { offset, len, size } => EngineError::BufferAccess {
                index: (offset + len) as usize,
                size: size as usize,
            },
            other => EngineError::GpuOperationFailed {
                operation: "surface".to_string(),
                error: other.to_string(),
            },
        }
    }
}

/// Upload a slice of plain-old-data values
pub fn upload_pod<T: bytemuck::Pod>(
    surface: &mut dyn GpuSurface,
    buffer: &GpuBuffer,
    data: &[T],
) -> EngineResult<()> {
    surface.upload(buffer, 0, bytemuck::cast_slice(data))
}

/// Create a buffer sized for `data` and upload it
pub fn create_buffer_init<T: bytemuck::Pod>(
    surface: &mut dyn GpuSurface,
    label: &str,
    usage: super::resource::BufferUsage,
    data: &[T],
) -> EngineResult<GpuBuffer> {
    // Zero-sized bindings are invalid on most backends
    let size = (std::mem::size_of_val(data) as u64).max(4);
    let buffer = surface.create_buffer(&BufferDescriptor { label, size, usage })?;
    if !data.is_empty() {
        upload_pod(surface, &buffer, data)?;
    }
    Ok(buffer)
}

/// Read a buffer back as plain-old-data values
pub fn read_pod<T: bytemuck::Pod>(
    surface: &mut dyn GpuSurface,
    buffer: &GpuBuffer,
) -> EngineResult<Vec<T>> {
    let bytes = surface.read_buffer(buffer)?;
    let element = std::mem::size_of::<T>();
    let whole = bytes.len() / element * element;
    Ok(bytemuck::pod_collect_to_vec(&bytes[..whole]))
}
