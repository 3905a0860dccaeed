//! RAII resource handles
//!
//! Surfaces hand out [`GpuBuffer`] and [`GpuTexture`] handles. Dropping a
//! handle queues its id on a channel; the owning surface frees the backing
//! allocation on its next [`collect_garbage`](super::GpuSurface::collect_garbage).
//! Handles are not `Clone`, so every allocation has exactly one owner.

use std::sync::atomic::{AtomicU64, Ordering};

pub type ResourceId = u64;

/// What a buffer is used for. Backends map this onto their own usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Read-only or read-write shader storage
    Storage,
    Uniform,
    /// Storage that is also consumed as indirect draw arguments
    Indirect,
    /// Host-visible copy destination
    Readback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Depth32Float render target
    Depth,
    /// RGBA8 color render target
    Color,
    /// R32Float mip chain written by compute
    DepthPyramid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub kind: TextureKind,
}

/// Hands out ids and collects released ones
#[derive(Debug)]
pub struct ResourceTracker {
    next_id: AtomicU64,
    sender: flume::Sender<ResourceId>,
    receiver: flume::Receiver<ResourceId>,
}

impl Default for ResourceTracker {
    fn default() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            next_id: AtomicU64::new(1),
            sender,
            receiver,
        }
    }
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self, desc: &BufferDescriptor<'_>) -> GpuBuffer {
        GpuBuffer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            size: desc.size,
            usage: desc.usage,
            release: self.sender.clone(),
        }
    }

    pub fn texture(&self, desc: &TextureDescriptor<'_>) -> GpuTexture {
        GpuTexture {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            width: desc.width,
            height: desc.height,
            mip_levels: desc.mip_levels.max(1),
            kind: desc.kind,
            release: self.sender.clone(),
        }
    }

    /// Ids of every handle dropped since the last call
    pub fn drain_released(&self) -> Vec<ResourceId> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Debug)]
pub struct GpuBuffer {
    id: ResourceId,
    size: u64,
    usage: BufferUsage,
    release: flume::Sender<ResourceId>,
}

impl GpuBuffer {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        // Surface already gone: nothing left to free
        let _ = self.release.send(self.id);
    }
}

#[derive(Debug)]
pub struct GpuTexture {
    id: ResourceId,
    width: u32,
    height: u32,
    mip_levels: u32,
    kind: TextureKind,
    release: flume::Sender<ResourceId>,
}

impl GpuTexture {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    /// Size of `level` under the usual `max(1, size >> level)` rule
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        let _ = self.release.send(self.id);
    }
}
