//! Host reference backend
//!
//! Executes every command eagerly on the CPU. Kernels run the same pure
//! functions the WGSL shaders are ported from, and draws go through a small
//! depth-tested triangle rasterizer, so whole frames can be checked without
//! a GPU.

use super::resource::{
    BufferDescriptor, GpuBuffer, GpuTexture, ResourceId, ResourceTracker, TextureDescriptor,
    TextureKind,
};
use super::surface::{CullBindings, DrawPass, FenceValue, GpuSurface, Kernel, MeshletDraw, SurfaceError};
use crate::culling::cull_operations::{accumulate_stats, evaluate_meshlet_instance};
use crate::culling::culling_data::{
    CullDataGpu, CullPhase, CullUniform, DrawIndirectArgs, MeshletGpu, RealtimeStats,
    VisibleMeshlet,
};
use crate::culling::hiz::reduce_level_cpu;
use crate::error::{EngineError, EngineResult};
use crate::instance::{instance_transform, MeshletInstance};
use crate::meshlet::unpack_triangle;
use bytemuck::Pod;
use cgmath::{Matrix4, Vector4};
use rustc_hash::FxHashMap;

/// Clip-space w below which a vertex is treated as behind the eye
const MIN_CLIP_W: f32 = 1e-5;

#[derive(Debug)]
struct SoftTexture {
    kind: TextureKind,
    sizes: Vec<(u32, u32)>,
    /// Depth and pyramid levels
    levels: Vec<Vec<f32>>,
    /// Packed RGBA8, color targets only
    color: Vec<u32>,
}

/// CPU implementation of [`GpuSurface`]
#[derive(Debug, Default)]
pub struct SoftwareSurface {
    tracker: ResourceTracker,
    buffers: FxHashMap<ResourceId, Vec<u32>>,
    textures: FxHashMap<ResourceId, SoftTexture>,
    submitted: u64,
    dispatches: u64,
    draws: u64,
}

impl SoftwareSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernels dispatched since creation
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    /// Draws issued since creation
    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    /// Overwrite a depth target directly
    pub fn write_depth(&mut self, depth: &GpuTexture, values: &[f32]) -> EngineResult<()> {
        let texture = texture_mut(&mut self.textures, depth)?;
        let level = &mut texture.levels[0];
        if level.len() != values.len() {
            return Err(SurfaceError::OutOfBounds {
                offset: 0,
                len: values.len() as u64,
                size: level.len() as u64,
            }
            .into());
        }
        level.copy_from_slice(values);
        Ok(())
    }

    /// Packed RGBA8 contents of a color target, row-major
    pub fn read_color(&self, color: &GpuTexture) -> EngineResult<Vec<u32>> {
        let texture = texture_ref(&self.textures, color)?;
        if texture.kind != TextureKind::Color {
            return Err(SurfaceError::Unsupported(format!(
                "texture {} is not a color target",
                color.id()
            ))
            .into());
        }
        Ok(texture.color.clone())
    }

    fn run_cull(&mut self, bindings: &CullBindings<'_>) -> EngineResult<()> {
        let uniform = first_pod::<CullUniform>(&self.buffers, bindings.uniform)?;
        let meshlets: Vec<MeshletGpu> = pod_vec(&self.buffers, bindings.meshlets)?;
        let cull_data: Vec<CullDataGpu> = pod_vec(&self.buffers, bindings.cull_data)?;
        let instances: Vec<MeshletInstance> = pod_vec(&self.buffers, bindings.instances)?;

        let pyramid = texture_ref(&self.textures, bindings.pyramid)?;
        let level_count = (uniform.pyramid[2] as usize).min(pyramid.levels.len());
        let level_sizes = &pyramid.sizes[..level_count];
        let levels = &pyramid.levels;
        let sample = |level: u32, x: u32, y: u32| {
            let (width, _) = level_sizes[level as usize];
            levels[level as usize][(y * width + x) as usize]
        };

        let meshlet_count = uniform.counts[0] as usize;
        let instance_count = uniform.counts[1] as usize;
        let phase = uniform.phase();
        let invocations = (bindings.invocations as usize)
            .min(meshlet_count * instance_count)
            .min(meshlets.len() * instances.len())
            .min(cull_data.len() * instances.len());

        let visibility = words(&self.buffers, bindings.visibility)?.to_vec();
        if visibility.len() < invocations {
            return Err(SurfaceError::LayoutMismatch {
                id: bindings.visibility.id(),
                size: bindings.visibility.size(),
                element: "visibility bits",
            }
            .into());
        }

        let mut visible = Vec::new();
        let mut bits = visibility.clone();
        let mut stats = first_pod::<RealtimeStats>(&self.buffers, bindings.stats)?;

        for index in 0..invocations {
            let meshlet = index % meshlet_count;
            let instance = index / meshlet_count;
            let verdict = evaluate_meshlet_instance(
                &uniform,
                &cull_data[meshlet],
                &instances[instance],
                visibility[index] != 0,
                level_sizes,
                sample,
            );

            if verdict.is_visible() {
                visible.push(VisibleMeshlet {
                    instance: instance as u32,
                    meshlet: meshlet as u32,
                });
            }
            if phase == CullPhase::Main {
                bits[index] = verdict.is_visible() as u32;
                accumulate_stats(&mut stats, &meshlets[meshlet], verdict);
            }
        }

        let mut args = first_pod::<DrawIndirectArgs>(&self.buffers, bindings.draw_args)?;
        let list = words_mut(&mut self.buffers, bindings.visible_list)?;
        let start = args.instance_count as usize;
        let capacity = list.len() / 2;
        for (slot, entry) in (start..capacity).zip(&visible) {
            list[slot * 2] = entry.instance;
            list[slot * 2 + 1] = entry.meshlet;
        }
        args.instance_count = (start + visible.len()).min(capacity) as u32;
        write_pod(&mut self.buffers, bindings.draw_args, &args)?;

        if phase == CullPhase::Main {
            words_mut(&mut self.buffers, bindings.visibility)?[..invocations]
                .copy_from_slice(&bits[..invocations]);
            write_pod(&mut self.buffers, bindings.stats, &stats)?;
        }

        Ok(())
    }

    fn run_draw(&mut self, draw: &MeshletDraw<'_>) -> EngineResult<()> {
        let uniform = first_pod::<CullUniform>(&self.buffers, draw.uniform)?;
        let args = first_pod::<DrawIndirectArgs>(&self.buffers, draw.draw_args)?;
        let visible: Vec<VisibleMeshlet> = pod_vec(&self.buffers, draw.visible_list)?;
        let meshlets: Vec<MeshletGpu> = pod_vec(&self.buffers, draw.meshlets)?;
        let instances: Vec<MeshletInstance> = pod_vec(&self.buffers, draw.instances)?;
        let unique = words(&self.buffers, draw.unique_vertex_indices)?.to_vec();
        let primitives = words(&self.buffers, draw.primitives)?.to_vec();
        let positions: Vec<f32> = words(&self.buffers, draw.positions)?
            .iter()
            .map(|&w| f32::from_bits(w))
            .collect();

        let view_proj = Matrix4::from(uniform.view_proj);
        let max_triangles = args.vertex_count / 3;

        let color_id = match (draw.pass, draw.color) {
            (DrawPass::Shaded, Some(color)) => Some(color.id()),
            (DrawPass::Shaded, None) => {
                return Err(EngineError::InvalidConfig {
                    field: "color".to_string(),
                    value: "None".to_string(),
                    reason: "shaded draws need a color target".to_string(),
                })
            }
            (DrawPass::DepthOnly, _) => None,
        };

        let depth_texture = texture_ref(&self.textures, draw.depth)?;
        let (width, height) = depth_texture.sizes[0];
        let mut depth = depth_texture.levels[0].clone();
        let mut color = match color_id {
            Some(id) => {
                let texture = self
                    .textures
                    .get(&id)
                    .ok_or(SurfaceError::UnknownResource { kind: "texture", id })?;
                if texture.sizes[0] != (width, height) {
                    return Err(SurfaceError::Unsupported(
                        "color and depth targets differ in size".to_string(),
                    )
                    .into());
                }
                Some(texture.color.clone())
            }
            None => None,
        };

        let fetch = |global: u32| -> Option<Vector4<f32>> {
            let base = global as usize * 3;
            let p = positions.get(base..base + 3)?;
            Some(Vector4::new(p[0], p[1], p[2], 1.0))
        };

        for entry in visible.iter().take(args.instance_count as usize) {
            let (Some(meshlet), Some(instance)) = (
                meshlets.get(entry.meshlet as usize),
                instances.get(entry.instance as usize),
            ) else {
                continue;
            };
            let mvp = view_proj * instance_transform(instance);

            for triangle in 0..meshlet.primitive_count.min(max_triangles) {
                let Some(&packed) = primitives.get((meshlet.primitive_offset + triangle) as usize)
                else {
                    continue;
                };
                let mut clip = [Vector4::new(0.0, 0.0, 0.0, 0.0); 3];
                let mut valid = true;
                for (corner, local) in unpack_triangle(packed).into_iter().enumerate() {
                    let global = unique
                        .get((meshlet.vertex_offset + local) as usize)
                        .and_then(|&g| fetch(g));
                    match global {
                        Some(p) => clip[corner] = mvp * p,
                        None => valid = false,
                    }
                }
                if !valid {
                    continue;
                }

                rasterize_triangle(
                    &clip,
                    (width, height),
                    &mut depth,
                    color.as_deref_mut().map(|c| (c, meshlet.color)),
                );
            }
        }

        texture_mut(&mut self.textures, draw.depth)?.levels[0] = depth;
        if let (Some(id), Some(color)) = (color_id, color) {
            if let Some(texture) = self.textures.get_mut(&id) {
                texture.color = color;
            }
        }

        Ok(())
    }
}

impl GpuSurface for SoftwareSurface {
    fn backend_name(&self) -> &'static str {
        "software"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<GpuBuffer> {
        if desc.size % 4 != 0 {
            return Err(SurfaceError::Unaligned {
                offset: 0,
                len: desc.size,
            }
            .into());
        }
        let buffer = self.tracker.buffer(desc);
        self.buffers
            .insert(buffer.id(), vec![0; (desc.size / 4) as usize]);
        log::trace!("[SoftwareSurface] Buffer '{}' ({} bytes)", desc.label, desc.size);
        Ok(buffer)
    }

    fn upload(&mut self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> EngineResult<()> {
        let len = data.len() as u64;
        if offset % 4 != 0 || len % 4 != 0 {
            return Err(SurfaceError::Unaligned { offset, len }.into());
        }
        if offset + len > buffer.size() {
            return Err(SurfaceError::OutOfBounds {
                offset,
                len,
                size: buffer.size(),
            }
            .into());
        }

        let storage = words_mut(&mut self.buffers, buffer)?;
        let start = (offset / 4) as usize;
        for (dst, chunk) in storage[start..].iter_mut().zip(data.chunks_exact(4)) {
            *dst = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> EngineResult<GpuTexture> {
        if desc.width == 0 || desc.height == 0 {
            return Err(EngineError::TextureCreationFailed {
                width: desc.width,
                height: desc.height,
                reason: format!("'{}' has a zero dimension", desc.label),
            });
        }

        let texture = self.tracker.texture(desc);
        let sizes: Vec<(u32, u32)> = (0..texture.mip_levels())
            .map(|level| texture.level_size(level))
            .collect();
        let (levels, color) = match desc.kind {
            TextureKind::Color => (Vec::new(), vec![0; (desc.width * desc.height) as usize]),
            TextureKind::Depth | TextureKind::DepthPyramid => (
                sizes.iter().map(|&(w, h)| vec![1.0; (w * h) as usize]).collect(),
                Vec::new(),
            ),
        };

        self.textures.insert(
            texture.id(),
            SoftTexture {
                kind: desc.kind,
                sizes,
                levels,
                color,
            },
        );
        Ok(texture)
    }

    fn clear_depth(&mut self, depth: &GpuTexture, value: f32) -> EngineResult<()> {
        let texture = texture_mut(&mut self.textures, depth)?;
        for level in &mut texture.levels {
            level.fill(value);
        }
        Ok(())
    }

    fn clear_color(&mut self, color: &GpuTexture, rgba: [f32; 4]) -> EngineResult<()> {
        let packed = u32::from_le_bytes(rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8));
        texture_mut(&mut self.textures, color)?.color.fill(packed);
        Ok(())
    }

    fn dispatch(&mut self, kernel: Kernel<'_>) -> EngineResult<()> {
        self.dispatches += 1;
        match kernel {
            Kernel::CopyDepthToPyramid { depth, pyramid } => {
                let source = texture_ref(&self.textures, depth)?.levels[0].clone();
                let target = texture_mut(&mut self.textures, pyramid)?;
                if target.levels[0].len() != source.len() {
                    return Err(SurfaceError::Unsupported(
                        "depth target and pyramid level 0 differ in size".to_string(),
                    )
                    .into());
                }
                target.levels[0] = source;
                Ok(())
            }
            Kernel::ReducePyramid {
                pyramid,
                source_level,
            } => {
                let target = texture_mut(&mut self.textures, pyramid)?;
                let next = source_level as usize + 1;
                if next >= target.levels.len() {
                    return Err(SurfaceError::InvalidLevel {
                        level: source_level + 1,
                        levels: target.levels.len() as u32,
                    }
                    .into());
                }
                let (width, height) = target.sizes[source_level as usize];
                let (reduced, _) = reduce_level_cpu(&target.levels[source_level as usize], width, height);
                target.levels[next] = reduced;
                Ok(())
            }
            Kernel::CullMeshlets(bindings) => self.run_cull(&bindings),
        }
    }

    fn draw(&mut self, draw: &MeshletDraw<'_>) -> EngineResult<()> {
        self.draws += 1;
        self.run_draw(draw)
    }

    fn copy_buffer(&mut self, src: &GpuBuffer, dst: &GpuBuffer, size: u64) -> EngineResult<()> {
        if size > src.size() || size > dst.size() {
            return Err(SurfaceError::OutOfBounds {
                offset: 0,
                len: size,
                size: src.size().min(dst.size()),
            }
            .into());
        }
        let count = (size / 4) as usize;
        let source = words(&self.buffers, src)?[..count].to_vec();
        words_mut(&mut self.buffers, dst)?[..count].copy_from_slice(&source);
        Ok(())
    }

    fn submit(&mut self) -> EngineResult<FenceValue> {
        self.submitted += 1;
        Ok(FenceValue(self.submitted))
    }

    fn discard_recorded(&mut self) {}

    fn wait(&mut self, fence: FenceValue) -> EngineResult<()> {
        if fence.0 > self.submitted {
            return Err(SurfaceError::FenceNotSubmitted {
                requested: fence.0,
                submitted: self.submitted,
            }
            .into());
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &GpuBuffer) -> EngineResult<Vec<u8>> {
        Ok(words(&self.buffers, buffer)?
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect())
    }

    fn read_texture_level(&mut self, texture: &GpuTexture, level: u32) -> EngineResult<Vec<f32>> {
        let stored = texture_ref(&self.textures, texture)?;
        stored.levels.get(level as usize).cloned().ok_or_else(|| {
            SurfaceError::InvalidLevel {
                level,
                levels: stored.levels.len() as u32,
            }
            .into()
        })
    }

    fn collect_garbage(&mut self) -> usize {
        let released = self.tracker.drain_released();
        let mut freed = 0;
        for id in released {
            if self.buffers.remove(&id).is_some() || self.textures.remove(&id).is_some() {
                freed += 1;
            }
        }
        if freed > 0 {
            log::debug!("[SoftwareSurface] Freed {} resources", freed);
        }
        freed
    }
}

fn words<'a>(buffers: &'a FxHashMap<ResourceId, Vec<u32>>, buffer: &GpuBuffer) -> EngineResult<&'a [u32]> {
    buffers
        .get(&buffer.id())
        .map(Vec::as_slice)
        .ok_or_else(|| unknown("buffer", buffer.id()))
}

fn words_mut<'a>(
    buffers: &'a mut FxHashMap<ResourceId, Vec<u32>>,
    buffer: &GpuBuffer,
) -> EngineResult<&'a mut [u32]> {
    buffers
        .get_mut(&buffer.id())
        .map(Vec::as_mut_slice)
        .ok_or_else(|| unknown("buffer", buffer.id()))
}

fn texture_ref<'a>(
    textures: &'a FxHashMap<ResourceId, SoftTexture>,
    texture: &GpuTexture,
) -> EngineResult<&'a SoftTexture> {
    textures
        .get(&texture.id())
        .ok_or_else(|| unknown("texture", texture.id()))
}

fn texture_mut<'a>(
    textures: &'a mut FxHashMap<ResourceId, SoftTexture>,
    texture: &GpuTexture,
) -> EngineResult<&'a mut SoftTexture> {
    textures
        .get_mut(&texture.id())
        .ok_or_else(|| unknown("texture", texture.id()))
}

fn unknown(kind: &'static str, id: ResourceId) -> EngineError {
    SurfaceError::UnknownResource { kind, id }.into()
}

/// Every whole `T` stored in a buffer
fn pod_vec<T: Pod>(buffers: &FxHashMap<ResourceId, Vec<u32>>, buffer: &GpuBuffer) -> EngineResult<Vec<T>> {
    let storage = words(buffers, buffer)?;
    let stride = std::mem::size_of::<T>() / 4;
    let whole = storage.len() / stride * stride;
    Ok(bytemuck::cast_slice::<u32, T>(&storage[..whole]).to_vec())
}

fn first_pod<T: Pod>(buffers: &FxHashMap<ResourceId, Vec<u32>>, buffer: &GpuBuffer) -> EngineResult<T> {
    pod_vec::<T>(buffers, buffer)?.first().copied().ok_or_else(|| {
        SurfaceError::LayoutMismatch {
            id: buffer.id(),
            size: buffer.size(),
            element: std::any::type_name::<T>(),
        }
        .into()
    })
}

fn write_pod<T: Pod>(
    buffers: &mut FxHashMap<ResourceId, Vec<u32>>,
    buffer: &GpuBuffer,
    value: &T,
) -> EngineResult<()> {
    let source: &[u32] = bytemuck::cast_slice(std::slice::from_ref(value));
    let storage = words_mut(buffers, buffer)?;
    if storage.len() < source.len() {
        return Err(SurfaceError::OutOfBounds {
            offset: 0,
            len: std::mem::size_of::<T>() as u64,
            size: buffer.size(),
        }
        .into());
    }
    storage[..source.len()].copy_from_slice(source);
    Ok(())
}

#[inline]
fn edge(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Depth-tested (less-equal) rasterization of one clip-space triangle.
/// Both windings are drawn; triangles touching the eye plane are skipped.
fn rasterize_triangle(
    clip: &[Vector4<f32>; 3],
    (width, height): (u32, u32),
    depth: &mut [f32],
    color: Option<(&mut [u32], u32)>,
) {
    if clip.iter().any(|c| c.w <= MIN_CLIP_W) {
        return;
    }

    let screen = clip.map(|c| {
        let ndc = c.truncate() / c.w;
        (
            [
                (ndc.x * 0.5 + 0.5) * width as f32,
                (1.0 - (ndc.y * 0.5 + 0.5)) * height as f32,
            ],
            ndc.z,
        )
    });
    let (p0, p1, p2) = (screen[0].0, screen[1].0, screen[2].0);

    let area = edge(p0, p1, p2);
    if area == 0.0 || !area.is_finite() {
        return;
    }

    let min_x = p0[0].min(p1[0]).min(p2[0]).floor().max(0.0) as u32;
    let min_y = p0[1].min(p1[1]).min(p2[1]).floor().max(0.0) as u32;
    let max_x = (p0[0].max(p1[0]).max(p2[0]).ceil().max(0.0) as u32).min(width);
    let max_y = (p0[1].max(p1[1]).max(p2[1]).ceil().max(0.0) as u32).min(height);

    let mut color = color;
    for y in min_y..max_y {
        for x in min_x..max_x {
            let p = [x as f32 + 0.5, y as f32 + 0.5];
            let b0 = edge(p1, p2, p) / area;
            let b1 = edge(p2, p0, p) / area;
            let b2 = edge(p0, p1, p) / area;
            if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                continue;
            }

            let z = b0 * screen[0].1 + b1 * screen[1].1 + b2 * screen[2].1;
            if !(0.0..=1.0).contains(&z) {
                continue;
            }

            let index = (y * width + x) as usize;
            if z <= depth[index] {
                depth[index] = z;
                if let Some((target, value)) = color.as_mut() {
                    target[index] = *value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{create_buffer_init, read_pod, BufferUsage};

    fn depth_target(surface: &mut SoftwareSurface, width: u32, height: u32) -> GpuTexture {
        surface
            .create_texture(&TextureDescriptor {
                label: "depth",
                width,
                height,
                mip_levels: 1,
                kind: TextureKind::Depth,
            })
            .expect("depth target")
    }

    #[test]
    fn test_upload_and_read_back() {
        let mut surface = SoftwareSurface::new();
        let buffer = create_buffer_init(&mut surface, "data", BufferUsage::Storage, &[1u32, 2, 3, 4])
            .expect("buffer");

        surface
            .upload(&buffer, 8, bytemuck::cast_slice(&[30u32]))
            .expect("partial upload");
        let data: Vec<u32> = read_pod(&mut surface, &buffer).expect("read");
        assert_eq!(data, vec![1, 2, 30, 4]);
    }

    #[test]
    fn test_upload_bounds_and_alignment() {
        let mut surface = SoftwareSurface::new();
        let buffer = surface
            .create_buffer(&BufferDescriptor {
                label: "small",
                size: 8,
                usage: BufferUsage::Storage,
            })
            .expect("buffer");

        let overflow = surface.upload(&buffer, 4, &[0u8; 8]);
        assert!(matches!(overflow, Err(EngineError::BufferAccess { .. })));
        let unaligned = surface.upload(&buffer, 2, &[0u8; 4]);
        assert!(matches!(unaligned, Err(EngineError::GpuOperationFailed { .. })));
    }

    #[test]
    fn test_dropped_resources_are_collected() {
        let mut surface = SoftwareSurface::new();
        let buffer = create_buffer_init(&mut surface, "tmp", BufferUsage::Storage, &[0u32; 4])
            .expect("buffer");
        let texture = depth_target(&mut surface, 4, 4);
        assert_eq!(surface.collect_garbage(), 0);

        drop(buffer);
        drop(texture);
        assert_eq!(surface.collect_garbage(), 2);
        assert!(surface.buffers.is_empty());
        assert!(surface.textures.is_empty());
    }

    #[test]
    fn test_fences() {
        let mut surface = SoftwareSurface::new();
        assert!(surface.wait(FenceValue(1)).is_err());
        let fence = surface.submit().expect("submit");
        assert!(surface.wait(fence).is_ok());
        assert!(surface.submit().expect("submit") > fence);
    }

    #[test]
    fn test_rasterizer_covers_and_depth_tests() {
        let mut depth = vec![1.0f32; 16];
        let mut color = vec![0u32; 16];

        // Full-screen pair at depth 0.5, clockwise and counter-clockwise
        let quad = |z: f32| {
            [
                [
                    Vector4::new(-1.0, -1.0, z, 1.0),
                    Vector4::new(1.0, -1.0, z, 1.0),
                    Vector4::new(1.0, 1.0, z, 1.0),
                ],
                [
                    Vector4::new(-1.0, -1.0, z, 1.0),
                    Vector4::new(-1.0, 1.0, z, 1.0),
                    Vector4::new(1.0, 1.0, z, 1.0),
                ],
            ]
        };

        for tri in quad(0.5) {
            rasterize_triangle(&tri, (4, 4), &mut depth, Some((&mut color, 7)));
        }
        assert!(depth.iter().all(|&d| (d - 0.5).abs() < 1e-6));
        assert!(color.iter().all(|&c| c == 7));

        // Farther geometry loses the depth test
        for tri in quad(0.75) {
            rasterize_triangle(&tri, (4, 4), &mut depth, Some((&mut color, 9)));
        }
        assert!(depth.iter().all(|&d| (d - 0.5).abs() < 1e-6));
        assert!(color.iter().all(|&c| c == 7));

        // Geometry behind the eye is skipped
        let behind = [
            Vector4::new(-1.0, -1.0, 0.1, -1.0),
            Vector4::new(1.0, -1.0, 0.1, 1.0),
            Vector4::new(1.0, 1.0, 0.1, 1.0),
        ];
        rasterize_triangle(&behind, (4, 4), &mut depth, None);
        assert!(depth.iter().all(|&d| (d - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_pyramid_reduction_kernels() {
        let mut surface = SoftwareSurface::new();
        let depth = depth_target(&mut surface, 4, 4);
        let pyramid = surface
            .create_texture(&TextureDescriptor {
                label: "pyramid",
                width: 4,
                height: 4,
                mip_levels: 2,
                kind: TextureKind::DepthPyramid,
            })
            .expect("pyramid");

        let values: Vec<f32> = (0..16).map(|i| i as f32 / 16.0).collect();
        surface.write_depth(&depth, &values).expect("write depth");
        surface
            .dispatch(Kernel::CopyDepthToPyramid {
                depth: &depth,
                pyramid: &pyramid,
            })
            .expect("copy");
        surface
            .dispatch(Kernel::ReducePyramid {
                pyramid: &pyramid,
                source_level: 0,
            })
            .expect("reduce");

        let level1 = surface.read_texture_level(&pyramid, 1).expect("level 1");
        assert_eq!(level1, vec![5.0 / 16.0, 7.0 / 16.0, 13.0 / 16.0, 15.0 / 16.0]);

        let past_end = surface.dispatch(Kernel::ReducePyramid {
            pyramid: &pyramid,
            source_level: 1,
        });
        assert!(past_end.is_err());
    }
}
