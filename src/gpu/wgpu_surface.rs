//! wgpu backend
//!
//! Commands are recorded into one pending encoder and go to the queue on
//! [`GpuSurface::submit`]. Uploads use `Queue::write_buffer`, which lands
//! before any command of the next submission; callers keep buffers that
//! are written more than once per frame apart.

use super::resource::{
    BufferDescriptor, BufferUsage, GpuBuffer, GpuTexture, ResourceId, ResourceTracker,
    TextureDescriptor, TextureKind,
};
use super::surface::{CullBindings, DrawPass, FenceValue, GpuSurface, Kernel, MeshletDraw, SurfaceError};
use crate::culling::culling_data::CULL_WORKGROUP_SIZE;
use crate::error::{EngineError, EngineResult};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const PYRAMID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
const HIZ_WORKGROUP_SIZE: u32 = 8;
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65535;

struct WgpuTexture {
    texture: wgpu::Texture,
    /// Every mip level
    view: wgpu::TextureView,
    /// One view per mip level, for storage writes
    mip_views: Vec<wgpu::TextureView>,
    kind: TextureKind,
}

struct Pipelines {
    copy_depth_layout: wgpu::BindGroupLayout,
    copy_depth: wgpu::ComputePipeline,
    reduce_layout: wgpu::BindGroupLayout,
    reduce: wgpu::ComputePipeline,
    cull_layout: wgpu::BindGroupLayout,
    cull: wgpu::ComputePipeline,
    draw_layout: wgpu::BindGroupLayout,
    draw_depth_only: wgpu::RenderPipeline,
    draw_shaded: wgpu::RenderPipeline,
}

/// [`GpuSurface`] on top of a wgpu device
pub struct WgpuSurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    pipelines: Pipelines,
    tracker: ResourceTracker,
    buffers: FxHashMap<ResourceId, wgpu::Buffer>,
    textures: FxHashMap<ResourceId, WgpuTexture>,
    encoder: Option<wgpu::CommandEncoder>,
    submitted: u64,
    in_flight: BTreeMap<u64, wgpu::SubmissionIndex>,
}

impl std::fmt::Debug for WgpuSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuSurface")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("submitted", &self.submitted)
            .finish()
    }
}

impl WgpuSurface {
    /// Device without a window, for offscreen rendering and tools
    pub fn new_headless() -> EngineResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(EngineError::DeviceNotFound)?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Meshlet Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| EngineError::GpuOperationFailed {
            operation: "request_device".to_string(),
            error: e.to_string(),
        })?;

        Self::from_device(device, queue, adapter.get_info())
    }

    /// Wrap an existing device and queue
    pub fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: wgpu::AdapterInfo,
    ) -> EngineResult<Self> {
        let pipelines = create_pipelines(&device)?;

        log::info!(
            "[WgpuSurface] Using {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            pipelines,
            tracker: ResourceTracker::new(),
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            encoder: None,
            submitted: 0,
            in_flight: BTreeMap::new(),
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn pending_encoder<'a>(
        device: &wgpu::Device,
        encoder: &'a mut Option<wgpu::CommandEncoder>,
    ) -> &'a mut wgpu::CommandEncoder {
        encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Meshlet Frame Encoder"),
            })
        })
    }

    fn cull_bind_group(&self, b: &CullBindings<'_>) -> EngineResult<wgpu::BindGroup> {
        let pyramid = lookup_texture(&self.textures, b.pyramid)?;
        let buffers = [
            b.uniform,
            b.meshlets,
            b.cull_data,
            b.instances,
            b.visibility,
            b.draw_args,
            b.visible_list,
            b.stats,
        ];

        let mut entries = Vec::with_capacity(buffers.len() + 1);
        for (binding, handle) in buffers.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: lookup_buffer(&self.buffers, handle)?.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: buffers.len() as u32,
            resource: wgpu::BindingResource::TextureView(&pyramid.view),
        });

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Meshlet Cull Bind Group"),
            layout: &self.pipelines.cull_layout,
            entries: &entries,
        }))
    }

    fn draw_bind_group(&self, draw: &MeshletDraw<'_>) -> EngineResult<wgpu::BindGroup> {
        let buffers = [
            draw.uniform,
            draw.positions,
            draw.unique_vertex_indices,
            draw.primitives,
            draw.meshlets,
            draw.instances,
            draw.visible_list,
        ];

        let mut entries = Vec::with_capacity(buffers.len());
        for (binding, handle) in buffers.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: lookup_buffer(&self.buffers, handle)?.as_entire_binding(),
            });
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Meshlet Draw Bind Group"),
            layout: &self.pipelines.draw_layout,
            entries: &entries,
        }))
    }

    /// Submit pending work plus whatever `record` adds, so a readback
    /// sees everything recorded so far
    fn flush(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut Option<wgpu::CommandEncoder>,
        record: impl FnOnce(&mut wgpu::CommandEncoder),
    ) {
        record(Self::pending_encoder(device, encoder));
        if let Some(encoder) = encoder.take() {
            queue.submit(Some(encoder.finish()));
        }
    }
}

impl GpuSurface for WgpuSurface {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<GpuBuffer> {
        if desc.size % 4 != 0 {
            return Err(SurfaceError::Unaligned {
                offset: 0,
                len: desc.size,
            }
            .into());
        }
        if desc.size > self.device.limits().max_buffer_size {
            return Err(EngineError::BufferCreationFailed {
                size: desc.size,
                usage: format!("{:?}", desc.usage),
            });
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size,
            usage: buffer_usages(desc.usage),
            mapped_at_creation: false,
        });
        let handle = self.tracker.buffer(desc);
        self.buffers.insert(handle.id(), buffer);
        Ok(handle)
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
        self.queue
            .write_buffer(lookup_buffer(&self.buffers, buffer)?, offset, data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> EngineResult<GpuTexture> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(EngineError::TextureCreationFailed {
                width: desc.width,
                height: desc.height,
                reason: format!("'{}' must be within 1..={} on each side", desc.label, max),
            });
        }

        let (format, usage) = match desc.kind {
            TextureKind::Depth => (
                DEPTH_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            ),
            TextureKind::Color => (
                COLOR_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            ),
            TextureKind::DepthPyramid => (
                PYRAMID_FORMAT,
                wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            ),
        };

        let handle = self.tracker.texture(desc);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: handle.mip_levels(),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mip_views = (0..handle.mip_levels())
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(desc.label),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        self.textures.insert(
            handle.id(),
            WgpuTexture {
                texture,
                view,
                mip_views,
                kind: desc.kind,
            },
        );
        Ok(handle)
    }

    fn clear_depth(&mut self, depth: &GpuTexture, value: f32) -> EngineResult<()> {
        let target = &lookup_texture(&self.textures, depth)?.view;
        let encoder = Self::pending_encoder(&self.device, &mut self.encoder);
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Depth"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: target,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(value),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn clear_color(&mut self, color: &GpuTexture, rgba: [f32; 4]) -> EngineResult<()> {
        let target = &lookup_texture(&self.textures, color)?.view;
        let encoder = Self::pending_encoder(&self.device, &mut self.encoder);
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Color"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: rgba[0] as f64,
                        g: rgba[1] as f64,
                        b: rgba[2] as f64,
                        a: rgba[3] as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn dispatch(&mut self, kernel: Kernel<'_>) -> EngineResult<()> {
        match kernel {
            Kernel::CopyDepthToPyramid { depth, pyramid } => {
                let source = lookup_texture(&self.textures, depth)?;
                let target = lookup_texture(&self.textures, pyramid)?;
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Hi-Z Copy Bind Group"),
                    layout: &self.pipelines.copy_depth_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&source.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&target.mip_views[0]),
                        },
                    ],
                });
                record_compute(
                    Self::pending_encoder(&self.device, &mut self.encoder),
                    "Hi-Z Copy",
                    &self.pipelines.copy_depth,
                    &bind_group,
                    (
                        depth.width().div_ceil(HIZ_WORKGROUP_SIZE),
                        depth.height().div_ceil(HIZ_WORKGROUP_SIZE),
                    ),
                );
            }
            Kernel::ReducePyramid {
                pyramid,
                source_level,
            } => {
                let target = lookup_texture(&self.textures, pyramid)?;
                let next = source_level as usize + 1;
                if next >= target.mip_views.len() {
                    return Err(SurfaceError::InvalidLevel {
                        level: source_level + 1,
                        levels: target.mip_views.len() as u32,
                    }
                    .into());
                }
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Hi-Z Reduce Bind Group"),
                    layout: &self.pipelines.reduce_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(
                                &target.mip_views[source_level as usize],
                            ),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::TextureView(&target.mip_views[next]),
                        },
                    ],
                });
                let (width, height) = pyramid.level_size(source_level + 1);
                record_compute(
                    Self::pending_encoder(&self.device, &mut self.encoder),
                    "Hi-Z Reduce",
                    &self.pipelines.reduce,
                    &bind_group,
                    (
                        width.div_ceil(HIZ_WORKGROUP_SIZE),
                        height.div_ceil(HIZ_WORKGROUP_SIZE),
                    ),
                );
            }
            Kernel::CullMeshlets(bindings) => {
                let bind_group = self.cull_bind_group(&bindings)?;
                let workgroups = bindings.invocations.div_ceil(CULL_WORKGROUP_SIZE);
                let x = workgroups.min(MAX_WORKGROUPS_PER_DIMENSION);
                let y = workgroups.div_ceil(MAX_WORKGROUPS_PER_DIMENSION).max(1);
                record_compute(
                    Self::pending_encoder(&self.device, &mut self.encoder),
                    "Meshlet Cull",
                    &self.pipelines.cull,
                    &bind_group,
                    (x, y),
                );
            }
        }
        Ok(())
    }

    fn draw(&mut self, draw: &MeshletDraw<'_>) -> EngineResult<()> {
        let bind_group = self.draw_bind_group(draw)?;
        let depth_view = &lookup_texture(&self.textures, draw.depth)?.view;
        let args = lookup_buffer(&self.buffers, draw.draw_args)?;
        let color_view = match (draw.pass, draw.color) {
            (DrawPass::Shaded, Some(color)) => Some(&lookup_texture(&self.textures, color)?.view),
            (DrawPass::Shaded, None) => {
                return Err(EngineError::InvalidConfig {
                    field: "color".to_string(),
                    value: "None".to_string(),
                    reason: "shaded draws need a color target".to_string(),
                })
            }
            (DrawPass::DepthOnly, _) => None,
        };

        let color_attachments = [color_view.map(|view| wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
        })];
        let pipeline = match draw.pass {
            DrawPass::DepthOnly => &self.pipelines.draw_depth_only,
            DrawPass::Shaded => &self.pipelines.draw_shaded,
        };

        let encoder = Self::pending_encoder(&self.device, &mut self.encoder);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Meshlet Draw"),
            color_attachments: if color_view.is_some() { &color_attachments[..] } else { &[] },
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw_indirect(args, 0);
        Ok(())
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
        let source = lookup_buffer(&self.buffers, src)?;
        let target = lookup_buffer(&self.buffers, dst)?;
        Self::pending_encoder(&self.device, &mut self.encoder)
            .copy_buffer_to_buffer(source, 0, target, 0, size);
        Ok(())
    }

    fn submit(&mut self) -> EngineResult<FenceValue> {
        let commands = self.encoder.take().map(|encoder| encoder.finish());
        let index = self.queue.submit(commands);
        self.submitted += 1;
        self.in_flight.insert(self.submitted, index);
        Ok(FenceValue(self.submitted))
    }

    fn discard_recorded(&mut self) {
        if self.encoder.take().is_some() {
            log::debug!("[WgpuSurface] Discarded recorded commands");
        }
    }

    fn wait(&mut self, fence: FenceValue) -> EngineResult<()> {
        if fence.0 > self.submitted {
            return Err(SurfaceError::FenceNotSubmitted {
                requested: fence.0,
                submitted: self.submitted,
            }
            .into());
        }

        // Anything not in flight any more has already been waited on
        let still_pending = self.in_flight.split_off(&(fence.0 + 1));
        let mut done = std::mem::replace(&mut self.in_flight, still_pending);
        if let Some(index) = done.remove(&fence.0) {
            self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &GpuBuffer) -> EngineResult<Vec<u8>> {
        let size = buffer.size();
        let source = lookup_buffer(&self.buffers, buffer)?;

        if buffer.usage() == BufferUsage::Readback {
            Self::flush(&self.device, &self.queue, &mut self.encoder, |_| {});
            return map_read(&self.device, source, size);
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self::flush(&self.device, &self.queue, &mut self.encoder, |encoder| {
            encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size)
        });
        map_read(&self.device, &staging, size)
    }

    fn read_texture_level(&mut self, texture: &GpuTexture, level: u32) -> EngineResult<Vec<f32>> {
        if level >= texture.mip_levels() {
            return Err(SurfaceError::InvalidLevel {
                level,
                levels: texture.mip_levels(),
            }
            .into());
        }
        let stored = lookup_texture(&self.textures, texture)?;
        let aspect = match stored.kind {
            TextureKind::Depth => wgpu::TextureAspect::DepthOnly,
            TextureKind::DepthPyramid => wgpu::TextureAspect::All,
            TextureKind::Color => {
                return Err(SurfaceError::Unsupported(
                    "color targets are not read back as depth".to_string(),
                )
                .into())
            }
        };
        let source = &stored.texture;

        let (width, height) = texture.level_size(level);
        let unpadded = width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let size = padded as u64 * height as u64;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self::flush(&self.device, &self.queue, &mut self.encoder, |encoder| {
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: source,
                    mip_level: level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        });

        let bytes = map_read(&self.device, &staging, size)?;
        let mut texels = Vec::with_capacity((width * height) as usize);
        for row in bytes.chunks_exact(padded as usize) {
            texels.extend(
                row[..unpadded as usize]
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        }
        Ok(texels)
    }

    fn collect_garbage(&mut self) -> usize {
        let mut freed = 0;
        for id in self.tracker.drain_released() {
            if let Some(buffer) = self.buffers.remove(&id) {
                buffer.destroy();
                freed += 1;
            } else if let Some(texture) = self.textures.remove(&id) {
                texture.texture.destroy();
                freed += 1;
            }
        }
        if freed > 0 {
            log::debug!("[WgpuSurface] Freed {} resources", freed);
        }
        freed
    }
}

fn lookup_buffer<'a>(
    buffers: &'a FxHashMap<ResourceId, wgpu::Buffer>,
    buffer: &GpuBuffer,
) -> EngineResult<&'a wgpu::Buffer> {
    buffers
        .get(&buffer.id())
        .ok_or_else(|| SurfaceError::UnknownResource { kind: "buffer", id: buffer.id() }.into())
}

fn lookup_texture<'a>(
    textures: &'a FxHashMap<ResourceId, WgpuTexture>,
    texture: &GpuTexture,
) -> EngineResult<&'a WgpuTexture> {
    textures
        .get(&texture.id())
        .ok_or_else(|| SurfaceError::UnknownResource { kind: "texture", id: texture.id() }.into())
}

/// Map a MAP_READ buffer after everything submitted so far
fn map_read(device: &wgpu::Device, buffer: &wgpu::Buffer, size: u64) -> EngineResult<Vec<u8>> {
    let buffer_slice = buffer.slice(..size);
    let (sender, receiver) = flume::bounded(1);
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|_| EngineError::BufferMapping {
            operation: "readback recv".to_string(),
        })?
        .map_err(|e| EngineError::BufferMapping {
            operation: format!("readback map_async: {}", e),
        })?;

    let data = buffer_slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(data)
}

fn record_compute(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    workgroups: (u32, u32),
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    match usage {
        BufferUsage::Storage => {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
        }
        BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        BufferUsage::Indirect => {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
        }
        BufferUsage::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: PYRAMID_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

/// Compile WGSL and surface validation errors instead of panicking
fn create_shader(device: &wgpu::Device, name: &str, source: &str) -> EngineResult<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(EngineError::ShaderCompilation {
            source: name.to_string(),
            error: error.to_string(),
        });
    }
    Ok(module)
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module,
        entry_point,
    })
}

fn create_pipelines(device: &wgpu::Device) -> EngineResult<Pipelines> {
    let hiz_shader = create_shader(device, "hiz_reduce", include_str!("../shaders/hiz_reduce.wgsl"))?;
    let cull_shader = create_shader(device, "meshlet_cull", include_str!("../shaders/meshlet_cull.wgsl"))?;
    let draw_shader = create_shader(device, "meshlet_draw", include_str!("../shaders/meshlet_draw.wgsl"))?;

    let copy_depth_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Hi-Z Copy Layout"),
        entries: &[
            texture_entry(0, wgpu::TextureSampleType::Depth),
            storage_texture_entry(1),
        ],
    });
    let reduce_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Hi-Z Reduce Layout"),
        entries: &[
            texture_entry(2, wgpu::TextureSampleType::Float { filterable: false }),
            storage_texture_entry(3),
        ],
    });

    let compute = wgpu::ShaderStages::COMPUTE;
    let cull_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Meshlet Cull Layout"),
        entries: &[
            uniform_entry(0, compute),
            storage_entry(1, true, compute),
            storage_entry(2, true, compute),
            storage_entry(3, true, compute),
            storage_entry(4, false, compute),
            storage_entry(5, false, compute),
            storage_entry(6, false, compute),
            storage_entry(7, false, compute),
            texture_entry(8, wgpu::TextureSampleType::Float { filterable: false }),
        ],
    });

    let vertex = wgpu::ShaderStages::VERTEX;
    let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Meshlet Draw Layout"),
        entries: &[
            uniform_entry(0, vertex),
            storage_entry(1, true, vertex),
            storage_entry(2, true, vertex),
            storage_entry(3, true, vertex),
            storage_entry(4, true, vertex),
            storage_entry(5, true, vertex),
            storage_entry(6, true, vertex),
        ],
    });

    let draw_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Meshlet Draw Pipeline Layout"),
        bind_group_layouts: &[&draw_layout],
        push_constant_ranges: &[],
    });
    let render_pipeline = |label: &str, fragment: Option<wgpu::FragmentState<'_>>| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&draw_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &draw_shader,
                entry_point: "vs_main",
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment,
            multiview: None,
        })
    };

    let color_targets = [Some(wgpu::ColorTargetState {
        format: COLOR_FORMAT,
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    })];
    let draw_depth_only = render_pipeline("Meshlet Depth Prepass", None);
    let draw_shaded = render_pipeline(
        "Meshlet Main Pass",
        Some(wgpu::FragmentState {
            module: &draw_shader,
            entry_point: "fs_main",
            targets: &color_targets,
        }),
    );

    let pipelines = Pipelines {
        copy_depth: compute_pipeline(device, "Hi-Z Copy", &copy_depth_layout, &hiz_shader, "copy_depth"),
        reduce: compute_pipeline(device, "Hi-Z Reduce", &reduce_layout, &hiz_shader, "reduce"),
        cull: compute_pipeline(device, "Meshlet Cull", &cull_layout, &cull_shader, "cull_meshlets"),
        copy_depth_layout,
        reduce_layout,
        cull_layout,
        draw_layout,
        draw_depth_only,
        draw_shaded,
    };

    log::info!("[WgpuSurface] Meshlet pipelines created");
    Ok(pipelines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{build_cull_camera, CameraData};
    use crate::config::{ClusterConfig, CullingConfig, MeshletEngineConfig};
    use crate::culling::{RealtimeStats, TwoPassCullingOrchestrator};
    use crate::geometry::{create_cube, create_quad, create_uv_sphere};
    use crate::gpu::SoftwareSurface;
    use crate::instance::{identity_instance, instance_from_trs};
    use crate::meshlet::build_meshlets;
    use cgmath::{Point3, Vector3};

    /// Rocks well inside, behind and past the far plane, plus a wall hiding a cube
    fn run_frames(surface: &mut dyn GpuSurface, culling: CullingConfig) -> Vec<(RealtimeStats, Vec<u32>)> {
        let config = MeshletEngineConfig {
            culling,
            ..Default::default()
        };
        let cluster = ClusterConfig::default();
        let mut orchestrator = TwoPassCullingOrchestrator::new(surface, 64, 64, &config).expect("orchestrator");

        let rock = build_meshlets(&create_uv_sphere(1.0, 12, 24), &cluster).expect("rock");
        let wall = build_meshlets(&create_quad([0.0, 0.0, 0.0], 6.0, 6.0), &cluster).expect("wall");
        let cube = build_meshlets(&create_cube([0.0, 0.0, 0.0], 1.0), &cluster).expect("cube");
        let rocks = [
            instance_from_trs(Vector3::new(-20.0, 0.0, -40.0), 0.0, 1.0),
            instance_from_trs(Vector3::new(20.0, 0.0, -40.0), 0.0, 1.0),
            instance_from_trs(Vector3::new(0.0, 0.0, 40.0), 0.0, 1.0),
            instance_from_trs(Vector3::new(0.0, 0.0, -500.0), 0.0, 1.0),
        ];
        let groups = [
            orchestrator.register_group(surface, &rock, &rocks).expect("rocks"),
            orchestrator.register_group(surface, &wall, &[identity_instance()]).expect("wall"),
            orchestrator
                .register_group(surface, &cube, &[instance_from_trs(Vector3::new(0.0, 0.0, -10.0), 0.0, 1.0)])
                .expect("cube"),
        ];

        let camera = build_cull_camera(&CameraData {
            position: Point3::new(0.0, 0.0, 5.0),
            aspect_ratio: 1.0,
            near_plane: 0.1,
            far_plane: 100.0,
            ..Default::default()
        });

        (0..2)
            .map(|_| {
                orchestrator.cull_and_draw(surface, &camera, &[]).expect("frame");
                let stats = orchestrator.read_back_stats(surface).expect("stats");
                let bits = groups
                    .iter()
                    .flat_map(|&group| orchestrator.visibility_bits(surface, group).expect("bits"))
                    .collect();
                (stats, bits)
            })
            .collect()
    }

    #[test]
    #[ignore = "needs a GPU adapter"]
    fn test_headless_frames_match_software() {
        let mut gpu = match WgpuSurface::new_headless() {
            Ok(surface) => surface,
            Err(error) => {
                eprintln!("skipping, no adapter: {}", error);
                return;
            }
        };

        for culling in [
            CullingConfig {
                enable_occlusion: false,
                enable_cone_culling: false,
            },
            CullingConfig {
                enable_occlusion: true,
                enable_cone_culling: false,
            },
        ] {
            let mut software = SoftwareSurface::new();
            let expected = run_frames(&mut software, culling);
            let actual = run_frames(&mut gpu, culling);
            assert_eq!(actual, expected, "{:?}", culling);
        }
    }
}
