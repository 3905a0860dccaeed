//! Two-pass occlusion culling, one frame at a time
//!
//! Frame protocol, strictly in order:
//!
//! 1. `DepthPrepass`: meshlet instances visible last frame that pass the
//!    frustum and cone tests are drawn depth-only.
//! 2. `PyramidRebuild`: the Hi-Z pyramid is rebuilt from that depth.
//! 3. `MainPass`: every meshlet instance is tested against frustum, cone
//!    and the fresh pyramid. Survivors are shaded and marked visible for
//!    the next frame; statistics are accumulated.
//! 4. `StatsCopied`: statistics are copied for readback and the frame is
//!    submitted.
//!
//! A failure anywhere abandons the whole frame: recorded work is dropped,
//! instance updates are rolled back, the frame counter does not advance
//! and no visibility handoff is published. The main pass writes the
//! pending half of each group's visibility bits, which only becomes
//! current after submit.

use super::culling_data::{
    CullDataGpu, CullPhase, CullUniform, DrawIndirectArgs, FrameState, MeshletGpu, RealtimeStats,
    VisibleMeshlet,
};
use super::hiz::HiZPyramid;
use super::visibility::{VisibilityBits, VisibilityHandoff, VisibilityStateStore};
use crate::camera::CullCamera;
use crate::config::MeshletEngineConfig;
use crate::error::{EngineError, EngineResult, OptionExt};
use crate::gpu::{
    create_buffer_init, read_pod, upload_pod, BufferDescriptor, BufferUsage, CullBindings,
    DrawPass, FenceValue, GpuBuffer, GpuSurface, GpuTexture, Kernel, MeshletDraw,
    TextureDescriptor, TextureKind,
};
use crate::instance::MeshletInstance;
use crate::meshlet::MeshletMesh;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const FAR_DEPTH: f32 = 1.0;

/// Handle to a mesh registered with the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshletGroupId(pub u32);

/// New instance list for one group, applied at the start of a frame
#[derive(Debug, Clone, Copy)]
pub struct InstanceUpdate<'a> {
    pub group: MeshletGroupId,
    pub instances: &'a [MeshletInstance],
}

/// Buffers written during one phase. Kept apart per phase so queued
/// uploads for the main pass cannot clobber the prepass.
#[derive(Debug)]
struct PhaseBuffers {
    uniform: GpuBuffer,
    draw_args: GpuBuffer,
    visible_list: GpuBuffer,
}

/// One uploaded mesh and its instances
#[derive(Debug)]
struct MeshletGroup {
    meshlet_count: u32,
    max_primitives: u32,
    positions: GpuBuffer,
    unique_vertex_indices: GpuBuffer,
    primitives: GpuBuffer,
    meshlets: GpuBuffer,
    cull_data: GpuBuffer,
    instances: GpuBuffer,
    instance_count: u32,
    /// Indexed by `CullPhase as usize`
    phases: [PhaseBuffers; 2],
}

/// Group state an instance update replaced, put back if the frame is abandoned
#[derive(Debug)]
struct ReplacedInstances {
    group: usize,
    instances: GpuBuffer,
    instance_count: u32,
    phases: Option<[PhaseBuffers; 2]>,
    bits: Option<VisibilityBits>,
}

fn create_phase_buffers(
    surface: &mut dyn GpuSurface,
    meshlet_count: u32,
    instance_count: u32,
) -> EngineResult<PhaseBuffers> {
    let slots = (meshlet_count as u64 * instance_count as u64).max(1);
    Ok(PhaseBuffers {
        uniform: surface.create_buffer(&BufferDescriptor {
            label: "Cull Uniform",
            size: std::mem::size_of::<CullUniform>() as u64,
            usage: BufferUsage::Uniform,
        })?,
        draw_args: surface.create_buffer(&BufferDescriptor {
            label: "Meshlet Draw Args",
            size: std::mem::size_of::<DrawIndirectArgs>() as u64,
            usage: BufferUsage::Indirect,
        })?,
        visible_list: surface.create_buffer(&BufferDescriptor {
            label: "Visible Meshlets",
            size: slots * std::mem::size_of::<VisibleMeshlet>() as u64,
            usage: BufferUsage::Storage,
        })?,
    })
}

/// Drives the per-frame two-pass culling protocol
#[derive(Debug)]
pub struct TwoPassCullingOrchestrator {
    config: MeshletEngineConfig,
    depth: GpuTexture,
    color: GpuTexture,
    pyramid: HiZPyramid,
    groups: Vec<MeshletGroup>,
    visibility: VisibilityStateStore,
    stats: GpuBuffer,
    stats_readback: GpuBuffer,
    state: FrameState,
    frame_index: u64,
    /// Frame number and fence of the last submitted frame
    last_completed: Option<(u64, FenceValue)>,
    /// Undo log of the frame in flight
    replaced: Vec<ReplacedInstances>,
    /// Handoff consumed by the frame in flight
    taken_handoff: Option<VisibilityHandoff>,
}

impl TwoPassCullingOrchestrator {
    pub fn new(
        surface: &mut dyn GpuSurface,
        width: u32,
        height: u32,
        config: &MeshletEngineConfig,
    ) -> EngineResult<Self> {
        config.validate().map_err(|e| EngineError::InvalidConfig {
            field: "config".to_string(),
            value: format!("{:?}", config),
            reason: e.to_string(),
        })?;

        let (depth, color, pyramid) = create_targets(surface, width, height, config)?;
        let stats = create_buffer_init(
            surface,
            "Realtime Stats",
            BufferUsage::Storage,
            &[RealtimeStats::default()],
        )?;
        let stats_readback = surface.create_buffer(&BufferDescriptor {
            label: "Realtime Stats Readback",
            size: std::mem::size_of::<RealtimeStats>() as u64,
            usage: BufferUsage::Readback,
        })?;

        log::info!(
            "[TwoPassCullingOrchestrator] Initialized {}x{} on {} backend (occlusion={}, cone={})",
            width,
            height,
            surface.backend_name(),
            config.culling.enable_occlusion,
            config.culling.enable_cone_culling
        );

        Ok(Self {
            config: *config,
            depth,
            color,
            pyramid,
            groups: Vec::new(),
            visibility: VisibilityStateStore::new(),
            stats,
            stats_readback,
            state: FrameState::Idle,
            frame_index: 0,
            last_completed: None,
            replaced: Vec::new(),
            taken_handoff: None,
        })
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Number of frames completed so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn depth_target(&self) -> &GpuTexture {
        &self.depth
    }

    pub fn color_target(&self) -> &GpuTexture {
        &self.color
    }

    pub fn pyramid(&self) -> &HiZPyramid {
        &self.pyramid
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Upload a built mesh with its initial instances
    pub fn register_group(
        &mut self,
        surface: &mut dyn GpuSurface,
        mesh: &MeshletMesh,
        instances: &[MeshletInstance],
    ) -> EngineResult<MeshletGroupId> {
        self.require_between_frames()?;

        let meshlet_count = mesh.meshlet_count();
        let instance_count = instances.len() as u32;
        let positions: Vec<f32> = mesh.positions.iter().flatten().copied().collect();
        let meshlets: Vec<MeshletGpu> = mesh.packed.meshlets.iter().map(MeshletGpu::from).collect();
        let cull_data: Vec<CullDataGpu> = mesh.cull_data.iter().map(CullDataGpu::from).collect();
        let max_primitives = mesh
            .packed
            .meshlets
            .iter()
            .map(|m| m.primitive_count)
            .max()
            .unwrap_or(0);

        let group = MeshletGroup {
            meshlet_count,
            max_primitives,
            positions: create_buffer_init(surface, "Meshlet Positions", BufferUsage::Storage, &positions)?,
            unique_vertex_indices: create_buffer_init(
                surface,
                "Meshlet Unique Vertex Indices",
                BufferUsage::Storage,
                &mesh.packed.unique_vertex_indices,
            )?,
            primitives: create_buffer_init(
                surface,
                "Meshlet Packed Primitives",
                BufferUsage::Storage,
                &mesh.packed.packed_primitives,
            )?,
            meshlets: create_buffer_init(surface, "Meshlets", BufferUsage::Storage, &meshlets)?,
            cull_data: create_buffer_init(surface, "Meshlet Cull Data", BufferUsage::Storage, &cull_data)?,
            instances: create_buffer_init(surface, "Meshlet Instances", BufferUsage::Storage, instances)?,
            instance_count,
            phases: [
                create_phase_buffers(surface, meshlet_count, instance_count)?,
                create_phase_buffers(surface, meshlet_count, instance_count)?,
            ],
        };

        let bits = VisibilityBits::new(surface, meshlet_count, instance_count)?;
        let index = self.visibility.add_group(bits);
        self.groups.push(group);

        log::info!(
            "[TwoPassCullingOrchestrator] Registered group {} ({} meshlets, {} instances)",
            index,
            meshlet_count,
            instance_count
        );

        Ok(MeshletGroupId(index as u32))
    }

    /// Recreate the render targets and pyramid for a new resolution
    pub fn resize(&mut self, surface: &mut dyn GpuSurface, width: u32, height: u32) -> EngineResult<()> {
        self.require_between_frames()?;
        let (depth, color, pyramid) = create_targets(surface, width, height, &self.config)?;
        self.depth = depth;
        self.color = color;
        self.pyramid = pyramid;
        log::info!("[TwoPassCullingOrchestrator] Resized to {}x{}", width, height);
        Ok(())
    }

    /// Run one full frame. On error the frame is abandoned and the error
    /// returned; the orchestrator is ready for the next frame either way.
    pub fn cull_and_draw(
        &mut self,
        surface: &mut dyn GpuSurface,
        camera: &CullCamera,
        updates: &[InstanceUpdate<'_>],
    ) -> EngineResult<()> {
        match self.run_frame(surface, camera, updates) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.abandon_frame(surface, &error);
                Err(error)
            }
        }
    }

    /// Drop the frame in progress. Instance lists, visibility bits and the
    /// pending handoff go back to what the last completed frame left.
    pub fn abandon_frame(&mut self, surface: &mut dyn GpuSurface, reason: &EngineError) {
        surface.discard_recorded();

        while let Some(replaced) = self.replaced.pop() {
            let group = &mut self.groups[replaced.group];
            group.instances = replaced.instances;
            group.instance_count = replaced.instance_count;
            if let Some(phases) = replaced.phases {
                group.phases = phases;
            }
            if let Some(bits) = replaced.bits {
                self.visibility.replace_group(replaced.group, bits);
            }
        }
        if let Some(handoff) = self.taken_handoff.take() {
            self.visibility.publish(handoff);
        }

        log::warn!(
            "[TwoPassCullingOrchestrator] Frame {} abandoned in {:?}: {}",
            self.frame_index,
            self.state,
            reason
        );
        self.state = FrameState::Idle;
    }

    /// Statistics of the last completed frame. Blocks until its GPU work
    /// has finished.
    pub fn read_back_stats(&self, surface: &mut dyn GpuSurface) -> EngineResult<RealtimeStats> {
        let Some((frame, fence)) = self.last_completed else {
            return Err(EngineError::StateError {
                expected: "a completed frame".to_string(),
                actual: "no frame has completed".to_string(),
            });
        };

        surface.wait(fence)?;
        let stats: Vec<RealtimeStats> = read_pod(surface, &self.stats_readback)?;
        let stats = stats.first().copied().unwrap_or_default();
        log::debug!(
            "[TwoPassCullingOrchestrator] Frame {} stats: {} drawn, {} culled, {} triangles",
            frame,
            stats.drawn_meshlets,
            stats.culled_meshlets,
            stats.drawn_triangles
        );
        Ok(stats)
    }

    /// Host copy of a group's visibility bits, `instance * meshlet_count + meshlet`
    pub fn visibility_bits(&self, surface: &mut dyn GpuSurface, group: MeshletGroupId) -> EngineResult<Vec<u32>> {
        self.visibility
            .group(group.0 as usize)
            .ok_or_engine(|| group_not_found(group))?
            .read(surface)
    }

    fn require_between_frames(&self) -> EngineResult<()> {
        match self.state {
            FrameState::Idle | FrameState::StatsCopied => Ok(()),
            other => Err(EngineError::StateError {
                expected: "Idle or StatsCopied".to_string(),
                actual: format!("{:?}", other),
            }),
        }
    }

    fn transition(&mut self, next: FrameState) -> EngineResult<()> {
        let allowed = matches!(
            (self.state, next),
            (FrameState::Idle | FrameState::StatsCopied, FrameState::DepthPrepass)
                | (FrameState::DepthPrepass, FrameState::PyramidRebuild)
                | (FrameState::PyramidRebuild, FrameState::MainPass)
                | (FrameState::MainPass, FrameState::StatsCopied)
        );
        if !allowed {
            return Err(EngineError::StateError {
                expected: format!("a state preceding {:?}", next),
                actual: format!("{:?}", self.state),
            });
        }
        self.state = next;
        Ok(())
    }

    fn run_frame(
        &mut self,
        surface: &mut dyn GpuSurface,
        camera: &CullCamera,
        updates: &[InstanceUpdate<'_>],
    ) -> EngineResult<()> {
        self.require_between_frames()?;
        if let Some(update) = updates.iter().find(|u| u.group.0 as usize >= self.groups.len()) {
            return Err(group_not_found(update.group));
        }
        for update in updates {
            self.apply_instance_update(surface, update)?;
        }

        self.transition(FrameState::DepthPrepass)?;
        self.taken_handoff = self.visibility.take_handoff();
        match self.taken_handoff {
            Some(handoff) => {
                surface.wait(handoff.fence)?;
                if handoff.produced_by_frame + 1 != self.frame_index {
                    log::warn!(
                        "[TwoPassCullingOrchestrator] Frame {} consumes visibility of frame {}",
                        self.frame_index,
                        handoff.produced_by_frame
                    );
                }
            }
            None => log::debug!(
                "[TwoPassCullingOrchestrator] Frame {}: no visibility handoff pending",
                self.frame_index
            ),
        }
        surface.clear_depth(&self.depth, FAR_DEPTH)?;
        for index in 0..self.groups.len() {
            self.cull_and_draw_group(surface, camera, index, CullPhase::Prepass)?;
        }

        self.transition(FrameState::PyramidRebuild)?;
        self.pyramid.rebuild(surface, &self.depth)?;

        self.transition(FrameState::MainPass)?;
        upload_pod(surface, &self.stats, &[RealtimeStats::default()])?;
        surface.clear_color(&self.color, CLEAR_COLOR)?;
        for index in 0..self.groups.len() {
            self.cull_and_draw_group(surface, camera, index, CullPhase::Main)?;
        }

        self.transition(FrameState::StatsCopied)?;
        surface.copy_buffer(
            &self.stats,
            &self.stats_readback,
            std::mem::size_of::<RealtimeStats>() as u64,
        )?;
        let fence = surface.submit()?;

        self.visibility.commit_all();
        self.replaced.clear();
        self.taken_handoff = None;
        self.visibility.publish(VisibilityHandoff {
            produced_by_frame: self.frame_index,
            fence,
        });
        self.last_completed = Some((self.frame_index, fence));
        self.frame_index += 1;
        surface.collect_garbage();

        log::debug!(
            "[TwoPassCullingOrchestrator] Frame {} submitted (fence {})",
            self.frame_index - 1,
            fence.0
        );
        Ok(())
    }

    /// Swap in a group's new instance list, logging what it replaced.
    /// Everything fallible happens before the group is touched.
    fn apply_instance_update(
        &mut self,
        surface: &mut dyn GpuSurface,
        update: &InstanceUpdate<'_>,
    ) -> EngineResult<()> {
        let index = update.group.0 as usize;
        let (meshlet_count, old_count) = {
            let group = self
                .groups
                .get(index)
                .ok_or_engine(|| group_not_found(update.group))?;
            (group.meshlet_count, group.instance_count)
        };
        let instance_count = update.instances.len() as u32;

        // Fresh buffer either way: a queued write into the live one would
        // survive an abandoned frame
        let instances = create_buffer_init(
            surface,
            "Meshlet Instances",
            BufferUsage::Storage,
            update.instances,
        )?;
        let resized = if instance_count == old_count {
            None
        } else {
            Some((
                [
                    create_phase_buffers(surface, meshlet_count, instance_count)?,
                    create_phase_buffers(surface, meshlet_count, instance_count)?,
                ],
                VisibilityBits::new(surface, meshlet_count, instance_count)?,
            ))
        };

        let group = &mut self.groups[index];
        let mut replaced = ReplacedInstances {
            group: index,
            instances: std::mem::replace(&mut group.instances, instances),
            instance_count: std::mem::replace(&mut group.instance_count, instance_count),
            phases: None,
            bits: None,
        };
        if let Some((phases, bits)) = resized {
            log::warn!(
                "[TwoPassCullingOrchestrator] Group {} instance count changed {} -> {}, visibility history reset",
                index,
                old_count,
                instance_count
            );
            replaced.phases = Some(std::mem::replace(&mut group.phases, phases));
            replaced.bits = self.visibility.replace_group(index, bits);
        }
        self.replaced.push(replaced);
        Ok(())
    }

    fn cull_and_draw_group(
        &self,
        surface: &mut dyn GpuSurface,
        camera: &CullCamera,
        index: usize,
        phase: CullPhase,
    ) -> EngineResult<()> {
        let group = &self.groups[index];
        let invocations = group.meshlet_count * group.instance_count;
        if invocations == 0 {
            return Ok(());
        }

        let bits = self
            .visibility
            .group(index)
            .ok_or_engine(|| group_not_found(MeshletGroupId(index as u32)))?;
        let buffers = &group.phases[phase as usize];
        let culling = &self.config.culling;

        let uniform = CullUniform::new(
            camera,
            self.pyramid.level_sizes()[0],
            self.pyramid.level_count(),
            phase,
            group.meshlet_count,
            group.instance_count,
            culling.enable_occlusion,
            culling.enable_cone_culling,
        );
        upload_pod(surface, &buffers.uniform, &[uniform])?;
        upload_pod(
            surface,
            &buffers.draw_args,
            &[DrawIndirectArgs {
                vertex_count: group.max_primitives * 3,
                ..Default::default()
            }],
        )?;

        surface.dispatch(Kernel::CullMeshlets(CullBindings {
            uniform: &buffers.uniform,
            meshlets: &group.meshlets,
            cull_data: &group.cull_data,
            instances: &group.instances,
            visibility: match phase {
                CullPhase::Prepass => bits.current(),
                CullPhase::Main => bits.pending(),
            },
            draw_args: &buffers.draw_args,
            visible_list: &buffers.visible_list,
            stats: &self.stats,
            pyramid: self.pyramid.texture(),
            invocations,
        }))?;

        let (pass, color) = match phase {
            CullPhase::Prepass => (DrawPass::DepthOnly, None),
            CullPhase::Main => (DrawPass::Shaded, Some(&self.color)),
        };
        surface.draw(&MeshletDraw {
            pass,
            depth: &self.depth,
            color,
            uniform: &buffers.uniform,
            positions: &group.positions,
            unique_vertex_indices: &group.unique_vertex_indices,
            primitives: &group.primitives,
            meshlets: &group.meshlets,
            instances: &group.instances,
            visible_list: &buffers.visible_list,
            draw_args: &buffers.draw_args,
        })
    }
}

fn group_not_found(group: MeshletGroupId) -> EngineError {
    EngineError::ResourceNotFound {
        resource_type: "MeshletGroup".to_string(),
        id: group.0.to_string(),
    }
}

fn create_targets(
    surface: &mut dyn GpuSurface,
    width: u32,
    height: u32,
    config: &MeshletEngineConfig,
) -> EngineResult<(GpuTexture, GpuTexture, HiZPyramid)> {
    let depth = surface.create_texture(&TextureDescriptor {
        label: "Meshlet Depth",
        width,
        height,
        mip_levels: 1,
        kind: TextureKind::Depth,
    })?;
    let color = surface.create_texture(&TextureDescriptor {
        label: "Meshlet Color",
        width,
        height,
        mip_levels: 1,
        kind: TextureKind::Color,
    })?;
    let pyramid = HiZPyramid::new(surface, width, height, &config.hiz)?;
    Ok((depth, color, pyramid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{build_cull_camera, CameraData};
    use crate::config::{ClusterConfig, CullingConfig};
    use crate::geometry::{create_cube, create_quad, create_uv_sphere};
    use crate::gpu::SoftwareSurface;
    use crate::instance::{identity_instance, instance_from_trs};
    use crate::meshlet::build_meshlets;
    use cgmath::{Point3, Vector3};

    const SIZE: u32 = 64;

    fn camera_at(z: f32) -> CullCamera {
        build_cull_camera(&CameraData {
            position: Point3::new(0.0, 0.0, z),
            aspect_ratio: 1.0,
            near_plane: 0.1,
            far_plane: 100.0,
            ..Default::default()
        })
    }

    fn new_orchestrator(surface: &mut SoftwareSurface, culling: CullingConfig) -> TwoPassCullingOrchestrator {
        let config = MeshletEngineConfig {
            culling,
            ..Default::default()
        };
        TwoPassCullingOrchestrator::new(surface, SIZE, SIZE, &config).expect("orchestrator")
    }

    /// Wall right in front of the camera and a cube hidden behind it
    fn occluder_scene(
        surface: &mut SoftwareSurface,
        orchestrator: &mut TwoPassCullingOrchestrator,
    ) -> (MeshletGroupId, MeshletGroupId) {
        let cluster = ClusterConfig::default();
        let wall = build_meshlets(&create_quad([0.0, 0.0, 0.0], 6.0, 6.0), &cluster).expect("wall");
        let cube = build_meshlets(&create_cube([0.0, 0.0, 0.0], 1.0), &cluster).expect("cube");
        assert_eq!(wall.meshlet_count(), 1);
        assert_eq!(cube.meshlet_count(), 1);

        let wall_id = orchestrator
            .register_group(surface, &wall, &[identity_instance()])
            .expect("wall group");
        let cube_id = orchestrator
            .register_group(surface, &cube, &[instance_from_trs(Vector3::new(0.0, 0.0, -10.0), 0.0, 1.0)])
            .expect("cube group");
        (wall_id, cube_id)
    }

    #[test]
    fn test_stats_before_first_frame_is_state_error() {
        let mut surface = SoftwareSurface::new();
        let orchestrator = new_orchestrator(&mut surface, CullingConfig::default());
        assert!(matches!(
            orchestrator.read_back_stats(&mut surface),
            Err(EngineError::StateError { .. })
        ));
    }

    #[test]
    fn test_meshlets_beyond_far_plane_are_not_drawn() {
        let mut surface = SoftwareSurface::new();
        // Frustum only, so the counts do not depend on self-occlusion
        let mut orchestrator = new_orchestrator(
            &mut surface,
            CullingConfig {
                enable_occlusion: false,
                enable_cone_culling: false,
            },
        );
        let sphere = build_meshlets(&create_uv_sphere(1.0, 8, 16), &ClusterConfig::default()).expect("sphere");
        let meshlet_count = sphere.meshlet_count();

        let near = instance_from_trs(Vector3::new(0.0, 0.0, -10.0), 0.0, 1.0);
        let far = instance_from_trs(Vector3::new(0.0, 0.0, -500.0), 0.0, 1.0);
        let group = orchestrator
            .register_group(&mut surface, &sphere, &[near, far])
            .expect("group");

        let camera = camera_at(0.0);
        for _ in 0..3 {
            orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame");

            let stats = orchestrator.read_back_stats(&mut surface).expect("stats");
            assert_eq!(stats.drawn_meshlets, meshlet_count);
            assert_eq!(stats.culled_meshlets, meshlet_count);
            assert_eq!(stats.drawn_triangles, sphere.report.triangle_count);

            let bits = orchestrator.visibility_bits(&mut surface, group).expect("bits");
            let (near_bits, far_bits) = bits.split_at(meshlet_count as usize);
            assert!(near_bits.iter().all(|&b| b == 1));
            assert!(far_bits.iter().all(|&b| b == 0));
        }

        assert_eq!(orchestrator.frame_index(), 3);
        assert_eq!(orchestrator.state(), FrameState::StatsCopied);
        let color = surface.read_color(orchestrator.color_target()).expect("color");
        let cleared = u32::from_le_bytes([0, 0, 0, 255]);
        assert!(color.iter().any(|&c| c != cleared));
    }

    #[test]
    fn test_hidden_cube_is_culled_on_second_frame() {
        let mut surface = SoftwareSurface::new();
        let mut orchestrator = new_orchestrator(&mut surface, CullingConfig::default());
        let (wall, cube) = occluder_scene(&mut surface, &mut orchestrator);
        let camera = camera_at(5.0);

        // Nothing was visible before the first frame, so its pyramid is empty
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 1");
        let first = orchestrator.read_back_stats(&mut surface).expect("stats");
        assert_eq!(first.drawn_meshlets, 2);
        assert_eq!(first.culled_meshlets, 0);

        // The wall now lands in the prepass and hides the cube
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 2");
        let second = orchestrator.read_back_stats(&mut surface).expect("stats");
        assert_eq!(second.drawn_meshlets, 1);
        assert_eq!(second.culled_meshlets, 1);
        assert_eq!(second.drawn_triangles, 2);
        assert_eq!(orchestrator.visibility_bits(&mut surface, wall).expect("bits"), vec![1]);
        assert_eq!(orchestrator.visibility_bits(&mut surface, cube).expect("bits"), vec![0]);

        // Move the wall out of view: the cube comes back in the same frame
        let moved = [instance_from_trs(Vector3::new(500.0, 0.0, 0.0), 0.0, 1.0)];
        orchestrator
            .cull_and_draw(
                &mut surface,
                &camera,
                &[InstanceUpdate {
                    group: wall,
                    instances: &moved,
                }],
            )
            .expect("frame 3");
        let third = orchestrator.read_back_stats(&mut surface).expect("stats");
        assert_eq!(third.drawn_meshlets, 1);
        assert_eq!(orchestrator.visibility_bits(&mut surface, cube).expect("bits"), vec![1]);
    }

    #[test]
    fn test_failed_frame_is_abandoned() {
        let mut surface = SoftwareSurface::new();
        let mut orchestrator = new_orchestrator(&mut surface, CullingConfig::default());
        let (wall, _) = occluder_scene(&mut surface, &mut orchestrator);
        let camera = camera_at(5.0);

        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 1");
        let stats = orchestrator.read_back_stats(&mut surface).expect("stats");

        let instances = [identity_instance()];
        let result = orchestrator.cull_and_draw(
            &mut surface,
            &camera,
            &[InstanceUpdate {
                group: MeshletGroupId(42),
                instances: &instances,
            }],
        );
        assert!(matches!(result, Err(EngineError::ResourceNotFound { .. })));
        assert_eq!(orchestrator.state(), FrameState::Idle);
        assert_eq!(orchestrator.frame_index(), 1);
        assert_eq!(orchestrator.read_back_stats(&mut surface).expect("stats"), stats);
        assert_eq!(orchestrator.visibility_bits(&mut surface, wall).expect("bits"), vec![1]);

        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("recovered frame");
        assert_eq!(orchestrator.frame_index(), 2);
    }

    #[test]
    fn test_instance_count_change_resets_visibility() {
        let mut surface = SoftwareSurface::new();
        let mut orchestrator = new_orchestrator(&mut surface, CullingConfig::default());
        let (_, cube) = occluder_scene(&mut surface, &mut orchestrator);
        let camera = camera_at(5.0);
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 1");
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 2");
        assert_eq!(orchestrator.visibility_bits(&mut surface, cube).expect("bits"), vec![0]);

        // One cube behind the wall, one beyond the far plane
        let cubes = [
            instance_from_trs(Vector3::new(0.0, 0.0, -10.0), 0.0, 1.0),
            instance_from_trs(Vector3::new(0.0, 0.0, -500.0), 0.0, 1.0),
        ];
        let update = [InstanceUpdate {
            group: cube,
            instances: &cubes,
        }];
        orchestrator.cull_and_draw(&mut surface, &camera, &update).expect("frame 3");

        // Fresh history skips the prepass for the group; the main pass
        // still finds one cube occluded and the other outside the frustum
        let bits = orchestrator.visibility_bits(&mut surface, cube).expect("bits");
        assert_eq!(bits, vec![0, 0]);
        let stats = orchestrator.read_back_stats(&mut surface).expect("stats");
        assert_eq!(stats.drawn_meshlets + stats.culled_meshlets, 3);
    }

    #[test]
    fn test_rejected_update_leaves_groups_untouched() {
        let mut surface = SoftwareSurface::new();
        let mut orchestrator = new_orchestrator(&mut surface, CullingConfig::default());
        let (wall, cube) = occluder_scene(&mut surface, &mut orchestrator);
        let camera = camera_at(5.0);
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 1");
        let before = orchestrator.visibility_bits(&mut surface, wall).expect("bits");
        assert_eq!(before, vec![1]);

        // A valid resize next to an unknown group
        let walls = [identity_instance(), identity_instance()];
        let instances = [identity_instance()];
        let result = orchestrator.cull_and_draw(
            &mut surface,
            &camera,
            &[
                InstanceUpdate {
                    group: wall,
                    instances: &walls,
                },
                InstanceUpdate {
                    group: MeshletGroupId(42),
                    instances: &instances,
                },
            ],
        );
        assert!(matches!(result, Err(EngineError::ResourceNotFound { .. })));
        assert_eq!(orchestrator.state(), FrameState::Idle);
        assert_eq!(orchestrator.frame_index(), 1);
        assert_eq!(orchestrator.visibility_bits(&mut surface, wall).expect("bits"), before);

        // The hidden cube is still culled, so the wall kept its instance
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 2");
        let stats = orchestrator.read_back_stats(&mut surface).expect("stats");
        assert_eq!(stats.drawn_meshlets, 1);
        assert_eq!(stats.culled_meshlets, 1);
        assert_eq!(orchestrator.visibility_bits(&mut surface, cube).expect("bits"), vec![0]);
    }

    /// Software surface whose shaded draws start failing after a count
    struct FailingShadedDraws<'a> {
        inner: &'a mut SoftwareSurface,
        shaded_left: u32,
    }

    impl GpuSurface for FailingShadedDraws<'_> {
        fn backend_name(&self) -> &'static str {
            self.inner.backend_name()
        }

        fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> EngineResult<GpuBuffer> {
            self.inner.create_buffer(desc)
        }

        fn upload(&mut self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> EngineResult<()> {
            self.inner.upload(buffer, offset, data)
        }

        fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> EngineResult<GpuTexture> {
            self.inner.create_texture(desc)
        }

        fn clear_depth(&mut self, depth: &GpuTexture, value: f32) -> EngineResult<()> {
            self.inner.clear_depth(depth, value)
        }

        fn clear_color(&mut self, color: &GpuTexture, rgba: [f32; 4]) -> EngineResult<()> {
            self.inner.clear_color(color, rgba)
        }

        fn dispatch(&mut self, kernel: Kernel<'_>) -> EngineResult<()> {
            self.inner.dispatch(kernel)
        }

        fn draw(&mut self, draw: &MeshletDraw<'_>) -> EngineResult<()> {
            if draw.pass == DrawPass::Shaded {
                if self.shaded_left == 0 {
                    return Err(EngineError::GpuOperationFailed {
                        operation: "draw".to_string(),
                        error: "device lost".to_string(),
                    });
                }
                self.shaded_left -= 1;
            }
            self.inner.draw(draw)
        }

        fn copy_buffer(&mut self, src: &GpuBuffer, dst: &GpuBuffer, size: u64) -> EngineResult<()> {
            self.inner.copy_buffer(src, dst, size)
        }

        fn submit(&mut self) -> EngineResult<FenceValue> {
            self.inner.submit()
        }

        fn discard_recorded(&mut self) {
            self.inner.discard_recorded()
        }

        fn wait(&mut self, fence: FenceValue) -> EngineResult<()> {
            self.inner.wait(fence)
        }

        fn read_buffer(&mut self, buffer: &GpuBuffer) -> EngineResult<Vec<u8>> {
            self.inner.read_buffer(buffer)
        }

        fn read_texture_level(&mut self, texture: &GpuTexture, level: u32) -> EngineResult<Vec<f32>> {
            self.inner.read_texture_level(texture, level)
        }

        fn collect_garbage(&mut self) -> usize {
            self.inner.collect_garbage()
        }
    }

    #[test]
    fn test_frame_failing_after_eager_writes_rolls_back() {
        let mut surface = SoftwareSurface::new();
        let mut orchestrator = new_orchestrator(&mut surface, CullingConfig::default());
        let (wall, cube) = occluder_scene(&mut surface, &mut orchestrator);
        let camera = camera_at(5.0);
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 1");
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 2");
        let stats = orchestrator.read_back_stats(&mut surface).expect("stats");

        // The wall's main pass runs and marks it invisible, then the cube's
        // shaded draw fails
        let moved = [instance_from_trs(Vector3::new(500.0, 0.0, 0.0), 0.0, 1.0)];
        let mut failing = FailingShadedDraws {
            inner: &mut surface,
            shaded_left: 1,
        };
        let result = orchestrator.cull_and_draw(
            &mut failing,
            &camera,
            &[InstanceUpdate {
                group: wall,
                instances: &moved,
            }],
        );
        assert!(matches!(result, Err(EngineError::GpuOperationFailed { .. })));
        assert_eq!(orchestrator.state(), FrameState::Idle);
        assert_eq!(orchestrator.frame_index(), 2);
        assert_eq!(orchestrator.visibility_bits(&mut surface, wall).expect("bits"), vec![1]);
        assert_eq!(orchestrator.visibility_bits(&mut surface, cube).expect("bits"), vec![0]);
        assert_eq!(orchestrator.read_back_stats(&mut surface).expect("stats"), stats);

        // The wall is back in place and still hides the cube
        orchestrator.cull_and_draw(&mut surface, &camera, &[]).expect("frame 3");
        let third = orchestrator.read_back_stats(&mut surface).expect("stats");
        assert_eq!(third.drawn_meshlets, 1);
        assert_eq!(third.culled_meshlets, 1);
        assert_eq!(orchestrator.visibility_bits(&mut surface, cube).expect("bits"), vec![0]);
    }

    #[test]
    fn test_registration_rejected_mid_frame() {
        let mut surface = SoftwareSurface::new();
        let mut orchestrator = new_orchestrator(&mut surface, CullingConfig::default());
        orchestrator.state = FrameState::MainPass;

        let cube = build_meshlets(&create_cube([0.0, 0.0, 0.0], 1.0), &ClusterConfig::default()).expect("cube");
        let result = orchestrator.register_group(&mut surface, &cube, &[identity_instance()]);
        assert!(matches!(result, Err(EngineError::StateError { .. })));
    }
}
