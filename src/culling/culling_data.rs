//! Culling data - GPU layouts and frame bookkeeping
//!
//! NO METHODS beyond constructors. Every `#[repr(C)]` struct here must match
//! its WGSL counterpart byte for byte.

use crate::camera::CullCamera;
use crate::meshlet::{CullData, Meshlet};
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Invocations per culling workgroup
pub const CULL_WORKGROUP_SIZE: u32 = 64;

/// Per group, per pass culling parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CullUniform {
    pub view_proj: [[f32; 4]; 4],
    /// Left, right, top, bottom, near, far
    pub frustum_planes: [[f32; 4]; 6],
    pub camera_position: [f32; 4],
    /// width, height, level count, phase
    pub pyramid: [u32; 4],
    /// meshlet count, instance count, occlusion enabled, cone enabled
    pub counts: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshletGpu {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub primitive_offset: u32,
    pub primitive_count: u32,
    pub color: u32,
    pub _padding: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CullDataGpu {
    pub bounding_sphere: [f32; 4],
    /// UNORM8 x, y, z, cutoff from low to high byte
    pub normal_cone: u32,
    pub apex_offset: f32,
    pub _padding: [u32; 2],
}

/// Matches wgpu's non-indexed indirect draw layout
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// One surviving meshlet instance, appended by the cull kernel
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct VisibleMeshlet {
    pub instance: u32,
    pub meshlet: u32,
}

/// Diagnostics accumulated by the main pass
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RealtimeStats {
    pub drawn_meshlets: u32,
    pub culled_meshlets: u32,
    pub drawn_vertices: u32,
    pub drawn_triangles: u32,
}

const_assert_eq!(std::mem::size_of::<CullUniform>(), 208);
const_assert_eq!(std::mem::size_of::<MeshletGpu>(), 32);
const_assert_eq!(std::mem::size_of::<CullDataGpu>(), 32);
const_assert_eq!(std::mem::size_of::<DrawIndirectArgs>(), 16);
const_assert_eq!(std::mem::size_of::<VisibleMeshlet>(), 8);
const_assert_eq!(std::mem::size_of::<RealtimeStats>(), 16);

/// Which half of the two-pass protocol a cull dispatch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullPhase {
    /// Last frame's visible set, frustum and cone only, depth only
    Prepass = 0,
    /// Everything, including Hi-Z occlusion; writes visibility and stats
    Main = 1,
}

impl CullPhase {
    pub fn from_index(index: u32) -> Self {
        if index == 0 {
            CullPhase::Prepass
        } else {
            CullPhase::Main
        }
    }
}

/// Per-frame protocol states, strictly in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    Idle,
    DepthPrepass,
    PyramidRebuild,
    MainPass,
    StatsCopied,
}

impl From<&Meshlet> for MeshletGpu {
    fn from(m: &Meshlet) -> Self {
        Self {
            vertex_offset: m.vertex_offset,
            vertex_count: m.vertex_count,
            primitive_offset: m.primitive_offset,
            primitive_count: m.primitive_count,
            color: m.color,
            _padding: [0; 3],
        }
    }
}

impl From<&CullData> for CullDataGpu {
    fn from(c: &CullData) -> Self {
        Self {
            bounding_sphere: c.bounding_sphere,
            normal_cone: c.packed_normal_cone(),
            apex_offset: c.apex_offset,
            _padding: [0; 2],
        }
    }
}

impl CullUniform {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: &CullCamera,
        pyramid_size: (u32, u32),
        pyramid_levels: u32,
        phase: CullPhase,
        meshlet_count: u32,
        instance_count: u32,
        occlusion_enabled: bool,
        cone_enabled: bool,
    ) -> Self {
        let mut frustum_planes = [[0.0; 4]; 6];
        for (dst, plane) in frustum_planes.iter_mut().zip(camera.frustum_planes.iter()) {
            *dst = (*plane).into();
        }

        Self {
            view_proj: camera.view_projection.into(),
            frustum_planes,
            camera_position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
            pyramid: [pyramid_size.0, pyramid_size.1, pyramid_levels, phase as u32],
            counts: [
                meshlet_count,
                instance_count,
                occlusion_enabled as u32,
                cone_enabled as u32,
            ],
        }
    }

    pub fn phase(&self) -> CullPhase {
        CullPhase::from_index(self.pyramid[3])
    }
}
