//! Culling Module - Hi-Z pyramid and two-pass occlusion culling
//!
//! - culling_data.rs: GPU layouts, phases and frame states
//! - cull_operations.rs: the per meshlet instance test
//! - hiz.rs: depth pyramid sizing, host reduction and GPU rebuild
//! - visibility.rs: cross-frame visibility bits and their handoff
//! - orchestrator.rs: the per-frame state machine

pub mod cull_operations;
pub mod culling_data;
pub mod hiz;
pub mod orchestrator;
pub mod visibility;

pub use cull_operations::{
    accumulate_stats, cone_visible, evaluate_meshlet_instance, is_occluded, project_sphere_rect,
    select_pyramid_level, sphere_in_frustum, CullVerdict, ScreenRect,
};
pub use culling_data::{
    CullDataGpu, CullPhase, CullUniform, DrawIndirectArgs, FrameState, MeshletGpu, RealtimeStats,
    VisibleMeshlet, CULL_WORKGROUP_SIZE,
};
pub use hiz::{build_pyramid_cpu, pyramid_level_count, pyramid_level_sizes, reduce_level_cpu, HiZPyramid};
pub use orchestrator::{InstanceUpdate, MeshletGroupId, TwoPassCullingOrchestrator};
pub use visibility::{VisibilityBits, VisibilityHandoff, VisibilityStateStore};
