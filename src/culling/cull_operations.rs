//! Cull operations - Pure DOP functions
//!
//! The per meshlet instance test. `meshlet_cull.wgsl` is a line-by-line port
//! of these functions; the software surface calls them directly.

use super::culling_data::{CullDataGpu, CullPhase, CullUniform, MeshletGpu, RealtimeStats};
use crate::instance::{instance_transform, transform_sphere, MeshletInstance};
use crate::meshlet::dequantize_unorm8;
use cgmath::{InnerSpace, Matrix4, Vector3, Vector4};

/// Clip-space w below which a point counts as on or behind the eye
const MIN_CLIP_W: f32 = 1e-5;

/// Outcome of testing one meshlet instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullVerdict {
    Visible,
    /// Prepass only: the visibility bit from last frame was clear
    NotVisibleLastFrame,
    OutsideFrustum,
    Backfacing,
    Occluded,
}

impl CullVerdict {
    pub fn is_visible(self) -> bool {
        self == CullVerdict::Visible
    }
}

/// Screen footprint of a projected bounding sphere, in level 0 pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    /// Inclusive pixel bounds
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    /// Smallest NDC depth of the bounds, 0 at the near plane
    pub nearest_depth: f32,
}

/// Sphere against six inward planes. Touching a plane counts as inside.
pub fn sphere_in_frustum(planes: &[[f32; 4]; 6], center: Vector3<f32>, radius: f32) -> bool {
    planes.iter().all(|p| {
        let distance = Vector3::new(p[0], p[1], p[2]).dot(center) + p[3];
        distance >= -radius
    })
}

/// Normal cone backface test. Degenerate cones are always visible.
pub fn cone_visible(
    cull: &CullDataGpu,
    instance: &MeshletInstance,
    center_world: Vector3<f32>,
    camera_position: Vector3<f32>,
) -> bool {
    let [x, y, z, w] = cull.normal_cone.to_le_bytes();
    if w == 255 {
        return true;
    }

    let axis = Vector4::new(dequantize_unorm8(x), dequantize_unorm8(y), dequantize_unorm8(z), 0.0);
    let axis_world = (instance_transform(instance) * axis).truncate();
    if axis_world.magnitude2() <= 0.0 {
        return true;
    }
    let axis_world = axis_world.normalize();

    let apex = center_world - axis_world * (cull.apex_offset * instance.scale);
    let view = camera_position - apex;
    if view.magnitude2() <= 0.0 {
        return true;
    }

    let cutoff = w as f32 / 255.0;
    view.normalize().dot(-axis_world) <= cutoff
}

/// Project the axis-aligned box around a sphere. `None` when the box
/// crosses the near plane or misses the screen, in which case the caller
/// must not occlusion-cull.
pub fn project_sphere_rect(
    view_proj: &Matrix4<f32>,
    center: Vector3<f32>,
    radius: f32,
    screen: (u32, u32),
) -> Option<ScreenRect> {
    let (width, height) = screen;
    if width == 0 || height == 0 {
        return None;
    }

    let mut min_ndc = [f32::MAX; 3];
    let mut max_ndc = [f32::MIN; 2];

    for corner in 0..8u32 {
        let offset = Vector3::new(
            if corner & 1 == 0 { -radius } else { radius },
            if corner & 2 == 0 { -radius } else { radius },
            if corner & 4 == 0 { -radius } else { radius },
        );
        let p = center + offset;
        let clip = view_proj * Vector4::new(p.x, p.y, p.z, 1.0);
        if clip.w <= MIN_CLIP_W || clip.z < 0.0 {
            return None;
        }

        let ndc = clip.truncate() / clip.w;
        min_ndc[0] = min_ndc[0].min(ndc.x);
        min_ndc[1] = min_ndc[1].min(ndc.y);
        min_ndc[2] = min_ndc[2].min(ndc.z);
        max_ndc[0] = max_ndc[0].max(ndc.x);
        max_ndc[1] = max_ndc[1].max(ndc.y);
    }

    // NDC y points up, pixel rows go down
    let left = (min_ndc[0] * 0.5 + 0.5) * width as f32;
    let right = (max_ndc[0] * 0.5 + 0.5) * width as f32;
    let top = (1.0 - (max_ndc[1] * 0.5 + 0.5)) * height as f32;
    let bottom = (1.0 - (min_ndc[1] * 0.5 + 0.5)) * height as f32;

    if right <= 0.0 || bottom <= 0.0 || left >= width as f32 || top >= height as f32 {
        return None;
    }

    let to_pixel = |v: f32, size: u32| (v.max(0.0) as u32).min(size - 1);
    Some(ScreenRect {
        min_x: to_pixel(left.floor(), width),
        min_y: to_pixel(top.floor(), height),
        max_x: to_pixel(right.ceil() - 1.0, width),
        max_y: to_pixel(bottom.ceil() - 1.0, height),
        nearest_depth: min_ndc[2],
    })
}

/// Finest pyramid level at which `rect` spans at most 2x2 texels
pub fn select_pyramid_level(rect: &ScreenRect, level_count: u32) -> u32 {
    let last = level_count.saturating_sub(1);
    (0..=last)
        .find(|&level| {
            (rect.max_x >> level) - (rect.min_x >> level) <= 1
                && (rect.max_y >> level) - (rect.min_y >> level) <= 1
        })
        .unwrap_or(last)
}

/// Hi-Z test. `level_sizes[n]` is the size of pyramid level `n` and
/// `sample(level, x, y)` its farthest depth. Occluded only when the
/// nearest point of the bounds lies behind everything in its footprint.
pub fn is_occluded<F>(
    view_proj: &Matrix4<f32>,
    center: Vector3<f32>,
    radius: f32,
    level_sizes: &[(u32, u32)],
    sample: F,
) -> bool
where
    F: Fn(u32, u32, u32) -> f32,
{
    let Some(&screen) = level_sizes.first() else {
        return false;
    };
    let Some(rect) = project_sphere_rect(view_proj, center, radius, screen) else {
        return false;
    };

    let level = select_pyramid_level(&rect, level_sizes.len() as u32);
    let (level_width, level_height) = level_sizes[level as usize];
    let (x0, x1) = (rect.min_x >> level, rect.max_x >> level);
    let (y0, y1) = (rect.min_y >> level, rect.max_y >> level);

    // Trailing odd rows and columns are not folded into coarser levels
    if x1 >= level_width || y1 >= level_height {
        return false;
    }

    let mut farthest = 0.0f32;
    for y in y0..=y1 {
        for x in x0..=x1 {
            farthest = farthest.max(sample(level, x, y));
        }
    }

    rect.nearest_depth > farthest
}

/// Full per meshlet instance test for either phase
pub fn evaluate_meshlet_instance<F>(
    uniform: &CullUniform,
    cull: &CullDataGpu,
    instance: &MeshletInstance,
    visible_last_frame: bool,
    level_sizes: &[(u32, u32)],
    sample: F,
) -> CullVerdict
where
    F: Fn(u32, u32, u32) -> f32,
{
    let phase = uniform.phase();
    if phase == CullPhase::Prepass && !visible_last_frame {
        return CullVerdict::NotVisibleLastFrame;
    }

    let (center, radius) = transform_sphere(instance, cull.bounding_sphere);
    if !sphere_in_frustum(&uniform.frustum_planes, center, radius) {
        return CullVerdict::OutsideFrustum;
    }

    let camera = Vector3::new(
        uniform.camera_position[0],
        uniform.camera_position[1],
        uniform.camera_position[2],
    );
    if uniform.counts[3] != 0 && !cone_visible(cull, instance, center, camera) {
        return CullVerdict::Backfacing;
    }

    if phase == CullPhase::Main && uniform.counts[2] != 0 {
        let view_proj = Matrix4::from(uniform.view_proj);
        if is_occluded(&view_proj, center, radius, level_sizes, sample) {
            return CullVerdict::Occluded;
        }
    }

    CullVerdict::Visible
}

/// Fold one main pass verdict into the running totals
pub fn accumulate_stats(stats: &mut RealtimeStats, meshlet: &MeshletGpu, verdict: CullVerdict) {
    if verdict.is_visible() {
        stats.drawn_meshlets += 1;
        stats.drawn_vertices += meshlet.vertex_count;
        stats.drawn_triangles += meshlet.primitive_count;
    } else {
        stats.culled_meshlets += 1;
    }
}
