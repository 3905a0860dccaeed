//! Hierarchical depth pyramid
//!
//! Level 0 is a copy of the depth target. Every further level halves each
//! dimension (rounding down, never below one texel) and stores the farthest
//! depth of the 2x2 footprint it covers in the level above. Depth is 0 at
//! the near plane, so "farthest" is the maximum.

use crate::config::HiZConfig;
use crate::error::{EngineError, EngineResult};
use crate::gpu::{GpuSurface, GpuTexture, Kernel, TextureDescriptor, TextureKind};

/// Sizes of every pyramid level for a `width` x `height` depth target
pub fn pyramid_level_sizes(width: u32, height: u32, min_dimension: u32) -> Vec<(u32, u32)> {
    let mut sizes = vec![(width.max(1), height.max(1))];
    let mut current = sizes[0];

    while (current.0 > min_dimension || current.1 > min_dimension) && current != (1, 1) {
        current = ((current.0 >> 1).max(1), (current.1 >> 1).max(1));
        sizes.push(current);
    }

    sizes
}

pub fn pyramid_level_count(width: u32, height: u32, min_dimension: u32) -> u32 {
    pyramid_level_sizes(width, height, min_dimension).len() as u32
}

/// Max-reduce one level. Returns the next level and its size.
pub fn reduce_level_cpu(source: &[f32], width: u32, height: u32) -> (Vec<f32>, (u32, u32)) {
    let dst_width = (width >> 1).max(1);
    let dst_height = (height >> 1).max(1);
    let at = |x: u32, y: u32| source[(y.min(height - 1) * width + x.min(width - 1)) as usize];

    let mut reduced = Vec::with_capacity((dst_width * dst_height) as usize);
    for y in 0..dst_height {
        for x in 0..dst_width {
            let (sx, sy) = (x * 2, y * 2);
            let farthest = at(sx, sy)
                .max(at(sx + 1, sy))
                .max(at(sx, sy + 1))
                .max(at(sx + 1, sy + 1));
            reduced.push(farthest);
        }
    }

    (reduced, (dst_width, dst_height))
}

/// Whole pyramid on the host
pub fn build_pyramid_cpu(depth: &[f32], width: u32, height: u32, min_dimension: u32) -> Vec<Vec<f32>> {
    let sizes = pyramid_level_sizes(width, height, min_dimension);
    let mut levels = Vec::with_capacity(sizes.len());
    levels.push(depth.to_vec());

    for &(w, h) in &sizes[..sizes.len() - 1] {
        let (next, _) = reduce_level_cpu(&levels[levels.len() - 1], w, h);
        levels.push(next);
    }

    levels
}

/// GPU-resident pyramid matching one depth target
#[derive(Debug)]
pub struct HiZPyramid {
    texture: GpuTexture,
    level_sizes: Vec<(u32, u32)>,
}

impl HiZPyramid {
    pub fn new(
        surface: &mut dyn GpuSurface,
        width: u32,
        height: u32,
        config: &HiZConfig,
    ) -> EngineResult<Self> {
        if config.min_dimension < 2 {
            return Err(EngineError::InvalidConfig {
                field: "hiz.min_dimension".to_string(),
                value: config.min_dimension.to_string(),
                reason: "must be greater than 1".to_string(),
            });
        }

        let level_sizes = pyramid_level_sizes(width, height, config.min_dimension);
        let texture = surface.create_texture(&TextureDescriptor {
            label: "Hi-Z Pyramid",
            width: level_sizes[0].0,
            height: level_sizes[0].1,
            mip_levels: level_sizes.len() as u32,
            kind: TextureKind::DepthPyramid,
        })?;

        log::info!(
            "[HiZPyramid] Created {}x{} pyramid with {} levels",
            level_sizes[0].0,
            level_sizes[0].1,
            level_sizes.len()
        );

        Ok(Self {
            texture,
            level_sizes,
        })
    }

    pub fn texture(&self) -> &GpuTexture {
        &self.texture
    }

    pub fn level_sizes(&self) -> &[(u32, u32)] {
        &self.level_sizes
    }

    pub fn level_count(&self) -> u32 {
        self.level_sizes.len() as u32
    }

    /// Record a full rebuild from `depth`. Runs every frame; nothing is
    /// carried over from the previous contents.
    pub fn rebuild(&self, surface: &mut dyn GpuSurface, depth: &GpuTexture) -> EngineResult<()> {
        if (depth.width(), depth.height()) != self.level_sizes[0] {
            return Err(EngineError::InvalidConfig {
                field: "depth target".to_string(),
                value: format!("{}x{}", depth.width(), depth.height()),
                reason: format!(
                    "pyramid was created for {}x{}",
                    self.level_sizes[0].0, self.level_sizes[0].1
                ),
            });
        }

        surface.dispatch(Kernel::CopyDepthToPyramid {
            depth,
            pyramid: &self.texture,
        })?;

        for source_level in 0..self.level_count() - 1 {
            surface.dispatch(Kernel::ReducePyramid {
                pyramid: &self.texture,
                source_level,
            })?;
        }

        log::debug!("[HiZPyramid] Rebuilt {} levels", self.level_count());
        Ok(())
    }
}
