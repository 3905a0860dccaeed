//! Instance operations - Pure DOP functions
//!
//! All functions are pure: they take data, return new data, no side effects.

use super::instance_data::{MeshletInstance, ScatterConfig};
use cgmath::{Matrix4, Rad, SquareMatrix, Vector3, Vector4};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Instance at the origin with unit scale
pub fn identity_instance() -> MeshletInstance {
    MeshletInstance {
        transform: Matrix4::<f32>::identity().into(),
        scale: 1.0,
        _padding: [0.0; 3],
    }
}

/// Translation, rotation about +Y, then uniform scale
pub fn instance_from_trs(translation: Vector3<f32>, yaw_radians: f32, scale: f32) -> MeshletInstance {
    let transform = Matrix4::from_translation(translation)
        * Matrix4::from_angle_y(Rad(yaw_radians))
        * Matrix4::from_scale(scale);

    MeshletInstance {
        transform: transform.into(),
        scale,
        _padding: [0.0; 3],
    }
}

pub fn instance_transform(instance: &MeshletInstance) -> Matrix4<f32> {
    Matrix4::from(instance.transform)
}

/// World-space bounding sphere of an object-space sphere
pub fn transform_sphere(instance: &MeshletInstance, sphere: [f32; 4]) -> (Vector3<f32>, f32) {
    let center = instance_transform(instance) * Vector4::new(sphere[0], sphere[1], sphere[2], 1.0);
    (center.truncate(), sphere[3] * instance.scale)
}

/// Regular grid of instances on the XZ plane, centered on the origin
pub fn grid_instances(count_x: u32, count_z: u32, spacing: f32, scale: f32) -> Vec<MeshletInstance> {
    let offset_x = (count_x.saturating_sub(1)) as f32 * spacing * 0.5;
    let offset_z = (count_z.saturating_sub(1)) as f32 * spacing * 0.5;

    let mut instances = Vec::with_capacity((count_x * count_z) as usize);
    for z in 0..count_z {
        for x in 0..count_x {
            instances.push(instance_from_trs(
                Vector3::new(
                    x as f32 * spacing - offset_x,
                    0.0,
                    z as f32 * spacing - offset_z,
                ),
                0.0,
                scale,
            ));
        }
    }
    instances
}

/// Seeded random scatter. The same config always yields the same instances.
pub fn scatter_instances(config: &ScatterConfig) -> Vec<MeshletInstance> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let (min_scale, max_scale) = if config.min_scale <= config.max_scale {
        (config.min_scale, config.max_scale)
    } else {
        (config.max_scale, config.min_scale)
    };
    let extent = config.extent.abs();

    (0..config.count)
        .map(|_| {
            let x = if extent > 0.0 { rng.gen_range(-extent..=extent) } else { 0.0 };
            let z = if extent > 0.0 { rng.gen_range(-extent..=extent) } else { 0.0 };
            let yaw = rng.gen_range(0.0..std::f32::consts::TAU);
            let scale = if max_scale > min_scale {
                rng.gen_range(min_scale..=max_scale)
            } else {
                min_scale
            };
            instance_from_trs(Vector3::new(x, config.height, z), yaw, scale)
        })
        .collect()
}
