//! Ritter bounding sphere
//!
//! Approximate, not minimal. Points are scanned in the order given, so the
//! result is deterministic for a given input order.

use cgmath::{InnerSpace, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vector3<f32>,
    pub radius: f32,
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self {
            center: Vector3::new(0.0, 0.0, 0.0),
            radius: 0.0,
        }
    }
}

impl BoundingSphere {
    pub fn to_array(&self) -> [f32; 4] {
        [self.center.x, self.center.y, self.center.z, self.radius]
    }

    pub fn contains(&self, point: Vector3<f32>, tolerance: f32) -> bool {
        (point - self.center).magnitude() <= self.radius + tolerance
    }
}

/// Bounding sphere of a point set. Empty input yields a zero sphere.
pub fn compute_bounding_sphere<I>(points: I) -> BoundingSphere
where
    I: IntoIterator<Item = Vector3<f32>>,
    I::IntoIter: Clone,
{
    let points = points.into_iter();

    // Extremes along each axis: pmin[axis] / pmax[axis] hold the whole point
    let mut pmin = [Vector3::new(f32::MAX, f32::MAX, f32::MAX); 3];
    let mut pmax = [Vector3::new(f32::MIN, f32::MIN, f32::MIN); 3];
    let mut any = false;

    for p in points.clone() {
        any = true;
        for axis in 0..3 {
            if p[axis] < pmin[axis][axis] {
                pmin[axis] = p;
            }
            if p[axis] > pmax[axis][axis] {
                pmax[axis] = p;
            }
        }
    }

    if !any {
        return BoundingSphere::default();
    }

    // Longest of the three extreme pairs seeds the sphere
    let mut paxis = 0;
    let mut paxisd2 = 0.0;
    for axis in 0..3 {
        let d2 = (pmax[axis] - pmin[axis]).magnitude2();
        if d2 > paxisd2 {
            paxisd2 = d2;
            paxis = axis;
        }
    }

    let mut center = (pmin[paxis] + pmax[paxis]) * 0.5;
    let mut radius = paxisd2.sqrt() * 0.5;

    for p in points {
        let d2 = (p - center).magnitude2();
        if d2 > radius * radius {
            let d = d2.sqrt();
            let k = 0.5 + (radius / d) * 0.5;
            center = center * k + p * (1.0 - k);
            radius = (radius + d) * 0.5;
        }
    }

    BoundingSphere { center, radius }
}
