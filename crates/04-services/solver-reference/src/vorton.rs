//! Vortex particles and the small amount of vector math they need.

use std::f64::consts::PI;

pub(crate) type Vec3 = [f64; 3];

pub(crate) fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub(crate) fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub(crate) fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Vorticity below this magnitude is treated as zero.
pub(crate) const VORTICITY_EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Vorton {
    pub position: Vec3,
    pub vorticity: Vec3,
    pub volume: f64,
    /// Core radius; contributions closer than this are clamped.
    radius: f64,
}

impl Vorton {
    pub fn new(position: Vec3, vorticity: Vec3, volume: f64) -> Self {
        Self {
            position,
            vorticity,
            volume,
            radius: volume.cbrt() * 0.1,
        }
    }

    /// Induced velocity at `at` (regularized Biot-Savart kernel).
    pub fn velocity_contribution(&self, at: Vec3) -> Vec3 {
        let r = sub(at, self.position);
        let distance = norm(r).max(self.radius);
        scale(
            cross(self.vorticity, r),
            self.volume / (4.0 * PI * distance.powi(3)),
        )
    }

    pub fn intensity(&self) -> f64 {
        norm(self.vorticity)
    }
}
