//! Initial particle placement on a uniform grid.

use std::f64::consts::PI;

use sim_protocol::{Configuration, InitialConditions, VortexRing};

use crate::vorton::{cross, dot, norm, scale, sub, Vec3, Vorton, VORTICITY_EPSILON};

/// Upper bound on grid refinement passes.
const MAX_PASSES: usize = 16;

/// Largest factor the cell count may change by in one pass.
const MAX_RESCALE: f64 = 8.0;

/// Places roughly `configuration.n_vortons` particles.
///
/// Cells are laid out over the bounds of the initial condition and cells with
/// negligible vorticity are dropped. Thin cores fill only a sliver of the
/// bounds, so the cell count is rescaled by the observed fill ratio until the
/// seeded count lands within 5% of the request. The closest pass wins.
pub(crate) fn seed(configuration: &Configuration) -> Vec<Vorton> {
    let ring = match &configuration.initial_conditions {
        InitialConditions::VortexRing(ring) => ring,
        InitialConditions::Empty => return Vec::new(),
    };
    let target = configuration.n_vortons;
    if target == 0 {
        return Vec::new();
    }
    let mut n_cells = target;
    let mut best: Vec<Vorton> = Vec::new();
    for _ in 0..MAX_PASSES {
        let vortons = seed_cells(ring, n_cells);
        let found = vortons.len();
        if found.abs_diff(target) < best.len().abs_diff(target) {
            best = vortons;
        }
        if found.abs_diff(target) * 20 <= target {
            break;
        }
        let factor = if found == 0 {
            MAX_RESCALE
        } else {
            (target as f64 / found as f64).clamp(1.0 / MAX_RESCALE, MAX_RESCALE)
        };
        let next = ((n_cells as f64 * factor).round() as usize).max(1);
        if next == n_cells {
            break;
        }
        n_cells = next;
    }
    best
}

fn seed_cells(ring: &VortexRing, n_cells: usize) -> Vec<Vorton> {
    let (min, max) = ring_bounds(ring);
    let extent = sub(max, min);
    let cell = (extent[0] * extent[1] * extent[2] / n_cells as f64).cbrt();
    let counts = extent.map(|e| ((e / cell).round() as usize).max(1));
    let delta = [
        extent[0] / counts[0] as f64,
        extent[1] / counts[1] as f64,
        extent[2] / counts[2] as f64,
    ];
    let volume = delta[0] * delta[1] * delta[2];

    let mut vortons = Vec::new();
    for k in 0..counts[2] {
        for j in 0..counts[1] {
            for i in 0..counts[0] {
                let position = [
                    min[0] + (i as f64 + 0.5) * delta[0],
                    min[1] + (j as f64 + 0.5) * delta[1],
                    min[2] + (k as f64 + 0.5) * delta[2],
                ];
                let vorticity = ring_vorticity(ring, position);
                if norm(vorticity) > VORTICITY_EPSILON {
                    vortons.push(Vorton::new(position, vorticity, volume));
                }
            }
        }
    }
    vortons
}

fn ring_direction(ring: &VortexRing) -> Vec3 {
    let length = norm(ring.direction);
    if length < 1e-5 {
        [1.0, 0.0, 0.0]
    } else {
        scale(ring.direction, 1.0 / length)
    }
}

/// Axis-aligned box around the ring core, padded by 10%.
fn ring_bounds(ring: &VortexRing) -> (Vec3, Vec3) {
    let dir = ring_direction(ring);
    let dcx = cross([1.0, 0.0, 0.0], dir);
    let v2 = if norm(dcx) > 1e-5 {
        scale(dcx, 1.0 / norm(dcx))
    } else {
        [0.0, 1.0, 0.0]
    };
    let v3 = cross(dir, v2);
    let axial = 1.1 * ring.thickness;
    let radial = 1.1 * (ring.radius + ring.thickness);
    let mut min = ring.center;
    let mut max = ring.center;
    for axis in 0..3 {
        let half = (dir[axis] * axial).abs() + (v2[axis] * radial).abs() + (v3[axis] * radial).abs();
        min[axis] -= half;
        max[axis] += half;
    }
    (min, max)
}

/// Vorticity of the ring at `p`: a raised-cosine core profile pointing along
/// `direction x radial`.
pub(crate) fn ring_vorticity(ring: &VortexRing, p: Vec3) -> Vec3 {
    let dir = ring_direction(ring);
    let v = sub(p, ring.center);
    let d_dir = dot(v, dir);
    let v_rad = sub(v, scale(dir, d_dir));
    let d_rad = norm(v_rad) - ring.radius;
    let d = (d_dir * d_dir + d_rad * d_rad).sqrt();
    if d >= ring.thickness {
        return [0.0; 3];
    }
    let tangent = cross(dir, v_rad);
    let length = norm(tangent);
    if length == 0.0 {
        return [0.0; 3];
    }
    let magnitude = ring.intensity * (0.5 + 0.5 * (PI * d / ring.thickness).cos());
    scale(tangent, magnitude / length)
}
