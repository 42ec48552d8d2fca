use bytemuck::{Pod, Zeroable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintKind, CookedBatch, Projection};
use crate::math::stiffness_to_compliance;

/// One-sided distance limit between a free particle and a fixed anchor.
///
/// Only engages once the particles are further apart than
/// `max_length * scale`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TetherConstraint {
    /// `[free, anchor]`.
    pub particles: [u32; 2],
    pub max_length: f32,
    pub scale: f32,
    pub stiffness: f32,
}

impl TetherConstraint {
    pub fn new(free: u32, anchor: u32, max_length: f32, scale: f32, stiffness: f32) -> Self {
        Self {
            particles: [free, anchor],
            max_length,
            scale,
            stiffness,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TetherParams {
    pub max_length: f32,
    pub scale: f32,
    pub stiffness: f32,
}

impl Constraint for TetherConstraint {
    const KIND: ConstraintKind = ConstraintKind::Tether;
    type Params = TetherParams;

    fn particles(&self) -> &[u32] {
        &self.particles
    }

    fn particles_mut(&mut self) -> &mut [u32] {
        &mut self.particles
    }

    fn params(&self) -> TetherParams {
        TetherParams {
            max_length: self.max_length,
            scale: self.scale,
            stiffness: self.stiffness,
        }
    }
}

/// Project the active constraints of a cooked tether batch.
pub(crate) fn solve_tether_batch(
    batch: &CookedBatch,
    lambdas: &mut [f32],
    projection: &mut Projection<'_>,
    dt: f32,
) {
    let Ok(params) = bytemuck::try_cast_slice::<f32, TetherParams>(&batch.params) else {
        return;
    };
    let dt_sq = dt * dt;

    for &position in &batch.active {
        let position = position as usize;
        let [free, anchor] = match batch.constraint_particles(position) {
            &[free, anchor] => [free as usize, anchor as usize],
            _ => continue,
        };
        let Some(c) = params.get(position) else {
            continue;
        };

        let w_free = projection.inv_masses[free];
        let w_anchor = projection.inv_masses[anchor];
        let w_sum = w_free + w_anchor;
        if w_sum < 1e-10 {
            continue;
        }

        let diff = projection.predicted[free] - projection.predicted[anchor];
        let dist = diff.length();
        let c_val = dist - c.max_length * c.scale;
        if c_val <= 0.0 || dist < 1e-10 {
            continue;
        }
        let n = diff / dist;

        let alpha_tilde = stiffness_to_compliance(c.stiffness) / dt_sq;
        let lambda = &mut lambdas[position];
        let delta_lambda = -(c_val + alpha_tilde * *lambda) / (w_sum + alpha_tilde);
        *lambda += delta_lambda;

        let correction = n * delta_lambda;
        projection.corrections[free] += correction * w_free;
        projection.corrections[anchor] -= correction * w_anchor;
        projection.counts[free] += 1;
        projection.counts[anchor] += 1;
    }
}
