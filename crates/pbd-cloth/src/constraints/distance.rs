use bytemuck::{Pod, Zeroable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintKind, CookedBatch, Projection};
use crate::math::stiffness_to_compliance;

/// Distance constraint along a cloth edge.
///
/// Stretch and compression stiffness are applied separately so cloth can be
/// inextensible while still buckling freely.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistanceConstraint {
    pub particles: [u32; 2],
    pub rest_length: f32,
    pub stretch_stiffness: f32,
    pub compression_stiffness: f32,
}

impl DistanceConstraint {
    pub fn new(
        i: u32,
        j: u32,
        rest_length: f32,
        stretch_stiffness: f32,
        compression_stiffness: f32,
    ) -> Self {
        Self {
            particles: [i, j],
            rest_length,
            stretch_stiffness,
            compression_stiffness,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DistanceParams {
    pub rest_length: f32,
    pub stretch_stiffness: f32,
    pub compression_stiffness: f32,
}

impl Constraint for DistanceConstraint {
    const KIND: ConstraintKind = ConstraintKind::Distance;
    type Params = DistanceParams;

    fn particles(&self) -> &[u32] {
        &self.particles
    }

    fn particles_mut(&mut self) -> &mut [u32] {
        &mut self.particles
    }

    fn params(&self) -> DistanceParams {
        DistanceParams {
            rest_length: self.rest_length,
            stretch_stiffness: self.stretch_stiffness,
            compression_stiffness: self.compression_stiffness,
        }
    }
}

/// Project the active constraints of a cooked distance batch using XPBD.
///
/// For each constraint:
/// 1. C = |p_i - p_j| - rest_length
/// 2. alpha_tilde = compliance / dt^2, compliance from the stretch or
///    compression stiffness depending on the sign of C
/// 3. delta_lambda = -(C + alpha_tilde * lambda) / (w_i + w_j + alpha_tilde)
///
/// Corrections are accumulated Jacobi-style. `lambdas` is indexed by cooked
/// position; a stretched constraint ends up with a negative lambda.
pub(crate) fn solve_distance_batch(
    batch: &CookedBatch,
    lambdas: &mut [f32],
    projection: &mut Projection<'_>,
    dt: f32,
) {
    let Ok(params) = bytemuck::try_cast_slice::<f32, DistanceParams>(&batch.params) else {
        return;
    };
    let dt_sq = dt * dt;

    for &position in &batch.active {
        let position = position as usize;
        let [i, j] = match batch.constraint_particles(position) {
            &[i, j] => [i as usize, j as usize],
            _ => continue,
        };
        let Some(c) = params.get(position) else {
            continue;
        };

        let w_i = projection.inv_masses[i];
        let w_j = projection.inv_masses[j];
        let w_sum = w_i + w_j;
        if w_sum < 1e-10 {
            continue;
        }

        let diff = projection.predicted[i] - projection.predicted[j];
        let dist = diff.length();
        if dist < 1e-10 {
            continue;
        }

        let c_val = dist - c.rest_length;
        let stiffness = if c_val > 0.0 {
            c.stretch_stiffness
        } else {
            c.compression_stiffness
        };
        let n = diff / dist;

        let alpha_tilde = stiffness_to_compliance(stiffness) / dt_sq;
        let lambda = &mut lambdas[position];
        let delta_lambda = -(c_val + alpha_tilde * *lambda) / (w_sum + alpha_tilde);
        *lambda += delta_lambda;

        let correction = n * delta_lambda;
        projection.corrections[i] += correction * w_i;
        projection.corrections[j] -= correction * w_j;
        projection.counts[i] += 1;
        projection.counts[j] += 1;
    }
}
