use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintKind, ConstraintSet};
use crate::solver::Solver;

/// Handle of a rigid body or collider known to the solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ColliderHandle(pub u32);

/// Attaches a particle to a point on a collider.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PinConstraint {
    pub particles: [u32; 1],
    pub collider: ColliderHandle,
    /// Attachment point in the collider's local space.
    pub offset: Vec3,
    pub stiffness: f32,
    /// Force above which the pin breaks.
    pub break_resistance: f32,
}

impl PinConstraint {
    pub fn new(
        particle: u32,
        collider: ColliderHandle,
        offset: Vec3,
        stiffness: f32,
        break_resistance: f32,
    ) -> Self {
        Self {
            particles: [particle],
            collider,
            offset,
            stiffness,
            break_resistance,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PinParams {
    pub offset: [f32; 3],
    pub collider: u32,
    pub stiffness: f32,
}

impl Constraint for PinConstraint {
    const KIND: ConstraintKind = ConstraintKind::Pin;
    type Params = PinParams;

    fn particles(&self) -> &[u32] {
        &self.particles
    }

    fn particles_mut(&mut self) -> &mut [u32] {
        &mut self.particles
    }

    fn params(&self) -> PinParams {
        PinParams {
            offset: self.offset.to_array(),
            collider: self.collider.0,
            stiffness: self.stiffness,
        }
    }
}

impl ConstraintSet<PinConstraint> {
    /// Deactivate every pin whose last force exceeded its break resistance.
    ///
    /// Returns the number of pins broken.
    pub fn break_constraints(&mut self, solver: &mut dyn Solver) -> usize {
        let mut broken = 0;
        for batch in self.batches_mut() {
            let forces = batch.constraint_forces(solver);
            let mut changed = false;
            for (i, force) in forces.into_iter().enumerate() {
                let resistance = batch.constraints()[i].break_resistance;
                if batch.is_active(i) && -force * 1000.0 > resistance {
                    batch.deactivate_constraint(i);
                    changed = true;
                    broken += 1;
                }
            }
            if changed {
                batch.set_active_constraints(solver);
            }
        }
        if broken > 0 {
            debug!(broken, "pin constraints broken");
        }
        broken
    }
}
