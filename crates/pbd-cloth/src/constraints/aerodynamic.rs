use bytemuck::{Pod, Zeroable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintKind};

/// Per-particle drag and lift, weighted by the particle's area contribution.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AerodynamicConstraint {
    pub particles: [u32; 1],
    pub area: f32,
    pub drag: f32,
    pub lift: f32,
}

impl AerodynamicConstraint {
    pub fn new(particle: u32, area: f32, drag: f32, lift: f32) -> Self {
        Self {
            particles: [particle],
            area,
            drag,
            lift,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct AerodynamicParams {
    pub area: f32,
    pub drag: f32,
    pub lift: f32,
}

impl Constraint for AerodynamicConstraint {
    const KIND: ConstraintKind = ConstraintKind::Aerodynamic;
    type Params = AerodynamicParams;

    fn particles(&self) -> &[u32] {
        &self.particles
    }

    fn particles_mut(&mut self) -> &mut [u32] {
        &mut self.particles
    }

    fn params(&self) -> AerodynamicParams {
        AerodynamicParams {
            area: self.area,
            drag: self.drag,
            lift: self.lift,
        }
    }
}
