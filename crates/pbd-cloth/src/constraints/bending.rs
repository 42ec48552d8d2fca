use bytemuck::{Pod, Zeroable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintKind};

/// Bending constraint over a vertex triple:
///
/// ```text
///   wing_a ---- center ---- wing_b
/// ```
///
/// The rest value is the distance from the center to the centroid of the
/// triangle (see [`crate::math::bend_rest_value`]); `max_bending` allows
/// slack before the constraint engages.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BendConstraint {
    /// `[wing_a, wing_b, center]`.
    pub particles: [u32; 3],
    pub rest_bend: f32,
    pub max_bending: f32,
    pub stiffness: f32,
}

impl BendConstraint {
    pub fn new(
        wing_a: u32,
        wing_b: u32,
        center: u32,
        rest_bend: f32,
        max_bending: f32,
        stiffness: f32,
    ) -> Self {
        Self {
            particles: [wing_a, wing_b, center],
            rest_bend,
            max_bending,
            stiffness,
        }
    }

    pub fn center(&self) -> u32 {
        self.particles[2]
    }

    /// True if `particle` is one of the two wings.
    pub fn has_wing(&self, particle: u32) -> bool {
        self.particles[0] == particle || self.particles[1] == particle
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BendParams {
    pub rest_bend: f32,
    pub max_bending: f32,
    pub stiffness: f32,
}

impl Constraint for BendConstraint {
    const KIND: ConstraintKind = ConstraintKind::Bending;
    type Params = BendParams;

    fn particles(&self) -> &[u32] {
        &self.particles
    }

    fn particles_mut(&mut self) -> &mut [u32] {
        &mut self.particles
    }

    fn params(&self) -> BendParams {
        BendParams {
            rest_bend: self.rest_bend,
            max_bending: self.max_bending,
            stiffness: self.stiffness,
        }
    }
}
