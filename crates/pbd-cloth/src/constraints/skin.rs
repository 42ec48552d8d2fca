use bytemuck::{Pod, Zeroable};
use glam::Vec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintKind};

/// Binds a particle to an animated skin point.
///
/// The particle may move up to `radius` from the point; `backstop` keeps it
/// from sinking behind the surface along `normal`. `falloff` is the radius
/// used for collisions with the skin.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SkinConstraint {
    pub particles: [u32; 1],
    pub point: Vec3,
    pub normal: Vec3,
    pub radius: f32,
    pub falloff: f32,
    pub backstop: f32,
    pub stiffness: f32,
}

impl SkinConstraint {
    pub fn new(
        particle: u32,
        point: Vec3,
        normal: Vec3,
        radius: f32,
        falloff: f32,
        backstop: f32,
        stiffness: f32,
    ) -> Self {
        Self {
            particles: [particle],
            point,
            normal,
            radius,
            falloff,
            backstop,
            stiffness,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SkinParams {
    pub point: [f32; 3],
    pub normal: [f32; 3],
    pub radius: f32,
    pub falloff: f32,
    pub backstop: f32,
    pub stiffness: f32,
}

impl Constraint for SkinConstraint {
    const KIND: ConstraintKind = ConstraintKind::Skin;
    type Params = SkinParams;

    fn particles(&self) -> &[u32] {
        &self.particles
    }

    fn particles_mut(&mut self) -> &mut [u32] {
        &mut self.particles
    }

    fn params(&self) -> SkinParams {
        SkinParams {
            point: self.point.to_array(),
            normal: self.normal.to_array(),
            radius: self.radius,
            falloff: self.falloff,
            backstop: self.backstop,
            stiffness: self.stiffness,
        }
    }
}
