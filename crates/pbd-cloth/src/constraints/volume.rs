use bytemuck::{Pod, Zeroable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintKind};

/// Keeps the volume enclosed by a closed triangle surface.
///
/// `triangles` holds three particle indices per face, so particles appear
/// once per incident face.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VolumeConstraint {
    pub triangles: Vec<u32>,
    pub rest_volume: f32,
    pub pressure: f32,
    pub stiffness: f32,
}

impl VolumeConstraint {
    pub fn new(triangles: Vec<u32>, rest_volume: f32, pressure: f32, stiffness: f32) -> Self {
        Self {
            triangles,
            rest_volume,
            pressure,
            stiffness,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VolumeParams {
    pub rest_volume: f32,
    pub pressure: f32,
    pub stiffness: f32,
}

impl Constraint for VolumeConstraint {
    const KIND: ConstraintKind = ConstraintKind::Volume;
    type Params = VolumeParams;

    fn particles(&self) -> &[u32] {
        &self.triangles
    }

    fn particles_mut(&mut self) -> &mut [u32] {
        &mut self.triangles
    }

    fn params(&self) -> VolumeParams {
        VolumeParams {
            rest_volume: self.rest_volume,
            pressure: self.pressure,
            stiffness: self.stiffness,
        }
    }
}
