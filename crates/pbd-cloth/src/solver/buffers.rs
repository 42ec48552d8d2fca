use glam::{Quat, Vec3, Vec4};

use crate::materials::MaterialHandle;
use crate::particle::Phase;

/// Particle pool shared by every actor in a solver (SoA, indexed by slot).
///
/// Positions, velocities and orientations are in solver space; renderable
/// positions, orientations and anisotropies are in world space.
#[derive(Clone, Debug)]
pub struct ParticleBuffers {
    pub active: Vec<bool>,
    pub positions: Vec<Vec3>,
    pub prev_positions: Vec<Vec3>,
    /// Positions at the start of the frame, for interpolation.
    pub start_positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub angular_velocities: Vec<Vec3>,
    pub orientations: Vec<Quat>,
    pub prev_orientations: Vec<Quat>,
    pub start_orientations: Vec<Quat>,
    pub rest_orientations: Vec<Quat>,
    pub inv_masses: Vec<f32>,
    pub inv_rotational_masses: Vec<f32>,
    /// Diagonal of the inverse inertia tensor, derived from mass and radii.
    pub inv_inertia: Vec<Vec3>,
    pub principal_radii: Vec<Vec3>,
    pub phases: Vec<Phase>,
    /// `w == 0` disables rest-pose self-collision filtering for the slot.
    pub rest_positions: Vec<Vec4>,
    pub collision_materials: Vec<Option<MaterialHandle>>,
    /// Accumulated until the next substep consumes it.
    pub external_forces: Vec<Vec3>,
    pub renderable_positions: Vec<Vec3>,
    pub renderable_orientations: Vec<Quat>,
    /// Ellipsoid axes (xyz) and radius (w) per particle.
    pub anisotropies: Vec<[Vec4; 3]>,
}

impl ParticleBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: vec![false; capacity],
            positions: vec![Vec3::ZERO; capacity],
            prev_positions: vec![Vec3::ZERO; capacity],
            start_positions: vec![Vec3::ZERO; capacity],
            velocities: vec![Vec3::ZERO; capacity],
            angular_velocities: vec![Vec3::ZERO; capacity],
            orientations: vec![Quat::IDENTITY; capacity],
            prev_orientations: vec![Quat::IDENTITY; capacity],
            start_orientations: vec![Quat::IDENTITY; capacity],
            rest_orientations: vec![Quat::IDENTITY; capacity],
            inv_masses: vec![0.0; capacity],
            inv_rotational_masses: vec![0.0; capacity],
            inv_inertia: vec![Vec3::ZERO; capacity],
            principal_radii: vec![Vec3::ONE; capacity],
            phases: vec![Phase::default(); capacity],
            rest_positions: vec![Vec4::ZERO; capacity],
            collision_materials: vec![None; capacity],
            external_forces: vec![Vec3::ZERO; capacity],
            renderable_positions: vec![Vec3::ZERO; capacity],
            renderable_orientations: vec![Quat::IDENTITY; capacity],
            anisotropies: vec![[Vec4::X, Vec4::Y, Vec4::Z]; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.positions.len()
    }

    /// Recompute `inv_inertia` for `slots` treating each particle as a solid
    /// ellipsoid.
    pub fn recalculate_inertia(&mut self, slots: impl IntoIterator<Item = usize>) {
        for k in slots {
            let r = self.principal_radii[k];
            let sq = r * r;
            let denominators = Vec3::new(sq.y + sq.z, sq.x + sq.z, sq.x + sq.y);
            let inv_rot = self.inv_rotational_masses[k];
            self.inv_inertia[k] = Vec3::select(
                denominators.cmpgt(Vec3::ZERO),
                inv_rot * 5.0 / denominators,
                Vec3::ZERO,
            );
        }
    }
}
