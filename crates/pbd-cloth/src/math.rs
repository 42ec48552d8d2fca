use glam::{Affine3A, Quat, Vec3};

/// Mass assigned to particles whose inverse mass is (nearly) zero when
/// computing totals and centers of mass.
pub const MAX_PARTICLE_MASS: f32 = 10_000.0;

/// Values below this are treated as zero.
pub const EPSILON: f32 = 1e-6;

/// Compliance of a constraint with stiffness 0.
const MAX_COMPLIANCE: f32 = 1e-3;

/// Rotation part of an affine transform, ignoring scale and shear.
pub fn rotation_of(transform: &Affine3A) -> Quat {
    let (_, rotation, _) = transform.to_scale_rotation_translation();
    rotation
}

/// Mass of a particle, clamping fixed particles to [`MAX_PARTICLE_MASS`].
pub fn particle_mass(inv_mass: f32) -> f32 {
    if inv_mass > 1.0 / MAX_PARTICLE_MASS {
        1.0 / inv_mass
    } else {
        MAX_PARTICLE_MASS
    }
}

pub fn triangle_area(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    (b - a).cross(c - a).length() * 0.5
}

/// Signed volume of the tetrahedron formed by a triangle and the origin.
pub fn signed_tetrahedron_volume(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    a.dot(b.cross(c)) / 6.0
}

/// Rest value of a bend constraint: distance from the center particle to the
/// centroid of the triangle it forms with its two wings.
///
/// ```text
///   wing_a ---- center ---- wing_b
/// ```
pub fn bend_rest_value(wing_a: Vec3, wing_b: Vec3, center: Vec3) -> f32 {
    let centroid = (wing_a + wing_b + center) / 3.0;
    (center - centroid).length()
}

/// Map a [0, 1] stiffness to XPBD compliance (0 = rigid).
pub fn stiffness_to_compliance(stiffness: f32) -> f32 {
    (1.0 - stiffness.clamp(0.0, 1.0)) * MAX_COMPLIANCE
}
