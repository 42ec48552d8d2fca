use glam::{Quat, Vec3, Vec4};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Per-particle fields exchanged between an actor and the solver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct ParticleData: u32 {
        const ACTIVE_STATUS = 1 << 0;
        const POSITIONS = 1 << 1;
        const REST_POSITIONS = 1 << 2;
        const ORIENTATIONS = 1 << 3;
        const REST_ORIENTATIONS = 1 << 4;
        const VELOCITIES = 1 << 5;
        const ANGULAR_VELOCITIES = 1 << 6;
        const INV_MASSES = 1 << 7;
        const INV_ROTATIONAL_MASSES = 1 << 8;
        const PHASES = 1 << 9;
        const PRINCIPAL_RADII = 1 << 10;
        const COLLISION_MATERIAL = 1 << 11;
        const ALL = Self::ACTIVE_STATUS.bits()
            | Self::POSITIONS.bits()
            | Self::REST_POSITIONS.bits()
            | Self::ORIENTATIONS.bits()
            | Self::REST_ORIENTATIONS.bits()
            | Self::VELOCITIES.bits()
            | Self::ANGULAR_VELOCITIES.bits()
            | Self::INV_MASSES.bits()
            | Self::INV_ROTATIONAL_MASSES.bits()
            | Self::PHASES.bits()
            | Self::PRINCIPAL_RADII.bits()
            | Self::COLLISION_MATERIAL.bits();
    }
}

bitflags::bitflags! {
    /// Behavior flags stored in the high bits of a [`Phase`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct PhaseFlags: u32 {
        /// Particle collides with particles of its own group.
        const SELF_COLLIDE = 1 << 24;
        const FLUID = 1 << 25;
    }
}

/// Collision group and behavior flags packed into one integer.
///
/// ```text
///   31      24 23                     0
///   | flags   |         group         |
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Phase(pub u32);

impl Phase {
    const GROUP_MASK: u32 = 0x00ff_ffff;

    #[must_use]
    pub const fn new(group: u32, flags: PhaseFlags) -> Self {
        Self((group & Self::GROUP_MASK) | flags.bits())
    }

    #[must_use]
    pub const fn group(self) -> u32 {
        self.0 & Self::GROUP_MASK
    }

    #[must_use]
    pub const fn flags(self) -> PhaseFlags {
        PhaseFlags::from_bits_truncate(self.0 & !Self::GROUP_MASK)
    }
}

/// Actor-local particle authoring data (SoA).
///
/// Indices are local particle indices. While the owning actor is out of the
/// solver these arrays are the source of truth; while it is in the solver the
/// pool is authoritative and these are refreshed by pulls.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParticleSet {
    pub active: Vec<bool>,
    pub positions: Vec<Vec3>,
    /// Rest positions; `w == 1` marks the value as valid.
    pub rest_positions: Vec<Vec4>,
    pub orientations: Vec<Quat>,
    pub rest_orientations: Vec<Quat>,
    pub velocities: Vec<Vec3>,
    pub angular_velocities: Vec<Vec3>,
    pub inv_masses: Vec<f32>,
    pub inv_rotational_masses: Vec<f32>,
    pub phases: Vec<Phase>,
    pub principal_radii: Vec<Vec3>,
}

impl ParticleSet {
    /// Particles without orientation data.
    pub fn new(count: usize) -> Self {
        Self {
            active: vec![false; count],
            positions: vec![Vec3::ZERO; count],
            rest_positions: vec![Vec4::ZERO; count],
            orientations: Vec::new(),
            rest_orientations: Vec::new(),
            velocities: vec![Vec3::ZERO; count],
            angular_velocities: vec![Vec3::ZERO; count],
            inv_masses: vec![0.0; count],
            inv_rotational_masses: vec![0.0; count],
            phases: vec![Phase::default(); count],
            principal_radii: vec![Vec3::ONE; count],
        }
    }

    /// Particles that also carry orientations.
    pub fn with_orientations(count: usize) -> Self {
        Self {
            orientations: vec![Quat::IDENTITY; count],
            rest_orientations: vec![Quat::IDENTITY; count],
            ..Self::new(count)
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn uses_oriented_particles(&self) -> bool {
        !self.orientations.is_empty() && self.orientations.len() == self.positions.len()
    }
}
