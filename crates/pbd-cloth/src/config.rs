use glam::Vec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ClothError, Result};

/// Mass per unit area used to derive particle inverse masses.
pub const DEFAULT_PARTICLE_MASS: f32 = 0.1;

/// Mass given to pooled particles of a tearable cloth before they are used.
pub const POOLED_PARTICLE_MASS: f32 = 0.05;

/// Radius given to pooled particles of a tearable cloth before they are used.
pub const POOLED_PARTICLE_RADIUS: f32 = 0.1;

/// How render mesh normals are refreshed after the solver has run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NormalsUpdate {
    /// Recompute area-weighted vertex normals from the simulated positions.
    #[default]
    Recalculate,
    /// Keep the normals provided by the skinning source.
    Skin,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AerodynamicParams {
    pub drag: f32,
    pub lift: f32,
}

impl Default for AerodynamicParams {
    fn default() -> Self {
        Self {
            drag: 0.05,
            lift: 0.05,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TetherParams {
    /// Multiplier applied to every tether rest length.
    pub scale: f32,
    pub stiffness: f32,
    /// Maximum tethers per free particle and fixed island.
    pub max_tethers: usize,
}

impl Default for TetherParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            stiffness: 1.0,
            max_tethers: 4,
        }
    }
}

/// Parameters of the skin constraints generated for skinned cloth.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SkinParams {
    pub radius: f32,
    pub falloff: f32,
    pub backstop: f32,
    pub stiffness: f32,
}

impl Default for SkinParams {
    fn default() -> Self {
        Self {
            radius: 0.05,
            falloff: 0.1,
            backstop: 0.0,
            stiffness: 1.0,
        }
    }
}

/// Authoring parameters shared by regular and tearable cloth.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClothConfig {
    pub self_collisions: bool,
    /// Mass per unit of area contribution.
    pub particle_density: f32,
    pub aerodynamics: AerodynamicParams,
    pub tethers: TetherParams,
    pub skin: SkinParams,
    /// Force threshold above which pin constraints break.
    pub pin_break_resistance: f32,
    pub normals_update: NormalsUpdate,
    pub update_tangents: bool,
    /// Items processed between two initializer progress reports.
    pub yield_interval: usize,
}

impl Default for ClothConfig {
    fn default() -> Self {
        Self {
            self_collisions: false,
            particle_density: DEFAULT_PARTICLE_MASS,
            aerodynamics: AerodynamicParams::default(),
            tethers: TetherParams::default(),
            skin: SkinParams::default(),
            pin_break_resistance: f32::MAX,
            normals_update: NormalsUpdate::Recalculate,
            update_tangents: true,
            yield_interval: 500,
        }
    }
}

/// Tearing parameters.
///
/// `tear_capacity` scales the spare particle pool, `tear_resistance_multiplier`
/// converts per-particle resistance into force units, `tear_rate` bounds the
/// number of splits per step and `tear_debilitation` weakens the edges next to
/// a split.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TearConfig {
    pub tear_capacity: f32,
    pub tear_resistance_multiplier: f32,
    pub tear_rate: usize,
    pub tear_debilitation: f32,
}

impl TearConfig {
    /// Tearing tuned to propagate slowly through thick fabric.
    #[must_use]
    pub const fn sturdy() -> Self {
        Self {
            tear_capacity: 0.25,
            tear_resistance_multiplier: 4000.0,
            tear_rate: 1,
            tear_debilitation: 0.2,
        }
    }

    /// Tearing tuned for paper-like material that rips in long runs.
    #[must_use]
    pub const fn brittle() -> Self {
        Self {
            tear_capacity: 1.0,
            tear_resistance_multiplier: 250.0,
            tear_rate: 8,
            tear_debilitation: 0.8,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.tear_capacity) {
            return Err(ClothError::invalid_config(format!(
                "tear capacity {} outside [0, 1]",
                self.tear_capacity
            )));
        }
        if !(0.0..=1.0).contains(&self.tear_debilitation) {
            return Err(ClothError::invalid_config(format!(
                "tear debilitation {} outside [0, 1]",
                self.tear_debilitation
            )));
        }
        if self.tear_resistance_multiplier < 0.0 {
            return Err(ClothError::invalid_config(
                "tear resistance multiplier must be non-negative",
            ));
        }
        Ok(())
    }
}

impl Default for TearConfig {
    fn default() -> Self {
        Self {
            tear_capacity: 0.5,
            tear_resistance_multiplier: 1000.0,
            tear_rate: 1,
            tear_debilitation: 0.5,
        }
    }
}

/// Settings of the CPU reference solver.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    pub max_particles: usize,
    pub iterations: u32,
    pub gravity: Vec3,
    pub damping: f32,
    pub fixed_delta_time: f32,
    pub simulate_in_local_space: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_particles: 5000,
            iterations: 3,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            damping: 0.0,
            fixed_delta_time: 0.02,
            simulate_in_local_space: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tear_presets_valid() {
        for (name, config) in [
            ("default", TearConfig::default()),
            ("sturdy", TearConfig::sturdy()),
            ("brittle", TearConfig::brittle()),
        ] {
            assert!(config.validate().is_ok(), "{name} preset must validate");
        }
    }

    #[test]
    fn test_tear_capacity_out_of_range() {
        let config = TearConfig {
            tear_capacity: 1.5,
            ..TearConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ClothError::InvalidConfig(_))
        ));
    }
}
