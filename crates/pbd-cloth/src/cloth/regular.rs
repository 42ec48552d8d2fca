use std::sync::Arc;

use tracing::trace;

use super::init::{ClothInitializer, InitMode};
use super::ClothBase;
use crate::actor::Actor;
use crate::config::ClothConfig;
use crate::error::Result;
use crate::solver::{Solver, SolverClient};
use crate::topology::HalfEdgeMesh;

/// Cloth with fixed topology.
///
/// Skinned cloth starts with every particle fixed, driven by skin
/// constraints instead of the actor transform.
#[derive(Debug)]
pub struct Cloth {
    base: ClothBase,
    skinned: bool,
}

impl Cloth {
    pub fn new(topology: Arc<HalfEdgeMesh>, config: ClothConfig) -> Self {
        Self {
            base: ClothBase::new(topology, config),
            skinned: false,
        }
    }

    pub fn skinned(topology: Arc<HalfEdgeMesh>, config: ClothConfig) -> Self {
        Self {
            base: ClothBase::new(topology, config),
            skinned: true,
        }
    }

    pub fn is_skinned(&self) -> bool {
        self.skinned
    }

    pub fn base(&self) -> &ClothBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ClothBase {
        &mut self.base
    }

    pub fn actor(&self) -> &Actor {
        &self.base.actor
    }

    pub fn actor_mut(&mut self) -> &mut Actor {
        &mut self.base.actor
    }

    /// Start building particles and constraints from the shared topology.
    ///
    /// Removes the cloth from `solver` first if it is in it. The cloth is
    /// not added back; call [`ClothBase::add_to_solver`] once finished.
    pub fn begin_initialize(&mut self, solver: &mut dyn Solver) -> Result<ClothInitializer<'_>> {
        let mode = InitMode::Regular {
            skinned: self.skinned,
        };
        ClothInitializer::begin(&mut self.base, None, mode, solver)
    }

    /// Initialize in one go.
    pub fn initialize(&mut self, solver: &mut dyn Solver) -> Result<()> {
        self.begin_initialize(solver)?.finish();
        Ok(())
    }

    pub fn generate_tethers(&mut self, solver: &mut dyn Solver) -> bool {
        self.base.generate_tethers(solver)
    }

    /// Put every particle back at its rest position with zero velocity.
    pub fn reset(&mut self, solver: &mut dyn Solver) {
        self.base.reset(solver);
    }
}

impl SolverClient for Cloth {
    /// Fixed particles follow the transform once per frame, not per step.
    fn on_frame_begin(&mut self, solver: &mut dyn Solver) {
        if !self.skinned {
            self.base.actor.update_fixed_particles(solver);
        }
        self.base.frame_begin();
    }

    fn on_step_end(&mut self, solver: &mut dyn Solver, _step_time: f32) {
        self.base.break_pins(solver);
    }

    fn on_frame_end(&mut self, solver: &mut dyn Solver, _step_time: f32) {
        self.base.frame_end(&*solver);
    }

    fn on_visibility_changed(&mut self, visible: bool) {
        trace!(actor = %self.base.actor.id(), visible, "cloth visibility changed");
    }
}
