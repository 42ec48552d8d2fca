//! The solver seam.
//!
//! Actors only talk to the particle pool and the constraint projection
//! backend through the object-safe [`Solver`] trait. [`CpuSolver`] is the
//! in-crate reference backend; [`simulate_frame`] drives clients through the
//! per-frame phases:
//!
//! ```text
//!   frame_begin -> step_begin -> substep x N -> step_end
//!       -> pre_interpolation -> interpolate -> frame_end
//! ```

mod buffers;
mod client;
mod cpu;

use glam::Affine3A;

pub use buffers::ParticleBuffers;
pub use client::{simulate_frame, SolverClient};
pub use cpu::{CpuSolver, SolverStats};

use crate::actor::ActorId;
use crate::constraints::CookedBatch;
use crate::error::Result;

/// Handle of a constraint batch registered with a solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchHandle(pub u32);

/// Placement of the solver in the world.
///
/// When simulating in local space, solver-space data is expressed relative
/// to `transform`; otherwise solver space is world space. Every transform
/// change bumps `version` so actors can tell when fixed particles need to be
/// re-pushed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverSpace {
    transform: Affine3A,
    simulate_in_local_space: bool,
    version: u64,
}

impl SolverSpace {
    pub fn new(simulate_in_local_space: bool) -> Self {
        Self {
            transform: Affine3A::IDENTITY,
            simulate_in_local_space,
            version: 0,
        }
    }

    pub fn transform(&self) -> Affine3A {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Affine3A) {
        self.transform = transform;
        self.version += 1;
    }

    pub fn simulate_in_local_space(&self) -> bool {
        self.simulate_in_local_space
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn world_to_solver(&self) -> Affine3A {
        if self.simulate_in_local_space {
            self.transform.inverse()
        } else {
            Affine3A::IDENTITY
        }
    }

    pub fn solver_to_world(&self) -> Affine3A {
        if self.simulate_in_local_space {
            self.transform
        } else {
            Affine3A::IDENTITY
        }
    }
}

impl Default for SolverSpace {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Operations the actor core needs from a particle pool and its constraint
/// projection backend.
pub trait Solver {
    fn buffers(&self) -> &ParticleBuffers;

    fn buffers_mut(&mut self) -> &mut ParticleBuffers;

    fn space(&self) -> &SolverSpace;

    fn space_mut(&mut self) -> &mut SolverSpace;

    /// Duration of one simulation step.
    fn fixed_delta_time(&self) -> f32;

    /// Reserve `count` free slots for `actor` and append it to the actor
    /// registry. Slots stay owned until released.
    fn allocate(&mut self, actor: ActorId, count: usize) -> Result<Vec<usize>>;

    /// Free `slots` and drop `actor` from the registry, returning the
    /// position it had in the registry.
    fn release(&mut self, actor: ActorId, slots: &[usize]) -> Option<usize>;

    /// Offset (in triangles) of an actor's range in the deformable triangle buffer.
    fn triangles_offset(&self, actor: ActorId) -> Option<usize>;

    fn set_triangles_offset(&mut self, actor: ActorId, offset: usize);

    /// Move the ranges of every registered actor at registry position
    /// `from` or later down by `count` triangles.
    fn shift_triangle_offsets(&mut self, from: usize, count: usize);

    fn deformable_triangles(&self) -> &[u32];

    fn deformable_triangle_count(&self) -> usize {
        self.deformable_triangles().len() / 3
    }

    /// Write `indices` (slot indices, three per triangle) starting at triangle
    /// `offset`, growing the buffer as needed.
    fn set_deformable_triangles(&mut self, indices: &[u32], offset: usize);

    fn remove_deformable_triangles(&mut self, offset: usize, count: usize);

    fn register_batch(&mut self, batch: CookedBatch) -> BatchHandle;

    fn unregister_batch(&mut self, handle: BatchHandle) -> Result<()>;

    fn set_batch_enabled(&mut self, handle: BatchHandle, enabled: bool);

    /// Replace the active constraint list (cooked positions) of a batch.
    fn set_active_constraints(&mut self, handle: BatchHandle, active: &[u32]);

    /// Force on each constraint (cooked order) during the last substep.
    fn constraint_forces(&self, handle: BatchHandle) -> Vec<f32>;

    fn recalculate_inertia_tensors(&mut self);

    fn update_active_particles(&mut self);

    fn update_visibility(&mut self);

    fn is_visible(&self) -> bool;

    /// Advance the simulation by `dt`.
    fn substep(&mut self, dt: f32);

    /// Refresh world-space renderable data from the solver state.
    fn interpolate(&mut self);
}
