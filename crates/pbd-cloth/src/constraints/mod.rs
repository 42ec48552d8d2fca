//! Constraint batches.
//!
//! A [`ConstraintBatch`] holds constraints of a single kind in insertion
//! order. Logical indices (the position a constraint was added at) never
//! change: cooking only computes a solver-side permutation that groups
//! constraints sharing no particle into phases, so code holding indices into
//! the batch (tearing, optimization) stays valid.
//!
//! ```text
//!   logical:  c0 c1 c2 c3 c4          cooked: [c0 c2 c4][c1 c3]
//!                                              phase 0   phase 1
//! ```
//!
//! Batches are registered with a [`Solver`] in cooked order with particle
//! indices remapped from actor-local indices to pool slots. Any structural
//! change (new constraints, rewritten indices) requires removing and
//! re-adding the batch.

pub mod aerodynamic;
pub mod bending;
pub mod distance;
pub mod pin;
pub mod skin;
pub mod tether;
pub mod volume;

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use bytemuck::Pod;
use glam::Vec3;
use tracing::{debug, error};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solver::{BatchHandle, Solver};

pub use aerodynamic::AerodynamicConstraint;
pub use bending::BendConstraint;
pub use distance::DistanceConstraint;
pub use pin::{ColliderHandle, PinConstraint};
pub use skin::SkinConstraint;
pub use tether::TetherConstraint;
pub use volume::VolumeConstraint;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstraintKind {
    Distance,
    Bending,
    Aerodynamic,
    Volume,
    Skin,
    Tether,
    Pin,
}

/// A single constraint of some kind.
pub trait Constraint: Clone + fmt::Debug {
    const KIND: ConstraintKind;

    /// Packed per-constraint parameters handed to the solver.
    type Params: Pod;

    /// Actor-local particle indices referenced by this constraint.
    fn particles(&self) -> &[u32];

    fn particles_mut(&mut self) -> &mut [u32];

    fn params(&self) -> Self::Params;
}

/// Solver-ready batch data in cooked order, particle indices in pool slots.
#[derive(Clone, Debug, PartialEq)]
pub struct CookedBatch {
    pub kind: ConstraintKind,
    /// `particles[particle_offsets[i]..particle_offsets[i + 1]]` belong to constraint `i`.
    pub particle_offsets: Vec<u32>,
    pub particles: Vec<u32>,
    /// Flat parameter records, `param_stride` floats each.
    pub params: Vec<f32>,
    pub param_stride: usize,
    /// Number of constraints in each independent phase.
    pub phase_sizes: Vec<u32>,
    /// Cooked positions of the active constraints.
    pub active: Vec<u32>,
}

impl CookedBatch {
    pub fn len(&self) -> usize {
        self.particle_offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn constraint_particles(&self, index: usize) -> &[u32] {
        let start = self.particle_offsets[index] as usize;
        let end = self.particle_offsets[index + 1] as usize;
        &self.particles[start..end]
    }
}

/// Scratch buffers for Jacobi-style projection of one iteration.
pub(crate) struct Projection<'a> {
    pub predicted: &'a [Vec3],
    pub inv_masses: &'a [f32],
    pub corrections: &'a mut [Vec3],
    pub counts: &'a mut [u32],
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct CookedLayout {
    order: Vec<u32>,
    phase_sizes: Vec<u32>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintBatch<C> {
    constraints: Vec<C>,
    active: Vec<bool>,
    layout: Option<CookedLayout>,
    #[cfg_attr(feature = "serde", serde(skip))]
    handle: Option<BatchHandle>,
}

impl<C: Constraint> ConstraintBatch<C> {
    pub fn new() -> Self {
        Self {
            constraints: Vec::new(),
            active: Vec::new(),
            layout: None,
            handle: None,
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn constraints(&self) -> &[C] {
        &self.constraints
    }

    pub fn get(&self, index: usize) -> Option<&C> {
        self.constraints.get(index)
    }

    /// Rewrite the particles of constraint `index`.
    ///
    /// Takes effect in the solver on the next `add_to_solver`.
    pub fn set_particles(&mut self, index: usize, particles: &[u32]) {
        self.constraints[index].particles_mut().copy_from_slice(particles);
    }

    /// Append an active constraint and return its logical index.
    ///
    /// Adding to a cooked batch drops the cooked layout; the batch is then
    /// registered in logical order until cooked again.
    pub fn add_constraint(&mut self, constraint: C) -> usize {
        if self.layout.take().is_some() {
            debug!(kind = ?C::KIND, "constraint added after cooking, layout dropped");
        }
        self.constraints.push(constraint);
        self.active.push(true);
        self.constraints.len() - 1
    }

    /// Group constraints that share no particle into phases.
    pub fn cook(&mut self) {
        let mut phases: Vec<(HashSet<u32>, Vec<u32>)> = Vec::new();
        for (i, c) in self.constraints.iter().enumerate() {
            let particles = c.particles();
            let slot = phases
                .iter()
                .position(|(used, _)| particles.iter().all(|p| !used.contains(p)));
            let phase = match slot {
                Some(phase) => phase,
                None => {
                    phases.push((HashSet::new(), Vec::new()));
                    phases.len() - 1
                }
            };
            phases[phase].0.extend(particles.iter().copied());
            phases[phase].1.push(i as u32);
        }

        let phase_sizes = phases.iter().map(|(_, members)| members.len() as u32).collect();
        let order = phases.into_iter().flat_map(|(_, members)| members).collect();
        self.layout = Some(CookedLayout { order, phase_sizes });
        debug!(kind = ?C::KIND, constraints = self.constraints.len(), "cooked batch");
    }

    pub fn is_cooked(&self) -> bool {
        self.layout.is_some()
    }

    /// Number of independent phases, 1 for an uncooked non-empty batch.
    pub fn phase_count(&self) -> usize {
        match &self.layout {
            Some(layout) => layout.phase_sizes.len(),
            None => usize::from(!self.constraints.is_empty()),
        }
    }

    /// Logical constraint indices in the order they are handed to the solver.
    pub fn solver_order(&self) -> Cow<'_, [u32]> {
        match &self.layout {
            Some(layout) => Cow::Borrowed(&layout.order),
            None => Cow::Owned((0..self.constraints.len() as u32).collect()),
        }
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.active.get(index).copied().unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    pub fn activate_constraint(&mut self, index: usize) {
        if let Some(flag) = self.active.get_mut(index) {
            *flag = true;
        }
    }

    pub fn deactivate_constraint(&mut self, index: usize) {
        if let Some(flag) = self.active.get_mut(index) {
            *flag = false;
        }
    }

    /// Cooked positions of the currently active constraints.
    pub fn active_solver_positions(&self) -> Vec<u32> {
        self.solver_order()
            .iter()
            .enumerate()
            .filter(|(_, &logical)| self.active[logical as usize])
            .map(|(position, _)| position as u32)
            .collect()
    }

    /// Commit the active flags to the solver.
    pub fn set_active_constraints(&mut self, solver: &mut dyn Solver) {
        if let Some(handle) = self.handle {
            let active = self.active_solver_positions();
            solver.set_active_constraints(handle, &active);
        }
    }

    pub fn constraints_involving_particle(&self, particle: usize) -> Vec<usize> {
        self.constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| c.particles().iter().any(|&p| p as usize == particle))
            .map(|(i, _)| i)
            .collect()
    }

    /// Solver-side data with local particle indices remapped through
    /// `particle_indices`.
    pub fn cooked_data(&self, particle_indices: &[usize]) -> CookedBatch {
        let order = self.solver_order();
        let mut particle_offsets = Vec::with_capacity(order.len() + 1);
        let mut particles = Vec::new();
        let mut params = Vec::with_capacity(order.len());
        particle_offsets.push(0);
        for &logical in order.iter() {
            let c = &self.constraints[logical as usize];
            particles.extend(c.particles().iter().map(|&p| particle_indices[p as usize] as u32));
            particle_offsets.push(particles.len() as u32);
            params.push(c.params());
        }
        let phase_sizes = match &self.layout {
            Some(layout) => layout.phase_sizes.clone(),
            None if order.is_empty() => Vec::new(),
            None => vec![order.len() as u32],
        };

        CookedBatch {
            kind: C::KIND,
            particle_offsets,
            particles,
            params: bytemuck::cast_slice::<C::Params, f32>(&params).to_vec(),
            param_stride: std::mem::size_of::<C::Params>() / std::mem::size_of::<f32>(),
            phase_sizes,
            active: self.active_solver_positions(),
        }
    }

    pub fn in_solver(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<BatchHandle> {
        self.handle
    }

    /// Register the current data with the solver. No-op if already registered.
    pub fn add_to_solver(&mut self, solver: &mut dyn Solver, particle_indices: &[usize]) {
        if self.handle.is_none() {
            self.handle = Some(solver.register_batch(self.cooked_data(particle_indices)));
        }
    }

    pub fn remove_from_solver(&mut self, solver: &mut dyn Solver) -> Result<()> {
        match self.handle.take() {
            Some(handle) => solver.unregister_batch(handle),
            None => Ok(()),
        }
    }

    pub fn set_enabled(&mut self, solver: &mut dyn Solver, enabled: bool) {
        if let Some(handle) = self.handle {
            solver.set_batch_enabled(handle, enabled);
        }
    }

    /// Per-constraint forces from the last step, in logical order.
    ///
    /// Empty if the batch is not registered.
    pub fn constraint_forces(&self, solver: &dyn Solver) -> Vec<f32> {
        let Some(handle) = self.handle else {
            return Vec::new();
        };
        let cooked = solver.constraint_forces(handle);
        let mut forces = vec![0.0; self.constraints.len()];
        for (position, &logical) in self.solver_order().iter().enumerate() {
            if let (Some(slot), Some(&force)) = (forces.get_mut(logical as usize), cooked.get(position)) {
                *slot = force;
            }
        }
        forces
    }
}

impl<C: Constraint> Default for ConstraintBatch<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// All batches of one constraint kind owned by an actor.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintSet<C> {
    batches: Vec<ConstraintBatch<C>>,
    enabled: bool,
}

impl<C: Constraint> ConstraintSet<C> {
    pub fn new() -> Self {
        Self {
            batches: Vec::new(),
            enabled: true,
        }
    }

    pub fn add_batch(&mut self, batch: ConstraintBatch<C>) -> usize {
        self.batches.push(batch);
        self.batches.len() - 1
    }

    pub fn batches(&self) -> &[ConstraintBatch<C>] {
        &self.batches
    }

    pub fn batches_mut(&mut self) -> &mut [ConstraintBatch<C>] {
        &mut self.batches
    }

    pub fn first_batch(&self) -> Option<&ConstraintBatch<C>> {
        self.batches.first()
    }

    pub fn first_batch_mut(&mut self) -> Option<&mut ConstraintBatch<C>> {
        self.batches.first_mut()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Remove every batch, unregistering them first.
    pub fn clear(&mut self, solver: &mut dyn Solver) {
        ConstraintSetOps::remove_from_solver(self, solver);
        self.batches.clear();
    }
}

impl<C: Constraint> Default for ConstraintSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind-erased operations over a [`ConstraintSet`].
pub trait ConstraintSetOps {
    fn kind(&self) -> ConstraintKind;

    fn constraint_count(&self) -> usize;

    fn add_to_solver(&mut self, solver: &mut dyn Solver, particle_indices: &[usize]);

    /// Unregister every batch. Failures are logged and do not stop the others.
    fn remove_from_solver(&mut self, solver: &mut dyn Solver);

    fn set_enabled(&mut self, solver: &mut dyn Solver, enabled: bool);

    fn set_active_constraints(&mut self, solver: &mut dyn Solver);

    /// Deactivate every constraint touching `particle`, returning how many.
    fn deactivate_involving(&mut self, particle: usize) -> usize;

    fn activate_involving(&mut self, particle: usize) -> usize;
}

impl<C: Constraint> ConstraintSetOps for ConstraintSet<C> {
    fn kind(&self) -> ConstraintKind {
        C::KIND
    }

    fn constraint_count(&self) -> usize {
        self.batches.iter().map(ConstraintBatch::len).sum()
    }

    fn add_to_solver(&mut self, solver: &mut dyn Solver, particle_indices: &[usize]) {
        for batch in &mut self.batches {
            batch.add_to_solver(solver, particle_indices);
            if !self.enabled {
                batch.set_enabled(solver, false);
            }
        }
    }

    fn remove_from_solver(&mut self, solver: &mut dyn Solver) {
        for batch in &mut self.batches {
            if let Err(err) = batch.remove_from_solver(solver) {
                error!(kind = ?C::KIND, %err, "failed to unregister constraint batch");
            }
        }
    }

    fn set_enabled(&mut self, solver: &mut dyn Solver, enabled: bool) {
        self.enabled = enabled;
        for batch in &mut self.batches {
            batch.set_enabled(solver, enabled);
        }
    }

    fn set_active_constraints(&mut self, solver: &mut dyn Solver) {
        for batch in &mut self.batches {
            batch.set_active_constraints(solver);
        }
    }

    fn deactivate_involving(&mut self, particle: usize) -> usize {
        let mut count = 0;
        for batch in &mut self.batches {
            for i in batch.constraints_involving_particle(particle) {
                batch.deactivate_constraint(i);
                count += 1;
            }
        }
        count
    }

    fn activate_involving(&mut self, particle: usize) -> usize {
        let mut count = 0;
        for batch in &mut self.batches {
            for i in batch.constraints_involving_particle(particle) {
                batch.activate_constraint(i);
                count += 1;
            }
        }
        count
    }
}

/// Every constraint set an actor can own.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActorConstraints {
    pub distance: ConstraintSet<DistanceConstraint>,
    pub bending: ConstraintSet<BendConstraint>,
    pub aerodynamic: ConstraintSet<AerodynamicConstraint>,
    pub volume: ConstraintSet<VolumeConstraint>,
    pub skin: ConstraintSet<SkinConstraint>,
    pub tether: ConstraintSet<TetherConstraint>,
    pub pin: ConstraintSet<PinConstraint>,
}

impl ActorConstraints {
    pub fn sets_mut(&mut self) -> [&mut dyn ConstraintSetOps; 7] {
        [
            &mut self.distance,
            &mut self.bending,
            &mut self.aerodynamic,
            &mut self.volume,
            &mut self.skin,
            &mut self.tether,
            &mut self.pin,
        ]
    }

    pub fn add_to_solver(&mut self, solver: &mut dyn Solver, particle_indices: &[usize]) {
        for set in self.sets_mut() {
            set.add_to_solver(solver, particle_indices);
        }
    }

    pub fn remove_from_solver(&mut self, solver: &mut dyn Solver) {
        for set in self.sets_mut() {
            set.remove_from_solver(solver);
        }
    }

    pub fn set_enabled(&mut self, solver: &mut dyn Solver, enabled: bool) {
        for set in self.sets_mut() {
            set.set_enabled(solver, enabled);
        }
    }

    pub fn set_active_constraints(&mut self, solver: &mut dyn Solver) {
        for set in self.sets_mut() {
            set.set_active_constraints(solver);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: u32) -> ConstraintBatch<DistanceConstraint> {
        let mut batch = ConstraintBatch::new();
        for i in 0..n {
            batch.add_constraint(DistanceConstraint::new(i, i + 1, 1.0, 1.0, 1.0));
        }
        batch
    }

    #[test]
    fn test_cook_separates_shared_particles() {
        let mut batch = chain(4);
        batch.cook();
        assert_eq!(batch.phase_count(), 2, "a chain colors with two phases");
        assert_eq!(&*batch.solver_order(), &[0, 2, 1, 3]);
    }

    #[test]
    fn test_cook_preserves_active_flags() {
        let mut batch = chain(4);
        batch.deactivate_constraint(1);
        batch.cook();
        assert!(!batch.is_active(1));
        assert_eq!(batch.active_count(), 3);
        // Logical 1 sits at cooked position 2.
        assert_eq!(batch.active_solver_positions(), vec![0, 1, 3]);
    }

    #[test]
    fn test_add_after_cook_drops_layout() {
        let mut batch = chain(2);
        batch.cook();
        let index = batch.add_constraint(DistanceConstraint::new(7, 8, 1.0, 1.0, 1.0));
        assert_eq!(index, 2);
        assert!(!batch.is_cooked());
        assert_eq!(&*batch.solver_order(), &[0, 1, 2]);
    }

    #[test]
    fn test_cooked_data_remaps_particles() {
        let batch = chain(2);
        let cooked = batch.cooked_data(&[10, 11, 12]);
        assert_eq!(cooked.len(), 2);
        assert_eq!(cooked.constraint_particles(1), &[11, 12]);
        assert_eq!(cooked.param_stride, 3);
        assert_eq!(cooked.params.len(), 6);
    }
}
