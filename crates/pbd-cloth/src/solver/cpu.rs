use glam::Vec3;
use tracing::{debug, trace};

use super::{BatchHandle, ParticleBuffers, Solver, SolverSpace};
use crate::actor::ActorId;
use crate::config::SolverConfig;
use crate::constraints::distance::solve_distance_batch;
use crate::constraints::tether::solve_tether_batch;
use crate::constraints::{ConstraintKind, CookedBatch, Projection};
use crate::error::{ClothError, Result};
use crate::math::rotation_of;

/// Counters of the pool-wide recompute hooks, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SolverStats {
    pub inertia_updates: u64,
    pub active_updates: u64,
    pub visibility_updates: u64,
    pub substeps: u64,
}

#[derive(Clone, Copy, Debug)]
struct ActorEntry {
    id: ActorId,
    triangles_offset: usize,
}

#[derive(Clone, Debug)]
struct RegisteredBatch {
    data: CookedBatch,
    enabled: bool,
    lambdas: Vec<f32>,
    forces: Vec<f32>,
}

/// Reference XPBD backend.
///
/// Integrates gravity and external forces, then projects distance and
/// tether batches with Jacobi-averaged corrections. Other constraint kinds
/// are stored and reported (zero force) but not projected.
pub struct CpuSolver {
    pub config: SolverConfig,
    buffers: ParticleBuffers,
    space: SolverSpace,
    owners: Vec<Option<ActorId>>,
    registry: Vec<ActorEntry>,
    triangles: Vec<u32>,
    batches: Vec<Option<RegisteredBatch>>,
    active_particles: Vec<usize>,
    predicted: Vec<Vec3>,
    corrections: Vec<Vec3>,
    correction_counts: Vec<u32>,
    visible: bool,
    stats: SolverStats,
}

impl CpuSolver {
    pub fn new(config: SolverConfig) -> Self {
        let capacity = config.max_particles;
        Self {
            config,
            buffers: ParticleBuffers::new(capacity),
            space: SolverSpace::new(config.simulate_in_local_space),
            owners: vec![None; capacity],
            registry: Vec::new(),
            triangles: Vec::new(),
            batches: Vec::new(),
            active_particles: Vec::new(),
            predicted: vec![Vec3::ZERO; capacity],
            corrections: vec![Vec3::ZERO; capacity],
            correction_counts: vec![0; capacity],
            visible: false,
            stats: SolverStats::default(),
        }
    }

    /// Solver with default settings and room for `max_particles`.
    pub fn with_capacity(max_particles: usize) -> Self {
        Self::new(SolverConfig {
            max_particles,
            ..SolverConfig::default()
        })
    }

    pub fn free_slots(&self) -> usize {
        self.owners.iter().filter(|o| o.is_none()).count()
    }

    pub fn owner(&self, slot: usize) -> Option<ActorId> {
        self.owners.get(slot).copied().flatten()
    }

    /// Registered actors in registration order.
    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.registry.iter().map(|e| e.id)
    }

    pub fn active_particles(&self) -> &[usize] {
        &self.active_particles
    }

    pub fn batch(&self, handle: BatchHandle) -> Option<&CookedBatch> {
        self.registered(handle).map(|b| &b.data)
    }

    pub fn batch_enabled(&self, handle: BatchHandle) -> Option<bool> {
        self.registered(handle).map(|b| b.enabled)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.iter().flatten().count()
    }

    pub fn stats(&self) -> SolverStats {
        self.stats
    }

    /// World-space bounds of the active particles.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut points = self
            .active_particles
            .iter()
            .map(|&k| self.buffers.renderable_positions[k]);
        let first = points.next()?;
        Some(points.fold((first, first), |(min, max), p| (min.min(p), max.max(p))))
    }

    fn registered(&self, handle: BatchHandle) -> Option<&RegisteredBatch> {
        self.batches.get(handle.0 as usize).and_then(Option::as_ref)
    }

    fn registered_mut(&mut self, handle: BatchHandle) -> Option<&mut RegisteredBatch> {
        self.batches.get_mut(handle.0 as usize).and_then(Option::as_mut)
    }

    /// Apply gravity and external forces, write predicted positions.
    fn integrate(&mut self, gravity: Vec3, damping: f32, dt: f32) {
        let buffers = &mut self.buffers;
        let positions = &buffers.positions;
        let inv_masses = &buffers.inv_masses;
        let active = &buffers.active;
        let external = &buffers.external_forces;

        let step = |k: usize, predicted: &mut Vec3, velocity: &mut Vec3| {
            if !active[k] || inv_masses[k] <= 0.0 {
                *predicted = positions[k];
                return;
            }
            *velocity += (gravity + external[k] * inv_masses[k]) * dt;
            *velocity *= damping;
            *predicted = positions[k] + *velocity * dt;
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.predicted
                .par_iter_mut()
                .zip(buffers.velocities.par_iter_mut())
                .enumerate()
                .for_each(|(k, (predicted, velocity))| step(k, predicted, velocity));
        }

        #[cfg(not(feature = "parallel"))]
        for (k, (predicted, velocity)) in self
            .predicted
            .iter_mut()
            .zip(buffers.velocities.iter_mut())
            .enumerate()
        {
            step(k, predicted, velocity);
        }
    }
}

impl Solver for CpuSolver {
    fn buffers(&self) -> &ParticleBuffers {
        &self.buffers
    }

    fn buffers_mut(&mut self) -> &mut ParticleBuffers {
        &mut self.buffers
    }

    fn space(&self) -> &SolverSpace {
        &self.space
    }

    fn space_mut(&mut self) -> &mut SolverSpace {
        &mut self.space
    }

    fn fixed_delta_time(&self) -> f32 {
        self.config.fixed_delta_time
    }

    fn allocate(&mut self, actor: ActorId, count: usize) -> Result<Vec<usize>> {
        let free: Vec<usize> = self
            .owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| owner.is_none())
            .map(|(k, _)| k)
            .take(count)
            .collect();
        if free.len() < count {
            return Err(ClothError::Allocation {
                requested: count,
                available: free.len(),
            });
        }
        for &k in &free {
            self.owners[k] = Some(actor);
        }
        self.registry.push(ActorEntry {
            id: actor,
            triangles_offset: 0,
        });
        debug!(%actor, count, "allocated particle slots");
        Ok(free)
    }

    fn release(&mut self, actor: ActorId, slots: &[usize]) -> Option<usize> {
        for &k in slots {
            if self.owners.get(k).copied().flatten() == Some(actor) {
                self.owners[k] = None;
                self.buffers.active[k] = false;
                self.buffers.external_forces[k] = Vec3::ZERO;
            }
        }
        let position = self.registry.iter().position(|e| e.id == actor)?;
        self.registry.remove(position);
        self.update_active_particles();
        debug!(%actor, slots = slots.len(), "released particle slots");
        Some(position)
    }

    fn triangles_offset(&self, actor: ActorId) -> Option<usize> {
        self.registry
            .iter()
            .find(|e| e.id == actor)
            .map(|e| e.triangles_offset)
    }

    fn set_triangles_offset(&mut self, actor: ActorId, offset: usize) {
        if let Some(entry) = self.registry.iter_mut().find(|e| e.id == actor) {
            entry.triangles_offset = offset;
        }
    }

    fn shift_triangle_offsets(&mut self, from: usize, count: usize) {
        for entry in self.registry.iter_mut().skip(from) {
            entry.triangles_offset = entry.triangles_offset.saturating_sub(count);
        }
    }

    fn deformable_triangles(&self) -> &[u32] {
        &self.triangles
    }

    fn set_deformable_triangles(&mut self, indices: &[u32], offset: usize) {
        let start = offset * 3;
        let end = start + indices.len();
        if self.triangles.len() < end {
            self.triangles.resize(end, 0);
        }
        self.triangles[start..end].copy_from_slice(indices);
    }

    fn remove_deformable_triangles(&mut self, offset: usize, count: usize) {
        let len = self.triangles.len();
        let start = (offset * 3).min(len);
        let end = ((offset + count) * 3).min(len);
        self.triangles.drain(start..end);
    }

    fn register_batch(&mut self, batch: CookedBatch) -> BatchHandle {
        let n = batch.len();
        let handle = BatchHandle(self.batches.len() as u32);
        trace!(?handle, kind = ?batch.kind, constraints = n, "registered batch");
        self.batches.push(Some(RegisteredBatch {
            data: batch,
            enabled: true,
            lambdas: vec![0.0; n],
            forces: vec![0.0; n],
        }));
        handle
    }

    fn unregister_batch(&mut self, handle: BatchHandle) -> Result<()> {
        match self.batches.get_mut(handle.0 as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(ClothError::UnknownBatch(handle)),
        }
    }

    fn set_batch_enabled(&mut self, handle: BatchHandle, enabled: bool) {
        if let Some(batch) = self.registered_mut(handle) {
            batch.enabled = enabled;
        }
    }

    fn set_active_constraints(&mut self, handle: BatchHandle, active: &[u32]) {
        if let Some(batch) = self.registered_mut(handle) {
            batch.data.active = active.to_vec();
        }
    }

    fn constraint_forces(&self, handle: BatchHandle) -> Vec<f32> {
        self.registered(handle)
            .map(|b| b.forces.clone())
            .unwrap_or_default()
    }

    fn recalculate_inertia_tensors(&mut self) {
        let owned: Vec<usize> = (0..self.owners.len())
            .filter(|&k| self.owners[k].is_some())
            .collect();
        self.buffers.recalculate_inertia(owned);
        self.stats.inertia_updates += 1;
    }

    fn update_active_particles(&mut self) {
        self.active_particles = (0..self.owners.len())
            .filter(|&k| self.owners[k].is_some() && self.buffers.active[k])
            .collect();
        self.stats.active_updates += 1;
    }

    fn update_visibility(&mut self) {
        self.visible = !self.active_particles.is_empty();
        self.stats.visibility_updates += 1;
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn substep(&mut self, dt: f32) {
        if dt < 1.0e-9 {
            return;
        }

        let gravity = self
            .space
            .world_to_solver()
            .transform_vector3(self.config.gravity);
        let damping = (1.0 - self.config.damping * dt).clamp(0.0, 1.0);

        {
            let buffers = &mut self.buffers;
            buffers.start_positions.copy_from_slice(&buffers.positions);
            buffers.prev_positions.copy_from_slice(&buffers.positions);
        }

        // STEP 1: forces and prediction
        self.integrate(gravity, damping, dt);

        for batch in self.batches.iter_mut().flatten() {
            batch.lambdas.fill(0.0);
        }

        // STEP 2: constraint projection
        for _iter in 0..self.config.iterations {
            self.corrections.fill(Vec3::ZERO);
            self.correction_counts.fill(0);

            {
                let mut projection = Projection {
                    predicted: &self.predicted,
                    inv_masses: &self.buffers.inv_masses,
                    corrections: &mut self.corrections,
                    counts: &mut self.correction_counts,
                };
                for batch in self.batches.iter_mut().flatten().filter(|b| b.enabled) {
                    match batch.data.kind {
                        ConstraintKind::Distance => {
                            solve_distance_batch(&batch.data, &mut batch.lambdas, &mut projection, dt)
                        }
                        ConstraintKind::Tether => {
                            solve_tether_batch(&batch.data, &mut batch.lambdas, &mut projection, dt)
                        }
                        _ => {}
                    }
                }
            }

            for (k, predicted) in self.predicted.iter_mut().enumerate() {
                let count = self.correction_counts[k];
                if count > 0 {
                    *predicted += self.corrections[k] / count as f32;
                }
            }
        }

        // STEP 3: velocities from position change
        let buffers = &mut self.buffers;
        for (k, predicted) in self.predicted.iter().enumerate() {
            if buffers.active[k] && buffers.inv_masses[k] > 0.0 {
                buffers.velocities[k] = (*predicted - buffers.positions[k]) / dt;
                buffers.positions[k] = *predicted;
            }
        }
        buffers.external_forces.fill(Vec3::ZERO);

        let dt_sq = dt * dt;
        for batch in self.batches.iter_mut().flatten() {
            for (force, lambda) in batch.forces.iter_mut().zip(&batch.lambdas) {
                *force = lambda / dt_sq;
            }
        }
        self.stats.substeps += 1;
    }

    fn interpolate(&mut self) {
        let to_world = self.space.solver_to_world();
        let rotation = rotation_of(&to_world);
        let b = &mut self.buffers;
        for k in 0..b.positions.len() {
            b.renderable_positions[k] = to_world.transform_point3(b.positions[k]);
            let q = rotation * b.orientations[k];
            b.renderable_orientations[k] = q;
            let r = b.principal_radii[k];
            b.anisotropies[k] = [
                (q * Vec3::X).extend(r.x),
                (q * Vec3::Y).extend(r.y),
                (q * Vec3::Z).extend(r.z),
            ];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_allocation() {
        let mut solver = CpuSolver::with_capacity(6);
        let a = solver.allocate(ActorId::new(1), 2).unwrap();
        let b = solver.allocate(ActorId::new(2), 2).unwrap();
        assert_eq!(a, vec![0, 1]);
        assert_eq!(b, vec![2, 3]);

        assert_eq!(solver.release(ActorId::new(1), &a), Some(0));
        let c = solver.allocate(ActorId::new(3), 3).unwrap();
        assert_eq!(c, vec![0, 1, 4], "freed slots are reused first");
    }

    #[test]
    fn test_allocation_failure_reports_free() {
        let mut solver = CpuSolver::with_capacity(3);
        match solver.allocate(ActorId::new(1), 4) {
            Err(ClothError::Allocation {
                requested,
                available,
            }) => {
                assert_eq!(requested, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected allocation failure, got {other:?}"),
        }
        assert_eq!(solver.actors().count(), 0, "failed allocation must not register");
    }

    #[test]
    fn test_unregister_unknown_batch() {
        let mut solver = CpuSolver::with_capacity(1);
        assert!(matches!(
            solver.unregister_batch(BatchHandle(3)),
            Err(ClothError::UnknownBatch(_))
        ));
    }

    #[test]
    fn test_free_particle_falls() {
        let mut solver = CpuSolver::with_capacity(1);
        let slots = solver.allocate(ActorId::new(1), 1).unwrap();
        let b = solver.buffers_mut();
        b.active[slots[0]] = true;
        b.inv_masses[slots[0]] = 1.0;
        solver.substep(0.01);
        assert!(
            solver.buffers().positions[0].y < 0.0,
            "particle should fall under gravity"
        );
    }
}
