//! Cloth that tears along overstretched edges.
//!
//! The particle arrays are over-allocated with a pool of spare particles.
//! Tearing an edge splits one of its vertices in the private topology; the
//! new vertex takes the next spare particle, so vertex and particle indices
//! stay equal. Spare particles are never returned to the pool.
//!
//! ```text
//!   used_particles          pooled_particles
//!   [ live ............ | spare ........... ]
//!                       ^ next split lands here
//! ```

use std::ops::Range;
use std::sync::Arc;

use glam::Vec3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, trace};

use super::init::{ClothInitializer, InitMode};
use super::{ClothBase, ClothEvent};
use crate::actor::Actor;
use crate::config::{ClothConfig, TearConfig};
use crate::constraints::{ConstraintSetOps, DistanceConstraint};
use crate::error::Result;
use crate::solver::{Solver, SolverClient};
use crate::topology::{HalfEdgeMesh, VertexSplit};

/// Bookkeeping of a tearable cloth.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct TearState {
    pub(crate) used_particles: usize,
    pub(crate) pooled_particles: usize,
    /// Distance constraint held by each half-edge. Only one half-edge of
    /// each pair holds the constraint of their edge.
    pub(crate) distance_map: Vec<Option<usize>>,
    /// Bend constraints centered at vertex `v` are
    /// `bend_offsets[v]..bend_offsets[v + 1]`. Covers the original vertices.
    pub(crate) bend_offsets: Vec<usize>,
    pub(crate) tear_resistance: Vec<f32>,
}

impl TearState {
    fn bends_centered_at(&self, vertex: usize) -> Range<usize> {
        match (self.bend_offsets.get(vertex), self.bend_offsets.get(vertex + 1)) {
            (Some(&start), Some(&end)) => start..end,
            _ => 0..0,
        }
    }
}

#[derive(Debug)]
pub struct TearableCloth {
    base: ClothBase,
    tear_config: TearConfig,
    state: TearState,
}

impl TearableCloth {
    pub fn new(
        topology: Arc<HalfEdgeMesh>,
        config: ClothConfig,
        tear_config: TearConfig,
    ) -> Result<Self> {
        tear_config.validate()?;
        Ok(Self {
            base: ClothBase::new(topology, config),
            tear_config,
            state: TearState::default(),
        })
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

    pub fn tear_config(&self) -> &TearConfig {
        &self.tear_config
    }

    /// Takes effect on the next initialization for the capacity, right away
    /// for the rest.
    pub fn set_tear_config(&mut self, tear_config: TearConfig) -> Result<()> {
        tear_config.validate()?;
        self.tear_config = tear_config;
        Ok(())
    }

    /// Particles in use, original vertices included.
    pub fn used_particles(&self) -> usize {
        self.state.used_particles
    }

    /// Spare particles allocated at initialization.
    pub fn pooled_particles(&self) -> usize {
        self.state.pooled_particles
    }

    /// Total particle slots, live and spare.
    pub fn capacity(&self) -> usize {
        self.base.actor.particle_count()
    }

    pub fn tear_resistance(&self) -> &[f32] {
        &self.state.tear_resistance
    }

    /// Distance constraint held by each half-edge of the private topology.
    pub fn distance_constraint_map(&self) -> &[Option<usize>] {
        &self.state.distance_map
    }

    /// Start building the cloth and its spare particle pool.
    pub fn begin_initialize(&mut self, solver: &mut dyn Solver) -> Result<ClothInitializer<'_>> {
        let mode = InitMode::Tearable {
            tear_capacity: self.tear_config.tear_capacity,
        };
        ClothInitializer::begin(&mut self.base, Some(&mut self.state), mode, solver)
    }

    pub fn initialize(&mut self, solver: &mut dyn Solver) -> Result<()> {
        self.begin_initialize(solver)?.finish();
        Ok(())
    }

    pub fn generate_tethers(&mut self, solver: &mut dyn Solver) -> bool {
        self.base.generate_tethers(solver)
    }

    /// Rebuild the cloth from its untorn topology, rejoining the solver if
    /// it was in one.
    pub fn reset(&mut self, solver: &mut dyn Solver) -> Result<()> {
        let was_in_solver = self.base.actor.in_solver();
        self.initialize(solver)?;
        if was_in_solver {
            self.base.add_to_solver(solver);
        }
        Ok(())
    }

    /// Distance constraints whose force exceeded their tear resistance in
    /// the last step, weakest first.
    fn torn_edges(&self, solver: &dyn Solver) -> Vec<(usize, f32)> {
        let Some(batch) = self.base.actor.constraints.distance.first_batch() else {
            return Vec::new();
        };
        let forces = batch.constraint_forces(solver);
        let resistance = &self.state.tear_resistance;
        let multiplier = self.tear_config.tear_resistance_multiplier;

        let exceeds = |(i, &force): (usize, &f32)| {
            let c = batch.get(i)?;
            let [a, b] = c.particles.map(|p| p as usize);
            let threshold = (resistance[a] + resistance[b]) * 0.5 * multiplier;
            (batch.is_active(i) && -force * 1000.0 > threshold).then_some((i, force))
        };

        #[cfg(feature = "parallel")]
        let mut torn: Vec<(usize, f32)> = forces.par_iter().enumerate().filter_map(exceeds).collect();
        #[cfg(not(feature = "parallel"))]
        let mut torn: Vec<(usize, f32)> = forces.iter().enumerate().filter_map(exceeds).collect();

        torn.sort_by(|a, b| a.1.abs().total_cmp(&b.1.abs()));
        torn
    }

    /// Tear up to `tear_rate` overloaded edges. Returns how many tore.
    pub fn apply_tearing(&mut self, solver: &mut dyn Solver) -> usize {
        if !self.base.actor.is_enabled() || !self.base.actor.in_solver() {
            return 0;
        }
        let mut torn = self.torn_edges(&*solver);
        if torn.is_empty() {
            return 0;
        }
        torn.truncate(self.tear_config.tear_rate);

        self.base.actor.constraints.distance.remove_from_solver(solver);
        let mut count = 0;
        for (constraint, _) in torn {
            if self.split_edge(solver, constraint) {
                count += 1;
            }
        }
        self.sync_torn_state(solver);
        count
    }

    /// Tear distance constraint `constraint` by splitting one of its
    /// particles.
    ///
    /// Returns false, leaving everything untouched, when the pool is
    /// exhausted or neither particle can be split.
    pub fn tear(&mut self, solver: &mut dyn Solver, constraint: usize) -> bool {
        if !self.split_edge(solver, constraint) {
            return false;
        }
        self.sync_torn_state(solver);
        true
    }

    /// Re-cook and re-register the rewritten distance constraints, then push
    /// bend activation, triangles and active particles.
    fn sync_torn_state(&mut self, solver: &mut dyn Solver) {
        let actor = &mut self.base.actor;
        // Rewired particles may now collide within a phase.
        if let Some(batch) = actor.constraints.distance.first_batch_mut() {
            batch.cook();
        }
        let Some(indices) = actor.particle_indices().map(<[usize]>::to_vec) else {
            return;
        };
        let distance = &mut actor.constraints.distance;
        distance.remove_from_solver(solver);
        distance.add_to_solver(solver, &indices);
        actor.constraints.bending.set_active_constraints(solver);
        actor.update_deformable_triangles(solver);
        solver.update_active_particles();
    }

    /// Current particle positions in actor-local space.
    fn live_positions(&self, solver: &dyn Solver) -> Vec<Vec3> {
        let actor = &self.base.actor;
        let used = self.state.used_particles;
        match actor.particle_indices() {
            Some(indices) => {
                let solver_to_local = actor.local_to_solver(solver.space()).inverse();
                let positions = &solver.buffers().positions;
                indices[..used]
                    .iter()
                    .map(|&k| solver_to_local.transform_point3(positions[k]))
                    .collect()
            }
            None => actor.particles.positions[..used].to_vec(),
        }
    }

    fn split_edge(&mut self, solver: &mut dyn Solver, constraint: usize) -> bool {
        let used = self.state.used_particles;
        if used >= self.capacity() {
            trace!(actor = %self.base.actor.id(), "tear pool exhausted");
            return false;
        }
        let Some(c) = self
            .base
            .actor
            .constraints
            .distance
            .first_batch()
            .and_then(|batch| batch.get(constraint))
        else {
            return false;
        };

        let [mut split, mut intact] = c.particles.map(|p| p as usize);
        let inv_masses = &self.base.actor.particles.inv_masses;
        if inv_masses[split] > inv_masses[intact] {
            std::mem::swap(&mut split, &mut intact);
        }

        let local = self.live_positions(&*solver);
        let Some(topology) = self.base.topology.as_mut() else {
            return false;
        };
        let inv_masses = &self.base.actor.particles.inv_masses;
        let attempt = match try_split(topology, inv_masses, &local, split, intact) {
            Some(outcome) => Some((split, outcome)),
            None => try_split(topology, inv_masses, &local, intact, split)
                .map(|outcome| (intact, outcome)),
        };
        let Some((split, (outcome, normal))) = attempt else {
            trace!(actor = %self.base.actor.id(), constraint, "tear refused");
            return false;
        };
        debug_assert_eq!(outcome.new_vertex, used, "split vertex must land on the next spare");

        self.base.events.notify(&ClothEvent::ConstraintTorn {
            constraint,
            particle: split,
        });

        self.weaken_neighbors(split, normal, &local);
        self.copy_particle(solver, split, outcome.new_vertex);
        self.state.used_particles += 1;
        self.rewire_distance_constraints(&outcome);
        self.deactivate_stale_bends(split, outcome.new_vertex);

        debug!(
            actor = %self.base.actor.id(),
            constraint,
            particle = split,
            new_particle = outcome.new_vertex,
            "tore cloth"
        );
        true
    }

    /// Lower the tear resistance of the one or two neighbors of `split` most
    /// aligned with the cut.
    fn weaken_neighbors(&mut self, split: usize, normal: Vec3, local: &[Vec3]) {
        let Some(topology) = &self.base.topology else {
            return;
        };
        let origin = local[split];
        let mut candidates: Vec<(f32, usize)> = topology
            .neighbors(split)
            .filter(|&n| n < local.len())
            .map(|n| (normal.dot((local[n] - origin).normalize_or_zero()).abs(), n))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let factor = 1.0 - self.tear_config.tear_debilitation;
        for &(_, n) in candidates.iter().take(2) {
            self.state.tear_resistance[n] *= factor;
        }
    }

    /// Give `to` a copy of `from`, splitting mass and radius between them,
    /// locally and in the pool.
    fn copy_particle(&mut self, solver: &mut dyn Solver, from: usize, to: usize) {
        let actor = &mut self.base.actor;
        let p = &mut actor.particles;
        p.inv_masses[from] *= 2.0;
        p.inv_rotational_masses[from] *= 2.0;
        p.principal_radii[from] *= 0.5;

        p.positions[to] = p.positions[from];
        p.velocities[to] = p.velocities[from];
        p.active[to] = p.active[from];
        p.inv_masses[to] = p.inv_masses[from];
        p.inv_rotational_masses[to] = p.inv_rotational_masses[from];
        p.principal_radii[to] = p.principal_radii[from];
        p.phases[to] = p.phases[from];
        p.rest_positions[to] = p.rest_positions[from].truncate().extend(1.0);
        self.base.area_contribution[to] = self.base.area_contribution[from];
        self.state.tear_resistance[to] = self.state.tear_resistance[from];

        let enabled = actor.is_enabled();
        let Some(indices) = actor.particle_indices() else {
            return;
        };
        let (source, target) = (indices[from], indices[to]);
        let p = &actor.particles;
        let b = solver.buffers_mut();
        b.velocities[target] = b.velocities[source];
        b.start_positions[target] = b.start_positions[source];
        b.prev_positions[target] = b.prev_positions[source];
        b.positions[target] = b.positions[source];
        b.renderable_positions[target] = b.renderable_positions[source];
        for k in [source, target] {
            b.inv_masses[k] = p.inv_masses[from];
            b.inv_rotational_masses[k] = p.inv_rotational_masses[from];
            b.principal_radii[k] = p.principal_radii[from];
        }
        b.phases[target] = b.phases[source];
        b.rest_positions[target] = p.rest_positions[to];
        b.active[target] = enabled && p.active[to];
        solver.recalculate_inertia_tensors();
    }

    /// Point distance constraints at the rewired half-edges and give every
    /// edge cut open its own constraint.
    fn rewire_distance_constraints(&mut self, outcome: &VertexSplit) {
        let Some(topology) = &self.base.topology else {
            return;
        };
        let actor = &mut self.base.actor;
        let Some(batch) = actor.constraints.distance.first_batch_mut() else {
            return;
        };
        let map = &mut self.state.distance_map;
        map.resize(topology.half_edge_count(), None);

        let endpoints = |h: usize| {
            [
                topology.start_vertex(h) as u32,
                topology.half_edge(h).end_vertex as u32,
            ]
        };

        for &h in &outcome.updated_half_edges {
            let pair = topology.half_edge(h).pair;
            if let Some(c) = map[h] {
                batch.set_particles(c, &endpoints(h));
            } else if let Some(c) = map[pair] {
                batch.set_particles(c, &endpoints(pair));
            } else if let Some(source) = outcome.severed_partner(h).and_then(|s| map[s]) {
                if let Some(template) = batch.get(source).cloned() {
                    let [start, end] = endpoints(h);
                    let index = batch.add_constraint(DistanceConstraint::new(
                        start,
                        end,
                        template.rest_length,
                        template.stretch_stiffness,
                        template.compression_stiffness,
                    ));
                    map[h] = Some(index);
                }
            }

            let half_edge = topology.half_edge(h);
            if let (Some(face), Some(slot)) = (half_edge.face, half_edge.index_in_face) {
                actor.deformable_triangles[face * 3 + slot as usize] = half_edge.end_vertex as u32;
            }
        }
    }

    /// Bends centered at `split`, or using it as a wing around it, refer to
    /// the topology before the cut.
    fn deactivate_stale_bends(&mut self, split: usize, new_vertex: usize) {
        let Some(topology) = &self.base.topology else {
            return;
        };
        let Some(bending) = self.base.actor.constraints.bending.first_batch_mut() else {
            return;
        };

        for i in self.state.bends_centered_at(split) {
            bending.deactivate_constraint(i);
        }

        let mut around: Vec<usize> = topology
            .neighbors(split)
            .chain(topology.neighbors(new_vertex))
            .collect();
        around.sort_unstable();
        around.dedup();
        for v in around {
            for i in self.state.bends_centered_at(v) {
                if bending.get(i).is_some_and(|c| c.has_wing(split as u32)) {
                    bending.deactivate_constraint(i);
                }
            }
        }
    }
}

/// Split `split` with a plane through it facing `intact`. Fixed particles
/// are never split.
fn try_split(
    topology: &mut HalfEdgeMesh,
    inv_masses: &[f32],
    local: &[Vec3],
    split: usize,
    intact: usize,
) -> Option<(VertexSplit, Vec3)> {
    if inv_masses[split] == 0.0 {
        return None;
    }
    let point = *local.get(split)?;
    let normal = (*local.get(intact)? - point).normalize_or_zero();
    topology
        .split_vertex(split, point, normal, |v| local[v])
        .map(|outcome| (outcome, normal))
}

impl SolverClient for TearableCloth {
    fn on_frame_begin(&mut self, _solver: &mut dyn Solver) {
        self.base.frame_begin();
    }

    fn on_step_begin(&mut self, solver: &mut dyn Solver) {
        self.base.actor.update_fixed_particles(solver);
    }

    fn on_step_end(&mut self, solver: &mut dyn Solver, _step_time: f32) {
        self.base.break_pins(solver);
        self.apply_tearing(solver);
    }

    fn on_frame_end(&mut self, solver: &mut dyn Solver, _step_time: f32) {
        self.base.frame_end(&*solver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bend_ranges_out_of_table() {
        let state = TearState {
            bend_offsets: vec![0, 2, 5],
            ..TearState::default()
        };
        assert_eq!(state.bends_centered_at(1), 2..5);
        assert_eq!(state.bends_centered_at(2), 0..0, "last offset closes the table");
        assert_eq!(state.bends_centered_at(9), 0..0);
    }

    #[test]
    fn test_fixed_particles_never_split() {
        let mut mesh = HalfEdgeMesh::grid(3, 3, 1.0).unwrap();
        let before = mesh.clone();
        let local: Vec<Vec3> = mesh.vertices().iter().map(|v| v.position).collect();
        let inv_masses = vec![0.0; local.len()];
        assert!(try_split(&mut mesh, &inv_masses, &local, 4, 5).is_none());
        assert_eq!(mesh, before);
    }
}
