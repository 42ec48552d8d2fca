//! Tether generation by island partitioning.
//!
//! Active particles are split into connected islands. Inside each island the
//! fixed particles are split again into fixed islands, and every free
//! particle is tethered to the closest fixed particle of up to `max_tethers`
//! of the nearest fixed islands. Particles are never tethered across islands.

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use super::ClothBase;
use crate::config::TetherParams;
use crate::constraints::{ConstraintBatch, ConstraintSetOps, TetherConstraint};
use crate::particle::ParticleSet;
use crate::solver::Solver;
use crate::topology::HalfEdgeMesh;

/// Connected components of the active particles among `candidates`.
///
/// With `only_fixed`, particles with a non-zero inverse mass are left out and
/// do not connect islands. Islands and their members are sorted.
pub fn islands(
    topology: &HalfEdgeMesh,
    particles: &ParticleSet,
    candidates: impl IntoIterator<Item = usize>,
    only_fixed: bool,
) -> Vec<Vec<usize>> {
    let mut pending: BTreeSet<usize> = candidates
        .into_iter()
        .filter(|&i| i < topology.vertex_count() && i < particles.len())
        .filter(|&i| particles.active[i] && (!only_fixed || particles.inv_masses[i] == 0.0))
        .collect();

    let mut islands = Vec::new();
    while let Some(seed) = pending.pop_first() {
        let mut island = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(v) = queue.pop_front() {
            for n in topology.neighbors(v) {
                if pending.remove(&n) {
                    island.push(n);
                    queue.push_back(n);
                }
            }
        }
        island.sort_unstable();
        islands.push(island);
    }
    islands
}

/// One tether batch per island that produced at least one tether.
pub fn build_tethers(
    topology: &HalfEdgeMesh,
    particles: &ParticleSet,
    params: &TetherParams,
) -> Vec<ConstraintBatch<TetherConstraint>> {
    if params.max_tethers == 0 {
        return Vec::new();
    }

    let mut batches = Vec::new();
    for island in islands(topology, particles, 0..topology.vertex_count(), false) {
        let fixed_islands = islands(topology, particles, island.iter().copied(), true);
        let mut batch = ConstraintBatch::new();

        for &i in &island {
            if particles.inv_masses[i] == 0.0 || !particles.active[i] {
                continue;
            }
            let position = particles.rest_positions[i].truncate();

            let mut anchors: Vec<(f32, usize)> = fixed_islands
                .iter()
                .filter_map(|fixed| {
                    fixed
                        .iter()
                        .map(|&j| (position.distance_squared(particles.rest_positions[j].truncate()), j))
                        .min_by(|a, b| a.0.total_cmp(&b.0))
                })
                .collect();
            anchors.sort_by(|a, b| a.0.total_cmp(&b.0));

            for &(distance_sq, j) in anchors.iter().take(params.max_tethers) {
                batch.add_constraint(TetherConstraint::new(
                    i as u32,
                    j as u32,
                    distance_sq.sqrt(),
                    params.scale,
                    params.stiffness,
                ));
            }
        }

        if !batch.is_empty() {
            batch.cook();
            batches.push(batch);
        }
    }
    batches
}

impl ClothBase {
    /// Replace the tether constraints with freshly generated ones.
    ///
    /// Returns false if the cloth is not initialized.
    pub fn generate_tethers(&mut self, solver: &mut dyn Solver) -> bool {
        let Some(topology) = self.topology.as_ref() else {
            return false;
        };
        if !self.actor.is_initialized() {
            return false;
        }

        let batches = build_tethers(topology, &self.actor.particles, &self.config.tethers);
        let id = self.actor.id();
        let tethers = &mut self.actor.constraints.tether;
        tethers.clear(solver);
        for batch in batches {
            tethers.add_batch(batch);
        }
        debug!(
            actor = %id,
            tethers = tethers.constraint_count(),
            "generated tethers"
        );

        if let Some(indices) = self.actor.particle_indices() {
            let indices = indices.to_vec();
            self.actor.constraints.tether.add_to_solver(solver, &indices);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip() -> (HalfEdgeMesh, ParticleSet) {
        // 4x2 strip, vertices 0..4 on top, 4..8 below.
        let mesh = HalfEdgeMesh::grid(4, 2, 1.0).unwrap();
        let mut particles = ParticleSet::new(mesh.vertex_count());
        for (i, v) in mesh.vertices().iter().enumerate() {
            particles.active[i] = true;
            particles.inv_masses[i] = 1.0;
            particles.positions[i] = v.position;
            particles.rest_positions[i] = v.position.extend(1.0);
        }
        (mesh, particles)
    }

    #[test]
    fn test_fixed_islands_split_by_free_particles() {
        let (mesh, mut particles) = strip();
        particles.inv_masses[0] = 0.0;
        particles.inv_masses[3] = 0.0;
        let fixed = islands(&mesh, &particles, 0..mesh.vertex_count(), true);
        assert_eq!(fixed, vec![vec![0], vec![3]]);

        let all = islands(&mesh, &particles, 0..mesh.vertex_count(), false);
        assert_eq!(all.len(), 1, "the strip is a single island");
    }

    #[test]
    fn test_inactive_particles_break_islands() {
        let (mesh, mut particles) = strip();
        for i in [1, 5] {
            particles.active[i] = false;
        }
        let all = islands(&mesh, &particles, 0..mesh.vertex_count(), false);
        assert_eq!(all, vec![vec![0, 4], vec![2, 3, 6, 7]]);
    }

    #[test]
    fn test_tethers_bound_per_fixed_island() {
        let (mesh, mut particles) = strip();
        particles.inv_masses[0] = 0.0;
        particles.inv_masses[3] = 0.0;
        let params = TetherParams {
            max_tethers: 1,
            ..TetherParams::default()
        };
        let batches = build_tethers(&mesh, &particles, &params);
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        // 6 free particles, one tether each.
        assert_eq!(batch.len(), 6);
        let from_7: Vec<_> = batch
            .constraints()
            .iter()
            .filter(|c| c.particles[0] == 7)
            .collect();
        assert_eq!(from_7.len(), 1);
        assert_eq!(from_7[0].particles[1], 3, "closest anchor of 7 is 3");
        assert!((from_7[0].max_length - 1.0).abs() < 1e-6);
    }
}
