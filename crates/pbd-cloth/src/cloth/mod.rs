//! Cloth actors built from a half-edge mesh.
//!
//! [`ClothBase`] carries what regular and tearable cloth share: the actor,
//! a private copy of the mesh topology, per-particle area contribution, the
//! render mesh and cloth events. [`Cloth`] and [`TearableCloth`] add their
//! initialization flavor and per-frame behavior on top.
//!
//! Vertex `i` of the private topology is local particle `i`. Tearing keeps
//! this true by appending the vertex created by each split at the next
//! pooled particle slot.

mod init;
mod regular;
mod render;
mod tearable;
mod tethers;

use std::sync::Arc;

use glam::Vec3;
use tracing::{debug, error, trace};

pub use init::{ClothInitializer, InitProgress, InitStage};
pub use regular::Cloth;
pub use render::{RenderMesh, RenderVertex};
pub use tearable::TearableCloth;
pub use tethers::{build_tethers, islands};

use crate::actor::Actor;
use crate::config::{ClothConfig, NormalsUpdate};
use crate::constraints::{ColliderHandle, ConstraintBatch, ConstraintSetOps, PinConstraint};
use crate::error::{ClothError, Result};
use crate::events::{ObserverId, Observers};
use crate::particle::ParticleData;
use crate::solver::Solver;
use crate::topology::HalfEdgeMesh;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClothEvent {
    Initialized,
    FrameBegin,
    FrameEnd,
    /// A distance constraint was torn by splitting `particle`.
    ConstraintTorn { constraint: usize, particle: usize },
}

#[derive(Debug)]
pub struct ClothBase {
    pub actor: Actor,
    pub config: ClothConfig,
    shared_topology: Option<Arc<HalfEdgeMesh>>,
    topology: Option<HalfEdgeMesh>,
    area_contribution: Vec<f32>,
    render_mesh: Option<RenderMesh>,
    optimized: Vec<usize>,
    events: Observers<ClothEvent>,
}

impl ClothBase {
    pub fn new(shared_topology: Arc<HalfEdgeMesh>, config: ClothConfig) -> Self {
        Self {
            actor: Actor::new(),
            config,
            shared_topology: Some(shared_topology),
            topology: None,
            area_contribution: Vec::new(),
            render_mesh: None,
            optimized: Vec::new(),
            events: Observers::new(),
        }
    }

    /// The mesh asset this cloth is generated from.
    pub fn shared_topology(&self) -> Option<&Arc<HalfEdgeMesh>> {
        self.shared_topology.as_ref()
    }

    /// Swap the source mesh. Takes effect on the next initialization.
    pub fn set_shared_topology(&mut self, topology: Option<Arc<HalfEdgeMesh>>) {
        self.shared_topology = topology;
    }

    /// The private topology, diverging from the shared one as the cloth tears.
    pub fn topology(&self) -> Option<&HalfEdgeMesh> {
        self.topology.as_ref()
    }

    pub fn area_contribution(&self) -> &[f32] {
        &self.area_contribution
    }

    pub fn render_mesh(&self) -> Option<&RenderMesh> {
        self.render_mesh.as_ref()
    }

    /// Particles deactivated by [`ClothBase::optimize`].
    pub fn optimized_particles(&self) -> &[usize] {
        &self.optimized
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&ClothEvent) + 'static) -> ObserverId {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn add_to_solver(&mut self, solver: &mut dyn Solver) -> bool {
        self.actor.add_to_solver(solver)
    }

    pub fn remove_from_solver(&mut self, solver: &mut dyn Solver) -> bool {
        self.actor.remove_from_solver(solver)
    }

    /// The shared topology, if it can be built from.
    fn source_topology(&self) -> Result<Arc<HalfEdgeMesh>> {
        match &self.shared_topology {
            None => {
                error!(actor = %self.actor.id(), "no topology assigned to cloth");
                Err(ClothError::MissingTopology)
            }
            Some(topology) if topology.is_empty() => {
                error!(actor = %self.actor.id(), "cloth topology has no faces");
                Err(ClothError::UninitializedTopology)
            }
            Some(topology) => Ok(Arc::clone(topology)),
        }
    }

    /// Put every particle back at its rest position with zero velocity and
    /// restore the untorn topology.
    ///
    /// Leaves tearing bookkeeping alone; torn cloth resets through
    /// [`TearableCloth::reset`].
    pub(crate) fn reset(&mut self, solver: &mut dyn Solver) {
        if !self.actor.is_initialized() {
            return;
        }
        let Some(shared) = &self.shared_topology else {
            return;
        };

        let topology = (**shared).clone();
        let p = &mut self.actor.particles;
        for i in 0..p.len() {
            p.positions[i] = p.rest_positions[i].truncate();
            p.velocities[i] = Vec3::ZERO;
        }
        self.render_mesh = Some(RenderMesh::from_topology(&topology, p.len()));
        self.topology = Some(topology);

        self.actor
            .push_data_to_solver(solver, ParticleData::POSITIONS | ParticleData::VELOCITIES);
        debug!(actor = %self.actor.id(), "cloth reset");
    }

    /// Deactivate fixed particles whose neighbors are all fixed, along with
    /// every constraint touching them. Returns the number deactivated.
    pub fn optimize(&mut self, solver: &mut dyn Solver) -> usize {
        let Some(topology) = &self.topology else {
            return 0;
        };

        let p = &self.actor.particles;
        let is_fixed = |j: usize| p.inv_masses.get(j).map_or(true, |&w| w == 0.0);
        let redundant: Vec<usize> = (0..topology.vertex_count().min(p.len()))
            .filter(|&i| p.active[i] && is_fixed(i))
            .filter(|&i| topology.neighbors(i).all(|j| is_fixed(j)))
            .collect();
        if redundant.is_empty() {
            return 0;
        }

        for &i in &redundant {
            self.actor.particles.active[i] = false;
            for set in self.actor.constraints.sets_mut() {
                set.deactivate_involving(i);
            }
        }
        self.actor.constraints.set_active_constraints(solver);
        self.actor.push_data_to_solver(solver, ParticleData::ACTIVE_STATUS);

        debug!(actor = %self.actor.id(), particles = redundant.len(), "optimized cloth");
        self.optimized.extend_from_slice(&redundant);
        redundant.len()
    }

    /// Reactivate the particles deactivated by [`ClothBase::optimize`].
    pub fn unoptimize(&mut self, solver: &mut dyn Solver) {
        let optimized = std::mem::take(&mut self.optimized);
        if optimized.is_empty() {
            return;
        }
        for &i in &optimized {
            self.actor.particles.active[i] = true;
            for set in self.actor.constraints.sets_mut() {
                set.activate_involving(i);
            }
        }
        self.actor.constraints.set_active_constraints(solver);
        self.actor.push_data_to_solver(solver, ParticleData::ACTIVE_STATUS);
        debug!(actor = %self.actor.id(), particles = optimized.len(), "unoptimized cloth");
    }

    /// Attach `particle` to a collider. Returns the pin's index in the pin
    /// batch, or `None` if the particle does not exist.
    pub fn pin_particle(
        &mut self,
        solver: &mut dyn Solver,
        particle: usize,
        collider: ColliderHandle,
        offset: Vec3,
        stiffness: f32,
    ) -> Option<usize> {
        if particle >= self.actor.particle_count() {
            return None;
        }
        let indices = self.actor.particle_indices().map(<[usize]>::to_vec);
        let break_resistance = self.config.pin_break_resistance;
        let pins = &mut self.actor.constraints.pin;
        pins.remove_from_solver(solver);
        if pins.batches().is_empty() {
            pins.add_batch(ConstraintBatch::new());
        }
        let index = pins.first_batch_mut().map(|batch| {
            batch.add_constraint(PinConstraint::new(
                particle as u32,
                collider,
                offset,
                stiffness,
                break_resistance,
            ))
        });
        if let Some(indices) = indices {
            pins.add_to_solver(solver, &indices);
        }
        index
    }

    /// Copy world-space particle positions into the render mesh, as mesh
    /// local coordinates, and refresh its triangles, normals and tangents.
    pub fn commit_results_to_mesh(&mut self, solver: &dyn Solver) {
        let Some(indices) = self.actor.particle_indices() else {
            return;
        };
        let Some(mesh) = &mut self.render_mesh else {
            return;
        };

        let world_to_mesh = self.actor.local_to_world().inverse();
        let renderable = &solver.buffers().renderable_positions;
        for (vertex, &k) in mesh.vertices.iter_mut().zip(indices) {
            vertex.position = world_to_mesh.transform_point3(renderable[k]).to_array();
        }
        mesh.indices.clone_from(&self.actor.deformable_triangles);

        match self.config.normals_update {
            NormalsUpdate::Recalculate => mesh.recalculate_normals(),
            NormalsUpdate::Skin => {}
        }
        if self.config.update_tangents {
            mesh.recalculate_tangents();
        }
    }

    pub(crate) fn frame_begin(&mut self) {
        trace!(actor = %self.actor.id(), "cloth frame begin");
        self.events.notify(&ClothEvent::FrameBegin);
    }

    /// Break overloaded pins. Returns how many broke.
    pub(crate) fn break_pins(&mut self, solver: &mut dyn Solver) -> usize {
        if !self.actor.is_enabled() || !self.actor.in_solver() {
            return 0;
        }
        self.actor.constraints.pin.break_constraints(solver)
    }

    pub(crate) fn frame_end(&mut self, solver: &dyn Solver) {
        self.commit_results_to_mesh(solver);
        trace!(actor = %self.actor.id(), "cloth frame end");
        self.events.notify(&ClothEvent::FrameEnd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::CpuSolver;

    #[test]
    fn test_missing_topology_is_an_error() {
        let mut cloth = ClothBase::new(
            Arc::new(HalfEdgeMesh::grid(2, 2, 1.0).unwrap()),
            ClothConfig::default(),
        );
        cloth.set_shared_topology(None);
        assert!(matches!(cloth.source_topology(), Err(ClothError::MissingTopology)));

        cloth.set_shared_topology(Some(Arc::new(HalfEdgeMesh::default())));
        assert!(matches!(
            cloth.source_topology(),
            Err(ClothError::UninitializedTopology)
        ));
    }

    #[test]
    fn test_pin_out_of_range_particle() {
        let mut solver = CpuSolver::with_capacity(8);
        let mut cloth = ClothBase::new(
            Arc::new(HalfEdgeMesh::grid(2, 2, 1.0).unwrap()),
            ClothConfig::default(),
        );
        let pinned = cloth.pin_particle(&mut solver, 0, ColliderHandle(0), Vec3::ZERO, 1.0);
        assert_eq!(pinned, None, "an uninitialized cloth has no particles to pin");
    }
}
