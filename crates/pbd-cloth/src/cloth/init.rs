//! Resumable cloth initialization.
//!
//! Building the physical representation of a large mesh is split into
//! stages processed a few hundred items at a time. [`ClothInitializer`] is
//! an iterator: each `next()` processes up to `yield_interval` items and
//! reports progress. Everything is built on the side and committed to the
//! cloth in one go by the final stage, so a partially built cloth is never
//! observable. Dropping the initializer early leaves the actor
//! uninitialized.

use std::collections::HashMap;

use glam::{Affine3A, Vec3};
use tracing::{debug, trace};

use super::render::RenderMesh;
use super::tearable::TearState;
use super::{ClothBase, ClothEvent};
use crate::config::{ClothConfig, POOLED_PARTICLE_MASS, POOLED_PARTICLE_RADIUS};
use crate::constraints::{
    ActorConstraints, AerodynamicConstraint, BendConstraint, ConstraintBatch, DistanceConstraint,
    SkinConstraint, VolumeConstraint,
};
use crate::error::Result;
use crate::math::bend_rest_value;
use crate::particle::{ParticleSet, Phase, PhaseFlags};
use crate::solver::Solver;
use crate::topology::HalfEdgeMesh;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InitStage {
    Particles,
    PooledParticles,
    DeformableTriangles,
    DistanceConstraints,
    AerodynamicConstraints,
    SkinConstraints,
    VolumeConstraints,
    BendConstraints,
    Finalizing,
}

impl InitStage {
    fn next(self) -> Option<Self> {
        use InitStage::*;
        match self {
            Particles => Some(PooledParticles),
            PooledParticles => Some(DeformableTriangles),
            DeformableTriangles => Some(DistanceConstraints),
            DistanceConstraints => Some(AerodynamicConstraints),
            AerodynamicConstraints => Some(SkinConstraints),
            SkinConstraints => Some(VolumeConstraints),
            VolumeConstraints => Some(BendConstraints),
            BendConstraints => Some(Finalizing),
            Finalizing => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            InitStage::Particles => "generating particles",
            InitStage::PooledParticles => "generating pooled particles",
            InitStage::DeformableTriangles => "generating deformable geometry",
            InitStage::DistanceConstraints => "generating structural constraints",
            InitStage::AerodynamicConstraints => "generating aerodynamic constraints",
            InitStage::SkinConstraints => "generating skin constraints",
            InitStage::VolumeConstraints => "generating volume constraints",
            InitStage::BendConstraints => "generating bend constraints",
            InitStage::Finalizing => "finalizing",
        }
    }
}

/// Progress report of one initializer step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InitProgress {
    pub stage: InitStage,
    /// Fraction of the stage completed, in `(0, 1]`.
    pub fraction: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum InitMode {
    Regular { skinned: bool },
    Tearable { tear_capacity: f32 },
}

impl InitMode {
    fn skinned(self) -> bool {
        matches!(self, InitMode::Regular { skinned: true })
    }
}

/// Data under construction.
#[derive(Default)]
struct Build {
    topology: HalfEdgeMesh,
    scale: Affine3A,
    particles: ParticleSet,
    area_contribution: Vec<f32>,
    triangles: Vec<u32>,
    edges: Vec<usize>,
    normals: Vec<Vec3>,
    distance: ConstraintBatch<DistanceConstraint>,
    aerodynamic: ConstraintBatch<AerodynamicConstraint>,
    skin: ConstraintBatch<SkinConstraint>,
    volume_triangles: Vec<u32>,
    volume: Option<VolumeConstraint>,
    bending: ConstraintBatch<BendConstraint>,
    /// Wing pairs already bent: first wing to its opposite wing.
    bend_pairs: HashMap<usize, usize>,
    tear: Option<TearState>,
}

impl Build {
    fn scaled(&self, vertex: usize) -> Vec3 {
        self.scale.transform_point3(self.topology.vertex(vertex).position)
    }
}

/// Iterator building the physical representation of a cloth.
pub struct ClothInitializer<'a> {
    cloth: &'a mut ClothBase,
    tear: Option<&'a mut TearState>,
    mode: InitMode,
    config: ClothConfig,
    build: Build,
    stage: Option<InitStage>,
    cursor: usize,
}

impl<'a> ClothInitializer<'a> {
    pub(crate) fn begin(
        cloth: &'a mut ClothBase,
        tear: Option<&'a mut TearState>,
        mode: InitMode,
        solver: &mut dyn Solver,
    ) -> Result<Self> {
        let shared = cloth.source_topology()?;

        if cloth.actor.in_solver() {
            cloth.actor.remove_from_solver(solver);
        }
        cloth.actor.begin_initialization();

        let topology = (*shared).clone();
        let (scale, _, _) = cloth.actor.local_to_world().to_scale_rotation_translation();
        let vertex_count = topology.vertex_count();
        let pooled = match mode {
            InitMode::Regular { .. } => 0,
            InitMode::Tearable { tear_capacity } => {
                let spare = (topology.face_count() * 3).saturating_sub(vertex_count);
                (spare as f32 * tear_capacity) as usize
            }
        };
        let total = vertex_count + pooled;

        let tear_state = match mode {
            InitMode::Regular { .. } => None,
            InitMode::Tearable { .. } => Some(TearState {
                used_particles: vertex_count,
                pooled_particles: pooled,
                distance_map: vec![None; topology.half_edge_count()],
                bend_offsets: vec![0; vertex_count + 1],
                tear_resistance: vec![1.0; total],
            }),
        };

        let build = Build {
            edges: topology.edge_list(),
            normals: if mode.skinned() {
                topology.vertex_normals()
            } else {
                Vec::new()
            },
            scale: Affine3A::from_scale(scale),
            particles: ParticleSet::new(total),
            area_contribution: vec![0.0; total],
            tear: tear_state,
            topology,
            ..Build::default()
        };

        debug!(
            actor = %cloth.actor.id(),
            vertices = vertex_count,
            pooled,
            "initializing cloth"
        );

        Ok(Self {
            config: cloth.config.clone(),
            cloth,
            tear,
            mode,
            build,
            stage: Some(InitStage::Particles),
            cursor: 0,
        })
    }

    /// Run every remaining stage to completion.
    pub fn finish(mut self) {
        while self.next().is_some() {}
    }

    /// Abandon initialization, leaving the actor uninitialized.
    pub fn abort(self) {}

    pub fn is_finished(&self) -> bool {
        self.stage.is_none()
    }

    fn stage_len(&self, stage: InitStage) -> usize {
        let b = &self.build;
        let vertices = b.topology.vertex_count();
        match stage {
            InitStage::Particles => vertices,
            InitStage::PooledParticles => b.tear.as_ref().map_or(0, |t| t.pooled_particles),
            InitStage::DeformableTriangles => b.topology.face_count(),
            InitStage::DistanceConstraints => b.edges.len(),
            InitStage::AerodynamicConstraints => vertices,
            InitStage::SkinConstraints if self.mode.skinned() => vertices,
            InitStage::VolumeConstraints if b.topology.is_closed() => b.topology.face_count(),
            InitStage::SkinConstraints | InitStage::VolumeConstraints => 0,
            InitStage::BendConstraints => vertices,
            InitStage::Finalizing => 1,
        }
    }

    fn process(&mut self, stage: InitStage, item: usize) {
        match stage {
            InitStage::Particles => self.create_particle(item),
            InitStage::PooledParticles => self.create_pooled_particle(item),
            InitStage::DeformableTriangles => {
                let b = &mut self.build;
                let face = b.topology.face_vertices(item);
                b.triangles.extend(face.map(|v| v as u32));
            }
            InitStage::DistanceConstraints => self.create_distance_constraint(item),
            InitStage::AerodynamicConstraints => {
                let b = &mut self.build;
                let params = &self.config.aerodynamics;
                b.aerodynamic.add_constraint(AerodynamicConstraint::new(
                    item as u32,
                    b.area_contribution[item],
                    params.drag,
                    params.lift,
                ));
            }
            InitStage::SkinConstraints => {
                let b = &mut self.build;
                let params = &self.config.skin;
                let point = b.scaled(item);
                b.skin.add_constraint(SkinConstraint::new(
                    item as u32,
                    point,
                    b.normals[item],
                    params.radius,
                    params.falloff,
                    params.backstop,
                    params.stiffness,
                ));
            }
            InitStage::VolumeConstraints => {
                let b = &mut self.build;
                let face = b.topology.face_vertices(item);
                b.volume_triangles.extend(face.map(|v| v as u32));
            }
            InitStage::BendConstraints => self.create_bend_constraints(item),
            InitStage::Finalizing => {}
        }
    }

    fn create_particle(&mut self, i: usize) {
        let b = &mut self.build;
        let area: f32 = b
            .topology
            .incident_faces(i)
            .map(|f| b.topology.face_area(f) / 3.0)
            .sum();
        let position = b.scaled(i);
        let shortest_edge = b
            .topology
            .neighbors(i)
            .map(|n| position.distance(b.scaled(n)))
            .reduce(f32::min)
            .unwrap_or(0.0);

        let inv_mass = if self.mode.skinned() || area <= 0.0 {
            0.0
        } else {
            1.0 / (self.config.particle_density * area)
        };
        let flags = if self.config.self_collisions {
            PhaseFlags::SELF_COLLIDE
        } else {
            PhaseFlags::empty()
        };

        let p = &mut b.particles;
        p.active[i] = true;
        p.positions[i] = position;
        p.rest_positions[i] = position.extend(1.0);
        p.inv_masses[i] = inv_mass;
        p.inv_rotational_masses[i] = inv_mass;
        p.principal_radii[i] = Vec3::splat(shortest_edge * 0.5);
        p.phases[i] = Phase::new(1, flags);
        b.area_contribution[i] = area;
    }

    /// Spare particles start inactive, massless until a tear fills them.
    fn create_pooled_particle(&mut self, k: usize) {
        let b = &mut self.build;
        let i = b.topology.vertex_count() + k;
        let p = &mut b.particles;
        p.active[i] = false;
        p.inv_masses[i] = 1.0 / POOLED_PARTICLE_MASS;
        p.inv_rotational_masses[i] = 1.0 / POOLED_PARTICLE_MASS;
        p.principal_radii[i] = Vec3::splat(POOLED_PARTICLE_RADIUS);
        p.phases[i] = Phase::new(1, PhaseFlags::empty());
    }

    fn create_distance_constraint(&mut self, k: usize) {
        let b = &mut self.build;
        let h = b.edges[k];
        let start = b.topology.start_vertex(h);
        let end = b.topology.half_edge(h).end_vertex;
        let rest_length = b.scaled(start).distance(b.scaled(end));

        let index = b.distance.add_constraint(DistanceConstraint::new(
            start as u32,
            end as u32,
            rest_length,
            1.0,
            1.0,
        ));
        if let Some(tear) = &mut b.tear {
            tear.distance_map[h] = Some(index);
        }
    }

    /// For every neighbor of `center`, bend it against the neighbor lying
    /// most opposite to it, skipping pairs already bent the other way round.
    fn create_bend_constraints(&mut self, center: usize) {
        let b = &mut self.build;
        if let Some(tear) = &mut b.tear {
            tear.bend_offsets[center] = b.bending.len();
        }

        let origin = b.topology.vertex(center).position;
        let neighbors: Vec<usize> = b.topology.neighbors(center).collect();
        let direction =
            |v: usize| (b.topology.vertex(v).position - origin).normalize_or_zero();

        let mut created = Vec::new();
        for &wing in &neighbors {
            let towards = direction(wing);
            let mut best = wing;
            let mut best_cos = 0.0;
            for &other in &neighbors {
                let cos = towards.dot(direction(other));
                if cos < best_cos {
                    best_cos = cos;
                    best = other;
                }
            }
            created.push((wing, best));
        }

        for (wing, best) in created {
            if b.bend_pairs.get(&best) == Some(&wing) {
                continue;
            }
            b.bend_pairs.insert(wing, best);
            let rest_bend = bend_rest_value(b.scaled(wing), b.scaled(best), b.scaled(center));
            b.bending.add_constraint(BendConstraint::new(
                wing as u32,
                best as u32,
                center as u32,
                rest_bend,
                0.0,
                1.0,
            ));
        }
    }

    fn finish_stage(&mut self, stage: InitStage) {
        let b = &mut self.build;
        match stage {
            InitStage::DistanceConstraints => b.distance.cook(),
            InitStage::SkinConstraints if self.mode.skinned() => b.skin.cook(),
            InitStage::VolumeConstraints if b.topology.is_closed() => {
                let scale = b.scale.matrix3;
                let average_scale = (scale.x_axis.x + scale.y_axis.y + scale.z_axis.z) / 3.0;
                b.volume = Some(VolumeConstraint::new(
                    std::mem::take(&mut b.volume_triangles),
                    b.topology.volume() * average_scale,
                    1.0,
                    1.0,
                ));
            }
            InitStage::BendConstraints => {
                if let Some(tear) = &mut b.tear {
                    let vertices = b.topology.vertex_count();
                    tear.bend_offsets[vertices] = b.bending.len();
                }
                b.bending.cook();
            }
            _ => {}
        }
    }

    /// Hand the finished data over to the cloth.
    fn commit(&mut self) {
        let build = std::mem::take(&mut self.build);

        let mut constraints = ActorConstraints::default();
        constraints.distance.add_batch(build.distance);
        constraints.bending.add_batch(build.bending);
        constraints.aerodynamic.add_batch(build.aerodynamic);
        if self.mode.skinned() {
            constraints.skin.add_batch(build.skin);
        }
        if let Some(volume) = build.volume {
            let mut batch = ConstraintBatch::new();
            batch.add_constraint(volume);
            constraints.volume.add_batch(batch);
        }
        constraints.pin.add_batch(ConstraintBatch::new());

        if let (Some(slot), Some(state)) = (self.tear.as_deref_mut(), build.tear) {
            *slot = state;
        }

        let cloth = &mut *self.cloth;
        cloth.render_mesh = Some(RenderMesh::from_topology(&build.topology, build.particles.len()));
        cloth.topology = Some(build.topology);
        cloth.area_contribution = build.area_contribution;
        cloth.optimized.clear();
        cloth.actor.init_self_collisions(self.config.self_collisions);
        cloth.actor.finish_initialization(
            build.particles,
            constraints,
            build.triangles,
            build.scale,
        );
        cloth.events.notify(&ClothEvent::Initialized);
    }
}

impl Iterator for ClothInitializer<'_> {
    type Item = InitProgress;

    fn next(&mut self) -> Option<InitProgress> {
        loop {
            let stage = self.stage?;
            if stage == InitStage::Finalizing {
                self.commit();
                self.stage = None;
                return Some(InitProgress {
                    stage,
                    fraction: 1.0,
                });
            }

            let total = self.stage_len(stage);
            if self.cursor >= total {
                self.finish_stage(stage);
                self.stage = stage.next();
                self.cursor = 0;
                continue;
            }

            let end = (self.cursor + self.config.yield_interval.max(1)).min(total);
            for item in self.cursor..end {
                self.process(stage, item);
            }
            self.cursor = end;
            trace!(stage = stage.label(), done = end, total, "cloth initialization progress");
            return Some(InitProgress {
                stage,
                fraction: end as f32 / total as f32,
            });
        }
    }
}

impl Drop for ClothInitializer<'_> {
    fn drop(&mut self) {
        if self.stage.is_some() {
            debug!(actor = %self.cloth.actor.id(), "cloth initialization abandoned");
            self.cloth.actor.abort_initialization();
        }
    }
}
