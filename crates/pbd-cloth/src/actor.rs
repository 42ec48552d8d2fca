//! Particle actors.
//!
//! An [`Actor`] owns a set of particles in its own local space and keeps them
//! in sync with the slots it holds in a solver's particle pool:
//!
//! ```text
//!   actor-local ──push──▶ pool (solver space) ──interpolate──▶ renderable (world)
//!               ◀──pull──
//! ```
//!
//! Local data is the source of truth while the actor is out of the solver;
//! the pool is authoritative while it is in.
//!
//! Lifecycle: `Uninitialized -> Initializing -> Initialized`, crossed with an
//! independent in/out-of-solver toggle. Only initialized actors can join a
//! solver.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Affine3A, Quat, Vec3, Vec4};
use tracing::{debug, warn};

use crate::constraints::ActorConstraints;
use crate::events::{ObserverId, Observers};
use crate::materials::MaterialHandle;
use crate::math::{particle_mass, rotation_of, EPSILON};
use crate::particle::{ParticleData, ParticleSet, Phase, PhaseFlags};
use crate::solver::{Solver, SolverSpace};

static NEXT_ACTOR_ID: AtomicU32 = AtomicU32::new(1);

/// Unique identifier of an actor within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u32);

impl ActorId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Actor({})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ActorState {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorEvent {
    AddedToSolver,
    RemovedFromSolver,
    Initialized,
}

/// How a force or torque vector is applied to an actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ForceMode {
    /// Continuous force, divided by total mass.
    #[default]
    Force,
    /// Continuous acceleration, ignores mass.
    Acceleration,
    /// Instant impulse, divided by total mass.
    Impulse,
    /// Instant velocity change, ignores mass.
    VelocityChange,
}

#[derive(Debug)]
pub struct Actor {
    id: ActorId,
    state: ActorState,
    pub particles: ParticleSet,
    pub constraints: ActorConstraints,
    /// Local particle indices, three per deformable triangle.
    pub deformable_triangles: Vec<u32>,
    /// Pool slot of each local particle, present while in a solver.
    particle_indices: Option<Vec<usize>>,
    local_to_world: Affine3A,
    transform_changed: bool,
    seen_solver_version: Option<u64>,
    initial_scale: Affine3A,
    self_collisions: bool,
    collision_material: Option<MaterialHandle>,
    enabled: bool,
    observers: Observers<ActorEvent>,
}

impl Actor {
    /// An uninitialized actor without particles.
    pub fn new() -> Self {
        Self {
            id: ActorId::next(),
            state: ActorState::Uninitialized,
            particles: ParticleSet::default(),
            constraints: ActorConstraints::default(),
            deformable_triangles: Vec::new(),
            particle_indices: None,
            local_to_world: Affine3A::IDENTITY,
            transform_changed: true,
            seen_solver_version: None,
            initial_scale: Affine3A::IDENTITY,
            self_collisions: false,
            collision_material: None,
            enabled: true,
            observers: Observers::new(),
        }
    }

    /// An initialized actor owning `particles`.
    pub fn with_particles(particles: ParticleSet) -> Self {
        Self {
            particles,
            state: ActorState::Initialized,
            ..Self::new()
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn state(&self) -> ActorState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ActorState::Initialized
    }

    pub fn in_solver(&self) -> bool {
        self.particle_indices.is_some()
    }

    /// Pool slot of every local particle while in a solver.
    pub fn particle_indices(&self) -> Option<&[usize]> {
        self.particle_indices.as_deref()
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn uses_oriented_particles(&self) -> bool {
        self.particles.uses_oriented_particles()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn self_collisions(&self) -> bool {
        self.self_collisions
    }

    pub fn collision_material(&self) -> Option<MaterialHandle> {
        self.collision_material
    }

    pub fn local_to_world(&self) -> Affine3A {
        self.local_to_world
    }

    pub fn set_local_to_world(&mut self, transform: Affine3A) {
        self.local_to_world = transform;
        self.transform_changed = true;
    }

    /// Scale baked into the local particle data at initialization.
    pub fn initial_scale(&self) -> Affine3A {
        self.initial_scale
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&ActorEvent) + 'static) -> ObserverId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub(crate) fn begin_initialization(&mut self) {
        self.state = ActorState::Initializing;
    }

    pub(crate) fn abort_initialization(&mut self) {
        if self.state == ActorState::Initializing {
            self.state = ActorState::Uninitialized;
        }
    }

    pub(crate) fn finish_initialization(
        &mut self,
        particles: ParticleSet,
        constraints: ActorConstraints,
        deformable_triangles: Vec<u32>,
        initial_scale: Affine3A,
    ) {
        self.particles = particles;
        self.constraints = constraints;
        self.deformable_triangles = deformable_triangles;
        self.initial_scale = initial_scale;
        self.state = ActorState::Initialized;
        self.transform_changed = true;
        debug!(actor = %self.id, particles = self.particles.len(), "actor initialized");
        self.observers.notify(&ActorEvent::Initialized);
    }

    pub(crate) fn init_self_collisions(&mut self, enabled: bool) {
        self.self_collisions = enabled;
    }

    /// Transform from actor-local (scaled) space to solver space.
    pub fn local_to_solver(&self, space: &SolverSpace) -> Affine3A {
        space.world_to_solver() * self.local_to_world * self.initial_scale.inverse()
    }

    /// Allocate pool slots, push every field and register the constraints.
    ///
    /// Returns false if the actor is not initialized, already in a solver, or
    /// the pool is out of slots.
    pub fn add_to_solver(&mut self, solver: &mut dyn Solver) -> bool {
        if !self.is_initialized() || self.in_solver() {
            return false;
        }

        let indices = match solver.allocate(self.id, self.particles.len()) {
            Ok(indices) => indices,
            Err(err) => {
                warn!(actor = %self.id, %err, "could not add actor to solver");
                return false;
            }
        };
        self.particle_indices = Some(indices.clone());
        self.seen_solver_version = None;

        self.update_particle_phases(solver);
        let offset = solver.deformable_triangle_count();
        solver.set_triangles_offset(self.id, offset);
        self.update_deformable_triangles(solver);
        self.push_data_to_solver(solver, ParticleData::ALL);
        self.constraints.add_to_solver(solver, &indices);
        if !self.enabled {
            self.constraints.set_enabled(solver, false);
        }

        debug!(actor = %self.id, particles = indices.len(), triangles_offset = offset, "added to solver");
        self.observers.notify(&ActorEvent::AddedToSolver);
        true
    }

    /// Unregister constraints and give the pool slots back.
    ///
    /// Returns false if the actor is not in a solver or is initializing.
    pub fn remove_from_solver(&mut self, solver: &mut dyn Solver) -> bool {
        if self.state == ActorState::Initializing {
            warn!(actor = %self.id, "cannot remove an actor from its solver while initializing");
            return false;
        }
        let Some(indices) = self.particle_indices.take() else {
            return false;
        };

        self.constraints.remove_from_solver(solver);

        let buffers = solver.buffers_mut();
        for &k in &indices {
            buffers.rest_positions[k] = Vec4::ZERO;
        }

        let triangle_count = self.deformable_triangles.len() / 3;
        let offset = solver.triangles_offset(self.id).unwrap_or(0);
        if let Some(position) = solver.release(self.id, &indices) {
            solver.shift_triangle_offsets(position, triangle_count);
        }
        solver.remove_deformable_triangles(offset, triangle_count);

        debug!(actor = %self.id, "removed from solver");
        self.observers.notify(&ActorEvent::RemovedFromSolver);
        true
    }

    /// Copy the requested local fields into the pool.
    pub fn push_data_to_solver(&self, solver: &mut dyn Solver, data: ParticleData) {
        let Some(indices) = &self.particle_indices else {
            return;
        };

        let l2s = self.local_to_solver(solver.space());
        let s2w = solver.space().solver_to_world();
        let rotation = rotation_of(&l2s);
        let world_rotation = rotation_of(&s2w);
        let oriented = self.uses_oriented_particles();
        let p = &self.particles;
        let b = solver.buffers_mut();

        for (i, &k) in indices.iter().enumerate() {
            if data.contains(ParticleData::POSITIONS) {
                let position = l2s.transform_point3(p.positions[i]);
                b.start_positions[k] = position;
                b.prev_positions[k] = position;
                b.positions[k] = position;
                b.renderable_positions[k] = s2w.transform_point3(position);
            }
            if oriented && data.contains(ParticleData::ORIENTATIONS) {
                let orientation = rotation * p.orientations[i];
                b.start_orientations[k] = orientation;
                b.prev_orientations[k] = orientation;
                b.orientations[k] = orientation;
                b.renderable_orientations[k] = world_rotation * orientation;
            }
            if data.contains(ParticleData::VELOCITIES) {
                b.velocities[k] = l2s.transform_vector3(p.velocities[i]);
            }
            if data.contains(ParticleData::ANGULAR_VELOCITIES) {
                b.angular_velocities[k] = l2s.transform_vector3(p.angular_velocities[i]);
            }
            if data.contains(ParticleData::INV_MASSES) {
                b.inv_masses[k] = p.inv_masses[i];
            }
            if data.contains(ParticleData::INV_ROTATIONAL_MASSES) {
                b.inv_rotational_masses[k] = p.inv_rotational_masses[i];
            }
            if data.contains(ParticleData::PRINCIPAL_RADII) {
                b.principal_radii[k] = p.principal_radii[i];
            }
            if data.contains(ParticleData::PHASES) {
                b.phases[k] = p.phases[i];
            }
            if data.contains(ParticleData::REST_POSITIONS) {
                b.rest_positions[k] = p.rest_positions[i];
            }
            if oriented && data.contains(ParticleData::REST_ORIENTATIONS) {
                b.rest_orientations[k] = p.rest_orientations[i];
            }
            if data.contains(ParticleData::ACTIVE_STATUS) {
                b.active[k] = self.enabled && p.active[i];
            }
            if data.contains(ParticleData::COLLISION_MATERIAL) {
                b.collision_materials[k] = self.collision_material;
            }
        }

        if data.contains(ParticleData::ACTIVE_STATUS) {
            solver.update_active_particles();
        }
        if data.intersects(
            ParticleData::PRINCIPAL_RADII
                | ParticleData::INV_MASSES
                | ParticleData::INV_ROTATIONAL_MASSES,
        ) {
            solver.recalculate_inertia_tensors();
        }
    }

    /// Copy the requested pool fields back into local space.
    ///
    /// Positions, orientations, velocities and angular velocities are
    /// inverse-transformed; the remaining fields are owned by the actor and
    /// left untouched.
    pub fn pull_data_from_solver(&mut self, solver: &dyn Solver, data: ParticleData) {
        let Some(indices) = &self.particle_indices else {
            return;
        };

        let s2l = self.local_to_solver(solver.space()).inverse();
        let rotation = rotation_of(&s2l);
        let oriented = self.particles.uses_oriented_particles();
        let b = solver.buffers();
        let p = &mut self.particles;

        for (i, &k) in indices.iter().enumerate() {
            if data.contains(ParticleData::POSITIONS) {
                p.positions[i] = s2l.transform_point3(b.positions[k]);
            }
            if oriented && data.contains(ParticleData::ORIENTATIONS) {
                p.orientations[i] = rotation * b.orientations[k];
            }
            if data.contains(ParticleData::VELOCITIES) {
                p.velocities[i] = s2l.transform_vector3(b.velocities[k]);
            }
            if data.contains(ParticleData::ANGULAR_VELOCITIES) {
                p.angular_velocities[i] = s2l.transform_vector3(b.angular_velocities[k]);
            }
        }
    }

    /// World-space position of a particle, zero for an unknown index.
    pub fn particle_position(&self, solver: Option<&dyn Solver>, index: usize) -> Vec3 {
        match (&self.particle_indices, solver) {
            (Some(indices), Some(solver)) => indices
                .get(index)
                .and_then(|&k| solver.buffers().renderable_positions.get(k))
                .copied()
                .unwrap_or(Vec3::ZERO),
            _ => self.particles.positions.get(index).map_or(Vec3::ZERO, |&p| {
                (self.local_to_world * self.initial_scale.inverse()).transform_point3(p)
            }),
        }
    }

    /// World-space orientation of a particle, identity for an unknown index.
    pub fn particle_orientation(&self, solver: Option<&dyn Solver>, index: usize) -> Quat {
        match (&self.particle_indices, solver) {
            (Some(indices), Some(solver)) => indices
                .get(index)
                .and_then(|&k| solver.buffers().renderable_orientations.get(k))
                .copied()
                .unwrap_or(Quat::IDENTITY),
            _ if index >= self.particles.len() => Quat::IDENTITY,
            _ => {
                let local = if self.uses_oriented_particles() {
                    self.particles.orientations[index]
                } else {
                    Quat::IDENTITY
                };
                rotation_of(&self.local_to_world) * local
            }
        }
    }

    /// World-space ellipsoid axes (xyz) and radii (w) of a particle.
    ///
    /// An unknown index yields the world axes with zero radii.
    pub fn particle_anisotropy(&self, solver: Option<&dyn Solver>, index: usize) -> [Vec4; 3] {
        const UNKNOWN: [Vec4; 3] = [Vec4::X, Vec4::Y, Vec4::Z];
        match (&self.particle_indices, solver) {
            (Some(indices), Some(solver)) => indices
                .get(index)
                .and_then(|&k| solver.buffers().anisotropies.get(k))
                .copied()
                .unwrap_or(UNKNOWN),
            _ => {
                let Some(&r) = self.particles.principal_radii.get(index) else {
                    return UNKNOWN;
                };
                let q = self.particle_orientation(None, index);
                [
                    (q * Vec3::X).extend(r.x),
                    (q * Vec3::Y).extend(r.y),
                    (q * Vec3::Z).extend(r.z),
                ]
            }
        }
    }

    /// Spread `mass` evenly over all particles.
    pub fn set_mass(&mut self, solver: &mut dyn Solver, mass: f32) {
        let count = self.particles.len();
        if count == 0 {
            return;
        }
        let inv_mass = 1.0 / (mass / count as f32).max(1e-5);
        self.particles.inv_masses.fill(inv_mass);
        self.particles.inv_rotational_masses.fill(inv_mass);
        self.push_data_to_solver(
            solver,
            ParticleData::INV_MASSES | ParticleData::INV_ROTATIONAL_MASSES,
        );
    }

    /// Total mass and center of mass.
    ///
    /// Uses pool data (center in solver space) while in a solver, local data
    /// otherwise. Fixed particles count as [`crate::math::MAX_PARTICLE_MASS`].
    pub fn mass(&self, solver: Option<&dyn Solver>) -> (f32, Vec3) {
        let mut total = 0.0;
        let mut center = Vec3::ZERO;

        match (&self.particle_indices, solver) {
            (Some(indices), Some(solver)) => {
                let b = solver.buffers();
                for &k in indices {
                    let mass = particle_mass(b.inv_masses[k]);
                    total += mass;
                    center += b.positions[k] * mass;
                }
            }
            _ => {
                for (position, &inv_mass) in self.particles.positions.iter().zip(&self.particles.inv_masses) {
                    let mass = particle_mass(inv_mass);
                    total += mass;
                    center += *position * mass;
                }
            }
        }

        if total > EPSILON {
            center /= total;
        }
        (total, center)
    }

    fn body_force(&self, solver: &dyn Solver, vector: Vec3, mode: ForceMode) -> (Vec3, Vec3) {
        let (mass, center) = self.mass(Some(solver));
        let dt = solver.fixed_delta_time();
        let force = match mode {
            ForceMode::Force => vector / mass,
            ForceMode::Acceleration => vector,
            ForceMode::Impulse => vector / mass / dt,
            ForceMode::VelocityChange => vector / dt,
        };
        (force, center)
    }

    /// Accumulate a rigid-body style force into every non-fixed particle.
    pub fn add_force(&self, solver: &mut dyn Solver, force: Vec3, mode: ForceMode) {
        let Some(indices) = &self.particle_indices else {
            return;
        };
        let (body_force, _) = self.body_force(&*solver, force, mode);
        let b = solver.buffers_mut();
        for &k in indices {
            let inv_mass = b.inv_masses[k];
            if inv_mass > 0.0 {
                b.external_forces[k] += body_force / inv_mass;
            }
        }
    }

    /// Accumulate a torque about the center of mass.
    pub fn add_torque(&self, solver: &mut dyn Solver, torque: Vec3, mode: ForceMode) {
        let Some(indices) = &self.particle_indices else {
            return;
        };
        let (body_torque, center) = self.body_force(&*solver, torque, mode);
        let b = solver.buffers_mut();
        for &k in indices {
            let inv_mass = b.inv_masses[k];
            if inv_mass > 0.0 {
                b.external_forces[k] += (body_torque / inv_mass).cross(b.positions[k] - center);
            }
        }
    }

    /// Drive fixed particles (all particles while disabled) from the actor
    /// transform.
    ///
    /// Skipped when neither this actor's transform nor the solver's has
    /// changed since the last call.
    pub fn update_fixed_particles(&mut self, solver: &mut dyn Solver) {
        let Some(indices) = &self.particle_indices else {
            return;
        };
        let version = solver.space().version();
        if !self.transform_changed && self.seen_solver_version == Some(version) {
            return;
        }
        self.transform_changed = false;
        self.seen_solver_version = Some(version);

        let l2s = self.local_to_solver(solver.space());
        let rotation = rotation_of(&l2s);
        let oriented = self.particles.uses_oriented_particles();
        let p = &self.particles;
        let b = solver.buffers_mut();
        for (i, &k) in indices.iter().enumerate() {
            if !self.enabled || p.inv_masses[i] == 0.0 {
                b.positions[k] = l2s.transform_point3(p.positions[i]);
            }
            if oriented && (!self.enabled || p.inv_rotational_masses[i] == 0.0) {
                b.orientations[k] = rotation * p.rest_orientations[i];
            }
        }
    }

    /// Rewrite the self-collision flag of every phase, keeping groups.
    pub fn update_particle_phases(&mut self, solver: &mut dyn Solver) {
        let flag = if self.self_collisions {
            PhaseFlags::SELF_COLLIDE
        } else {
            PhaseFlags::empty()
        };
        for phase in &mut self.particles.phases {
            let flags = (phase.flags() - PhaseFlags::SELF_COLLIDE) | flag;
            *phase = Phase::new(phase.group(), flags);
        }
        self.push_data_to_solver(solver, ParticleData::PHASES);
    }

    /// Move every particle to collision group `group`, keeping phase flags.
    pub fn set_group(&mut self, solver: &mut dyn Solver, group: u32) {
        for phase in &mut self.particles.phases {
            *phase = Phase::new(group, phase.flags());
        }
        self.push_data_to_solver(solver, ParticleData::PHASES);
    }

    pub fn set_self_collisions(&mut self, solver: &mut dyn Solver, enabled: bool) {
        self.self_collisions = enabled;
        self.update_particle_phases(solver);
    }

    pub fn set_collision_material(&mut self, solver: &mut dyn Solver, material: Option<MaterialHandle>) {
        self.collision_material = material;
        self.push_data_to_solver(solver, ParticleData::COLLISION_MATERIAL);
    }

    /// Write this actor's deformable triangles (as pool slots) into its range
    /// of the solver's triangle buffer.
    pub fn update_deformable_triangles(&self, solver: &mut dyn Solver) {
        let Some(indices) = &self.particle_indices else {
            return;
        };
        let Some(offset) = solver.triangles_offset(self.id) else {
            return;
        };
        let mapped: Vec<u32> = self
            .deformable_triangles
            .iter()
            .map(|&t| indices[t as usize] as u32)
            .collect();
        solver.set_deformable_triangles(&mapped, offset);
    }

    /// Enable or disable simulation of this actor.
    ///
    /// Disabling pulls the latest positions and velocities, turns off every
    /// constraint batch and deactivates the particles in the pool.
    pub fn set_enabled(&mut self, solver: &mut dyn Solver, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        if !enabled {
            self.pull_data_from_solver(&*solver, ParticleData::POSITIONS | ParticleData::VELOCITIES);
        }
        self.enabled = enabled;
        self.transform_changed = true;
        if self.in_solver() {
            self.constraints.set_enabled(solver, enabled);
            self.push_data_to_solver(solver, ParticleData::ACTIVE_STATUS);
            solver.update_visibility();
        }
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::new()
    }
}
