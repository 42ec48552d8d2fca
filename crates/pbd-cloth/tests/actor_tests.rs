use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;
use glam::{Affine3A, Quat, Vec3, Vec4};
use pbd_cloth::materials::{CollisionMaterial, MaterialRegistry};
use pbd_cloth::math::MAX_PARTICLE_MASS;
use pbd_cloth::{
    Actor, ActorEvent, CpuSolver, ForceMode, ParticleData, ParticleSet, Solver,
};

/// An initialized actor with `n` free unit-mass particles along x.
fn line_actor(n: usize) -> Actor {
    let mut particles = ParticleSet::new(n);
    for i in 0..n {
        particles.active[i] = true;
        particles.positions[i] = Vec3::new(i as f32, 0.0, 0.0);
        particles.rest_positions[i] = particles.positions[i].extend(1.0);
        particles.inv_masses[i] = 1.0;
        particles.inv_rotational_masses[i] = 1.0;
    }
    Actor::with_particles(particles)
}

fn with_triangles(mut actor: Actor, triangles: &[u32]) -> Actor {
    actor.deformable_triangles = triangles.to_vec();
    actor
}

#[test]
fn test_pool_slots_are_exclusive() {
    let mut solver = CpuSolver::with_capacity(10);
    let mut a = line_actor(4);
    let mut b = line_actor(4);
    let mut c = line_actor(4);

    assert!(a.add_to_solver(&mut solver));
    assert!(b.add_to_solver(&mut solver));
    let slots_a = a.particle_indices().unwrap();
    let slots_b = b.particle_indices().unwrap();
    assert!(
        slots_a.iter().all(|k| !slots_b.contains(k)),
        "actors must never share pool slots"
    );

    assert!(!c.add_to_solver(&mut solver), "only 2 slots are left");
    assert!(!c.in_solver());
    assert_eq!(solver.free_slots(), 2);
}

#[test]
fn test_add_twice_is_refused() {
    let mut solver = CpuSolver::with_capacity(10);
    let mut actor = line_actor(3);
    assert!(actor.add_to_solver(&mut solver));
    assert!(!actor.add_to_solver(&mut solver));
    assert_eq!(solver.free_slots(), 7);

    assert!(actor.remove_from_solver(&mut solver));
    assert!(!actor.remove_from_solver(&mut solver), "already out of the solver");
    assert_eq!(solver.free_slots(), 10);
}

#[test]
fn test_push_pull_round_trip() {
    let mut solver = CpuSolver::with_capacity(8);
    let mut actor = line_actor(4);
    actor.set_local_to_world(Affine3A::from_rotation_translation(
        Quat::from_rotation_z(0.7),
        Vec3::new(3.0, -1.0, 2.0),
    ));
    let original = actor.particles.positions.clone();
    assert!(actor.add_to_solver(&mut solver));

    let first_slot = actor.particle_indices().unwrap()[1];
    let pushed = solver.buffers().positions[first_slot];
    assert!(
        (pushed - original[1]).length() > 0.1,
        "pool positions are in solver space"
    );

    actor.particles.positions.fill(Vec3::ZERO);
    actor.pull_data_from_solver(&solver, ParticleData::POSITIONS);
    for (pulled, expected) in actor.particles.positions.iter().zip(&original) {
        assert_relative_eq!(pulled.x, expected.x, epsilon = 1e-4);
        assert_relative_eq!(pulled.y, expected.y, epsilon = 1e-4);
        assert_relative_eq!(pulled.z, expected.z, epsilon = 1e-4);
    }
}

#[test]
fn test_removal_shifts_later_triangle_offsets() {
    let mut solver = CpuSolver::with_capacity(12);
    let mut a = with_triangles(line_actor(4), &[0, 1, 2, 1, 2, 3]);
    let mut b = with_triangles(line_actor(3), &[0, 1, 2]);
    let mut c = with_triangles(line_actor(3), &[2, 1, 0]);

    for actor in [&mut a, &mut b, &mut c] {
        assert!(actor.add_to_solver(&mut solver));
    }
    assert_eq!(solver.triangles_offset(a.id()), Some(0));
    assert_eq!(solver.triangles_offset(b.id()), Some(2));
    assert_eq!(solver.triangles_offset(c.id()), Some(3));
    assert_eq!(solver.deformable_triangles().len(), 12);

    assert!(a.remove_from_solver(&mut solver));
    assert_eq!(solver.triangles_offset(a.id()), None);
    assert_eq!(solver.triangles_offset(b.id()), Some(0));
    assert_eq!(solver.triangles_offset(c.id()), Some(1));
    assert_eq!(solver.deformable_triangles().len(), 6, "2 triangles removed");

    let b_slots = b.particle_indices().unwrap();
    let c_slots = c.particle_indices().unwrap();
    let expected: Vec<u32> = [b_slots[0], b_slots[1], b_slots[2], c_slots[2], c_slots[1], c_slots[0]]
        .iter()
        .map(|&k| k as u32)
        .collect();
    assert_eq!(solver.deformable_triangles(), expected.as_slice());
}

#[test]
fn test_removal_zeroes_rest_positions() {
    let mut solver = CpuSolver::with_capacity(4);
    let mut actor = line_actor(2);
    actor.add_to_solver(&mut solver);
    let slots = actor.particle_indices().unwrap().to_vec();
    assert_eq!(solver.buffers().rest_positions[slots[1]].w, 1.0);

    actor.remove_from_solver(&mut solver);
    for k in slots {
        assert_eq!(solver.buffers().rest_positions[k].w, 0.0);
    }
}

#[test]
fn test_add_force_spreads_over_particles() {
    let mut solver = CpuSolver::with_capacity(8);
    let mut actor = line_actor(4);
    actor.add_to_solver(&mut solver);

    let force = Vec3::new(4.0, 0.0, -2.0);
    actor.add_force(&mut solver, force, ForceMode::Force);
    for &k in actor.particle_indices().unwrap() {
        let applied = solver.buffers().external_forces[k];
        assert_relative_eq!(applied.x, force.x / 4.0, epsilon = 1e-5);
        assert_relative_eq!(applied.z, force.z / 4.0, epsilon = 1e-5);
    }
}

#[test]
fn test_add_force_skips_fixed_particles() {
    let mut solver = CpuSolver::with_capacity(8);
    let mut actor = line_actor(3);
    actor.particles.inv_masses[0] = 0.0;
    actor.add_to_solver(&mut solver);

    actor.add_force(&mut solver, Vec3::X, ForceMode::Acceleration);
    let fixed_slot = actor.particle_indices().unwrap()[0];
    assert_eq!(solver.buffers().external_forces[fixed_slot], Vec3::ZERO);
}

#[test]
fn test_mass_counts_fixed_particles_as_heavy() {
    let mut actor = line_actor(3);
    actor.particles.inv_masses[2] = 0.0;
    let (mass, center) = actor.mass(None);
    assert_relative_eq!(mass, 2.0 + MAX_PARTICLE_MASS, epsilon = 1e-2);
    assert!(center.x > 1.9, "center of mass sits near the fixed particle");
}

#[test]
fn test_set_mass_distributes_evenly() {
    let mut solver = CpuSolver::with_capacity(8);
    let mut actor = line_actor(4);
    actor.add_to_solver(&mut solver);
    actor.set_mass(&mut solver, 8.0);

    for &k in actor.particle_indices().unwrap() {
        assert_relative_eq!(solver.buffers().inv_masses[k], 0.5);
    }
    let (mass, _) = actor.mass(Some(&solver));
    assert_relative_eq!(mass, 8.0, epsilon = 1e-4);
}

#[test]
fn test_fixed_particles_follow_transform() {
    let mut solver = CpuSolver::with_capacity(4);
    let mut actor = line_actor(2);
    actor.particles.inv_masses[0] = 0.0;
    actor.add_to_solver(&mut solver);
    actor.update_fixed_particles(&mut solver);

    actor.set_local_to_world(Affine3A::from_translation(Vec3::new(0.0, 5.0, 0.0)));
    actor.update_fixed_particles(&mut solver);

    let slots = actor.particle_indices().unwrap();
    assert_relative_eq!(solver.buffers().positions[slots[0]].y, 5.0);
    assert_relative_eq!(
        solver.buffers().positions[slots[1]].y,
        0.0,
        epsilon = 1e-6
    );
}

#[test]
fn test_rotation_fixed_particles_follow_rest_orientation() {
    let mut solver = CpuSolver::with_capacity(4);
    let tilt = Quat::from_rotation_z(0.5);
    let mut particles = ParticleSet::with_orientations(2);
    for i in 0..2 {
        particles.active[i] = true;
        particles.inv_masses[i] = 1.0;
        particles.rest_orientations[i] = tilt;
    }
    particles.inv_rotational_masses[1] = 1.0;
    let mut actor = Actor::with_particles(particles);
    actor.add_to_solver(&mut solver);
    actor.update_fixed_particles(&mut solver);

    let slots = actor.particle_indices().unwrap().to_vec();
    let b = solver.buffers();
    assert!(
        b.orientations[slots[0]].abs_diff_eq(tilt, 1e-6),
        "rotationally fixed particle takes its rest orientation"
    );
    assert!(
        b.orientations[slots[1]].abs_diff_eq(Quat::IDENTITY, 1e-6),
        "free particle keeps its simulated orientation"
    );
    assert_eq!(b.positions[slots[0]], Vec3::ZERO, "translation is free");
}

#[test]
fn test_particle_queries_tolerate_unknown_index() {
    let mut solver = CpuSolver::with_capacity(4);
    let mut actor = line_actor(2);
    let unknown = [Vec4::X, Vec4::Y, Vec4::Z];

    assert_eq!(actor.particle_position(None, 7), Vec3::ZERO);
    assert_eq!(actor.particle_orientation(None, 7), Quat::IDENTITY);
    assert_eq!(actor.particle_anisotropy(None, 7), unknown);

    actor.add_to_solver(&mut solver);
    let solver: &dyn Solver = &solver;
    assert_eq!(actor.particle_position(Some(solver), 7), Vec3::ZERO);
    assert_eq!(actor.particle_orientation(Some(solver), 7), Quat::IDENTITY);
    assert_eq!(actor.particle_anisotropy(Some(solver), 7), unknown);
    assert_relative_eq!(actor.particle_position(Some(solver), 1).x, 1.0);
}

#[test]
fn test_collision_material_reaches_pool() {
    let mut solver = CpuSolver::with_capacity(4);
    let mut registry = MaterialRegistry::default();
    let silk = registry.register(CollisionMaterial::SILK);

    let mut actor = line_actor(2);
    actor.add_to_solver(&mut solver);
    actor.set_collision_material(&mut solver, Some(silk));

    for &k in actor.particle_indices().unwrap() {
        let handle = solver.buffers().collision_materials[k].unwrap();
        assert_eq!(registry.get(handle), Some(&CollisionMaterial::SILK));
    }

    actor.set_collision_material(&mut solver, None);
    let slot = actor.particle_indices().unwrap()[0];
    assert_eq!(solver.buffers().collision_materials[slot], None);
}

#[test]
fn test_disable_deactivates_pool_particles() {
    let mut solver = CpuSolver::with_capacity(4);
    let mut actor = line_actor(3);
    actor.add_to_solver(&mut solver);
    assert_eq!(solver.active_particles().len(), 3);

    actor.set_enabled(&mut solver, false);
    assert!(solver.active_particles().is_empty());
    assert!(!solver.is_visible());

    actor.set_enabled(&mut solver, true);
    assert_eq!(solver.active_particles().len(), 3);
}

#[test]
fn test_self_collisions_and_group_rewrite_phases() {
    let mut solver = CpuSolver::with_capacity(4);
    let mut actor = line_actor(2);
    actor.add_to_solver(&mut solver);

    actor.set_group(&mut solver, 5);
    actor.set_self_collisions(&mut solver, true);
    for &k in actor.particle_indices().unwrap() {
        let phase = solver.buffers().phases[k];
        assert_eq!(phase.group(), 5);
        assert!(phase.flags().contains(pbd_cloth::PhaseFlags::SELF_COLLIDE));
    }
}

#[test]
fn test_lifecycle_events() {
    let mut solver = CpuSolver::with_capacity(4);
    let mut actor = line_actor(2);
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    actor.subscribe(move |e| sink.borrow_mut().push(*e));

    actor.add_to_solver(&mut solver);
    actor.remove_from_solver(&mut solver);
    assert_eq!(
        *log.borrow(),
        vec![ActorEvent::AddedToSolver, ActorEvent::RemovedFromSolver]
    );
}
