use glam::Vec3;
use pbd_cloth::constraints::{
    ConstraintBatch, ConstraintSet, ConstraintSetOps, DistanceConstraint, TetherConstraint,
};
use pbd_cloth::{ActorId, CpuSolver, Solver};

fn strip(n: u32) -> ConstraintBatch<DistanceConstraint> {
    let mut batch = ConstraintBatch::new();
    for i in 0..n {
        batch.add_constraint(DistanceConstraint::new(i, i + 1, 1.0, 1.0, 1.0));
    }
    batch
}

/// Solver holding `n` free unit-mass particles along x, `spacing` apart.
fn solver_with_particles(n: usize, spacing: f32) -> (CpuSolver, Vec<usize>) {
    let mut solver = CpuSolver::with_capacity(n);
    let slots = solver.allocate(ActorId::new(900), n).unwrap();
    let b = solver.buffers_mut();
    for (i, &k) in slots.iter().enumerate() {
        b.active[k] = true;
        b.inv_masses[k] = 1.0;
        b.positions[k] = Vec3::new(i as f32 * spacing, 0.0, 0.0);
    }
    solver.update_active_particles();
    (solver, slots)
}

#[test]
fn test_deactivate_twice_is_idempotent() {
    let mut batch = strip(4);
    batch.cook();
    batch.deactivate_constraint(2);
    let once = batch.active_solver_positions();
    batch.deactivate_constraint(2);
    assert_eq!(batch.active_solver_positions(), once);
    assert_eq!(batch.active_count(), 3);
}

#[test]
fn test_out_of_range_activation_is_ignored() {
    let mut batch = strip(2);
    batch.deactivate_constraint(10);
    batch.activate_constraint(10);
    assert_eq!(batch.active_count(), 2);
    assert!(!batch.is_active(10));
}

#[test]
fn test_set_active_constraints_is_idempotent() {
    let (mut solver, slots) = solver_with_particles(5, 1.0);
    let mut batch = strip(4);
    batch.cook();
    batch.add_to_solver(&mut solver, &slots);
    let handle = batch.handle().unwrap();

    batch.deactivate_constraint(1);
    batch.set_active_constraints(&mut solver);
    let first = solver.batch(handle).unwrap().active.clone();
    batch.set_active_constraints(&mut solver);
    assert_eq!(solver.batch(handle).unwrap().active, first);
    assert_eq!(first.len(), 3);
}

#[test]
fn test_registered_data_uses_pool_slots() {
    let (mut solver, slots) = solver_with_particles(3, 1.0);
    let mut batch = strip(2);
    batch.add_to_solver(&mut solver, &slots);
    let cooked = solver.batch(batch.handle().unwrap()).unwrap();
    assert_eq!(cooked.len(), 2);
    assert_eq!(
        cooked.constraint_particles(1),
        &[slots[1] as u32, slots[2] as u32]
    );

    batch.add_to_solver(&mut solver, &slots);
    assert_eq!(solver.batch_count(), 1, "adding a registered batch is a no-op");
}

#[test]
fn test_constraints_involving_particle() {
    let batch = strip(4);
    assert_eq!(batch.constraints_involving_particle(2), vec![1, 2]);
    assert_eq!(batch.constraints_involving_particle(0), vec![0]);
    assert!(batch.constraints_involving_particle(9).is_empty());
}

#[test]
fn test_stretched_constraint_reports_negative_force() {
    let (mut solver, slots) = solver_with_particles(2, 2.0);
    solver.config.gravity = Vec3::ZERO;
    let mut batch = strip(1);
    batch.add_to_solver(&mut solver, &slots);

    solver.substep(1.0 / 60.0);
    let forces = batch.constraint_forces(&solver);
    assert_eq!(forces.len(), 1);
    assert!(forces[0] < 0.0, "stretched constraint force should be negative, got {}", forces[0]);

    let b = solver.buffers();
    let distance = (b.positions[slots[1]] - b.positions[slots[0]]).length();
    assert!(distance < 2.0, "projection should pull the particles together");
}

#[test]
fn test_unregistered_batch_reports_no_forces() {
    let (solver, _) = solver_with_particles(2, 1.0);
    let batch = strip(1);
    assert!(batch.constraint_forces(&solver).is_empty());
}

#[test]
fn test_set_removal_survives_unknown_handles() {
    let (mut solver, slots) = solver_with_particles(4, 1.0);
    let mut set: ConstraintSet<DistanceConstraint> = ConstraintSet::new();
    set.add_batch(strip(1));
    set.add_batch(strip(2));
    set.add_to_solver(&mut solver, &slots);
    assert_eq!(solver.batch_count(), 2);

    // The solver lost the first batch behind the set's back.
    let lost = set.batches()[0].handle().unwrap();
    solver.unregister_batch(lost).unwrap();

    set.remove_from_solver(&mut solver);
    assert_eq!(solver.batch_count(), 0, "the remaining batch is still removed");
    assert!(set.batches().iter().all(|b| !b.in_solver()));
}

#[test]
fn test_disabled_set_registers_disabled() {
    let (mut solver, slots) = solver_with_particles(3, 1.0);
    let mut set: ConstraintSet<TetherConstraint> = ConstraintSet::new();
    let mut batch = ConstraintBatch::new();
    batch.add_constraint(TetherConstraint::new(1, 0, 1.0, 1.0, 1.0));
    set.add_batch(batch);

    set.set_enabled(&mut solver, false);
    set.add_to_solver(&mut solver, &slots);
    let handle = set.batches()[0].handle().unwrap();
    assert_eq!(solver.batch_enabled(handle), Some(false));
    assert_eq!(set.constraint_count(), 1);
}
