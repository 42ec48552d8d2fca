use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use approx::assert_relative_eq;
use glam::{Affine3A, Vec3};
use pbd_cloth::constraints::{ColliderHandle, ConstraintSetOps};
use pbd_cloth::{
    simulate_frame, Cloth, ClothConfig, ClothError, ClothEvent, CpuSolver, HalfEdgeMesh,
    InitStage, Solver,
};

fn grid_cloth() -> Cloth {
    Cloth::new(
        Arc::new(HalfEdgeMesh::grid(3, 3, 1.0).unwrap()),
        ClothConfig::default(),
    )
}

fn tetrahedron() -> Arc<HalfEdgeMesh> {
    let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
    Arc::new(
        HalfEdgeMesh::from_triangles(positions, &[[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]])
            .unwrap(),
    )
}

#[test]
fn test_grid_initialization() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();

    let actor = cloth.actor();
    assert!(actor.is_initialized());
    assert!(!actor.in_solver(), "initialization does not add the cloth");
    assert_eq!(actor.particle_count(), 9);
    assert_eq!(actor.constraints.distance.constraint_count(), 16);
    assert_eq!(actor.constraints.aerodynamic.constraint_count(), 9);
    assert_eq!(actor.constraints.volume.constraint_count(), 0, "a grid is open");
    assert_eq!(actor.constraints.pin.batches().len(), 1);
    assert_eq!(actor.constraints.pin.constraint_count(), 0);
    assert_eq!(actor.deformable_triangles.len(), 24);
    assert!(cloth.base().topology().is_some());
    assert_eq!(cloth.base().render_mesh().map(|m| m.triangle_count()), Some(8));
}

#[test]
fn test_mass_follows_area_contribution() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();

    let area = cloth.base().area_contribution();
    assert_relative_eq!(area[4], 1.0, epsilon = 1e-5);
    assert_relative_eq!(area[1], 0.5, epsilon = 1e-5);
    assert_relative_eq!(area.iter().sum::<f32>(), 4.0, epsilon = 1e-4);

    let p = &cloth.actor().particles;
    // Default density is 0.1 per unit area.
    assert_relative_eq!(p.inv_masses[4], 10.0, epsilon = 1e-3);
    assert_relative_eq!(p.inv_masses[1], 20.0, epsilon = 1e-3);
    assert_relative_eq!(p.principal_radii[4].x, 0.5, epsilon = 1e-5);
}

#[test]
fn test_scale_is_baked_into_local_data() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth
        .actor_mut()
        .set_local_to_world(Affine3A::from_scale(Vec3::splat(2.0)));
    cloth.initialize(&mut solver).unwrap();

    let batch = cloth.actor().constraints.distance.first_batch().unwrap();
    for c in batch.constraints() {
        let [a, b] = c.particles;
        let axis_aligned = a.abs_diff(b) == 1 || a.abs_diff(b) == 3;
        if axis_aligned {
            assert_relative_eq!(c.rest_length, 2.0, epsilon = 1e-5);
        }
    }

    let world = cloth.actor().particle_position(None, 4);
    assert_relative_eq!(world.x, 2.0, epsilon = 1e-5);
    assert_relative_eq!(world.y, -2.0, epsilon = 1e-5);

    cloth.base_mut().add_to_solver(&mut solver);
    let slot = cloth.actor().particle_indices().unwrap()[4];
    let pooled = solver.buffers().positions[slot];
    assert_relative_eq!(pooled.x, 2.0, epsilon = 1e-5);
    assert_relative_eq!(pooled.y, -2.0, epsilon = 1e-5);
}

#[test]
fn test_closed_mesh_gets_volume_constraint() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = Cloth::new(tetrahedron(), ClothConfig::default());
    cloth.initialize(&mut solver).unwrap();

    let volume = &cloth.actor().constraints.volume;
    assert_eq!(volume.constraint_count(), 1);
    let c = &volume.batches()[0].constraints()[0];
    assert_eq!(c.triangles.len(), 12);
    assert_relative_eq!(c.rest_volume, 1.0 / 6.0, epsilon = 1e-5);
}

#[test]
fn test_progress_ends_with_finalizing() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.base_mut().config.yield_interval = 2;

    let progress: Vec<_> = cloth.begin_initialize(&mut solver).unwrap().collect();
    assert!(progress.len() > 5, "small yield interval reports often");
    assert!(progress.iter().all(|p| p.fraction > 0.0 && p.fraction <= 1.0));
    assert_eq!(progress.last().map(|p| p.stage), Some(InitStage::Finalizing));
    assert!(cloth.actor().is_initialized());
}

#[test]
fn test_missing_topology_fails_initialization() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.base_mut().set_shared_topology(None);
    assert!(matches!(
        cloth.initialize(&mut solver),
        Err(ClothError::MissingTopology)
    ));
    assert!(!cloth.actor().is_initialized());
}

#[test]
fn test_reinitialization_leaves_the_solver() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();
    assert!(cloth.base_mut().add_to_solver(&mut solver));
    assert_eq!(solver.free_slots(), 23);

    cloth.initialize(&mut solver).unwrap();
    assert!(!cloth.actor().in_solver());
    assert_eq!(solver.free_slots(), 32, "slots are released before rebuilding");
    assert_eq!(solver.batch_count(), 0);
}

#[test]
fn test_optimize_and_unoptimize() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();
    // Fix the top two rows.
    for i in 0..6 {
        cloth.actor_mut().particles.inv_masses[i] = 0.0;
    }
    cloth.base_mut().add_to_solver(&mut solver);

    // Only the top row has no free neighbor.
    assert_eq!(cloth.base_mut().optimize(&mut solver), 3);
    assert_eq!(cloth.base().optimized_particles(), &[0, 1, 2]);
    let distance = cloth.actor().constraints.distance.first_batch().unwrap();
    assert_eq!(distance.active_count(), 9);
    assert_eq!(solver.active_particles().len(), 6);

    cloth.base_mut().unoptimize(&mut solver);
    assert!(cloth.base().optimized_particles().is_empty());
    let distance = cloth.actor().constraints.distance.first_batch().unwrap();
    assert_eq!(distance.active_count(), 16);
    assert_eq!(solver.active_particles().len(), 9);
}

#[test]
fn test_optimize_without_fixed_particles_is_noop() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();
    cloth.base_mut().add_to_solver(&mut solver);
    assert_eq!(cloth.base_mut().optimize(&mut solver), 0);
}

#[test]
fn test_reset_restores_rest_pose() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();
    cloth.base_mut().add_to_solver(&mut solver);

    simulate_frame(&mut solver, &mut [&mut cloth], 1.0 / 60.0, 2);
    let slot = cloth.actor().particle_indices().unwrap()[8];
    assert!(
        solver.buffers().positions[slot].y < -2.0,
        "free cloth falls under gravity"
    );

    cloth.reset(&mut solver);
    let b = solver.buffers();
    assert_relative_eq!(b.positions[slot].y, -2.0, epsilon = 1e-5);
    assert_eq!(b.velocities[slot], Vec3::ZERO);
}

#[test]
fn test_frame_commits_to_render_mesh() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();
    cloth.base_mut().add_to_solver(&mut solver);

    simulate_frame(&mut solver, &mut [&mut cloth], 1.0 / 60.0, 2);
    let slot = cloth.actor().particle_indices().unwrap()[8];
    let mesh = cloth.base().render_mesh().unwrap();
    assert_relative_eq!(
        mesh.position(8).y,
        solver.buffers().renderable_positions[slot].y,
        epsilon = 1e-5
    );
    assert_eq!(mesh.indices, cloth.actor().deformable_triangles);
}

#[test]
fn test_tethers_to_two_fixed_corners() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();
    cloth.actor_mut().particles.inv_masses[0] = 0.0;
    cloth.actor_mut().particles.inv_masses[2] = 0.0;

    assert!(cloth.generate_tethers(&mut solver));
    // 7 free particles, each tethered to both corners.
    assert_eq!(cloth.actor().constraints.tether.constraint_count(), 14);

    cloth.base_mut().add_to_solver(&mut solver);
    assert!(cloth.generate_tethers(&mut solver), "regenerating in the solver");
    assert_eq!(cloth.actor().constraints.tether.constraint_count(), 14);
}

#[test]
fn test_tethers_need_initialization() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    assert!(!cloth.generate_tethers(&mut solver));
}

#[test]
fn test_pin_particle() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    cloth.initialize(&mut solver).unwrap();
    cloth.base_mut().add_to_solver(&mut solver);

    let pin = cloth
        .base_mut()
        .pin_particle(&mut solver, 0, ColliderHandle(3), Vec3::ZERO, 1.0);
    assert_eq!(pin, Some(0));
    let pins = &cloth.actor().constraints.pin;
    assert_eq!(pins.constraint_count(), 1);
    assert!(pins.batches()[0].in_solver());
}

#[test]
fn test_cloth_events() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = grid_cloth();
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    cloth.base_mut().subscribe(move |e| sink.borrow_mut().push(*e));

    cloth.initialize(&mut solver).unwrap();
    cloth.base_mut().add_to_solver(&mut solver);
    simulate_frame(&mut solver, &mut [&mut cloth], 1.0 / 60.0, 1);

    assert_eq!(
        *log.borrow(),
        vec![
            ClothEvent::Initialized,
            ClothEvent::FrameBegin,
            ClothEvent::FrameEnd
        ]
    );
}

#[test]
fn test_skinned_cloth_ignores_transform_changes() {
    let mut solver = CpuSolver::with_capacity(32);
    let mut cloth = Cloth::skinned(
        Arc::new(HalfEdgeMesh::grid(3, 3, 1.0).unwrap()),
        ClothConfig::default(),
    );
    cloth.initialize(&mut solver).unwrap();
    cloth.base_mut().add_to_solver(&mut solver);
    let slot = cloth.actor().particle_indices().unwrap()[4];
    let before = solver.buffers().positions[slot];

    cloth
        .actor_mut()
        .set_local_to_world(Affine3A::from_translation(Vec3::new(0.0, 3.0, 0.0)));
    simulate_frame(&mut solver, &mut [&mut cloth], 1.0 / 60.0, 1);
    assert_eq!(solver.buffers().positions[slot], before);
}
