use tracing::trace;

use super::Solver;

/// Per-frame hooks called by [`simulate_frame`].
///
/// Clients are called in slice order at each phase and never concurrently.
pub trait SolverClient {
    fn on_frame_begin(&mut self, _solver: &mut dyn Solver) {}

    fn on_step_begin(&mut self, _solver: &mut dyn Solver) {}

    /// Called once after all substeps of a step have run.
    fn on_step_end(&mut self, _solver: &mut dyn Solver, _step_time: f32) {}

    fn on_pre_interpolation(&mut self, _solver: &mut dyn Solver) {}

    fn on_frame_end(&mut self, _solver: &mut dyn Solver, _step_time: f32) {}

    fn on_visibility_changed(&mut self, _visible: bool) {}
}

/// Run one simulation frame of `step_time` seconds split into `substeps`.
pub fn simulate_frame(
    solver: &mut dyn Solver,
    clients: &mut [&mut dyn SolverClient],
    step_time: f32,
    substeps: u32,
) {
    let substeps = substeps.max(1);
    let dt = step_time / substeps as f32;
    trace!(step_time, substeps, "simulate frame");

    for client in clients.iter_mut() {
        client.on_frame_begin(solver);
    }
    for client in clients.iter_mut() {
        client.on_step_begin(solver);
    }
    for _ in 0..substeps {
        solver.substep(dt);
    }
    for client in clients.iter_mut() {
        client.on_step_end(solver, step_time);
    }
    for client in clients.iter_mut() {
        client.on_pre_interpolation(solver);
    }
    solver.interpolate();

    let was_visible = solver.is_visible();
    solver.update_visibility();
    let visible = solver.is_visible();
    if visible != was_visible {
        for client in clients.iter_mut() {
            client.on_visibility_changed(visible);
        }
    }

    for client in clients.iter_mut() {
        client.on_frame_end(solver, step_time);
    }
}
