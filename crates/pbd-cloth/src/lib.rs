//! Position-based dynamics cloth actors.
//!
//! Actors own particles and constraints in their local space and mirror them
//! into the slots they hold in a shared particle pool, behind the [`Solver`]
//! trait. [`Cloth`] builds particles and constraints from a half-edge mesh;
//! [`TearableCloth`] additionally splits vertices when edges are overloaded.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pbd_cloth::{simulate_frame, Cloth, ClothConfig, CpuSolver, HalfEdgeMesh, SolverConfig};
//!
//! let mesh = Arc::new(HalfEdgeMesh::grid(10, 10, 0.1)?);
//! let mut solver = CpuSolver::new(SolverConfig::default());
//! let mut cloth = Cloth::new(mesh, ClothConfig::default());
//! cloth.initialize(&mut solver)?;
//! cloth.base_mut().add_to_solver(&mut solver);
//!
//! for _ in 0..60 {
//!     simulate_frame(&mut solver, &mut [&mut cloth], 1.0 / 60.0, 4);
//! }
//! # Ok::<(), pbd_cloth::ClothError>(())
//! ```

pub mod actor;
pub mod cloth;
pub mod config;
pub mod constraints;
pub mod error;
pub mod events;
pub mod materials;
pub mod math;
pub mod particle;
pub mod solver;
pub mod topology;

pub use actor::{Actor, ActorEvent, ActorId, ActorState, ForceMode};
pub use cloth::{
    Cloth, ClothBase, ClothEvent, ClothInitializer, InitProgress, InitStage, RenderMesh,
    TearableCloth,
};
pub use config::{ClothConfig, SolverConfig, TearConfig};
pub use error::{ClothError, Result};
pub use particle::{ParticleData, ParticleSet, Phase, PhaseFlags};
pub use solver::{simulate_frame, CpuSolver, Solver, SolverClient};
pub use topology::HalfEdgeMesh;
