//! Geometric multigrid on patch-forest domain hierarchies.

pub mod builder;
pub mod cycle;
pub mod level;
pub mod traits;
pub mod transfer;

pub use builder::{CycleBuilder, LevelFactory};
pub use cycle::{Cycle, CycleOpts, CycleType};
pub use level::Level;
pub use traits::{
    GhostFiller, Interpolator, Operator, PatchSolver, PatchSolverSmoother, Restrictor, Smoother,
};
pub use transfer::{CellAverageRestrictor, PiecewiseConstantInterpolator};
