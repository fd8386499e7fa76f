//! patch-forest: distributed patch-structured adaptive mesh topology with
//! geometric multigrid.
//!
//! The crate turns a 2:1-balanced quad/octree description ([`forest`]) into a
//! sequence of refinement-level [`domain`]s whose patches carry complete
//! Normal/Coarse/Fine neighbor tables on every side, edge and corner
//! ([`topology`]). On top of the hierarchy sit cell-centered patch vectors
//! ([`vector`]), V/W/F multigrid cycles ([`gmg`]) and Schur-style interface
//! indexing ([`interface`]).
//!
//! Everything distributed goes through an explicit [`Communicator`] handle,
//! never a process-global context: the same code runs serially
//! ([`NoComm`]), across in-process test "ranks" ([`LocalComm`]) and over MPI
//! (`MpiComm`, behind the `mpi-support` feature). Domain generation is
//! deterministic: patch ids and global indexes depend only on the forest,
//! not on the rank count.
//!
//! ```
//! use patch_forest::prelude::*;
//!
//! let mut forest = QuadForest::new();
//! forest.refine_all();
//! forest.refine_all();
//! let mut generator =
//!     TreeDomainGenerator::new(forest, GeneratorOpts::default(), &NoComm)?;
//! let domain = generator.finest_domain();
//! assert_eq!(domain.num_global_patches(), 16);
//! # Ok::<(), patch_forest::error::PatchForestError>(())
//! ```
//!
//! [`Communicator`]: algs::communicator::Communicator
//! [`NoComm`]: algs::communicator::NoComm
//! [`LocalComm`]: algs::communicator::LocalComm

pub mod algs;
pub mod domain;
pub mod error;
pub mod forest;
pub mod generator;
pub mod gmg;
pub mod interface;
pub mod topology;
pub mod vector;

/// Common imports for downstream solvers.
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    pub use crate::domain::Domain;
    pub use crate::error::PatchForestError;
    pub use crate::forest::{Forest, OctForest, QuadForest, TreeCell};
    pub use crate::generator::{
        DomainGenerator, GeneratorOpts, TreeDomainGenerator,
    };
    pub use crate::gmg::{
        CellAverageRestrictor, Cycle, CycleBuilder, CycleOpts, CycleType, Level, LevelFactory,
        PiecewiseConstantInterpolator,
    };
    pub use crate::interface::{Interface, InterfaceKey, InterfaceMap};
    pub use crate::topology::nbr::{CoarseNbrInfo, FineNbrInfo, NbrInfo, NbrType, NormalNbrInfo};
    pub use crate::topology::orthant::Orthant;
    pub use crate::topology::patch::{PatchId, PatchInfo};
    pub use crate::topology::side::{Corner, Edge, Side};
    pub use crate::vector::Vector;
}
