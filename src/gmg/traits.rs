//! Collaborator traits for the geometric multigrid cycle.
//!
//! A [`Level`](crate::gmg::Level) is assembled from trait objects so that
//! discretizations plug in without the cycle knowing anything beyond
//! "apply", "smooth", "restrict" and "interpolate".

use std::sync::Arc;

use crate::domain::Domain;
use crate::error::PatchForestError;
use crate::topology::patch::PatchInfo;
use crate::vector::Vector;

/// Linear operator on one level: `b = A x`.
pub trait Operator<const D: usize>: Send + Sync {
    fn apply(
        &self,
        domain: &Domain<D>,
        x: &Vector<D>,
        b: &mut Vector<D>,
    ) -> Result<(), PatchForestError>;
}

/// One smoothing sweep on `u` toward the solution of `A u = f`.
///
/// A linear smoother must leave an exact solution fixed; the cycle relies on
/// that to be a no-op at zero residual.
pub trait Smoother<const D: usize>: Send + Sync {
    fn smooth(
        &self,
        domain: &Domain<D>,
        f: &Vector<D>,
        u: &mut Vector<D>,
    ) -> Result<(), PatchForestError>;
}

/// Transfers a fine-level vector to the next coarser level.
pub trait Restrictor<const D: usize>: Send + Sync {
    fn restrict(&self, fine: &Vector<D>, coarse: &mut Vector<D>) -> Result<(), PatchForestError>;
}

/// Adds a coarse-level correction into the next finer level's vector.
pub trait Interpolator<const D: usize>: Send + Sync {
    fn interpolate_add(
        &self,
        coarse: &Vector<D>,
        fine: &mut Vector<D>,
    ) -> Result<(), PatchForestError>;
}

/// Fills the ghost halo of `u` from neighboring patches so stencils and
/// patch solves can read across patch boundaries. Implementations own the
/// boundary interpolation scheme and any communication it takes.
pub trait GhostFiller<const D: usize>: Send + Sync {
    fn fill_ghost(&self, domain: &Domain<D>, u: &mut Vector<D>) -> Result<(), PatchForestError>;
}

/// Solves (or approximately solves) `A u = f` restricted to a single patch,
/// ghost values of `f` already holding whatever coupling the discretization
/// needs.
pub trait PatchSolver<const D: usize>: Send + Sync {
    fn solve(
        &self,
        patch: &PatchInfo<D>,
        f: crate::vector::PatchView<'_, D>,
        u: crate::vector::PatchViewMut<'_, D>,
    ) -> Result<(), PatchForestError>;
}

/// Smoother that visits every local patch once per sweep with a
/// [`PatchSolver`]. Patch-wise solves are the natural smoother for
/// patch-structured meshes.
pub struct PatchSolverSmoother<const D: usize, S> {
    solver: S,
    ghost_filler: Option<Arc<dyn GhostFiller<D>>>,
}

impl<const D: usize, S> PatchSolverSmoother<D, S> {
    pub fn new(solver: S) -> Self {
        PatchSolverSmoother {
            solver,
            ghost_filler: None,
        }
    }

    /// Refresh the halo of `u` before each sweep so patch solves see current
    /// neighbor values.
    pub fn with_ghost_filler(solver: S, ghost_filler: Arc<dyn GhostFiller<D>>) -> Self {
        PatchSolverSmoother {
            solver,
            ghost_filler: Some(ghost_filler),
        }
    }
}

impl<const D: usize, S: PatchSolver<D>> Smoother<D> for PatchSolverSmoother<D, S> {
    fn smooth(
        &self,
        domain: &Domain<D>,
        f: &Vector<D>,
        u: &mut Vector<D>,
    ) -> Result<(), PatchForestError> {
        if let Some(filler) = &self.ghost_filler {
            filler.fill_ghost(domain, u)?;
        }
        for patch in domain.patch_infos() {
            self.solver.solve(
                patch,
                f.patch_view(patch.local_index),
                u.patch_view_mut(patch.local_index),
            )?;
        }
        Ok(())
    }
}
