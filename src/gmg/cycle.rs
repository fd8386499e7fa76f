//! Multigrid cycle driver.
//!
//! [`Cycle`] owns the level chain (finest first) and applies one multigrid
//! iteration per [`Cycle::apply`] call. All three classic shapes share the
//! same correction scheme at each level: pre-smooth, restrict the residual,
//! solve the coarse error equation recursively starting from zero, add the
//! interpolated correction back, post-smooth. At zero residual every step is
//! a no-op for a linear smoother, so an exact solution is a fixed point.

use serde::{Deserialize, Serialize};

use crate::error::PatchForestError;
use crate::gmg::level::Level;
use crate::vector::Vector;

/// Recursion shape of one multigrid iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleType {
    /// One coarse correction per level.
    V,
    /// Two successive coarse cycles per level.
    W,
    /// An F-shaped coarse correction followed by a V-shaped one, with
    /// `mid_sweeps` smoothing in between.
    F,
}

/// Sweep counts and shape for [`Cycle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleOpts {
    pub cycle_type: CycleType,
    /// Cap on the number of levels in the chain; 0 means use every level the
    /// generator can produce.
    pub max_levels: usize,
    /// Stop coarsening once a coarser level would average fewer than this
    /// many patches per rank; 0 disables the floor.
    pub patches_per_proc: usize,
    /// Smoothing sweeps before the coarse correction.
    pub pre_sweeps: usize,
    /// Smoothing sweeps after the coarse correction.
    pub post_sweeps: usize,
    /// Sweeps used as the coarsest-level solve.
    pub coarse_sweeps: usize,
    /// F-cycle sweeps between the two coarse corrections.
    pub mid_sweeps: usize,
}

impl Default for CycleOpts {
    fn default() -> Self {
        CycleOpts {
            cycle_type: CycleType::V,
            max_levels: 0,
            patches_per_proc: 0,
            pre_sweeps: 1,
            post_sweeps: 1,
            coarse_sweeps: 1,
            mid_sweeps: 1,
        }
    }
}

impl CycleOpts {
    pub fn validate(&self) -> Result<(), PatchForestError> {
        if self.coarse_sweeps == 0 {
            return Err(PatchForestError::InvalidCycleOpts(
                "coarse_sweeps must be at least 1".into(),
            ));
        }
        if self.pre_sweeps == 0 && self.post_sweeps == 0 {
            return Err(PatchForestError::InvalidCycleOpts(
                "at least one of pre_sweeps and post_sweeps must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Scratch vectors for one level, reused across the recursion.
struct LevelScratch<const D: usize> {
    /// Residual on this level.
    r: Vector<D>,
    /// Operator application target.
    au: Vector<D>,
    /// Right-hand side handed to the next coarser level.
    cf: Option<Vector<D>>,
    /// Correction computed by the next coarser level.
    cu: Option<Vector<D>>,
}

pub struct Cycle<const D: usize> {
    levels: Vec<Level<D>>,
    opts: CycleOpts,
    /// Allocated once here; solves apply the cycle thousands of times.
    scratch: Vec<LevelScratch<D>>,
}

impl<const D: usize> std::fmt::Debug for Cycle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cycle")
            .field("levels", &self.levels.len())
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl<const D: usize> Cycle<D> {
    /// `levels` runs finest to coarsest; every level except the last must
    /// carry transfer operators.
    pub fn new(levels: Vec<Level<D>>, opts: CycleOpts) -> Result<Self, PatchForestError> {
        opts.validate()?;
        if levels.is_empty() {
            return Err(PatchForestError::EmptyCycle);
        }
        for (i, level) in levels[..levels.len() - 1].iter().enumerate() {
            if level.restrictor().is_none() || level.interpolator().is_none() {
                return Err(PatchForestError::InvalidCycleOpts(format!(
                    "level {i} is missing transfer operators"
                )));
            }
        }
        let scratch = levels
            .iter()
            .enumerate()
            .map(|(i, level)| LevelScratch {
                r: Vector::new(level.domain()),
                au: Vector::new(level.domain()),
                cf: (i + 1 < levels.len()).then(|| Vector::new(levels[i + 1].domain())),
                cu: (i + 1 < levels.len()).then(|| Vector::new(levels[i + 1].domain())),
            })
            .collect();
        Ok(Cycle {
            levels,
            opts,
            scratch,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn opts(&self) -> &CycleOpts {
        &self.opts
    }

    pub fn finest_level(&self) -> &Level<D> {
        &self.levels[0]
    }

    /// One multigrid iteration: improves `u` toward the solution of
    /// `A u = f` on the finest level.
    pub fn apply(&mut self, f: &Vector<D>, u: &mut Vector<D>) -> Result<(), PatchForestError> {
        f.check_shape(self.levels[0].domain())?;
        u.check_shape(self.levels[0].domain())?;
        visit(
            &self.levels,
            &mut self.scratch,
            &self.opts,
            self.opts.cycle_type,
            f,
            u,
        )
    }
}

fn smooth<const D: usize>(
    level: &Level<D>,
    sweeps: usize,
    f: &Vector<D>,
    u: &mut Vector<D>,
) -> Result<(), PatchForestError> {
    for _ in 0..sweeps {
        level.smoother().smooth(level.domain(), f, u)?;
    }
    Ok(())
}

/// Compute the residual and hand it down to the coarser right-hand side.
fn restrict_residual<const D: usize>(
    level: &Level<D>,
    mine: &mut LevelScratch<D>,
    f: &Vector<D>,
    u: &Vector<D>,
) -> Result<(), PatchForestError> {
    level.operator().apply(level.domain(), u, &mut mine.au)?;
    mine.r.copy_from(f)?;
    mine.r.add_scaled(-1.0, &mine.au)?;
    let cf = mine.cf.as_mut().ok_or(PatchForestError::EmptyCycle)?;
    let restrictor = level
        .restrictor()
        .ok_or_else(|| PatchForestError::InvalidCycleOpts("missing restrictor".into()))?;
    restrictor.restrict(&mine.r, cf)
}

fn visit<const D: usize>(
    levels: &[Level<D>],
    scratch: &mut [LevelScratch<D>],
    opts: &CycleOpts,
    shape: CycleType,
    f: &Vector<D>,
    u: &mut Vector<D>,
) -> Result<(), PatchForestError> {
    let ([level, coarser_levels @ ..], [mine, coarser_scratch @ ..]) = (levels, scratch) else {
        return Err(PatchForestError::EmptyCycle);
    };
    if coarser_levels.is_empty() {
        return smooth(level, opts.coarse_sweeps, f, u);
    }

    smooth(level, opts.pre_sweeps, f, u)?;

    restrict_residual(level, mine, f, u)?;
    let interpolator = level
        .interpolator()
        .ok_or_else(|| PatchForestError::InvalidCycleOpts("missing interpolator".into()))?;

    {
        let LevelScratch { cf, cu, .. } = &mut *mine;
        let cf = cf.as_ref().ok_or(PatchForestError::EmptyCycle)?;
        let cu = cu.as_mut().ok_or(PatchForestError::EmptyCycle)?;
        cu.set_all(0.0);
        match shape {
            CycleType::V => {
                visit(coarser_levels, coarser_scratch, opts, CycleType::V, cf, cu)?;
            }
            CycleType::W => {
                visit(coarser_levels, coarser_scratch, opts, CycleType::W, cf, cu)?;
                visit(coarser_levels, coarser_scratch, opts, CycleType::W, cf, cu)?;
            }
            CycleType::F => {
                visit(coarser_levels, coarser_scratch, opts, CycleType::F, cf, cu)?;
            }
        }
        interpolator.interpolate_add(cu, u)?;
    }

    if shape == CycleType::F {
        // Second, V-shaped correction after intermediate smoothing.
        smooth(level, opts.mid_sweeps, f, u)?;
        restrict_residual(level, mine, f, u)?;
        let LevelScratch { cf, cu, .. } = &mut *mine;
        let cf = cf.as_ref().ok_or(PatchForestError::EmptyCycle)?;
        let cu = cu.as_mut().ok_or(PatchForestError::EmptyCycle)?;
        cu.set_all(0.0);
        visit(coarser_levels, coarser_scratch, opts, CycleType::V, cf, cu)?;
        interpolator.interpolate_add(cu, u)?;
    }

    smooth(level, opts.post_sweeps, f, u)
}
