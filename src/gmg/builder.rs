//! Assembles a [`Cycle`] from a domain generator and per-level collaborators.

use std::sync::Arc;

use log::debug;

use crate::domain::Domain;
use crate::error::PatchForestError;
use crate::generator::DomainGenerator;
use crate::gmg::cycle::{Cycle, CycleOpts};
use crate::gmg::level::Level;
use crate::gmg::traits::{Interpolator, Operator, Restrictor, Smoother};

/// Produces the collaborators for each level the builder pulls from the
/// generator. Transfer operators are created per adjacent pair and usually
/// carry their own communicator handle.
pub trait LevelFactory<const D: usize> {
    /// `finer` is the operator already built for the next finer level, or
    /// `None` on the finest. Coefficient-bearing operators restrict their
    /// coefficients from it instead of rediscretizing.
    fn operator(
        &self,
        domain: &Arc<Domain<D>>,
        finer: Option<&Arc<dyn Operator<D>>>,
    ) -> Arc<dyn Operator<D>>;
    fn smoother(&self, domain: &Arc<Domain<D>>) -> Arc<dyn Smoother<D>>;
    fn restrictor(
        &self,
        fine: &Arc<Domain<D>>,
        coarse: &Arc<Domain<D>>,
    ) -> Result<Arc<dyn Restrictor<D>>, PatchForestError>;
    fn interpolator(
        &self,
        fine: &Arc<Domain<D>>,
        coarse: &Arc<Domain<D>>,
    ) -> Result<Arc<dyn Interpolator<D>>, PatchForestError>;
}

/// Builds the level chain finest-first, stopping early when the
/// `max_levels` cap or the `patches_per_proc` floor in [`CycleOpts`] is hit.
pub struct CycleBuilder<const D: usize> {
    opts: CycleOpts,
}

impl<const D: usize> CycleBuilder<D> {
    pub fn new(opts: CycleOpts) -> Self {
        CycleBuilder { opts }
    }

    /// Cap the number of levels in the cycle; 0 removes the cap.
    pub fn max_levels(mut self, max: usize) -> Self {
        self.opts.max_levels = max;
        self
    }

    /// Discard coarser levels that would average fewer than `min` patches
    /// per rank.
    pub fn patches_per_proc(mut self, min: usize) -> Self {
        self.opts.patches_per_proc = min;
        self
    }

    pub fn build<F: LevelFactory<D>>(
        &self,
        generator: &mut dyn DomainGenerator<D>,
        factory: &F,
    ) -> Result<Cycle<D>, PatchForestError> {
        self.opts.validate()?;

        let mut domains = vec![generator.finest_domain()];
        loop {
            if self.opts.max_levels != 0 && domains.len() >= self.opts.max_levels {
                break;
            }
            let Some(domain) = generator.coarser_domain() else {
                break;
            };
            if self.opts.patches_per_proc != 0
                && domain.num_global_patches()
                    < self.opts.patches_per_proc * domain.num_ranks()
            {
                break;
            }
            domains.push(domain);
        }
        debug!("cycle chain: {} levels", domains.len());

        let mut levels: Vec<Level<D>> = Vec::with_capacity(domains.len());
        let mut finer_operator: Option<Arc<dyn Operator<D>>> = None;
        for domain in &domains {
            let operator = factory.operator(domain, finer_operator.as_ref());
            finer_operator = Some(operator.clone());
            levels.push(Level::new(
                domain.clone(),
                operator,
                factory.smoother(domain),
            ));
        }
        for i in 0..domains.len().saturating_sub(1) {
            let restrictor = factory.restrictor(&domains[i], &domains[i + 1])?;
            let interpolator = factory.interpolator(&domains[i], &domains[i + 1])?;
            levels[i].set_transfer(restrictor, interpolator);
        }
        Cycle::new(levels, self.opts.clone())
    }
}
