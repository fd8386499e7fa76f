//! One refinement level of a multigrid hierarchy.

use std::sync::Arc;

use crate::domain::Domain;
use crate::gmg::traits::{Interpolator, Operator, Restrictor, Smoother};

/// Domain plus the collaborators the cycle needs on that domain.
///
/// The restrictor maps this level's residual down to the next coarser level;
/// the interpolator pulls the coarser level's correction back up. Both are
/// absent on the coarsest level.
pub struct Level<const D: usize> {
    domain: Arc<Domain<D>>,
    operator: Arc<dyn Operator<D>>,
    smoother: Arc<dyn Smoother<D>>,
    restrictor: Option<Arc<dyn Restrictor<D>>>,
    interpolator: Option<Arc<dyn Interpolator<D>>>,
}

impl<const D: usize> Level<D> {
    pub fn new(
        domain: Arc<Domain<D>>,
        operator: Arc<dyn Operator<D>>,
        smoother: Arc<dyn Smoother<D>>,
    ) -> Self {
        Level {
            domain,
            operator,
            smoother,
            restrictor: None,
            interpolator: None,
        }
    }

    /// Attach the transfer operators toward the next coarser level.
    pub fn set_transfer(
        &mut self,
        restrictor: Arc<dyn Restrictor<D>>,
        interpolator: Arc<dyn Interpolator<D>>,
    ) {
        self.restrictor = Some(restrictor);
        self.interpolator = Some(interpolator);
    }

    pub fn domain(&self) -> &Arc<Domain<D>> {
        &self.domain
    }

    pub fn operator(&self) -> &dyn Operator<D> {
        &*self.operator
    }

    pub fn smoother(&self) -> &dyn Smoother<D> {
        &*self.smoother
    }

    pub fn restrictor(&self) -> Option<&dyn Restrictor<D>> {
        self.restrictor.as_deref()
    }

    pub fn interpolator(&self) -> Option<&dyn Interpolator<D>> {
        self.interpolator.as_deref()
    }
}
