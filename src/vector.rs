//! Distributed grid functions shaped by a domain's patch layout.
//!
//! A [`Vector`] stores one dense block per local patch, ghost halo included,
//! with axis 0 fastest. Patch sub-views expose ghost-inclusive indexing by
//! signed cell coordinates so stencil collaborators can read across the halo
//! without knowing the storage layout. Reductions (`dot`, `max_norm`) cover
//! interior cells only and are collective.

use crate::algs::collectives::{all_reduce_max_f64, all_reduce_sum_f64};
use crate::algs::communicator::Communicator;
use crate::domain::Domain;
use crate::error::PatchForestError;

/// A distributed array of unknowns over one domain's patches.
#[derive(Clone, Debug)]
pub struct Vector<const D: usize> {
    data: Vec<f64>,
    ns: [usize; D],
    num_ghost: usize,
    patch_stride: usize,
    num_patches: usize,
}

impl<const D: usize> Vector<D> {
    /// Zero-initialized vector shaped for `domain`.
    pub fn new(domain: &Domain<D>) -> Self {
        Self::with_shape(domain.ns(), domain.num_ghost_cells(), domain.num_local_patches())
    }

    pub(crate) fn with_shape(ns: [usize; D], num_ghost: usize, num_patches: usize) -> Self {
        let patch_stride = ns.iter().map(|n| n + 2 * num_ghost).product();
        Vector {
            data: vec![0.0; patch_stride * num_patches],
            ns,
            num_ghost,
            patch_stride,
            num_patches,
        }
    }

    pub fn num_patches(&self) -> usize {
        self.num_patches
    }

    pub fn ns(&self) -> [usize; D] {
        self.ns
    }

    pub fn num_ghost_cells(&self) -> usize {
        self.num_ghost
    }

    pub(crate) fn check_shape(&self, domain: &Domain<D>) -> Result<(), PatchForestError> {
        if self.num_patches != domain.num_local_patches()
            || self.ns != domain.ns()
            || self.num_ghost != domain.num_ghost_cells()
        {
            return Err(PatchForestError::VectorShapeMismatch {
                expected: domain.num_local_patches(),
                got: self.num_patches,
            });
        }
        Ok(())
    }

    fn same_shape(&self, other: &Self) -> Result<(), PatchForestError> {
        if self.ns != other.ns || self.num_ghost != other.num_ghost || self.num_patches != other.num_patches
        {
            return Err(PatchForestError::VectorShapeMismatch {
                expected: self.num_patches,
                got: other.num_patches,
            });
        }
        Ok(())
    }

    /// Ghost-inclusive read view of one patch block.
    pub fn patch_view(&self, local_index: usize) -> PatchView<'_, D> {
        let start = local_index * self.patch_stride;
        PatchView {
            data: &self.data[start..start + self.patch_stride],
            ns: self.ns,
            num_ghost: self.num_ghost,
        }
    }

    /// Ghost-inclusive write view of one patch block.
    pub fn patch_view_mut(&mut self, local_index: usize) -> PatchViewMut<'_, D> {
        let start = local_index * self.patch_stride;
        PatchViewMut {
            data: &mut self.data[start..start + self.patch_stride],
            ns: self.ns,
            num_ghost: self.num_ghost,
        }
    }

    pub fn set_all(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn copy_from(&mut self, other: &Self) -> Result<(), PatchForestError> {
        self.same_shape(other)?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    pub fn scale(&mut self, alpha: f64) {
        for v in &mut self.data {
            *v *= alpha;
        }
    }

    /// `self += alpha * other`, ghost cells included.
    pub fn add_scaled(&mut self, alpha: f64, other: &Self) -> Result<(), PatchForestError> {
        self.same_shape(other)?;
        for (dst, src) in self.data.iter_mut().zip(&other.data) {
            *dst += alpha * src;
        }
        Ok(())
    }

    /// Global inner product over interior cells. Collective.
    pub fn dot<C: Communicator>(&self, other: &Self, comm: &C) -> Result<f64, PatchForestError> {
        self.same_shape(other)?;
        let mut local = 0.0;
        for p in 0..self.num_patches {
            let a = self.patch_view(p);
            let b = other.patch_view(p);
            a.for_each_interior(|coord, va| {
                local += va * b.get_signed(coord);
            });
        }
        all_reduce_sum_f64(comm, local)
    }

    /// Global max-norm over interior cells. Collective.
    pub fn max_norm<C: Communicator>(&self, comm: &C) -> Result<f64, PatchForestError> {
        let mut local = 0.0f64;
        for p in 0..self.num_patches {
            self.patch_view(p).for_each_interior(|_, v| {
                local = local.max(v.abs());
            });
        }
        all_reduce_max_f64(comm, local)
    }
}

fn linear_index<const D: usize>(coord: [isize; D], ns: [usize; D], num_ghost: usize) -> usize {
    let g = num_ghost as isize;
    let mut idx = 0usize;
    let mut stride = 1usize;
    for axis in 0..D {
        let c = coord[axis] + g;
        let extent = ns[axis] + 2 * num_ghost;
        debug_assert!(
            c >= 0 && (c as usize) < extent,
            "coordinate {:?} outside patch ghost region",
            coord
        );
        idx += c as usize * stride;
        stride *= extent;
    }
    idx
}

/// Walk the interior multi-index odometer; returns false when exhausted.
fn advance<const D: usize>(coord: &mut [isize; D], ns: [usize; D]) -> bool {
    for axis in 0..D {
        coord[axis] += 1;
        if (coord[axis] as usize) < ns[axis] {
            return true;
        }
        coord[axis] = 0;
    }
    false
}

/// Read-only ghost-inclusive view of one patch block.
pub struct PatchView<'a, const D: usize> {
    data: &'a [f64],
    ns: [usize; D],
    num_ghost: usize,
}

impl<'a, const D: usize> PatchView<'a, D> {
    /// Value at a signed coordinate; `-g..ns+g` per axis.
    pub fn get_signed(&self, coord: [isize; D]) -> f64 {
        self.data[linear_index(coord, self.ns, self.num_ghost)]
    }

    /// Value at an interior coordinate.
    pub fn get(&self, coord: [usize; D]) -> f64 {
        self.get_signed(coord.map(|c| c as isize))
    }

    /// Visit every interior cell in axis-0-fastest order.
    pub fn for_each_interior(&self, mut f: impl FnMut([isize; D], f64)) {
        if self.ns.iter().any(|&n| n == 0) {
            return;
        }
        let mut coord = [0isize; D];
        loop {
            f(coord, self.get_signed(coord));
            if !advance(&mut coord, self.ns) {
                break;
            }
        }
    }

    pub fn interior_sum(&self) -> f64 {
        let mut sum = 0.0;
        self.for_each_interior(|_, v| sum += v);
        sum
    }

    pub fn ns(&self) -> [usize; D] {
        self.ns
    }

    pub fn num_ghost_cells(&self) -> usize {
        self.num_ghost
    }
}

/// Mutable ghost-inclusive view of one patch block.
pub struct PatchViewMut<'a, const D: usize> {
    data: &'a mut [f64],
    ns: [usize; D],
    num_ghost: usize,
}

impl<'a, const D: usize> PatchViewMut<'a, D> {
    pub fn get_signed(&self, coord: [isize; D]) -> f64 {
        self.data[linear_index(coord, self.ns, self.num_ghost)]
    }

    pub fn get(&self, coord: [usize; D]) -> f64 {
        self.get_signed(coord.map(|c| c as isize))
    }

    pub fn set_signed(&mut self, coord: [isize; D], value: f64) {
        self.data[linear_index(coord, self.ns, self.num_ghost)] = value;
    }

    pub fn set(&mut self, coord: [usize; D], value: f64) {
        self.set_signed(coord.map(|c| c as isize), value);
    }

    pub fn add(&mut self, coord: [usize; D], value: f64) {
        let idx = linear_index(coord.map(|c| c as isize), self.ns, self.num_ghost);
        self.data[idx] += value;
    }

    /// Visit every interior cell mutably in axis-0-fastest order.
    pub fn for_each_interior_mut(&mut self, mut f: impl FnMut([isize; D], &mut f64)) {
        if self.ns.iter().any(|&n| n == 0) {
            return;
        }
        let mut coord = [0isize; D];
        loop {
            let idx = linear_index(coord, self.ns, self.num_ghost);
            f(coord, &mut self.data[idx]);
            if !advance(&mut coord, self.ns) {
                break;
            }
        }
    }

    pub fn ns(&self) -> [usize; D] {
        self.ns
    }
}
