//! Transfer operators between adjacent refinement levels.
//!
//! Coarsening replaces deepest sibling groups by their parent and carries
//! every other patch over unchanged, so a coarse patch either has `2^D`
//! children (its cells are averages of fine-cell groups) or is its own child
//! in slot 0 (its cells copy straight across). Children and parents may land
//! on different ranks; the block exchange below moves exactly the restricted
//! or interpolated sub-blocks, with both sides deriving the per-peer block
//! order from the same `(parent id, child slot)` key so no size negotiation
//! round is needed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::exchange_known;
use crate::domain::Domain;
use crate::error::PatchForestError;
use crate::gmg::traits::{Interpolator, Restrictor};
use crate::topology::orthant::Orthant;
use crate::topology::patch::PatchInfo;
use crate::vector::Vector;

/// Visit every cell of a `D`-dimensional block, axis 0 fastest.
fn for_each_cell<const D: usize>(dims: [usize; D], mut f: impl FnMut([usize; D])) {
    let total: usize = dims.iter().product();
    let mut coord = [0usize; D];
    for _ in 0..total {
        f(coord);
        for axis in 0..D {
            coord[axis] += 1;
            if coord[axis] < dims[axis] {
                break;
            }
            coord[axis] = 0;
        }
    }
}

/// Sort key shared by sender and receiver: parent patch id, then child slot.
fn slot_key<const D: usize>(patch: &PatchInfo<D>) -> (u64, usize) {
    let slot = if patch.orth_on_parent.is_null() {
        0
    } else {
        patch.orth_on_parent.index()
    };
    (
        patch.parent_id.map(|id| id.get()).unwrap_or(0),
        slot,
    )
}

/// Whether the coarse patch at `slot` is a carried-over copy of itself.
fn is_carryover<const D: usize>(coarse_patch: &PatchInfo<D>, slot: usize) -> bool {
    slot == 0 && coarse_patch.child_ids[0] == Some(coarse_patch.id)
}

fn half_ns<const D: usize>(ns: [usize; D]) -> [usize; D] {
    let mut h = ns;
    for axis in 0..D {
        h[axis] /= 2;
    }
    h
}

fn block_offset<const D: usize>(ns: [usize; D], slot: usize) -> [usize; D] {
    let orth = Orthant::<D>::from_index(slot);
    let mut off = [0usize; D];
    for axis in 0..D {
        if orth.is_upper(axis) {
            off[axis] = ns[axis] / 2;
        }
    }
    off
}

fn check_transfer_shapes<const D: usize>(
    fine: &Domain<D>,
    coarse: &Domain<D>,
) -> Result<(), PatchForestError> {
    debug_assert_eq!(fine.ns(), coarse.ns());
    let ns = fine.ns();
    if ns.iter().any(|&n| n % 2 != 0) {
        return Err(PatchForestError::OddCellCount { ns: ns.to_vec() });
    }
    Ok(())
}

/// Fine-to-coarse cell averaging.
pub struct CellAverageRestrictor<const D: usize, C: Communicator> {
    fine: Arc<Domain<D>>,
    coarse: Arc<Domain<D>>,
    comm: C,
    /// Per peer rank: fine local indexes whose parent that peer owns.
    sends: HashMap<usize, Vec<usize>>,
    /// Per peer rank: (coarse local index, child slot) blocks that peer owes us.
    recvs: HashMap<usize, Vec<(usize, usize)>>,
}

impl<const D: usize, C: Communicator> std::fmt::Debug for CellAverageRestrictor<D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellAverageRestrictor")
            .field("fine", &self.fine)
            .field("coarse", &self.coarse)
            .field("sends", &self.sends)
            .field("recvs", &self.recvs)
            .finish_non_exhaustive()
    }
}

impl<const D: usize, C: Communicator> CellAverageRestrictor<D, C> {
    pub fn new(
        fine: Arc<Domain<D>>,
        coarse: Arc<Domain<D>>,
        comm: C,
    ) -> Result<Self, PatchForestError> {
        check_transfer_shapes(&fine, &coarse)?;
        let rank = fine.rank();

        let mut sends: HashMap<usize, Vec<usize>> = HashMap::new();
        for patch in fine.patch_infos() {
            if let Some(parent_rank) = patch.parent_rank {
                if parent_rank != rank {
                    sends.entry(parent_rank).or_default().push(patch.local_index);
                }
            }
        }
        for list in sends.values_mut() {
            list.sort_by_key(|&li| slot_key(&fine.patch_infos()[li]));
        }

        let mut recvs: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
        for patch in coarse.patch_infos() {
            for (slot, child_rank) in patch.child_ranks.iter().enumerate() {
                if let Some(child_rank) = child_rank {
                    if *child_rank != rank {
                        recvs
                            .entry(*child_rank)
                            .or_default()
                            .push((patch.local_index, slot));
                    }
                }
            }
        }
        for list in recvs.values_mut() {
            list.sort_by_key(|&(li, slot)| (coarse.patch_infos()[li].id.get(), slot));
        }

        Ok(CellAverageRestrictor {
            fine,
            coarse,
            comm,
            sends,
            recvs,
        })
    }

    /// Average a fine patch into its block values, carryover = plain copy.
    fn restricted_block(&self, fine_vec: &Vector<D>, patch: &PatchInfo<D>, out: &mut Vec<f64>) {
        let ns = self.fine.ns();
        let view = fine_vec.patch_view(patch.local_index);
        if patch.orth_on_parent.is_null() {
            for_each_cell(ns, |c| out.push(view.get(c)));
        } else {
            let weight = 1.0 / (1 << D) as f64;
            for_each_cell(half_ns(ns), |c| {
                let mut sum = 0.0;
                for_each_cell([2; D], |sub| {
                    let mut fc = [0usize; D];
                    for axis in 0..D {
                        fc[axis] = 2 * c[axis] + sub[axis];
                    }
                    sum += view.get(fc);
                });
                out.push(sum * weight);
            });
        }
    }

    /// Write one received or locally computed block into a coarse patch.
    fn place_block(
        &self,
        coarse_vec: &mut Vector<D>,
        coarse_local: usize,
        slot: usize,
        carryover: bool,
        block: &[f64],
    ) {
        let ns = self.coarse.ns();
        let mut view = coarse_vec.patch_view_mut(coarse_local);
        let mut i = 0;
        if carryover {
            for_each_cell(ns, |c| {
                view.set(c, block[i]);
                i += 1;
            });
        } else {
            let off = block_offset(ns, slot);
            for_each_cell(half_ns(ns), |c| {
                let mut cc = [0usize; D];
                for axis in 0..D {
                    cc[axis] = off[axis] + c[axis];
                }
                view.set(cc, block[i]);
                i += 1;
            });
        }
    }

    fn block_len(&self, carryover: bool) -> usize {
        let ns = self.coarse.ns();
        if carryover {
            ns.iter().product()
        } else {
            half_ns(ns).iter().product()
        }
    }
}

impl<const D: usize, C: Communicator> Restrictor<D> for CellAverageRestrictor<D, C> {
    fn restrict(&self, fine: &Vector<D>, coarse: &mut Vector<D>) -> Result<(), PatchForestError> {
        fine.check_shape(&self.fine)?;
        coarse.check_shape(&self.coarse)?;
        let rank = self.fine.rank();

        // Local blocks land directly; remote ones get packed per peer.
        let mut scratch = Vec::new();
        for patch in self.fine.patch_infos() {
            let (Some(parent_id), Some(parent_rank)) = (patch.parent_id, patch.parent_rank)
            else {
                continue;
            };
            if parent_rank != rank {
                continue;
            }
            let coarse_local = self
                .coarse
                .local_index_of(parent_id)
                .ok_or(PatchForestError::CommError {
                    neighbor: rank,
                    reason: format!("parent patch {} not local", parent_id.get()),
                })?;
            scratch.clear();
            self.restricted_block(fine, patch, &mut scratch);
            let carryover = patch.orth_on_parent.is_null();
            let slot = if carryover { 0 } else { patch.orth_on_parent.index() };
            self.place_block(coarse, coarse_local, slot, carryover, &scratch);
        }

        let mut outgoing: HashMap<usize, Vec<f64>> = HashMap::new();
        for (&peer, locals) in &self.sends {
            let buf = outgoing.entry(peer).or_default();
            for &li in locals {
                self.restricted_block(fine, &self.fine.patch_infos()[li], buf);
            }
        }
        let expected: HashMap<usize, usize> = self
            .recvs
            .iter()
            .map(|(&peer, entries)| {
                let n = entries
                    .iter()
                    .map(|&(li, slot)| {
                        self.block_len(is_carryover(&self.coarse.patch_infos()[li], slot))
                    })
                    .sum();
                (peer, n)
            })
            .collect();

        let incoming = exchange_known(&self.comm, &outgoing, &expected, CommTag::RestrictBlock)?;
        for (&peer, entries) in &self.recvs {
            let data = incoming.get(&peer).ok_or(PatchForestError::CommError {
                neighbor: peer,
                reason: "missing restriction blocks".into(),
            })?;
            let mut at = 0;
            for &(li, slot) in entries {
                let carryover = is_carryover(&self.coarse.patch_infos()[li], slot);
                let len = self.block_len(carryover);
                self.place_block(coarse, li, slot, carryover, &data[at..at + len]);
                at += len;
            }
        }
        Ok(())
    }
}

/// Coarse-to-fine piecewise-constant correction, added in place.
pub struct PiecewiseConstantInterpolator<const D: usize, C: Communicator> {
    fine: Arc<Domain<D>>,
    coarse: Arc<Domain<D>>,
    comm: C,
    /// Per peer rank: (coarse local index, child slot) blocks we owe.
    sends: HashMap<usize, Vec<(usize, usize)>>,
    /// Per peer rank: fine local indexes expecting a block from that peer.
    recvs: HashMap<usize, Vec<usize>>,
}

impl<const D: usize, C: Communicator> PiecewiseConstantInterpolator<D, C> {
    pub fn new(
        fine: Arc<Domain<D>>,
        coarse: Arc<Domain<D>>,
        comm: C,
    ) -> Result<Self, PatchForestError> {
        check_transfer_shapes(&fine, &coarse)?;
        let rank = fine.rank();

        let mut sends: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
        for patch in coarse.patch_infos() {
            for (slot, child_rank) in patch.child_ranks.iter().enumerate() {
                if let Some(child_rank) = child_rank {
                    if *child_rank != rank {
                        sends
                            .entry(*child_rank)
                            .or_default()
                            .push((patch.local_index, slot));
                    }
                }
            }
        }
        for list in sends.values_mut() {
            list.sort_by_key(|&(li, slot)| (coarse.patch_infos()[li].id.get(), slot));
        }

        let mut recvs: HashMap<usize, Vec<usize>> = HashMap::new();
        for patch in fine.patch_infos() {
            if let Some(parent_rank) = patch.parent_rank {
                if parent_rank != rank {
                    recvs.entry(parent_rank).or_default().push(patch.local_index);
                }
            }
        }
        for list in recvs.values_mut() {
            list.sort_by_key(|&li| slot_key(&fine.patch_infos()[li]));
        }

        Ok(PiecewiseConstantInterpolator {
            fine,
            coarse,
            comm,
            sends,
            recvs,
        })
    }

    /// Extract the sub-block of a coarse patch covering one child slot.
    fn coarse_block(
        &self,
        coarse_vec: &Vector<D>,
        coarse_local: usize,
        slot: usize,
        carryover: bool,
        out: &mut Vec<f64>,
    ) {
        let ns = self.coarse.ns();
        let view = coarse_vec.patch_view(coarse_local);
        if carryover {
            for_each_cell(ns, |c| out.push(view.get(c)));
        } else {
            let off = block_offset(ns, slot);
            for_each_cell(half_ns(ns), |c| {
                let mut cc = [0usize; D];
                for axis in 0..D {
                    cc[axis] = off[axis] + c[axis];
                }
                out.push(view.get(cc));
            });
        }
    }

    /// Add a coarse block into a fine patch, constant over each cell group.
    fn add_block(
        &self,
        fine_vec: &mut Vector<D>,
        fine_local: usize,
        carryover: bool,
        block: &[f64],
    ) {
        let ns = self.fine.ns();
        let mut view = fine_vec.patch_view_mut(fine_local);
        if carryover {
            let mut i = 0;
            for_each_cell(ns, |c| {
                view.add(c, block[i]);
                i += 1;
            });
        } else {
            let half = half_ns(ns);
            for_each_cell(ns, |c| {
                let mut bc = 0;
                let mut stride = 1;
                for axis in 0..D {
                    bc += (c[axis] / 2) * stride;
                    stride *= half[axis];
                }
                view.add(c, block[bc]);
            });
        }
    }

    fn block_len(&self, carryover: bool) -> usize {
        let ns = self.fine.ns();
        if carryover {
            ns.iter().product()
        } else {
            half_ns(ns).iter().product()
        }
    }
}

impl<const D: usize, C: Communicator> Interpolator<D> for PiecewiseConstantInterpolator<D, C> {
    fn interpolate_add(
        &self,
        coarse: &Vector<D>,
        fine: &mut Vector<D>,
    ) -> Result<(), PatchForestError> {
        coarse.check_shape(&self.coarse)?;
        fine.check_shape(&self.fine)?;
        let rank = self.fine.rank();

        let mut scratch = Vec::new();
        for patch in self.fine.patch_infos() {
            let (Some(parent_id), Some(parent_rank)) = (patch.parent_id, patch.parent_rank)
            else {
                continue;
            };
            if parent_rank != rank {
                continue;
            }
            let coarse_local = self
                .coarse
                .local_index_of(parent_id)
                .ok_or(PatchForestError::CommError {
                    neighbor: rank,
                    reason: format!("parent patch {} not local", parent_id.get()),
                })?;
            let carryover = patch.orth_on_parent.is_null();
            let slot = if carryover { 0 } else { patch.orth_on_parent.index() };
            scratch.clear();
            self.coarse_block(coarse, coarse_local, slot, carryover, &mut scratch);
            self.add_block(fine, patch.local_index, carryover, &scratch);
        }

        let mut outgoing: HashMap<usize, Vec<f64>> = HashMap::new();
        for (&peer, entries) in &self.sends {
            let buf = outgoing.entry(peer).or_default();
            for &(li, slot) in entries {
                let carryover = is_carryover(&self.coarse.patch_infos()[li], slot);
                self.coarse_block(coarse, li, slot, carryover, buf);
            }
        }
        let expected: HashMap<usize, usize> = self
            .recvs
            .iter()
            .map(|(&peer, locals)| {
                let n = locals
                    .iter()
                    .map(|&li| {
                        self.block_len(
                            self.fine.patch_infos()[li].orth_on_parent.is_null(),
                        )
                    })
                    .sum();
                (peer, n)
            })
            .collect();

        let incoming = exchange_known(&self.comm, &outgoing, &expected, CommTag::InterpolateBlock)?;
        for (&peer, locals) in &self.recvs {
            let data = incoming.get(&peer).ok_or(PatchForestError::CommError {
                neighbor: peer,
                reason: "missing interpolation blocks".into(),
            })?;
            let mut at = 0;
            for &li in locals {
                let carryover = self.fine.patch_infos()[li].orth_on_parent.is_null();
                let len = self.block_len(carryover);
                self.add_block(fine, li, carryover, &data[at..at + len]);
                at += len;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::forest::QuadForest;
    use crate::generator::{DomainGenerator, GeneratorOpts, TreeDomainGenerator};

    fn two_level_uniform() -> (Arc<Domain<2>>, Arc<Domain<2>>) {
        let mut forest = QuadForest::new();
        forest.refine_all();
        let opts = GeneratorOpts {
            ns: [4, 4],
            ..GeneratorOpts::default()
        };
        let mut generator = TreeDomainGenerator::new(forest, opts, &NoComm).unwrap();
        let fine = generator.finest_domain();
        let coarse = generator.coarser_domain().unwrap();
        (fine, coarse)
    }

    #[test]
    fn restrict_preserves_constant() {
        let (fine, coarse) = two_level_uniform();
        let restrictor =
            CellAverageRestrictor::new(fine.clone(), coarse.clone(), NoComm).unwrap();
        let mut u = Vector::<2>::new(&fine);
        u.set_all(3.5);
        let mut cu = Vector::<2>::new(&coarse);
        restrictor.restrict(&u, &mut cu).unwrap();
        for li in 0..coarse.num_local_patches() {
            let view = cu.patch_view(li);
            view.for_each_interior(|_, v| assert!((v - 3.5).abs() < 1e-14));
        }
    }

    #[test]
    fn restrict_conserves_integral() {
        let (fine, coarse) = two_level_uniform();
        let restrictor =
            CellAverageRestrictor::new(fine.clone(), coarse.clone(), NoComm).unwrap();
        let mut u = Vector::<2>::new(&fine);
        for (li, patch) in fine.patch_infos().iter().enumerate() {
            let mut view = u.patch_view_mut(li);
            let spacing = patch.spacings;
            let starts = patch.starts;
            view.for_each_interior_mut(|c, v| {
                let x = starts[0] + (c[0] as f64 + 0.5) * spacing[0];
                let y = starts[1] + (c[1] as f64 + 0.5) * spacing[1];
                *v = x * x + y;
            });
        }
        let mut cu = Vector::<2>::new(&coarse);
        restrictor.restrict(&u, &mut cu).unwrap();
        let fine_total = fine.integrate(&u, &NoComm).unwrap();
        let coarse_total = coarse.integrate(&cu, &NoComm).unwrap();
        assert!((fine_total - coarse_total).abs() < 1e-12);
    }

    #[test]
    fn interpolate_adds_constant_blocks() {
        let (fine, coarse) = two_level_uniform();
        let interpolator =
            PiecewiseConstantInterpolator::new(fine.clone(), coarse.clone(), NoComm).unwrap();
        let mut cu = Vector::<2>::new(&coarse);
        cu.set_all(2.0);
        let mut u = Vector::<2>::new(&fine);
        u.set_all(1.0);
        interpolator.interpolate_add(&cu, &mut u).unwrap();
        for li in 0..fine.num_local_patches() {
            let view = u.patch_view(li);
            view.for_each_interior(|_, v| assert!((v - 3.0).abs() < 1e-14));
        }
    }

    #[test]
    fn odd_cell_count_rejected() {
        let mut forest = QuadForest::new();
        forest.refine_all();
        let opts = GeneratorOpts {
            ns: [5, 5],
            ..GeneratorOpts::default()
        };
        let mut generator = TreeDomainGenerator::new(forest, opts, &NoComm).unwrap();
        let fine = generator.finest_domain();
        let coarse = generator.coarser_domain().unwrap();
        let err = CellAverageRestrictor::new(fine, coarse, NoComm).unwrap_err();
        assert!(matches!(err, PatchForestError::OddCellCount { .. }));
    }
}
