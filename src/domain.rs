//! `Domain<D>`: the patch collection for one refinement level.
//!
//! A domain conceptually owns every patch of its level across all ranks, but
//! physically holds only this rank's `PatchInfo` records plus lightweight
//! metadata for the remote patches those records reference. Domains are
//! immutable after construction and shared via `Arc`; only a
//! [`DomainGenerator`](crate::generator::DomainGenerator) may build one.

use std::collections::HashMap;

use crate::algs::collectives::all_reduce_sum_f64;
use crate::algs::communicator::Communicator;
use crate::error::PatchForestError;
use crate::topology::patch::{PatchId, PatchInfo};
use crate::vector::Vector;

/// Geometric placement of a patch owned by another rank, learned during the
/// generation-time descriptor exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct RemotePatchMeta<const D: usize> {
    pub id: PatchId,
    pub rank: usize,
    pub refine_level: u8,
    pub starts: [f64; D],
    pub spacings: [f64; D],
}

/// One refinement level's patches, local to this rank.
#[derive(Debug)]
pub struct Domain<const D: usize> {
    patches: Vec<PatchInfo<D>>,
    id_to_local: HashMap<PatchId, usize>,
    remote_patches: HashMap<PatchId, RemotePatchMeta<D>>,
    ns: [usize; D],
    num_ghost_cells: usize,
    rank: usize,
    size: usize,
    num_global_patches: usize,
    volume: f64,
}

impl<const D: usize> Domain<D> {
    /// Build a domain from generator output. `patches` must already carry
    /// dense `local_index` values in order; the volume reduction is the one
    /// collective of construction and is cached.
    pub(crate) fn new<C: Communicator>(
        patches: Vec<PatchInfo<D>>,
        remote_patches: HashMap<PatchId, RemotePatchMeta<D>>,
        ns: [usize; D],
        num_ghost_cells: usize,
        num_global_patches: usize,
        comm: &C,
    ) -> Result<Self, PatchForestError> {
        debug_assert!(
            patches
                .iter()
                .enumerate()
                .all(|(i, p)| p.local_index == i && p.rank == comm.rank()),
            "local_index values must be dense and rank-local"
        );
        let id_to_local = patches
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();
        let local_volume: f64 = patches
            .iter()
            .map(|p| p.cell_volume() * p.num_cells() as f64)
            .sum();
        let volume = all_reduce_sum_f64(comm, local_volume)?;
        Ok(Domain {
            patches,
            id_to_local,
            remote_patches,
            ns,
            num_ghost_cells,
            rank: comm.rank(),
            size: comm.size(),
            num_global_patches,
            volume,
        })
    }

    /// This rank's patches, ordered by `local_index`.
    pub fn patch_infos(&self) -> &[PatchInfo<D>] {
        &self.patches
    }

    pub fn num_local_patches(&self) -> usize {
        self.patches.len()
    }

    pub fn num_global_patches(&self) -> usize {
        self.num_global_patches
    }

    /// Global cell count; every patch carries the same uniform `ns`.
    pub fn num_global_cells(&self) -> u64 {
        self.num_global_patches as u64 * self.ns.iter().product::<usize>() as u64
    }

    /// Uniform per-patch cell counts.
    pub fn ns(&self) -> [usize; D] {
        self.ns
    }

    pub fn num_ghost_cells(&self) -> usize {
        self.num_ghost_cells
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_ranks(&self) -> usize {
        self.size
    }

    /// Local index of a patch id, if this rank owns it.
    pub fn local_index_of(&self, id: PatchId) -> Option<usize> {
        self.id_to_local.get(&id).copied()
    }

    pub fn patch_by_id(&self, id: PatchId) -> Option<&PatchInfo<D>> {
        self.local_index_of(id).map(|i| &self.patches[i])
    }

    /// Placement metadata for a referenced patch owned by another rank.
    pub fn remote_meta(&self, id: PatchId) -> Option<&RemotePatchMeta<D>> {
        self.remote_patches.get(&id)
    }

    pub(crate) fn num_remote_patches(&self) -> usize {
        self.remote_patches.len()
    }

    /// Total physical volume (area in 2D); cached at construction.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Globally integrate a grid function: sum of cell value times cell
    /// volume over every patch of every rank. Collective; every rank must
    /// call it in the same sequence.
    pub fn integrate<C: Communicator>(
        &self,
        u: &Vector<D>,
        comm: &C,
    ) -> Result<f64, PatchForestError> {
        u.check_shape(self)?;
        let mut local = 0.0;
        for patch in &self.patches {
            let view = u.patch_view(patch.local_index);
            local += view.interior_sum() * patch.cell_volume();
        }
        all_reduce_sum_f64(comm, local)
    }
}
