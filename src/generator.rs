//! Domain generation from an explicit tree description.
//!
//! [`TreeDomainGenerator`] turns a balanced [`Forest`] into the full sequence
//! of refinement-level [`Domain`]s, finest first. The whole hierarchy is
//! derived deterministically at construction: every rank holds the same
//! replicated forest description, orders each level's leaves along the same
//! space-filling curve, and splits that ordering into contiguous rank blocks.
//! Patch ids come from cell coordinates alone, so repeated generation of the
//! same forest is referentially consistent across levels and rank counts.
//!
//! The only communication during generation is the two-phase descriptor
//! exchange (peer ranks from the freshly built neighbor tables, then one
//! point-to-point round of minimal patch descriptors) and the per-domain
//! volume reduction.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::debug;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::WirePatch;
use crate::domain::{Domain, RemotePatchMeta};
use crate::error::PatchForestError;
use crate::forest::{Forest, TreeCell};
use crate::topology::nbr::{CoarseNbrInfo, FineNbrInfo, NbrInfo, NormalNbrInfo};
use crate::topology::orthant::Orthant;
use crate::topology::patch::{PatchId, PatchInfo};
use crate::topology::side::{Corner, Edge, Side};

/// Boundary-condition predicate: side of the patch plus the patch's physical
/// lower and upper corners.
pub type NeumannPredicate<const D: usize> =
    Box<dyn Fn(Side<D>, [f64; D], [f64; D]) -> bool + Send + Sync>;

/// Configuration for [`TreeDomainGenerator`].
pub struct GeneratorOpts<const D: usize> {
    /// Cells per patch per dimension.
    pub ns: [usize; D],
    /// Ghost halo width in cells.
    pub num_ghost_cells: usize,
    /// Physical lower corner of the whole domain.
    pub lower: [f64; D],
    /// Physical extent of the whole domain.
    pub lengths: [f64; D],
    /// Marks Neumann sides on the physical boundary; `None` = all Dirichlet.
    pub neumann: Option<NeumannPredicate<D>>,
}

impl<const D: usize> Default for GeneratorOpts<D> {
    fn default() -> Self {
        GeneratorOpts {
            ns: [8; D],
            num_ghost_cells: 1,
            lower: [0.0; D],
            lengths: [1.0; D],
            neumann: None,
        }
    }
}

/// Produces the per-level domain sequence for one mesh generation.
pub trait DomainGenerator<const D: usize> {
    /// The domain matching the full input refinement. Resets the cursor.
    fn finest_domain(&mut self) -> Arc<Domain<D>>;
    /// The next coarser domain, or `None` when the coarsest level has been
    /// reached. Exhaustion is expected, not an error.
    fn coarser_domain(&mut self) -> Option<Arc<Domain<D>>>;
    /// Whether another `coarser_domain` call would succeed.
    fn has_coarser(&self) -> bool;
}

/// One level's leaf set, SFC-ordered and partitioned into rank blocks.
struct LevelIndex<const D: usize> {
    cells: Vec<TreeCell<D>>,
    pos: HashMap<TreeCell<D>, usize>,
    offsets: Vec<usize>,
}

impl<const D: usize> LevelIndex<D> {
    fn build(forest: &Forest<D>, num_ranks: usize) -> Self {
        let cells = forest.sorted_leaves();
        let pos = cells.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        let n = cells.len();
        let mut offsets = Vec::with_capacity(num_ranks + 1);
        offsets.push(0);
        for r in 0..num_ranks {
            let count = n / num_ranks + usize::from(r < n % num_ranks);
            offsets.push(offsets[r] + count);
        }
        LevelIndex {
            cells,
            pos,
            offsets,
        }
    }

    fn contains(&self, cell: &TreeCell<D>) -> bool {
        self.pos.contains_key(cell)
    }

    fn global_index(&self, cell: &TreeCell<D>) -> usize {
        self.pos[cell]
    }

    fn owner(&self, cell: &TreeCell<D>) -> usize {
        let pos = self.global_index(cell);
        self.offsets.partition_point(|&o| o <= pos) - 1
    }

    fn local_range(&self, rank: usize) -> std::ops::Range<usize> {
        self.offsets[rank]..self.offsets[rank + 1]
    }

    fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

/// Explicit-tree domain generator backend.
#[derive(Debug)]
pub struct TreeDomainGenerator<const D: usize> {
    domains: Vec<Arc<Domain<D>>>,
    cursor: usize,
}

impl<const D: usize> TreeDomainGenerator<D> {
    /// Build every refinement level of `forest` up front.
    ///
    /// Fails on an unbalanced forest or a dangling neighbor reference;
    /// structural faults surface here, never during a solve. Collective:
    /// every rank must construct with the same forest and options.
    pub fn new<C: Communicator>(
        forest: Forest<D>,
        opts: GeneratorOpts<D>,
        comm: &C,
    ) -> Result<Self, PatchForestError> {
        forest.validate()?;

        let mut forests = vec![forest];
        while let Some(coarser) = forests[forests.len() - 1].coarsen_deepest() {
            forests.push(coarser);
        }
        let indexes: Vec<LevelIndex<D>> = forests
            .iter()
            .map(|f| LevelIndex::build(f, comm.size()))
            .collect();

        let mut domains = Vec::with_capacity(forests.len());
        for li in 0..forests.len() {
            let domain = build_level(&forests, &indexes, li, &opts, comm)?;
            debug!(
                "level {} of {}: {} global patches, {} local, {} remote refs",
                li,
                forests.len(),
                domain.num_global_patches(),
                domain.num_local_patches(),
                domain.num_remote_patches(),
            );
            domains.push(Arc::new(domain));
        }

        Ok(TreeDomainGenerator { domains, cursor: 0 })
    }

    /// Number of refinement levels available.
    pub fn num_levels(&self) -> usize {
        self.domains.len()
    }
}

impl<const D: usize> DomainGenerator<D> for TreeDomainGenerator<D> {
    fn finest_domain(&mut self) -> Arc<Domain<D>> {
        self.cursor = 0;
        self.domains[0].clone()
    }

    fn coarser_domain(&mut self) -> Option<Arc<Domain<D>>> {
        if self.cursor + 1 < self.domains.len() {
            self.cursor += 1;
            Some(self.domains[self.cursor].clone())
        } else {
            None
        }
    }

    fn has_coarser(&self) -> bool {
        self.cursor + 1 < self.domains.len()
    }
}

fn geometry<const D: usize>(
    cell: &TreeCell<D>,
    opts: &GeneratorOpts<D>,
) -> ([f64; D], [f64; D]) {
    let extent = (1u64 << cell.level) as f64;
    let mut starts = [0.0; D];
    let mut spacings = [0.0; D];
    for axis in 0..D {
        starts[axis] = opts.lower[axis] + opts.lengths[axis] * cell.coords[axis] as f64 / extent;
        spacings[axis] = opts.lengths[axis] / (extent * opts.ns[axis] as f64);
    }
    (starts, spacings)
}

fn build_level<const D: usize, C: Communicator>(
    forests: &[Forest<D>],
    indexes: &[LevelIndex<D>],
    li: usize,
    opts: &GeneratorOpts<D>,
    comm: &C,
) -> Result<Domain<D>, PatchForestError> {
    let index = &indexes[li];
    let forest = &forests[li];
    let deepest = forest.max_level();
    let rank = comm.rank();

    let mut patches = Vec::with_capacity(index.local_range(rank).len());
    for (local_index, global_index) in index.local_range(rank).enumerate() {
        let cell = index.cells[global_index];
        let mut patch = PatchInfo::<D>::new(cell.patch_id(), cell.level, opts.ns);
        patch.local_index = local_index;
        patch.global_index = global_index;
        patch.rank = rank;
        patch.num_ghost_cells = opts.num_ghost_cells;
        let (starts, spacings) = geometry(&cell, opts);
        patch.starts = starts;
        patch.spacings = spacings;

        link_hierarchy(&mut patch, &cell, forests, indexes, li, deepest);
        discover_neighbors(&mut patch, &cell, index, opts)?;

        patches.push(patch);
    }

    let remote_patches = exchange_descriptors(&patches, rank, opts, comm)?;
    Domain::new(
        patches,
        remote_patches,
        opts.ns,
        opts.num_ghost_cells,
        index.num_cells(),
        comm,
    )
}

/// Fill parent/child linkage toward the adjacent coarser and finer levels.
fn link_hierarchy<const D: usize>(
    patch: &mut PatchInfo<D>,
    cell: &TreeCell<D>,
    forests: &[Forest<D>],
    indexes: &[LevelIndex<D>],
    li: usize,
    deepest: u8,
) {
    if li + 1 < forests.len() {
        if cell.level == deepest {
            // This sibling group collapses into its parent one level down.
            let parent = cell.parent().expect("deepest cell has a parent");
            patch.parent_id = Some(parent.patch_id());
            patch.parent_rank = Some(indexes[li + 1].owner(&parent));
            patch.orth_on_parent = cell.orthant_in_parent();
        } else {
            // Carried over unchanged; it is its own parent, slot 0.
            patch.parent_id = Some(patch.id);
            patch.parent_rank = Some(indexes[li + 1].owner(cell));
            patch.orth_on_parent = Orthant::null();
        }
    }
    if li > 0 {
        if forests[li - 1].contains(cell) {
            patch.child_ids[0] = Some(patch.id);
            patch.child_ranks[0] = Some(indexes[li - 1].owner(cell));
        } else {
            for orthant in Orthant::<D>::all() {
                let child = cell.child(orthant);
                debug_assert!(forests[li - 1].contains(&child));
                patch.child_ids[orthant.index()] = Some(child.patch_id());
                patch.child_ranks[orthant.index()] = Some(indexes[li - 1].owner(&child));
            }
        }
    }
}

/// Resolve the Normal/Coarse/Fine relationship on every side, edge and
/// corner of `cell` against its level's leaf set.
fn discover_neighbors<const D: usize>(
    patch: &mut PatchInfo<D>,
    cell: &TreeCell<D>,
    index: &LevelIndex<D>,
    opts: &GeneratorOpts<D>,
) -> Result<(), PatchForestError> {
    // Sides.
    for side in Side::<D>::all() {
        match cell.face_neighbor(side) {
            None => {
                // Physical boundary.
                if let Some(pred) = &opts.neumann {
                    let (starts, spacings) = geometry(cell, opts);
                    let mut upper = starts;
                    for axis in 0..D {
                        upper[axis] += spacings[axis] * opts.ns[axis] as f64;
                    }
                    if pred(side, starts, upper) {
                        patch.neumann |= 1 << side.index();
                    }
                }
            }
            Some(n) => {
                if index.contains(&n) {
                    patch.set_side_nbr(
                        side,
                        NbrInfo::Normal(NormalNbrInfo {
                            id: n.patch_id(),
                            rank: index.owner(&n),
                        }),
                    );
                } else if let Some(p) = n.parent().filter(|p| index.contains(p)) {
                    debug_assert!(cell.orthant_in_parent().is_on_side(side));
                    patch.set_side_nbr(
                        side,
                        NbrInfo::Coarse(CoarseNbrInfo {
                            id: p.patch_id(),
                            rank: index.owner(&p),
                            orth_on_coarse: cell.orthant_in_parent().collapse_on_side(side),
                        }),
                    );
                } else {
                    let mut ids = Vec::new();
                    let mut ranks = Vec::new();
                    for orthant in Orthant::<D>::on_side(side.opposite()) {
                        let child = n.child(orthant);
                        if !index.contains(&child) {
                            return Err(PatchForestError::DanglingNeighbor {
                                patch: patch.id.get(),
                                feature: "side",
                                level: cell.level,
                            });
                        }
                        ids.push(child.patch_id());
                        ranks.push(index.owner(&child));
                    }
                    patch.set_side_nbr(side, NbrInfo::Fine(FineNbrInfo { ids, ranks }));
                }
            }
        }
    }

    // Edges (3D only).
    if D == 3 {
        for edge in Edge::all() {
            let mut deltas = [0i64; D];
            let axes = edge.fixed_axes();
            let upper = edge.fixed_upper();
            for k in 0..2 {
                deltas[axes[k]] = if upper[k] { 1 } else { -1 };
            }
            let Some(n) = cell.shifted(deltas) else {
                continue; // unit-box boundary
            };
            if index.contains(&n) {
                patch.set_edge_nbr(
                    edge,
                    NbrInfo::Normal(NormalNbrInfo {
                        id: n.patch_id(),
                        rank: index.owner(&n),
                    }),
                );
            } else if let Some(p) = n.parent().filter(|p| index.contains(p)) {
                // The coarse relationship only exists when this cell's edge
                // lies on the coarser grid; otherwise the contact is already
                // covered by a face relationship.
                if cell.orthant_in_parent().is_on_edge(edge) {
                    patch.set_edge_nbr(
                        edge,
                        NbrInfo::Coarse(CoarseNbrInfo {
                            id: p.patch_id(),
                            rank: index.owner(&p),
                            orth_on_coarse: cell.orthant_in_parent().collapse_on_edge(edge),
                        }),
                    );
                }
            } else {
                let mut ids = Vec::new();
                let mut ranks = Vec::new();
                for orthant in Orthant::<D>::on_edge(edge.opposite()) {
                    let child = n.child(orthant);
                    if !index.contains(&child) {
                        return Err(PatchForestError::DanglingNeighbor {
                            patch: patch.id.get(),
                            feature: "edge",
                            level: cell.level,
                        });
                    }
                    ids.push(child.patch_id());
                    ranks.push(index.owner(&child));
                }
                patch.set_edge_nbr(edge, NbrInfo::Fine(FineNbrInfo { ids, ranks }));
            }
        }
    }

    // Corners.
    for corner in Corner::<D>::all() {
        let mut deltas = [0i64; D];
        for axis in 0..D {
            deltas[axis] = if corner.is_upper(axis) { 1 } else { -1 };
        }
        let Some(n) = cell.shifted(deltas) else {
            continue;
        };
        if index.contains(&n) {
            patch.set_corner_nbr(
                corner,
                NbrInfo::Normal(NormalNbrInfo {
                    id: n.patch_id(),
                    rank: index.owner(&n),
                }),
            );
        } else if let Some(p) = n.parent().filter(|p| index.contains(p)) {
            // Valid only when the corner point exists on the coarser grid,
            // i.e. the cell sits at that corner of its parent.
            let at_parent_corner = (0..D)
                .all(|axis| cell.orthant_in_parent().is_upper(axis) == corner.is_upper(axis));
            if at_parent_corner {
                patch.set_corner_nbr(
                    corner,
                    NbrInfo::Coarse(CoarseNbrInfo {
                        id: p.patch_id(),
                        rank: index.owner(&p),
                        orth_on_coarse: 0,
                    }),
                );
            }
        } else {
            let child = n.child(Orthant::from_index(corner.opposite().index()));
            if !index.contains(&child) {
                return Err(PatchForestError::DanglingNeighbor {
                    patch: patch.id.get(),
                    feature: "corner",
                    level: cell.level,
                });
            }
            patch.set_corner_nbr(
                corner,
                NbrInfo::Fine(FineNbrInfo {
                    ids: vec![child.patch_id()],
                    ranks: vec![index.owner(&child)],
                }),
            );
        }
    }

    Ok(())
}

/// Two-phase remote descriptor exchange. Phase 1: the peer ranks are exactly
/// those appearing in the local neighbor tables (neighbor relationships are
/// symmetric, so peers name each other). Phase 2: a point-to-point round of
/// minimal descriptors for the local patches each peer references.
fn exchange_descriptors<const D: usize, C: Communicator>(
    patches: &[PatchInfo<D>],
    rank: usize,
    opts: &GeneratorOpts<D>,
    comm: &C,
) -> Result<HashMap<PatchId, RemotePatchMeta<D>>, PatchForestError> {
    let mut peers: BTreeSet<usize> = BTreeSet::new();
    let mut outgoing: HashMap<usize, Vec<WirePatch>> = HashMap::new();
    for patch in patches {
        let mut sent_to: BTreeSet<usize> = BTreeSet::new();
        for (_, nbr_rank) in patch.referenced_nbrs() {
            if nbr_rank != rank {
                peers.insert(nbr_rank);
                sent_to.insert(nbr_rank);
            }
        }
        for peer in sent_to {
            let cell = cell_of(patch);
            outgoing.entry(peer).or_default().push(WirePatch::new(
                patch.id.get(),
                rank,
                patch.refine_level,
                &cell.coords,
            ));
        }
    }

    let incoming = exchange_records(
        comm,
        &peers,
        &outgoing,
        CommTag::DescriptorSize,
        CommTag::DescriptorData,
    )?;

    let mut remote = HashMap::new();
    for (_, records) in incoming {
        for rec in records {
            let cell = TreeCell::<D> {
                level: rec.level(),
                coords: rec.coords::<D>(),
            };
            let (starts, spacings) = geometry(&cell, opts);
            remote.insert(
                PatchId::new(rec.id()),
                RemotePatchMeta {
                    id: PatchId::new(rec.id()),
                    rank: rec.rank(),
                    refine_level: rec.level(),
                    starts,
                    spacings,
                },
            );
        }
    }
    Ok(remote)
}

/// Recover the tree cell of a generated patch; the id encodes it.
/// Inverse of [`TreeCell::patch_id`].
fn cell_of<const D: usize>(patch: &PatchInfo<D>) -> TreeCell<D> {
    let mut offset = 0u64;
    for l in 0..patch.refine_level {
        offset += 1u64 << (D as u32 * l as u32);
    }
    let mut linear = patch.id.get() - 1 - offset;
    let extent = 1u64 << patch.refine_level;
    let mut coords = [0u32; D];
    for axis in 0..D {
        coords[axis] = (linear % extent) as u32;
        linear /= extent;
    }
    TreeCell {
        level: patch.refine_level,
        coords,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::forest::QuadForest;
    use crate::topology::nbr::NbrType;

    fn uniform_generator(levels: usize) -> TreeDomainGenerator<2> {
        let mut forest = QuadForest::new();
        for _ in 0..levels {
            forest.refine_all();
        }
        TreeDomainGenerator::new(forest, GeneratorOpts::default(), &NoComm).unwrap()
    }

    #[test]
    fn uniform_level_sequence() {
        let mut generator = uniform_generator(2);
        assert_eq!(generator.num_levels(), 3);
        let finest = generator.finest_domain();
        assert_eq!(finest.num_global_patches(), 16);
        let mid = generator.coarser_domain().unwrap();
        assert_eq!(mid.num_global_patches(), 4);
        let coarsest = generator.coarser_domain().unwrap();
        assert_eq!(coarsest.num_global_patches(), 1);
        assert!(generator.coarser_domain().is_none());
        assert!(!generator.has_coarser());
    }

    #[test]
    fn serial_patch_geometry() {
        let mut generator = uniform_generator(1);
        let domain = generator.finest_domain();
        for patch in domain.patch_infos() {
            assert_eq!(patch.ns, [8, 8]);
            assert_eq!(patch.spacings, [1.0 / 16.0; 2]);
            assert_eq!(patch.refine_level, 1);
        }
        assert!((domain.volume() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn interior_patch_has_all_normal_nbrs() {
        let mut generator = uniform_generator(2);
        let domain = generator.finest_domain();
        // Cell (1,1) at level 2 touches neighbors on all sides and corners.
        let id = TreeCell::<2> {
            level: 2,
            coords: [1, 1],
        }
        .patch_id();
        let patch = domain.patch_by_id(id).unwrap();
        for side in Side::<2>::all() {
            assert_eq!(patch.nbr_type(side), Some(NbrType::Normal));
        }
        for corner in Corner::<2>::all() {
            assert_eq!(patch.corner_nbr_type(corner), Some(NbrType::Normal));
        }
    }

    #[test]
    fn cell_of_inverts_patch_id() {
        for cell in [
            TreeCell::<2> {
                level: 0,
                coords: [0, 0],
            },
            TreeCell::<2> {
                level: 3,
                coords: [5, 2],
            },
        ] {
            let mut patch = PatchInfo::<2>::new(cell.patch_id(), cell.level, [4, 4]);
            patch.refine_level = cell.level;
            assert_eq!(cell_of(&patch), cell);
        }
    }

    #[test]
    fn unbalanced_forest_is_rejected() {
        let mut forest = QuadForest::new();
        forest.refine_all();
        let c = TreeCell::<2> {
            level: 1,
            coords: [0, 0],
        };
        forest.refine_cells(&[c]);
        forest.refine_cells(&[TreeCell {
            level: 2,
            coords: [0, 0],
        }]);
        let err = TreeDomainGenerator::new(forest, GeneratorOpts::default(), &NoComm).unwrap_err();
        assert!(matches!(err, PatchForestError::UnbalancedForest { .. }));
    }

    #[test]
    fn neumann_predicate_sets_bits() {
        let mut forest = QuadForest::new();
        forest.refine_all();
        let opts = GeneratorOpts {
            neumann: Some(Box::new(|side: Side<2>, _, _| side == Side::west())),
            ..GeneratorOpts::default()
        };
        let mut generator = TreeDomainGenerator::new(forest, opts, &NoComm).unwrap();
        let domain = generator.finest_domain();
        for patch in domain.patch_infos() {
            let on_west = !patch.has_nbr(Side::west());
            assert_eq!(patch.is_neumann(Side::west()), on_west);
            assert!(!patch.is_neumann(Side::east()));
        }
    }
}
