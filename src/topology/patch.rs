//! `PatchInfo<D>`: the complete topological and geometric record of one patch.
//!
//! A patch is a rectangular sub-domain carrying a uniform Cartesian cell grid.
//! `PatchInfo` is built once by a domain generator and is immutable afterward;
//! any geometric change produces a brand-new generation. Neighbor links are
//! `(id, rank)` pairs, never object references (see [`crate::topology::nbr`]).

use std::fmt;
use std::num::NonZeroU64;

use super::nbr::{CoarseNbrInfo, FineNbrInfo, NbrInfo, NbrType, NormalNbrInfo};
use super::orthant::Orthant;
use super::side::{Corner, Edge, Side};
use crate::error::PatchForestError;

/// A strong handle for a patch, unique within a generation and stable across
/// repeated generator calls for the same forest.
///
/// 0 is reserved as an invalid/sentinel value, following the same newtype
/// discipline as entity ids elsewhere in the ecosystem.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PatchId(NonZeroU64);

impl PatchId {
    /// Creates a new `PatchId` from a raw `u64`.
    ///
    /// # Panics
    /// Panics if `raw == 0`.
    #[inline]
    pub fn new(raw: u64) -> Self {
        PatchId(NonZeroU64::new(raw).expect("PatchId must be non-zero"))
    }

    /// Returns the inner `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PatchId").field(&self.get()).finish()
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for PatchId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;

    fn equivalent_datatype() -> Self::Out {
        u64::equivalent_datatype()
    }
}

/// Per-patch geometric and topological record for one refinement level.
///
/// Feature tables are sized exactly for the dimension: `2*D` sides, 12 edges
/// (3D only), `2^D` corners and child slots.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchInfo<const D: usize> {
    /// Globally unique id within this generation.
    pub id: PatchId,
    /// Position within the owning rank's local patch array.
    pub local_index: usize,
    /// Position in the globally ordered numbering, contiguous per rank.
    pub global_index: usize,
    /// Owning rank.
    pub rank: usize,
    /// Cell counts per dimension.
    pub ns: [usize; D],
    /// Physical lower corner.
    pub starts: [f64; D],
    /// Cell width per dimension.
    pub spacings: [f64; D],
    /// Ghost halo width in cells.
    pub num_ghost_cells: usize,
    /// Refinement level (0 is coarsest).
    pub refine_level: u8,
    /// Parent patch in the next-coarser domain, if one exists.
    pub parent_id: Option<PatchId>,
    pub parent_rank: Option<usize>,
    /// Which orthant of the parent this patch occupies; null when the patch
    /// has no subdivision relationship (coarsest level or carried over).
    pub orth_on_parent: Orthant<D>,
    /// Children in the next-finer domain, one slot per orthant. A patch that
    /// carries over unrefined stores itself in slot 0.
    pub child_ids: Vec<Option<PatchId>>,
    pub child_ranks: Vec<Option<usize>>,
    /// Per-side Neumann boundary flag, bit `side.index()`.
    pub neumann: u8,
    pub(crate) side_nbrs: Vec<Option<NbrInfo>>,
    pub(crate) edge_nbrs: Vec<Option<NbrInfo>>,
    pub(crate) corner_nbrs: Vec<Option<NbrInfo>>,
}

impl<const D: usize> PatchInfo<D> {
    /// Blank record with empty neighbor tables; the generator fills it in.
    pub(crate) fn new(id: PatchId, refine_level: u8, ns: [usize; D]) -> Self {
        PatchInfo {
            id,
            local_index: 0,
            global_index: 0,
            rank: 0,
            ns,
            starts: [0.0; D],
            spacings: [1.0; D],
            num_ghost_cells: 0,
            refine_level,
            parent_id: None,
            parent_rank: None,
            orth_on_parent: Orthant::null(),
            child_ids: vec![None; 1 << D],
            child_ranks: vec![None; 1 << D],
            neumann: 0,
            side_nbrs: vec![None; 2 * D],
            edge_nbrs: vec![None; if D == 3 { Edge::COUNT } else { 0 }],
            corner_nbrs: vec![None; 1 << D],
        }
    }

    /// Total interior cell count.
    pub fn num_cells(&self) -> usize {
        self.ns.iter().product()
    }

    /// Cell volume (area in 2D).
    pub fn cell_volume(&self) -> f64 {
        self.spacings.iter().product()
    }

    /// Whether the given side carries a Neumann boundary condition.
    pub fn is_neumann(&self, side: Side<D>) -> bool {
        self.neumann & (1 << side.index()) != 0
    }

    // --- sides ---

    /// True iff this patch has a neighbor across `side` (false = physical
    /// boundary).
    pub fn has_nbr(&self, side: Side<D>) -> bool {
        self.side_nbrs[side.index()].is_some()
    }

    pub fn nbr_type(&self, side: Side<D>) -> Option<NbrType> {
        self.side_nbrs[side.index()].as_ref().map(NbrInfo::nbr_type)
    }

    pub fn side_nbr(&self, side: Side<D>) -> Option<&NbrInfo> {
        self.side_nbrs[side.index()].as_ref()
    }

    /// # Panics
    /// Panics if the neighbor across `side` is absent or not Normal; check
    /// [`nbr_type`](Self::nbr_type) first.
    pub fn normal_nbr_info(&self, side: Side<D>) -> &NormalNbrInfo {
        match self.try_normal_nbr_info(side) {
            Ok(info) => info,
            Err(err) => panic!("patch {}: {err}", self.id),
        }
    }

    /// # Panics
    /// Panics if the neighbor across `side` is absent or not Coarse.
    pub fn coarse_nbr_info(&self, side: Side<D>) -> &CoarseNbrInfo {
        match self.try_coarse_nbr_info(side) {
            Ok(info) => info,
            Err(err) => panic!("patch {}: {err}", self.id),
        }
    }

    /// # Panics
    /// Panics if the neighbor across `side` is absent or not Fine.
    pub fn fine_nbr_info(&self, side: Side<D>) -> &FineNbrInfo {
        match self.try_fine_nbr_info(side) {
            Ok(info) => info,
            Err(err) => panic!("patch {}: {err}", self.id),
        }
    }

    pub fn try_normal_nbr_info(&self, side: Side<D>) -> Result<&NormalNbrInfo, PatchForestError> {
        match &self.side_nbrs[side.index()] {
            Some(NbrInfo::Normal(info)) => Ok(info),
            Some(other) => Err(PatchForestError::WrongNbrType {
                feature: "side",
                expected: NbrType::Normal,
                found: other.nbr_type(),
            }),
            None => Err(PatchForestError::NoNbr { feature: "side" }),
        }
    }

    pub fn try_coarse_nbr_info(&self, side: Side<D>) -> Result<&CoarseNbrInfo, PatchForestError> {
        match &self.side_nbrs[side.index()] {
            Some(NbrInfo::Coarse(info)) => Ok(info),
            Some(other) => Err(PatchForestError::WrongNbrType {
                feature: "side",
                expected: NbrType::Coarse,
                found: other.nbr_type(),
            }),
            None => Err(PatchForestError::NoNbr { feature: "side" }),
        }
    }

    pub fn try_fine_nbr_info(&self, side: Side<D>) -> Result<&FineNbrInfo, PatchForestError> {
        match &self.side_nbrs[side.index()] {
            Some(NbrInfo::Fine(info)) => Ok(info),
            Some(other) => Err(PatchForestError::WrongNbrType {
                feature: "side",
                expected: NbrType::Fine,
                found: other.nbr_type(),
            }),
            None => Err(PatchForestError::NoNbr { feature: "side" }),
        }
    }

    // --- edges (3D only) ---

    pub fn has_edge_nbr(&self, edge: Edge) -> bool {
        assert!(D == 3, "edges exist only for D=3");
        self.edge_nbrs[edge.index()].is_some()
    }

    pub fn edge_nbr_type(&self, edge: Edge) -> Option<NbrType> {
        assert!(D == 3, "edges exist only for D=3");
        self.edge_nbrs[edge.index()].as_ref().map(NbrInfo::nbr_type)
    }

    pub fn edge_nbr(&self, edge: Edge) -> Option<&NbrInfo> {
        assert!(D == 3, "edges exist only for D=3");
        self.edge_nbrs[edge.index()].as_ref()
    }

    /// # Panics
    /// Panics if the neighbor across `edge` is absent or not of the requested
    /// shape, mirroring the side accessors.
    pub fn edge_normal_nbr_info(&self, edge: Edge) -> &NormalNbrInfo {
        match self.edge_nbr(edge) {
            Some(NbrInfo::Normal(info)) => info,
            Some(other) => panic!(
                "patch {}: expected Normal neighbor on edge {edge}, found {:?}",
                self.id,
                other.nbr_type()
            ),
            None => panic!("patch {}: no neighbor on edge {edge}", self.id),
        }
    }

    pub fn edge_coarse_nbr_info(&self, edge: Edge) -> &CoarseNbrInfo {
        match self.edge_nbr(edge) {
            Some(NbrInfo::Coarse(info)) => info,
            Some(other) => panic!(
                "patch {}: expected Coarse neighbor on edge {edge}, found {:?}",
                self.id,
                other.nbr_type()
            ),
            None => panic!("patch {}: no neighbor on edge {edge}", self.id),
        }
    }

    pub fn edge_fine_nbr_info(&self, edge: Edge) -> &FineNbrInfo {
        match self.edge_nbr(edge) {
            Some(NbrInfo::Fine(info)) => info,
            Some(other) => panic!(
                "patch {}: expected Fine neighbor on edge {edge}, found {:?}",
                self.id,
                other.nbr_type()
            ),
            None => panic!("patch {}: no neighbor on edge {edge}", self.id),
        }
    }

    // --- corners ---

    pub fn has_corner_nbr(&self, corner: Corner<D>) -> bool {
        self.corner_nbrs[corner.index()].is_some()
    }

    pub fn corner_nbr_type(&self, corner: Corner<D>) -> Option<NbrType> {
        self.corner_nbrs[corner.index()]
            .as_ref()
            .map(NbrInfo::nbr_type)
    }

    pub fn corner_nbr(&self, corner: Corner<D>) -> Option<&NbrInfo> {
        self.corner_nbrs[corner.index()].as_ref()
    }

    /// All `(id, rank)` pairs referenced by any feature of this patch.
    pub fn referenced_nbrs(&self) -> Vec<(PatchId, usize)> {
        let mut out = Vec::new();
        for info in self
            .side_nbrs
            .iter()
            .chain(self.edge_nbrs.iter())
            .chain(self.corner_nbrs.iter())
            .flatten()
        {
            out.extend(info.referenced());
        }
        out
    }

    pub(crate) fn set_side_nbr(&mut self, side: Side<D>, info: NbrInfo) {
        self.side_nbrs[side.index()] = Some(info);
    }

    pub(crate) fn set_edge_nbr(&mut self, edge: Edge, info: NbrInfo) {
        self.edge_nbrs[edge.index()] = Some(info);
    }

    pub(crate) fn set_corner_nbr(&mut self, corner: Corner<D>, info: NbrInfo) {
        self.corner_nbrs[corner.index()] = Some(info);
    }
}
