//! Neighbor relationship descriptors.
//!
//! A patch never stores a reference to a neighbor object; it stores `(id,
//! rank)` pairs that are resolved through the owning [`Domain`] or its
//! remote-descriptor cache. Across rank boundaries the full neighbor object
//! does not exist locally at all, so the weak-reference shape is the only one
//! that generalizes.

use super::patch::PatchId;

/// Classification of a neighbor relationship by relative refinement level.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NbrType {
    /// Neighbor at the same refinement level.
    Normal,
    /// Neighbor one level coarser; this patch is the fine one.
    Coarse,
    /// Neighbor is refined; this patch is the coarse one.
    Fine,
}

/// Same-level neighbor.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NormalNbrInfo {
    pub id: PatchId,
    pub rank: usize,
}

/// One-level-coarser neighbor, seen from the fine patch.
///
/// `orth_on_coarse` is the collapsed slot this patch occupies on the coarse
/// neighbor's face or edge (see [`Orthant::collapse_on_side`]).
///
/// [`Orthant::collapse_on_side`]: crate::topology::orthant::Orthant::collapse_on_side
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CoarseNbrInfo {
    pub id: PatchId,
    pub rank: usize,
    pub orth_on_coarse: usize,
}

/// Refined neighbors, seen from the coarse patch.
///
/// `ids[k]` is the fine sub-patch occupying collapsed slot `k` of the shared
/// face (`2^(D-1)` entries), edge (2 entries) or corner (1 entry).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FineNbrInfo {
    pub ids: Vec<PatchId>,
    pub ranks: Vec<usize>,
}

/// A neighbor relationship on one side, edge or corner.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NbrInfo {
    Normal(NormalNbrInfo),
    Coarse(CoarseNbrInfo),
    Fine(FineNbrInfo),
}

impl NbrInfo {
    pub fn nbr_type(&self) -> NbrType {
        match self {
            NbrInfo::Normal(_) => NbrType::Normal,
            NbrInfo::Coarse(_) => NbrType::Coarse,
            NbrInfo::Fine(_) => NbrType::Fine,
        }
    }

    /// All `(id, rank)` pairs this relationship refers to.
    pub fn referenced(&self) -> Vec<(PatchId, usize)> {
        match self {
            NbrInfo::Normal(n) => vec![(n.id, n.rank)],
            NbrInfo::Coarse(c) => vec![(c.id, c.rank)],
            NbrInfo::Fine(f) => f.ids.iter().copied().zip(f.ranks.iter().copied()).collect(),
        }
    }
}
