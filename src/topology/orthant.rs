//! `Orthant<D>`: position of a child box within its parent's `2^D` subdivision.
//!
//! The same D-bit encoding (bit `i` set = upper half of axis `i`) is used for
//! three different things, deliberately:
//! - which orthant of its parent a patch occupies (`orth_on_parent`),
//! - which slot of a coarse neighbor's face a fine patch occupies
//!   (`orth_on_coarse`, via [`Orthant::collapse_on_side`]),
//! - the ordering of fine-neighbor id arrays.
//!
//! Keeping one convention is what makes coarse/fine bookkeeping checkable;
//! see the symmetry tests in `tests/`.

use std::fmt;

use super::side::{Edge, Side};

/// A `D`-bit orthant code, or the null sentinel for patches with no
/// subdivision relationship (coarsest level, or carried over unrefined).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Orthant<const D: usize>(u8);

const NULL_BITS: u8 = u8::MAX;

impl<const D: usize> Orthant<D> {
    /// Number of orthants of a `D`-dimensional box.
    pub const COUNT: usize = 1 << D;

    /// Construct from a raw code in `0..2^D`.
    pub fn from_index(idx: usize) -> Self {
        assert!(
            idx < Self::COUNT,
            "orthant index {idx} out of range for D={D}"
        );
        Orthant(idx as u8)
    }

    /// The sentinel for "no subdivision relationship".
    pub const fn null() -> Self {
        Orthant(NULL_BITS)
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_BITS
    }

    /// Iterate all `2^D` orthants in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Orthant(i as u8))
    }

    /// Raw code as an array-slot index.
    ///
    /// # Panics
    /// Panics on the null orthant.
    #[inline]
    pub fn index(self) -> usize {
        assert!(!self.is_null(), "null orthant has no index");
        self.0 as usize
    }

    /// True when the orthant lies in the upper half along `axis`.
    #[inline]
    pub fn is_upper(self, axis: usize) -> bool {
        debug_assert!(!self.is_null());
        (self.0 >> axis) & 1 == 1
    }

    /// True when this orthant touches the given side of its parent.
    pub fn is_on_side(self, side: Side<D>) -> bool {
        self.is_upper(side.axis()) == side.is_upper()
    }

    /// The `2^(D-1)` orthants touching `side`, in collapsed-slot order.
    pub fn on_side(side: Side<D>) -> Vec<Self> {
        Self::all().filter(|o| o.is_on_side(side)).collect()
    }

    /// Collapse to a face-local slot: drop the side's axis bit and compact the
    /// remaining axis bits in increasing axis order.
    ///
    /// This is the slot index of a fine patch on its coarse neighbor's face
    /// and the position of its id in the mirror `FineNbrInfo` array.
    pub fn collapse_on_side(self, side: Side<D>) -> usize {
        debug_assert!(self.is_on_side(side));
        let mut slot = 0usize;
        let mut out_bit = 0;
        for axis in 0..D {
            if axis == side.axis() {
                continue;
            }
            if self.is_upper(axis) {
                slot |= 1 << out_bit;
            }
            out_bit += 1;
        }
        slot
    }

    /// Collapse to an edge-local slot (3D): the bit along the edge's tangent
    /// axis. Slot index of a fine patch on its coarse neighbor's edge.
    pub fn collapse_on_edge(self, edge: Edge) -> usize {
        debug_assert!(D == 3);
        if self.is_upper(edge.tangent_axis()) { 1 } else { 0 }
    }

    /// True when this orthant touches the given edge of its parent (3D).
    pub fn is_on_edge(self, edge: Edge) -> bool {
        debug_assert!(D == 3);
        let axes = edge.fixed_axes();
        let upper = edge.fixed_upper();
        self.is_upper(axes[0]) == upper[0] && self.is_upper(axes[1]) == upper[1]
    }

    /// The two orthants touching `edge`, ordered by tangent-axis bit (3D).
    pub fn on_edge(edge: Edge) -> Vec<Self> {
        debug_assert!(D == 3);
        let mut out: Vec<Self> = Self::all().filter(|o| o.is_on_edge(edge)).collect();
        out.sort_by_key(|o| o.collapse_on_edge(edge));
        out
    }
}

impl<const D: usize> fmt::Debug for Orthant<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Orthant::null")
        } else {
            write!(f, "Orthant({:0width$b})", self.0, width = D)
        }
    }
}
