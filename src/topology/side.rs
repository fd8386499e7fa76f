//! Canonical enumerations for the faces, edges and corners of a patch.
//!
//! Every neighbor query is keyed by one of these types rather than a raw
//! integer; transposing a raw index is the classic way to silently corrupt
//! ghost data, so the index arithmetic lives here and nowhere else.
//!
//! Encoding conventions:
//! - [`Side`]: value `2*axis + upper`, so axis 0 gives west/east, axis 1
//!   south/north, axis 2 bottom/top.
//! - [`Corner`]: bit `i` set when the corner sits on the upper end of axis `i`.
//! - [`Edge`] (3D only): `4*tangent_axis + bits`, where the two bits give the
//!   lower/upper position on the remaining axes in increasing axis order.

use std::fmt;

/// One of the `2*D` faces of a patch.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Side<const D: usize>(u8);

impl<const D: usize> Side<D> {
    /// Number of sides of a `D`-dimensional patch.
    pub const COUNT: usize = 2 * D;

    /// Construct from a raw index in `0..2*D`.
    pub fn from_index(idx: usize) -> Self {
        assert!(idx < Self::COUNT, "side index {idx} out of range for D={D}");
        Side(idx as u8)
    }

    pub const fn west() -> Self {
        Side(0)
    }
    pub const fn east() -> Self {
        Side(1)
    }
    pub const fn south() -> Self {
        Side(2)
    }
    pub const fn north() -> Self {
        Side(3)
    }

    /// Lower z face; only meaningful for `D = 3`.
    pub fn bottom() -> Self {
        assert!(D == 3, "bottom() requires D=3");
        Side(4)
    }

    /// Upper z face; only meaningful for `D = 3`.
    pub fn top() -> Self {
        assert!(D == 3, "top() requires D=3");
        Side(5)
    }

    /// Iterate all sides in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Side(i as u8))
    }

    /// The axis this side is orthogonal to.
    #[inline]
    pub const fn axis(self) -> usize {
        (self.0 >> 1) as usize
    }

    /// True when this is the upper face along its axis.
    #[inline]
    pub const fn is_upper(self) -> bool {
        self.0 & 1 == 1
    }

    /// The face directly across the patch.
    #[inline]
    pub const fn opposite(self) -> Self {
        Side(self.0 ^ 1)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    fn name(self) -> &'static str {
        match self.0 {
            0 => "west",
            1 => "east",
            2 => "south",
            3 => "north",
            4 => "bottom",
            5 => "top",
            _ => unreachable!(),
        }
    }
}

impl<const D: usize> fmt::Debug for Side<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Side::{}", self.name())
    }
}

impl<const D: usize> fmt::Display for Side<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One of the 12 edges of a 3D patch, named by the pair of faces it sits
/// between ("bs" = bottom-south, "ne" = north-east, ...).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Edge(u8);

impl Edge {
    pub const COUNT: usize = 12;

    /// Construct from a raw index in `0..12`.
    pub fn from_index(idx: usize) -> Self {
        assert!(idx < Self::COUNT, "edge index {idx} out of range");
        Edge(idx as u8)
    }

    // Tangent x (fixed on y and z):
    pub const fn bs() -> Self {
        Edge(0)
    }
    pub const fn bn() -> Self {
        Edge(1)
    }
    pub const fn ts() -> Self {
        Edge(2)
    }
    pub const fn tn() -> Self {
        Edge(3)
    }
    // Tangent y (fixed on x and z):
    pub const fn bw() -> Self {
        Edge(4)
    }
    pub const fn be() -> Self {
        Edge(5)
    }
    pub const fn tw() -> Self {
        Edge(6)
    }
    pub const fn te() -> Self {
        Edge(7)
    }
    // Tangent z (fixed on x and y):
    pub const fn sw() -> Self {
        Edge(8)
    }
    pub const fn se() -> Self {
        Edge(9)
    }
    pub const fn nw() -> Self {
        Edge(10)
    }
    pub const fn ne() -> Self {
        Edge(11)
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Edge(i as u8))
    }

    /// Axis the edge runs parallel to.
    #[inline]
    pub const fn tangent_axis(self) -> usize {
        (self.0 >> 2) as usize
    }

    /// The two axes the edge is fixed on, in increasing order.
    pub const fn fixed_axes(self) -> [usize; 2] {
        match self.tangent_axis() {
            0 => [1, 2],
            1 => [0, 2],
            _ => [0, 1],
        }
    }

    /// Whether the edge sits on the upper end of each fixed axis, ordered as
    /// [`fixed_axes`](Self::fixed_axes).
    pub const fn fixed_upper(self) -> [bool; 2] {
        [self.0 & 1 == 1, self.0 & 2 == 2]
    }

    /// The edge diagonally across the patch (both fixed positions flipped).
    #[inline]
    pub const fn opposite(self) -> Self {
        Edge(self.0 ^ 3)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    fn name(self) -> &'static str {
        match self.0 {
            0 => "bs",
            1 => "bn",
            2 => "ts",
            3 => "tn",
            4 => "bw",
            5 => "be",
            6 => "tw",
            7 => "te",
            8 => "sw",
            9 => "se",
            10 => "nw",
            11 => "ne",
            _ => unreachable!(),
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edge::{}", self.name())
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One of the `2^D` corners of a patch; bit `i` = upper end of axis `i`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Corner<const D: usize>(u8);

impl<const D: usize> Corner<D> {
    /// Number of corners of a `D`-dimensional patch.
    pub const COUNT: usize = 1 << D;

    /// Construct from a raw index in `0..2^D`.
    pub fn from_index(idx: usize) -> Self {
        assert!(idx < Self::COUNT, "corner index {idx} out of range for D={D}");
        Corner(idx as u8)
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Corner(i as u8))
    }

    /// True when the corner sits on the upper end of `axis`.
    #[inline]
    pub const fn is_upper(self, axis: usize) -> bool {
        (self.0 >> axis) & 1 == 1
    }

    /// The corner diagonally across the patch.
    #[inline]
    pub fn opposite(self) -> Self {
        Corner(self.0 ^ ((Self::COUNT - 1) as u8))
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl<const D: usize> fmt::Debug for Corner<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Corner(")?;
        for axis in 0..D {
            write!(f, "{}", if self.is_upper(axis) { 'u' } else { 'l' })?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_axis_and_opposite() {
        let w = Side::<2>::west();
        assert_eq!(w.axis(), 0);
        assert!(!w.is_upper());
        assert_eq!(w.opposite(), Side::<2>::east());
        assert_eq!(Side::<3>::top().opposite(), Side::<3>::bottom());
        assert_eq!(Side::<2>::all().count(), 4);
        assert_eq!(Side::<3>::all().count(), 6);
    }

    #[test]
    #[should_panic]
    fn side_bottom_requires_3d() {
        let _ = Side::<2>::bottom();
    }

    #[test]
    fn edge_encoding() {
        assert_eq!(Edge::bs().tangent_axis(), 0);
        assert_eq!(Edge::bs().fixed_axes(), [1, 2]);
        assert_eq!(Edge::bs().fixed_upper(), [false, false]);
        assert_eq!(Edge::tn().fixed_upper(), [true, true]);
        assert_eq!(Edge::bs().opposite(), Edge::tn());
        assert_eq!(Edge::se().opposite(), Edge::nw());
        assert_eq!(Edge::all().count(), 12);
        // Indexes round-trip through the named constructors.
        for e in Edge::all() {
            assert_eq!(Edge::from_index(e.index()), e);
        }
    }

    #[test]
    fn corner_bits() {
        let c = Corner::<3>::from_index(0b101);
        assert!(c.is_upper(0));
        assert!(!c.is_upper(1));
        assert!(c.is_upper(2));
        assert_eq!(c.opposite().index(), 0b010);
        assert_eq!(Corner::<2>::all().count(), 4);
    }
}
