//! Quad/oct-tree forest description consumed by the domain generator.
//!
//! A [`Forest`] is a set of leaf cells on the implicit quadtree/octree over
//! the unit square/cube. It is a *description*, replicated on every rank and
//! cheap to copy; the heavyweight per-rank patch records are built from it by
//! [`TreeDomainGenerator`](crate::generator::TreeDomainGenerator).

use std::collections::HashSet;

use itertools::Itertools;

use crate::error::PatchForestError;
use crate::topology::orthant::Orthant;
use crate::topology::patch::PatchId;
use crate::topology::side::Side;

/// A cell in a quadtree/octree forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeCell<const D: usize> {
    /// Refinement level (0 is root).
    pub level: u8,
    /// Integer coordinates at the given level.
    pub coords: [u32; D],
}

/// Levels deeper than this would overflow the Morton key.
pub const MAX_LEVEL: u8 = (63 / 3) as u8;

impl<const D: usize> TreeCell<D> {
    /// The root cell covering the whole unit box.
    pub const fn root() -> Self {
        TreeCell {
            level: 0,
            coords: [0; D],
        }
    }

    /// Returns the parent cell, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            None
        } else {
            let mut coords = self.coords;
            for coord in &mut coords {
                *coord /= 2;
            }
            Some(Self {
                level: self.level - 1,
                coords,
            })
        }
    }

    /// Returns the `2^D` children of this cell in orthant order.
    pub fn children(&self) -> Vec<Self> {
        debug_assert!(self.level < MAX_LEVEL);
        let count = 1usize << D;
        let mut children = Vec::with_capacity(count);
        for idx in 0..count {
            let mut coords = [0u32; D];
            for axis in 0..D {
                let bit = (idx >> axis) & 1;
                coords[axis] = self.coords[axis] * 2 + bit as u32;
            }
            children.push(Self {
                level: self.level + 1,
                coords,
            });
        }
        children
    }

    /// The child occupying a given orthant.
    pub fn child(&self, orthant: Orthant<D>) -> Self {
        let mut coords = [0u32; D];
        for axis in 0..D {
            let bit = if orthant.is_upper(axis) { 1 } else { 0 };
            coords[axis] = self.coords[axis] * 2 + bit;
        }
        TreeCell {
            level: self.level + 1,
            coords,
        }
    }

    /// Which orthant of its parent this cell occupies.
    pub fn orthant_in_parent(&self) -> Orthant<D> {
        debug_assert!(self.level > 0);
        let mut idx = 0usize;
        for axis in 0..D {
            if self.coords[axis] & 1 == 1 {
                idx |= 1 << axis;
            }
        }
        Orthant::from_index(idx)
    }

    /// The cell shifted by `deltas` level-cells, or `None` when the shift
    /// leaves the unit box.
    pub fn shifted(&self, deltas: [i64; D]) -> Option<Self> {
        let extent = 1i64 << self.level;
        let mut coords = [0u32; D];
        for axis in 0..D {
            let c = self.coords[axis] as i64 + deltas[axis];
            if c < 0 || c >= extent {
                return None;
            }
            coords[axis] = c as u32;
        }
        Some(Self {
            level: self.level,
            coords,
        })
    }

    /// The same-level neighbor across `side`, or `None` at the unit-box
    /// boundary.
    pub fn face_neighbor(&self, side: Side<D>) -> Option<Self> {
        let mut deltas = [0i64; D];
        deltas[side.axis()] = if side.is_upper() { 1 } else { -1 };
        self.shifted(deltas)
    }

    /// Deterministic patch id for this cell: level offset plus row-major
    /// position within the level grid, shifted so 0 stays a sentinel.
    ///
    /// This is the property that makes repeated coarsening referentially
    /// consistent: a parent's id computed here equals the id the coarser
    /// generation assigns to that cell.
    pub fn patch_id(&self) -> PatchId {
        let mut offset = 0u64;
        for l in 0..self.level {
            offset += 1u64 << (D as u32 * l as u32);
        }
        let extent = 1u64 << self.level;
        let mut linear = 0u64;
        for axis in (0..D).rev() {
            linear = linear * extent + self.coords[axis] as u64;
        }
        PatchId::new(1 + offset + linear)
    }

    /// Space-filling-curve key: Morton interleave of the cell's lower corner
    /// scaled to `max_level`. Keys of disjoint cells are distinct.
    pub fn morton_key(&self, max_level: u8) -> u64 {
        debug_assert!(self.level <= max_level && max_level <= MAX_LEVEL);
        let shift = max_level - self.level;
        let mut key = 0u64;
        for bit in (0..max_level).rev() {
            for axis in 0..D {
                let scaled = (self.coords[axis] as u64) << shift;
                key = (key << 1) | ((scaled >> bit) & 1);
            }
        }
        key
    }

    fn bounds(&self, max_level: u8) -> [(u64, u64); D] {
        let scale = 1u64 << (max_level - self.level);
        let mut bounds = [(0u64, 0u64); D];
        for axis in 0..D {
            let start = self.coords[axis] as u64 * scale;
            bounds[axis] = (start, start + scale);
        }
        bounds
    }
}

/// True when the closed boxes of `a` and `b` touch without overlapping
/// interiors (face, edge or corner adjacency).
fn are_adjacent<const D: usize>(a: &TreeCell<D>, b: &TreeCell<D>, max_level: u8) -> bool {
    let ab = a.bounds(max_level);
    let bb = b.bounds(max_level);
    let mut touches = false;
    for axis in 0..D {
        let (a0, a1) = ab[axis];
        let (b0, b1) = bb[axis];
        if a1 < b0 || b1 < a0 {
            return false;
        }
        if a1 == b0 || b1 == a0 {
            touches = true;
        }
    }
    touches
}

/// Forest representation for quadtrees (`D = 2`) or octrees (`D = 3`).
#[derive(Debug, Clone)]
pub struct Forest<const D: usize> {
    leaves: HashSet<TreeCell<D>>,
}

/// A quadtree forest (`D = 2`).
pub type QuadForest = Forest<2>;
/// An octree forest (`D = 3`).
pub type OctForest = Forest<3>;

impl<const D: usize> Default for Forest<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> Forest<D> {
    /// Create a new forest with a single root cell.
    pub fn new() -> Self {
        let mut leaves = HashSet::new();
        leaves.insert(TreeCell::root());
        Self { leaves }
    }

    pub fn leaves(&self) -> impl Iterator<Item = &TreeCell<D>> {
        self.leaves.iter()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn contains(&self, cell: &TreeCell<D>) -> bool {
        self.leaves.contains(cell)
    }

    /// Deepest leaf level present.
    pub fn max_level(&self) -> u8 {
        self.leaves.iter().map(|cell| cell.level).max().unwrap_or(0)
    }

    /// Replace every leaf by its `2^D` children.
    pub fn refine_all(&mut self) {
        let cells: Vec<_> = self.leaves.iter().copied().collect();
        self.refine_cells(&cells);
    }

    /// Refine all leaf cells whose indicator exceeds the threshold; returns
    /// the number of cells refined.
    pub fn refine_by_indicator<F>(&mut self, indicator: F, threshold: f64) -> usize
    where
        F: Fn(&TreeCell<D>) -> f64,
    {
        let to_refine: Vec<_> = self
            .leaves
            .iter()
            .copied()
            .filter(|cell| indicator(cell) > threshold)
            .collect();
        self.refine_cells(&to_refine)
    }

    /// Replace each listed leaf by its children; cells that are not leaves
    /// are skipped. Returns the number of cells refined.
    pub fn refine_cells(&mut self, cells: &[TreeCell<D>]) -> usize {
        let mut refined = 0;
        for cell in cells {
            if self.leaves.remove(cell) {
                for child in cell.children() {
                    self.leaves.insert(child);
                }
                refined += 1;
            }
        }
        refined
    }

    /// True when no two touching leaves differ by more than one level.
    pub fn is_balanced(&self) -> bool {
        self.first_unbalanced().is_none()
    }

    /// The shallower cell of the first unbalanced touching pair, if any.
    pub fn first_unbalanced(&self) -> Option<TreeCell<D>> {
        let leaves: Vec<_> = self.leaves.iter().copied().collect();
        let max_level = self.max_level();
        for (i, cell) in leaves.iter().enumerate() {
            for other in leaves.iter().skip(i + 1) {
                if cell.level.abs_diff(other.level) > 1 && are_adjacent(cell, other, max_level) {
                    return Some(if cell.level < other.level {
                        *cell
                    } else {
                        *other
                    });
                }
            }
        }
        None
    }

    /// Refine until every pair of touching leaves differs by at most one
    /// level (2:1 balance across faces, edges and corners).
    pub fn balance(&mut self) {
        loop {
            let leaves: Vec<_> = self.leaves.iter().copied().collect();
            let max_level = self.max_level();
            let mut to_refine = HashSet::new();
            for (i, cell) in leaves.iter().enumerate() {
                for other in leaves.iter().skip(i + 1) {
                    if cell.level.abs_diff(other.level) > 1 && are_adjacent(cell, other, max_level)
                    {
                        to_refine.insert(if cell.level < other.level {
                            *cell
                        } else {
                            *other
                        });
                    }
                }
            }

            if to_refine.is_empty() {
                break;
            }

            let cells: Vec<_> = to_refine.into_iter().collect();
            self.refine_cells(&cells);
        }
    }

    /// Derive the next-coarser forest: every deepest-level sibling group is
    /// replaced by its parent, all other leaves carry over. Returns `None`
    /// when only the root remains.
    ///
    /// On a balanced forest every deepest-level leaf has all its siblings
    /// present as leaves, so the replacement is exact and preserves balance.
    pub fn coarsen_deepest(&self) -> Option<Self> {
        let max_level = self.max_level();
        if max_level == 0 {
            return None;
        }
        let mut leaves = HashSet::new();
        for leaf in &self.leaves {
            if leaf.level == max_level {
                leaves.insert(leaf.parent().expect("deepest leaf has a parent"));
            } else {
                leaves.insert(*leaf);
            }
        }
        Some(Self { leaves })
    }

    /// Leaves in space-filling-curve order; the ordering every rank agrees on.
    pub fn sorted_leaves(&self) -> Vec<TreeCell<D>> {
        let max_level = self.max_level();
        self.leaves
            .iter()
            .copied()
            .sorted_by_key(|cell| (cell.morton_key(max_level), cell.level))
            .collect()
    }

    /// Validate that the forest can feed the neighbor model.
    pub fn validate(&self) -> Result<(), PatchForestError> {
        if let Some(cell) = self.first_unbalanced() {
            return Err(PatchForestError::UnbalancedForest {
                level: cell.level,
                coords: cell.coords.to_vec(),
            });
        }
        Ok(())
    }
}
