//! `PatchForestError`: unified error type for patch-forest public APIs.
//!
//! Structural faults (unbalanced forests, dangling neighbor references) are
//! detected at generation time and reported through this type. Expected
//! generator exhaustion (no coarser level available) is *not* an error; see
//! [`DomainGenerator::coarser_domain`](crate::generator::DomainGenerator::coarser_domain),
//! which returns `Option` instead.

use thiserror::Error;

use crate::topology::nbr::NbrType;

/// Unified error type for patch-forest operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatchForestError {
    /// The input forest violates the 2:1 refinement balance required for the
    /// Normal/Coarse/Fine neighbor model.
    #[error("forest is not 2:1 balanced near cell at level {level}, coords {coords:?}")]
    UnbalancedForest { level: u8, coords: Vec<u32> },
    /// Neighbor discovery found a feature pointing at a cell that is neither a
    /// leaf, a leaf's parent, nor covered by leaf children.
    #[error("patch {patch} has a dangling {feature} reference at refinement level {level}")]
    DanglingNeighbor {
        patch: u64,
        feature: &'static str,
        level: u8,
    },
    /// A typed neighbor accessor was called for the wrong relationship shape.
    #[error("wrong neighbor type on {feature}: expected {expected:?}, found {found:?}")]
    WrongNbrType {
        feature: &'static str,
        expected: NbrType,
        found: NbrType,
    },
    /// No neighbor exists on the queried feature (physical boundary).
    #[error("no neighbor on {feature}: feature lies on a physical boundary")]
    NoNbr { feature: &'static str },
    /// Patch cell counts must be even for the patch to be coarsened.
    #[error("patch cell counts {ns:?} must be even to generate coarser levels")]
    OddCellCount { ns: Vec<usize> },
    /// Invalid cycle configuration detected while building the level chain.
    #[error("invalid cycle options: {0}")]
    InvalidCycleOpts(String),
    /// The cycle builder produced zero levels.
    #[error("cycle requires at least one level")]
    EmptyCycle,
    /// A vector was used with a domain layout it was not built for.
    #[error("vector shape mismatch: expected {expected} patch blocks, got {got}")]
    VectorShapeMismatch { expected: usize, got: usize },
    /// A point-to-point exchange with a peer rank failed or was malformed.
    #[error("communication with rank {neighbor} failed: {reason}")]
    CommError { neighbor: usize, reason: String },
}
