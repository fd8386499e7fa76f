//! Patch topology: feature enumerations, orthant encoding, neighbor
//! descriptors and the per-patch record.

pub mod nbr;
pub mod orthant;
pub mod patch;
pub mod side;

pub use nbr::{CoarseNbrInfo, FineNbrInfo, NbrInfo, NbrType, NormalNbrInfo};
pub use orthant::Orthant;
pub use patch::{PatchId, PatchInfo};
pub use side::{Corner, Edge, Side};
