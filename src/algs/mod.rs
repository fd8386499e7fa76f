//! Communication primitives: the communicator façade, wire records, the
//! post-all-then-wait exchange rounds, and collectives built on them.

pub mod collectives;
pub mod communicator;
pub mod exchange;
pub mod wire;

pub use collectives::{
    all_reduce_max_f64, all_reduce_sum_f64, all_reduce_sum_u64, exclusive_scan_u64,
};
pub use communicator::{CommTag, Communicator, LocalComm, NoComm, Wait};
pub use exchange::{exchange_known, exchange_records};
