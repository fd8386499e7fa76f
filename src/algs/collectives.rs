//! Collective reductions built on the point-to-point façade.
//!
//! Gather-to-root then broadcast; adequate for the once-per-construction and
//! once-per-iteration reductions this crate performs. Every rank must enter
//! each collective in the same sequence — no early return on a subset of
//! ranks.

use super::communicator::{CommTag, Communicator, Wait};
use super::wire::{WireF64, WireU64, cast_slice, cast_slice_from};
use crate::error::PatchForestError;

fn gather_bcast<C, T, F>(comm: &C, value: T, reduce: F) -> Result<T, PatchForestError>
where
    C: Communicator,
    T: Copy,
    F: Fn(&[T]) -> T,
    T: WireScalar,
{
    let size = comm.size();
    if size == 1 {
        return Ok(reduce(&[value]));
    }
    let rank = comm.rank();
    if rank == 0 {
        let mut recvs = Vec::with_capacity(size - 1);
        for peer in 1..size {
            recvs.push((peer, comm.irecv(peer, CommTag::CollectiveGather.as_u16(), 8)));
        }
        let mut values = vec![value];
        for (peer, handle) in recvs {
            let data = handle.wait().ok_or_else(|| PatchForestError::CommError {
                neighbor: peer,
                reason: "failed to receive collective contribution".into(),
            })?;
            values.push(T::decode(&data));
        }
        let result = reduce(&values);
        let encoded = result.encode();
        let sends: Vec<_> = (1..size)
            .map(|peer| comm.isend(peer, CommTag::CollectiveBcast.as_u16(), &encoded))
            .collect();
        for send in sends {
            let _ = send.wait();
        }
        Ok(result)
    } else {
        let recv = comm.irecv(0, CommTag::CollectiveBcast.as_u16(), 8);
        let send = comm.isend(0, CommTag::CollectiveGather.as_u16(), &value.encode());
        let _ = send.wait();
        let data = recv.wait().ok_or_else(|| PatchForestError::CommError {
            neighbor: 0,
            reason: "failed to receive collective result".into(),
        })?;
        Ok(T::decode(&data))
    }
}

/// Scalar types the collectives can put on the wire.
pub trait WireScalar: Copy {
    fn encode(self) -> Vec<u8>;
    fn decode(data: &[u8]) -> Self;
}

impl WireScalar for f64 {
    fn encode(self) -> Vec<u8> {
        cast_slice(std::slice::from_ref(&WireF64::new(self))).to_vec()
    }
    fn decode(data: &[u8]) -> Self {
        cast_slice_from::<WireF64>(data)[0].get()
    }
}

impl WireScalar for u64 {
    fn encode(self) -> Vec<u8> {
        cast_slice(std::slice::from_ref(&WireU64::new(self))).to_vec()
    }
    fn decode(data: &[u8]) -> Self {
        cast_slice_from::<WireU64>(data)[0].get()
    }
}

/// Sum of `value` over all ranks; every rank receives the result.
pub fn all_reduce_sum_f64<C: Communicator>(comm: &C, value: f64) -> Result<f64, PatchForestError> {
    gather_bcast(comm, value, |vals| vals.iter().sum())
}

/// Maximum of `value` over all ranks; every rank receives the result.
pub fn all_reduce_max_f64<C: Communicator>(comm: &C, value: f64) -> Result<f64, PatchForestError> {
    gather_bcast(comm, value, |vals| vals.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Sum of `value` over all ranks, as u64.
pub fn all_reduce_sum_u64<C: Communicator>(comm: &C, value: u64) -> Result<u64, PatchForestError> {
    gather_bcast(comm, value, |vals| vals.iter().sum())
}

/// Exclusive prefix sum over ranks: rank r receives the sum of the values of
/// ranks `0..r`. Rank 0 receives 0.
pub fn exclusive_scan_u64<C: Communicator>(comm: &C, value: u64) -> Result<u64, PatchForestError> {
    let size = comm.size();
    if size == 1 {
        return Ok(0);
    }
    let rank = comm.rank();
    if rank == 0 {
        let mut recvs = Vec::with_capacity(size - 1);
        for peer in 1..size {
            recvs.push((peer, comm.irecv(peer, CommTag::CollectiveGather.as_u16(), 8)));
        }
        let mut values = vec![value];
        for (peer, handle) in recvs {
            let data = handle.wait().ok_or_else(|| PatchForestError::CommError {
                neighbor: peer,
                reason: "failed to receive scan contribution".into(),
            })?;
            values.push(u64::decode(&data));
        }
        let mut prefix = 0u64;
        let mut sends = Vec::with_capacity(size - 1);
        for peer in 1..size {
            prefix += values[peer - 1];
            sends.push(comm.isend(peer, CommTag::CollectiveBcast.as_u16(), &prefix.encode()));
        }
        for send in sends {
            let _ = send.wait();
        }
        Ok(0)
    } else {
        let recv = comm.irecv(0, CommTag::CollectiveBcast.as_u16(), 8);
        let send = comm.isend(0, CommTag::CollectiveGather.as_u16(), &value.encode());
        let _ = send.wait();
        let data = recv.wait().ok_or_else(|| PatchForestError::CommError {
            neighbor: 0,
            reason: "failed to receive scan result".into(),
        })?;
        Ok(u64::decode(&data))
    }
}
