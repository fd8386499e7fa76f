//! Point-to-point record exchange rounds.
//!
//! Every round follows the same discipline: post all receives, post all
//! sends, then wait. No blocking wait is issued before every send of the
//! round has been posted, and every handle is drained before returning even
//! when an error is detected, so a failed round never strands a peer.

use std::collections::{BTreeSet, HashMap};
use std::mem::size_of;

use bytemuck::Pod;

use super::communicator::{CommTag, Communicator, Wait};
use super::wire::{WIRE_VERSION, WireCount, cast_slice, cast_slice_from};
use crate::error::PatchForestError;

/// Exchange variable-length record batches with a symmetric peer set.
///
/// Both sides must name the same `peers`; a peer with nothing to send still
/// sends a zero count. Returns the records received from each peer that sent
/// a non-empty batch.
pub fn exchange_records<C, T>(
    comm: &C,
    peers: &BTreeSet<usize>,
    outgoing: &HashMap<usize, Vec<T>>,
    size_tag: CommTag,
    data_tag: CommTag,
) -> Result<HashMap<usize, Vec<T>>, PatchForestError>
where
    C: Communicator,
    T: Pod,
{
    // Round 1: counts.
    let mut count_recvs = Vec::with_capacity(peers.len());
    for &peer in peers {
        count_recvs.push((
            peer,
            comm.irecv(peer, size_tag.as_u16(), size_of::<WireCount>()),
        ));
    }
    let mut count_sends = Vec::with_capacity(peers.len());
    let counts_out: Vec<(usize, WireCount)> = peers
        .iter()
        .map(|&peer| {
            (
                peer,
                WireCount::new(outgoing.get(&peer).map_or(0, Vec::len)),
            )
        })
        .collect();
    for (peer, count) in &counts_out {
        count_sends.push(comm.isend(*peer, size_tag.as_u16(), cast_slice(std::slice::from_ref(count))));
    }

    let mut incoming_counts = HashMap::new();
    let mut maybe_err = None;
    for (peer, handle) in count_recvs {
        match handle.wait() {
            Some(data) if data.len() == size_of::<WireCount>() => {
                let count: &WireCount = &cast_slice_from(&data)[0];
                if count.version() == WIRE_VERSION {
                    incoming_counts.insert(peer, count.get());
                } else {
                    set_err(&mut maybe_err, peer, format!(
                        "wire version mismatch: expected {WIRE_VERSION}, got {}",
                        count.version()
                    ));
                }
            }
            Some(data) => set_err(&mut maybe_err, peer, format!(
                "expected {} bytes for count header, got {}",
                size_of::<WireCount>(),
                data.len()
            )),
            None => set_err(&mut maybe_err, peer, "failed to receive count".into()),
        }
    }
    for send in count_sends {
        let _ = send.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }

    // Round 2: payloads, with exact sizes known from round 1.
    let mut data_recvs = Vec::new();
    for (&peer, &count) in &incoming_counts {
        if count > 0 {
            data_recvs.push((
                peer,
                count,
                comm.irecv(peer, data_tag.as_u16(), count * size_of::<T>()),
            ));
        }
    }
    let mut data_sends = Vec::new();
    for &peer in peers {
        if let Some(items) = outgoing.get(&peer) {
            if !items.is_empty() {
                data_sends.push(comm.isend(peer, data_tag.as_u16(), cast_slice(items)));
            }
        }
    }

    let mut incoming = HashMap::new();
    for (peer, count, handle) in data_recvs {
        match handle.wait() {
            Some(data) if data.len() == count * size_of::<T>() => {
                incoming.insert(peer, cast_slice_from::<T>(&data).to_vec());
            }
            Some(data) => set_err(&mut maybe_err, peer, format!(
                "expected {} records ({} bytes), got {} bytes",
                count,
                count * size_of::<T>(),
                data.len()
            )),
            None => set_err(&mut maybe_err, peer, "failed to receive records".into()),
        }
    }
    for send in data_sends {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

/// Exchange record batches whose counts both sides already know.
///
/// `expected` maps peer rank to the record count that peer will send us;
/// `outgoing` holds the batches we owe. Skips the size round entirely.
pub fn exchange_known<C, T>(
    comm: &C,
    outgoing: &HashMap<usize, Vec<T>>,
    expected: &HashMap<usize, usize>,
    tag: CommTag,
) -> Result<HashMap<usize, Vec<T>>, PatchForestError>
where
    C: Communicator,
    T: Pod,
{
    let mut recvs = Vec::new();
    for (&peer, &count) in expected {
        if count > 0 {
            recvs.push((peer, count, comm.irecv(peer, tag.as_u16(), count * size_of::<T>())));
        }
    }
    let mut sends = Vec::new();
    for (&peer, items) in outgoing {
        if !items.is_empty() {
            sends.push(comm.isend(peer, tag.as_u16(), cast_slice(items)));
        }
    }

    let mut incoming = HashMap::new();
    let mut maybe_err = None;
    for (peer, count, handle) in recvs {
        match handle.wait() {
            Some(data) if data.len() == count * size_of::<T>() => {
                incoming.insert(peer, cast_slice_from::<T>(&data).to_vec());
            }
            Some(data) => set_err(&mut maybe_err, peer, format!(
                "expected {} records ({} bytes), got {} bytes",
                count,
                count * size_of::<T>(),
                data.len()
            )),
            None => set_err(&mut maybe_err, peer, "failed to receive records".into()),
        }
    }
    for send in sends {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

fn set_err(slot: &mut Option<PatchForestError>, neighbor: usize, reason: String) {
    if slot.is_none() {
        *slot = Some(PatchForestError::CommError { neighbor, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use crate::algs::wire::WireU64;

    #[test]
    fn exchange_records_symmetric_pair() {
        let comms = LocalComm::universe(2);
        let peers: BTreeSet<usize> = [0usize, 1].into_iter().collect();
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let peers = peers.clone();
                std::thread::spawn(move || {
                    let me = comm.rank();
                    let other = 1 - me;
                    let my_peers: BTreeSet<usize> =
                        peers.into_iter().filter(|&p| p != me).collect();
                    let mut outgoing = HashMap::new();
                    outgoing.insert(other, vec![WireU64::new(me as u64 * 10)]);
                    let incoming =
                        exchange_records(&comm, &my_peers, &outgoing, CommTag::DescriptorSize, CommTag::DescriptorData)
                            .unwrap();
                    incoming[&other][0].get()
                })
            })
            .collect();
        let results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![10, 0]);
    }

    #[test]
    fn mismatched_count_version_is_rejected() {
        let mut comms = LocalComm::universe(2).into_iter();
        let c0 = comms.next().unwrap();
        let c1 = comms.next().unwrap();
        let sender = std::thread::spawn(move || {
            let mut header = WireCount::new(1);
            header.version_le = 99u16.to_le();
            let send = c0.isend(
                1,
                CommTag::DescriptorSize.as_u16(),
                cast_slice(std::slice::from_ref(&header)),
            );
            let _ = send.wait();
        });
        let my_peers: BTreeSet<usize> = [0].into_iter().collect();
        let outgoing: HashMap<usize, Vec<WireU64>> = HashMap::new();
        let err = exchange_records(
            &c1,
            &my_peers,
            &outgoing,
            CommTag::DescriptorSize,
            CommTag::DescriptorData,
        )
        .unwrap_err();
        match err {
            PatchForestError::CommError { neighbor, reason } => {
                assert_eq!(neighbor, 0);
                assert!(reason.contains("wire version"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        sender.join().unwrap();
    }

    #[test]
    fn exchange_records_zero_counts_ok() {
        let comms = LocalComm::universe(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let other = 1 - comm.rank();
                    let my_peers: BTreeSet<usize> = [other].into_iter().collect();
                    let outgoing: HashMap<usize, Vec<WireU64>> = HashMap::new();
                    let incoming = exchange_records(
                        &comm,
                        &my_peers,
                        &outgoing,
                        CommTag::DescriptorSize,
                        CommTag::DescriptorData,
                    )
                    .unwrap();
                    incoming.len()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 0);
        }
    }
}
