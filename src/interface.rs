//! Interface indexing across patch faces.
//!
//! Schur-complement style solvers work on the faces between patches rather
//! than the patches themselves. [`InterfaceMap::build`] enumerates every
//! face piece a rank can see, assigns dense local indexes (pieces fully
//! interior to the rank first, cross-rank pieces after), and derives a dense
//! global numbering by an exclusive scan of per-rank owned counts followed by
//! an owner-to-ghost propagation round.
//!
//! A face between a fine patch and a coarse patch is one piece per fine
//! face: the fine patch sees it as its whole side, the coarse patch as the
//! collapsed-orthant slot of its side. Both ends derive the same canonical
//! key independently, so no negotiation is needed to agree on identity.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::{WireInterfaceGid, WireInterfaceVal};
use crate::algs::collectives::all_reduce_sum_u64;
use crate::algs::collectives::exclusive_scan_u64;
use crate::domain::Domain;
use crate::error::PatchForestError;
use crate::topology::nbr::NbrInfo;
use crate::topology::patch::PatchId;
use crate::topology::side::Side;

/// Canonical identity of one face piece: the lower-id patch of the pair, the
/// side of that patch the piece lies on, and (when that patch is the coarse
/// end) the collapsed-orthant slot on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceKey {
    pub patch: PatchId,
    pub side: usize,
    pub slot: usize,
}

impl InterfaceKey {
    fn encode_side(&self) -> usize {
        self.side | (self.slot << 4)
    }

    fn decode(patch: u64, side_code: usize) -> Self {
        InterfaceKey {
            patch: PatchId::new(patch),
            side: side_code & 0xf,
            slot: side_code >> 4,
        }
    }
}

/// One endpoint of an interface: which patch touches it and on which side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceEnd {
    pub patch: PatchId,
    pub rank: usize,
    pub side: usize,
}

/// One face piece visible to this rank.
#[derive(Debug, Clone)]
pub struct Interface {
    pub key: InterfaceKey,
    pub local_index: usize,
    /// Dense across all ranks; filled during the propagation round.
    pub global_index: usize,
    /// Rank owning the canonical patch.
    pub owner_rank: usize,
    pub ends: Vec<InterfaceEnd>,
}

impl Interface {
    /// Ranks other than `rank` that also hold this interface.
    fn other_ranks(&self, rank: usize) -> BTreeSet<usize> {
        self.ends
            .iter()
            .map(|e| e.rank)
            .filter(|&r| r != rank)
            .collect()
    }
}

pub struct InterfaceMap<const D: usize> {
    interfaces: Vec<Interface>,
    by_key: HashMap<InterfaceKey, usize>,
    rank: usize,
    num_owned: usize,
    num_global: u64,
}

impl<const D: usize> InterfaceMap<D> {
    /// Enumerate, index and globally number every face piece of `domain`
    /// visible to this rank. Collective.
    pub fn build<C: Communicator>(
        domain: &Domain<D>,
        comm: &C,
    ) -> Result<Self, PatchForestError> {
        let rank = domain.rank();
        let mut pieces: BTreeMap<InterfaceKey, Vec<InterfaceEnd>> = BTreeMap::new();
        let mut add = |key: InterfaceKey, a: InterfaceEnd, b: InterfaceEnd| {
            let ends = pieces.entry(key).or_default();
            for end in [a, b] {
                if !ends.contains(&end) {
                    ends.push(end);
                }
            }
        };

        for patch in domain.patch_infos() {
            for side in Side::<D>::all() {
                let Some(nbr) = patch.side_nbr(side) else {
                    continue;
                };
                let mine = InterfaceEnd {
                    patch: patch.id,
                    rank,
                    side: side.index(),
                };
                match nbr {
                    NbrInfo::Normal(info) => {
                        let theirs = InterfaceEnd {
                            patch: info.id,
                            rank: info.rank,
                            side: side.opposite().index(),
                        };
                        let key = if patch.id < info.id {
                            InterfaceKey {
                                patch: patch.id,
                                side: side.index(),
                                slot: 0,
                            }
                        } else {
                            InterfaceKey {
                                patch: info.id,
                                side: side.opposite().index(),
                                slot: 0,
                            }
                        };
                        add(key, mine, theirs);
                    }
                    NbrInfo::Coarse(info) => {
                        let theirs = InterfaceEnd {
                            patch: info.id,
                            rank: info.rank,
                            side: side.opposite().index(),
                        };
                        let key = if patch.id < info.id {
                            InterfaceKey {
                                patch: patch.id,
                                side: side.index(),
                                slot: 0,
                            }
                        } else {
                            InterfaceKey {
                                patch: info.id,
                                side: side.opposite().index(),
                                slot: info.orth_on_coarse,
                            }
                        };
                        add(key, mine, theirs);
                    }
                    NbrInfo::Fine(info) => {
                        for (slot, (&fid, &frank)) in
                            info.ids.iter().zip(info.ranks.iter()).enumerate()
                        {
                            let theirs = InterfaceEnd {
                                patch: fid,
                                rank: frank,
                                side: side.opposite().index(),
                            };
                            let key = if patch.id < fid {
                                InterfaceKey {
                                    patch: patch.id,
                                    side: side.index(),
                                    slot,
                                }
                            } else {
                                InterfaceKey {
                                    patch: fid,
                                    side: side.opposite().index(),
                                    slot: 0,
                                }
                            };
                            add(key, mine, theirs);
                        }
                    }
                }
            }
        }

        let mut nodes: Vec<Interface> = Vec::with_capacity(pieces.len());
        for (key, ends) in pieces {
            let owner_rank = ends
                .iter()
                .find(|e| e.patch == key.patch && e.side == key.side)
                .map(|e| e.rank)
                .ok_or(PatchForestError::CommError {
                    neighbor: rank,
                    reason: format!(
                        "interface {:?} has no canonical end",
                        key
                    ),
                })?;
            nodes.push(Interface {
                key,
                local_index: 0,
                global_index: 0,
                owner_rank,
                ends,
            });
        }

        // Local numbering follows a breadth-first walk of the interface
        // graph, pieces adjacent when they share a patch. Interior pieces
        // are numbered as the walk reaches them; cross-rank pieces are
        // deferred and appended after. Seeds come in key order, so the
        // numbering is deterministic.
        let mut by_patch: HashMap<PatchId, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            for end in &node.ends {
                by_patch.entry(end.patch).or_default().push(i);
            }
        }
        let mut interior_order = Vec::new();
        let mut cross_order = Vec::new();
        let mut seen = vec![false; nodes.len()];
        for seed in 0..nodes.len() {
            if seen[seed] {
                continue;
            }
            seen[seed] = true;
            let mut queue = VecDeque::from([seed]);
            while let Some(i) = queue.pop_front() {
                if nodes[i].other_ranks(rank).is_empty() {
                    interior_order.push(i);
                } else {
                    cross_order.push(i);
                }
                for end in &nodes[i].ends {
                    for &j in &by_patch[&end.patch] {
                        if !seen[j] {
                            seen[j] = true;
                            queue.push_back(j);
                        }
                    }
                }
            }
        }
        let mut slots: Vec<Option<Interface>> = nodes.into_iter().map(Some).collect();
        let mut interfaces: Vec<Interface> = Vec::with_capacity(slots.len());
        for i in interior_order.into_iter().chain(cross_order) {
            let mut iface = slots[i].take().ok_or(PatchForestError::CommError {
                neighbor: rank,
                reason: "interface visited twice in numbering walk".into(),
            })?;
            iface.local_index = interfaces.len();
            interfaces.push(iface);
        }

        // Owned pieces get a dense global range via exclusive scan, then the
        // ids flow from owners to the other holding ranks.
        let num_owned = interfaces.iter().filter(|i| i.owner_rank == rank).count();
        let offset = exclusive_scan_u64(comm, num_owned as u64)?;
        let num_global = all_reduce_sum_u64(comm, num_owned as u64)?;
        let mut next = offset as usize;
        for iface in &mut interfaces {
            if iface.owner_rank == rank {
                iface.global_index = next;
                next += 1;
            }
        }

        let mut peers: BTreeSet<usize> = BTreeSet::new();
        let mut outgoing: HashMap<usize, Vec<WireInterfaceGid>> = HashMap::new();
        for iface in &interfaces {
            for peer in iface.other_ranks(rank) {
                peers.insert(peer);
                if iface.owner_rank == rank {
                    outgoing.entry(peer).or_default().push(WireInterfaceGid::new(
                        iface.key.patch.get(),
                        iface.key.encode_side(),
                        iface.global_index,
                    ));
                }
            }
        }
        let by_key: HashMap<InterfaceKey, usize> = interfaces
            .iter()
            .map(|i| (i.key, i.local_index))
            .collect();
        let incoming = exchange_records(
            comm,
            &peers,
            &outgoing,
            CommTag::DescriptorSize,
            CommTag::InterfaceGlobal,
        )?;
        for (peer, records) in incoming {
            for rec in records {
                let key = InterfaceKey::decode(rec.patch(), rec.side());
                let idx = by_key.get(&key).ok_or(PatchForestError::CommError {
                    neighbor: peer,
                    reason: format!("unknown interface {:?} in id propagation", key),
                })?;
                interfaces[*idx].global_index = rec.gid();
            }
        }

        Ok(InterfaceMap {
            interfaces,
            by_key,
            rank,
            num_owned,
            num_global,
        })
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn num_local(&self) -> usize {
        self.interfaces.len()
    }

    pub fn num_owned(&self) -> usize {
        self.num_owned
    }

    pub fn num_global(&self) -> u64 {
        self.num_global
    }

    pub fn by_key(&self, key: &InterfaceKey) -> Option<&Interface> {
        self.by_key.get(key).map(|&i| &self.interfaces[i])
    }

    fn check_len(&self, len: usize) -> Result<(), PatchForestError> {
        if len != self.interfaces.len() {
            return Err(PatchForestError::VectorShapeMismatch {
                expected: self.interfaces.len(),
                got: len,
            });
        }
        Ok(())
    }

    /// Accumulate every holder's contribution into the owner's entry.
    ///
    /// Non-owner entries are untouched; follow with [`scatter_dist`] to make
    /// all copies agree.
    ///
    /// [`scatter_dist`]: InterfaceMap::scatter_dist
    pub fn update_dist<C: Communicator>(
        &self,
        comm: &C,
        values: &mut [f64],
    ) -> Result<(), PatchForestError> {
        self.check_len(values.len())?;
        let mut peers: BTreeSet<usize> = BTreeSet::new();
        let mut outgoing: HashMap<usize, Vec<WireInterfaceVal>> = HashMap::new();
        for iface in &self.interfaces {
            if iface.owner_rank == self.rank {
                for peer in iface.other_ranks(self.rank) {
                    peers.insert(peer);
                }
            } else {
                peers.insert(iface.owner_rank);
                outgoing
                    .entry(iface.owner_rank)
                    .or_default()
                    .push(WireInterfaceVal::new(
                        iface.key.patch.get(),
                        iface.key.encode_side(),
                        values[iface.local_index],
                    ));
            }
        }
        let incoming = exchange_records(
            comm,
            &peers,
            &outgoing,
            CommTag::DescriptorSize,
            CommTag::InterfaceUpdate,
        )?;
        for (peer, records) in incoming {
            for rec in records {
                let key = InterfaceKey::decode(rec.patch(), rec.side());
                let idx = self.by_key.get(&key).ok_or(PatchForestError::CommError {
                    neighbor: peer,
                    reason: format!("unknown interface {:?} in update", key),
                })?;
                values[*idx] += rec.value();
            }
        }
        Ok(())
    }

    /// Overwrite every holder's entry with the owner's value.
    pub fn scatter_dist<C: Communicator>(
        &self,
        comm: &C,
        values: &mut [f64],
    ) -> Result<(), PatchForestError> {
        self.check_len(values.len())?;
        let mut peers: BTreeSet<usize> = BTreeSet::new();
        let mut outgoing: HashMap<usize, Vec<WireInterfaceVal>> = HashMap::new();
        for iface in &self.interfaces {
            let others = iface.other_ranks(self.rank);
            if iface.owner_rank == self.rank {
                for peer in &others {
                    outgoing.entry(*peer).or_default().push(WireInterfaceVal::new(
                        iface.key.patch.get(),
                        iface.key.encode_side(),
                        values[iface.local_index],
                    ));
                }
            }
            peers.extend(others);
        }
        let incoming = exchange_records(
            comm,
            &peers,
            &outgoing,
            CommTag::DescriptorSize,
            CommTag::InterfaceScatter,
        )?;
        for (peer, records) in incoming {
            for rec in records {
                let key = InterfaceKey::decode(rec.patch(), rec.side());
                let idx = self.by_key.get(&key).ok_or(PatchForestError::CommError {
                    neighbor: peer,
                    reason: format!("unknown interface {:?} in scatter", key),
                })?;
                values[*idx] = rec.value();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::forest::QuadForest;
    use crate::generator::{DomainGenerator, GeneratorOpts, TreeDomainGenerator};

    fn uniform_domain(levels: usize) -> std::sync::Arc<Domain<2>> {
        let mut forest = QuadForest::new();
        for _ in 0..levels {
            forest.refine_all();
        }
        let mut generator =
            TreeDomainGenerator::new(forest, GeneratorOpts::default(), &NoComm).unwrap();
        generator.finest_domain()
    }

    #[test]
    fn uniform_2x2_has_four_interfaces() {
        let domain = uniform_domain(1);
        let map = InterfaceMap::build(&domain, &NoComm).unwrap();
        // 2x2 grid of patches: 2 vertical + 2 horizontal faces.
        assert_eq!(map.num_local(), 4);
        assert_eq!(map.num_owned(), 4);
        assert_eq!(map.num_global(), 4);
    }

    #[test]
    fn global_indexes_are_dense() {
        let domain = uniform_domain(2);
        let map = InterfaceMap::build(&domain, &NoComm).unwrap();
        let mut gids: Vec<usize> = map.interfaces().iter().map(|i| i.global_index).collect();
        gids.sort_unstable();
        let expected: Vec<usize> = (0..map.num_local()).collect();
        assert_eq!(gids, expected);
        // 4x4 patch grid: 2 * 4 * 3 faces.
        assert_eq!(map.num_global(), 24);
    }

    #[test]
    fn refined_corner_counts_fine_pieces() {
        let mut forest = QuadForest::new();
        forest.refine_all();
        forest.refine_cells(&[crate::forest::TreeCell {
            level: 1,
            coords: [0, 0],
        }]);
        let mut generator =
            TreeDomainGenerator::new(forest, GeneratorOpts::default(), &NoComm).unwrap();
        let domain = generator.finest_domain();
        let map = InterfaceMap::build(&domain, &NoComm).unwrap();
        // Base 2x2 grid has 4 faces; refining the SW patch turns each of its
        // 2 outer-facing shared faces into 2 pieces and adds 4 interior
        // faces among the new children.
        assert_eq!(map.num_local(), 4 - 2 + 4 + 4);
    }

    #[test]
    fn serial_update_and_scatter_are_identity() {
        let domain = uniform_domain(1);
        let map = InterfaceMap::build(&domain, &NoComm).unwrap();
        let mut values: Vec<f64> = (0..map.num_local()).map(|i| i as f64).collect();
        let before = values.clone();
        map.update_dist(&NoComm, &mut values).unwrap();
        map.scatter_dist(&NoComm, &mut values).unwrap();
        assert_eq!(values, before);
    }

    #[test]
    fn wrong_length_rejected() {
        let domain = uniform_domain(1);
        let map = InterfaceMap::build(&domain, &NoComm).unwrap();
        let mut values = vec![0.0; map.num_local() + 1];
        let err = map.update_dist(&NoComm, &mut values).unwrap_err();
        assert!(matches!(err, PatchForestError::VectorShapeMismatch { .. }));
    }
}
