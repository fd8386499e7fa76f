//! Thin façade over in-process (mailbox) or inter-process (MPI) message
//! passing.
//!
//! Messages are contiguous byte slices. All handles are waitable and
//! non-blocking; the exchange helpers post every send before waiting on any
//! receive, which is the ordering the deadlock-freedom of the whole library
//! rests on.
//!
//! The rank/size of the communicator is threaded explicitly through every
//! component that needs it; nothing in this crate queries a global default
//! communicator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use dashmap::DashMap;

/// Typed message tags, one per exchange round, so unrelated rounds on the
/// same rank pair never collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommTag {
    DescriptorSize,
    DescriptorData,
    CollectiveGather,
    CollectiveBcast,
    InterfaceGlobal,
    InterfaceUpdate,
    InterfaceScatter,
    RestrictBlock,
    InterpolateBlock,
}

impl CommTag {
    pub const fn as_u16(self) -> u16 {
        0x40 + self as u16
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, expected_len: usize) -> Self::RecvHandle;

    /// This process's rank.
    fn rank(&self) -> usize;
    /// Number of ranks.
    fn size(&self) -> usize;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial use: one rank, no peers.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, peer: usize, _tag: u16, _buf: &[u8]) -> () {
        panic!("NoComm has no peer rank {peer}");
    }
    fn irecv(&self, peer: usize, _tag: u16, _expected_len: usize) -> () {
        panic!("NoComm has no peer rank {peer}");
    }
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// --- LocalComm: in-process ranks sharing a mailbox -------------------------

type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug, Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
}

/// In-process communicator: a universe of ranks sharing one mailbox, each
/// rank driven by its own thread. This is how multi-rank behavior is tested
/// without an MPI launcher.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Create a universe of `size` ranks sharing one mailbox.
    pub fn universe(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: mailbox.clone(),
            })
            .collect()
    }
}

pub struct LocalRecvHandle {
    buf: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalRecvHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let mut guard = self.buf.lock().unwrap();
        guard.take()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecvHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> () {
        debug_assert!(peer < self.size);
        let key = (self.rank, peer, tag);
        self.mailbox
            .slots
            .entry(key)
            .or_default()
            .push_back(Bytes::from(buf.to_vec()));
    }

    fn irecv(&self, peer: usize, tag: u16, _expected_len: usize) -> LocalRecvHandle {
        let key = (peer, self.rank, tag);
        let mailbox = self.mailbox.clone();
        let slot = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let handle = std::thread::spawn(move || {
            loop {
                let msg = mailbox
                    .slots
                    .get_mut(&key)
                    .and_then(|mut q| q.pop_front());
                if let Some(bytes) = msg {
                    *slot_clone.lock().unwrap() = Some(bytes.to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalRecvHandle {
            buf: slot,
            handle: Some(handle),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---------------------------------

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    /// MPI world communicator. Keeps the universe handle alive for the
    /// lifetime of the last clone.
    #[derive(Clone)]
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Arc<mpi::environment::Universe>,
    }

    impl MpiComm {
        pub fn world() -> Self {
            let universe = mpi::initialize().expect("MPI already initialized");
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                world,
                rank,
                size,
                _universe: Arc::new(universe),
            }
        }
    }

    /// Owns the leaked transfer buffer until the request completes.
    pub struct MpiHandle {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
        deliver: bool,
    }

    // The raw buffer pointer is only touched after the request completes.
    unsafe impl Send for MpiHandle {}

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait();
            let boxed = unsafe { Box::from_raw(self.buf) };
            if self.deliver { Some(boxed.into_vec()) } else { None }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr = leaked as *mut [u8];
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, &*leaked, tag as i32);
            MpiHandle {
                req,
                buf: ptr,
                deliver: false,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, expected_len: usize) -> MpiHandle {
            let leaked: &'static mut [u8] =
                Box::leak(vec![0u8; expected_len].into_boxed_slice());
            let ptr = leaked as *mut [u8];
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, leaked, tag as i32);
            MpiHandle {
                req,
                buf: ptr,
                deliver: true,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let comms = LocalComm::universe(2);
        let recv = comms[1].irecv(0, 7, 4);
        comms[0].isend(1, 7, &[1, 2, 3, 4]);
        let data = recv.wait().expect("expected data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn local_messages_queue_in_order() {
        let comms = LocalComm::universe(2);
        comms[0].isend(1, 9, &[1]);
        comms[0].isend(1, 9, &[2]);
        let a = comms[1].irecv(0, 9, 1).wait().unwrap();
        let b = comms[1].irecv(0, 9, 1).wait().unwrap();
        assert_eq!((a[0], b[0]), (1, 2));
    }

    #[test]
    fn separate_universes_do_not_interfere() {
        let u1 = LocalComm::universe(2);
        let u2 = LocalComm::universe(2);
        u1[0].isend(1, 3, &[7]);
        u2[0].isend(1, 3, &[8]);
        assert_eq!(u2[1].irecv(0, 3, 1).wait().unwrap(), vec![8]);
        assert_eq!(u1[1].irecv(0, 3, 1).wait().unwrap(), vec![7]);
    }
}
