//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange rounds post every
//! receive and send first and only then call `.wait()` on each handle.
//!
//! Besides point-to-point messaging a [`Communicator`] exposes three collective
//! hooks (`alltoall_words`, `alltoallv`, `allreduce_max`). Their default bodies
//! are built from point-to-point rounds; a backend with a native collective
//! library (MPI) overrides them.

use crate::algs::round;
use crate::algs::window::{OneSided, WindowId};
use crate::exchange_error::ExchangeError;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use thiserror::Error;

/// Message tag namespace for one family of exchanges.
///
/// Each exchange phase uses a fixed offset from the base tag, so two libraries
/// sharing a group only need distinct bases.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    pub const fn base(self) -> u16 {
        self.0
    }
    /// Tag `k` steps above this one (wrapping).
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

impl Default for CommTag {
    fn default() -> Self {
        CommTag(0x5A00)
    }
}

/// Tag offsets of the individual exchange phases.
pub(crate) mod phase {
    pub const DENSE: u16 = 0;
    pub const GRID_ROW: u16 = 1;
    pub const GRID_COLUMN: u16 = 2;
    pub const LISTED: u16 = 3;
    /// Uses two consecutive tags (reduce, broadcast).
    pub const SELECT: u16 = 4;
    pub const DATA: u16 = 8;
}

/// Failure reported by the transport for one operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The link to this peer is down.
    #[error("link to rank {0} is down")]
    LinkDown(usize),
    /// A serial communicator has no remote peers.
    #[error("no remote peers in a serial communicator")]
    NoPeers,
    /// The peer is not a member of the group.
    #[error("rank {peer} outside group of size {size}")]
    InvalidRank { peer: usize, size: usize },
    /// A message arrived with a different length than the receiver posted.
    #[error("message from rank {peer}: expected {expected} bytes, got {got}")]
    LengthMismatch {
        peer: usize,
        expected: usize,
        got: usize,
    },
    /// A multi-round algorithm failed at `origin` and the failure was
    /// forwarded here instead of the expected data.
    #[error("exchange already failed at rank {origin}")]
    Upstream { origin: usize },
    /// The target has not exposed the addressed window.
    #[error("rank {target} has no exposed window {window}")]
    WindowNotExposed { target: usize, window: u64 },
    /// A put would write past the end of the target window.
    #[error("put of {len} words at offset {offset} exceeds window of rank {target}")]
    WindowOutOfBounds {
        target: usize,
        offset: usize,
        len: usize,
    },
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (empty for sends).
    fn wait(self) -> Result<Vec<u8>, TransportError>;
}

/// A handle that completed when it was created.
#[derive(Debug)]
pub struct Ready(pub Result<Vec<u8>, TransportError>);

impl Wait for Ready {
    fn wait(self) -> Result<Vec<u8>, TransportError> {
        self.0
    }
}

/// Non-blocking communication interface of one participant.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of exactly `len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);

    /// One-sided window capability, if the backend has one.
    fn one_sided(&self) -> Option<&dyn OneSided> {
        None
    }

    /// Dense exchange of one word with every member; `words[q]` goes to rank
    /// `q` and entry `q` of the result came from rank `q`.
    fn alltoall_words(&self, tag: CommTag, words: &[u64]) -> Result<Vec<u64>, ExchangeError>
    where
        Self: Sized,
    {
        round::alltoall_words(self, tag, words)
    }

    /// Variable-count exchange in which only the listed pairs carry bytes.
    /// Returns one buffer per entry of `recvs`, in order.
    fn alltoallv(
        &self,
        tag: CommTag,
        sends: &[(usize, &[u8])],
        recvs: &[(usize, usize)],
    ) -> Result<Vec<Vec<u8>>, ExchangeError>
    where
        Self: Sized,
    {
        round::sparse_round(self, tag, sends, recvs)
    }

    /// Group-wide maximum of `value`.
    fn allreduce_max(&self, tag: CommTag, value: u64) -> Result<u64, ExchangeError>
    where
        Self: Sized,
    {
        round::allreduce_max_tree(self, tag, value)
    }
}

/// Compile-time no-op comm for a serial group of one.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = Ready;
    type RecvHandle = Ready;

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) -> Ready {
        Ready(Err(TransportError::NoPeers))
    }
    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) -> Ready {
        Ready(Err(TransportError::NoPeers))
    }
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
}

// --- LocalComm: intra-process group, one participant per thread ---

type Key = (usize, usize, u16); // (src, dst, tag)

enum Envelope {
    Data(Bytes),
    /// Delivered instead of data when the directed link is down.
    Broken,
}

struct WindowSlot {
    words: Vec<u64>,
    /// First writer whose put failed on a broken link.
    broken_by: Option<usize>,
}

struct Shared {
    size: usize,
    mailbox: Mutex<HashMap<Key, VecDeque<Envelope>>>,
    arrived: Condvar,
    barrier: Barrier,
    broken: DashSet<(usize, usize)>,
    windows: DashMap<(u64, usize), Mutex<WindowSlot>>,
    window_seq: Vec<AtomicU64>,
}

impl Shared {
    fn deliver(&self, key: Key, env: Envelope) {
        let mut mb = self.mailbox.lock();
        mb.entry(key).or_default().push_back(env);
        self.arrived.notify_all();
    }

    fn link_down(&self, src: usize, dst: usize) -> bool {
        self.broken.contains(&(src, dst))
    }
}

/// An in-process process group of fixed size.
///
/// Participants are [`LocalComm`] handles, normally driven from one thread
/// each via [`LocalGroup::run`].
#[derive(Clone)]
pub struct LocalGroup {
    shared: Arc<Shared>,
}

impl LocalGroup {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a process group needs at least one member");
        Self {
            shared: Arc::new(Shared {
                size,
                mailbox: Mutex::new(HashMap::new()),
                arrived: Condvar::new(),
                barrier: Barrier::new(size),
                broken: DashSet::new(),
                windows: DashMap::new(),
                window_seq: (0..size).map(|_| AtomicU64::new(0)).collect(),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Communicator of participant `rank`.
    pub fn comm(&self, rank: usize) -> LocalComm {
        assert!(rank < self.shared.size, "rank {rank} outside group");
        LocalComm {
            rank,
            shared: self.shared.clone(),
        }
    }

    /// Take the directed link `src → dst` down. Sends and puts on it fail on
    /// the sender and surface as a broken link on the receiver.
    pub fn fail_link(&self, src: usize, dst: usize) {
        self.shared.broken.insert((src, dst));
    }

    /// Bring every link back up.
    pub fn heal(&self) {
        self.shared.broken.clear();
    }

    /// Run `f` once per participant, each on its own thread, and collect the
    /// results in rank order.
    pub fn run<R, F>(&self, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..self.size())
                .map(|rank| {
                    let comm = self.comm(rank);
                    let f = &f;
                    s.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

impl std::fmt::Debug for LocalGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGroup")
            .field("size", &self.shared.size)
            .finish()
    }
}

/// One participant of a [`LocalGroup`].
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

pub struct LocalRecv {
    shared: Arc<Shared>,
    key: Key,
    len: usize,
}

impl Wait for LocalRecv {
    fn wait(self) -> Result<Vec<u8>, TransportError> {
        let peer = self.key.0;
        if peer >= self.shared.size {
            return Err(TransportError::InvalidRank {
                peer,
                size: self.shared.size,
            });
        }
        let mut mb = self.shared.mailbox.lock();
        let env = loop {
            if let Some(queue) = mb.get_mut(&self.key) {
                if let Some(env) = queue.pop_front() {
                    if queue.is_empty() {
                        mb.remove(&self.key);
                    }
                    break env;
                }
            }
            self.shared.arrived.wait(&mut mb);
        };
        drop(mb);
        match env {
            Envelope::Broken => Err(TransportError::LinkDown(peer)),
            Envelope::Data(bytes) if bytes.len() != self.len => {
                Err(TransportError::LengthMismatch {
                    peer,
                    expected: self.len,
                    got: bytes.len(),
                })
            }
            Envelope::Data(bytes) => Ok(bytes.to_vec()),
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = Ready;
    type RecvHandle = LocalRecv;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Ready {
        if peer >= self.shared.size {
            return Ready(Err(TransportError::InvalidRank {
                peer,
                size: self.shared.size,
            }));
        }
        let key = (self.rank, peer, tag);
        if self.shared.link_down(self.rank, peer) {
            self.shared.deliver(key, Envelope::Broken);
            return Ready(Err(TransportError::LinkDown(peer)));
        }
        self.shared
            .deliver(key, Envelope::Data(Bytes::copy_from_slice(buf)));
        Ready(Ok(Vec::new()))
    }

    fn irecv(&self, peer: usize, tag: u16, len: usize) -> LocalRecv {
        LocalRecv {
            shared: self.shared.clone(),
            key: (peer, self.rank, tag),
            len,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn one_sided(&self) -> Option<&dyn OneSided> {
        Some(self)
    }
}

impl OneSided for LocalComm {
    fn expose(&self, words: Vec<u64>) -> Result<WindowId, TransportError> {
        let seq = self.shared.window_seq[self.rank].fetch_add(1, Ordering::Relaxed);
        self.shared.windows.insert(
            (seq, self.rank),
            Mutex::new(WindowSlot {
                words,
                broken_by: None,
            }),
        );
        Ok(WindowId(seq))
    }

    fn put(
        &self,
        window: WindowId,
        target: usize,
        offset: usize,
        words: &[u64],
    ) -> Result<(), TransportError> {
        if target >= self.shared.size {
            return Err(TransportError::InvalidRank {
                peer: target,
                size: self.shared.size,
            });
        }
        let entry = self
            .shared
            .windows
            .get(&(window.0, target))
            .ok_or(TransportError::WindowNotExposed {
                target,
                window: window.0,
            })?;
        let mut slot = entry.lock();
        if self.shared.link_down(self.rank, target) {
            slot.broken_by.get_or_insert(self.rank);
            return Err(TransportError::LinkDown(target));
        }
        let end = offset + words.len();
        if end > slot.words.len() {
            return Err(TransportError::WindowOutOfBounds {
                target,
                offset,
                len: words.len(),
            });
        }
        slot.words[offset..end].copy_from_slice(words);
        Ok(())
    }

    fn read(&self, window: WindowId) -> Result<Vec<u64>, TransportError> {
        let entry = self
            .shared
            .windows
            .get(&(window.0, self.rank))
            .ok_or(TransportError::WindowNotExposed {
                target: self.rank,
                window: window.0,
            })?;
        let slot = entry.lock();
        match slot.broken_by {
            Some(writer) => Err(TransportError::LinkDown(writer)),
            None => Ok(slot.words.clone()),
        }
    }

    fn retract(&self, window: WindowId) -> Result<Vec<u64>, TransportError> {
        let (_, slot) = self
            .shared
            .windows
            .remove(&(window.0, self.rank))
            .ok_or(TransportError::WindowNotExposed {
                target: self.rank,
                window: window.0,
            })?;
        let slot = slot.into_inner();
        match slot.broken_by {
            Some(writer) => Err(TransportError::LinkDown(writer)),
            None => Ok(slot.words),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{CommTag, Communicator, TransportError, Wait};
    use crate::exchange_error::ExchangeError;
    use std::sync::Arc;
    use mpi::collective::SystemOperation;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::traits::Communicator as _;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use mpi::Count;

    /// World communicator of an MPI job. No one-sided support.
    pub struct MpiComm {
        world: Arc<SimpleCommunicator>,
        _universe: Arc<Universe>,
        rank: usize,
        size: usize,
    }

    // SAFETY: a participant never drives one exchange from two threads, so the
    // MPI handles are only touched by one thread at a time.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Result<Self, ExchangeError> {
            let universe = mpi::initialize().ok_or(ExchangeError::Unsupported(
                "MPI already initialized in this process",
            ))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Arc::new(world),
                _universe: Arc::new(universe),
                rank,
                size,
            })
        }
    }

    pub struct MpiSend {
        finish: Option<Box<dyn FnOnce()>>,
    }

    impl Wait for MpiSend {
        fn wait(mut self) -> Result<Vec<u8>, TransportError> {
            if let Some(finish) = self.finish.take() {
                finish();
            }
            Ok(Vec::new())
        }
    }

    pub struct MpiRecv {
        world: Arc<SimpleCommunicator>,
        peer: usize,
        tag: u16,
        len: usize,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Result<Vec<u8>, TransportError> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer as i32)
                .receive_vec_with_tag::<u8>(self.tag as i32);
            if data.len() != self.len {
                return Err(TransportError::LengthMismatch {
                    peer: self.peer,
                    expected: self.len,
                    got: data.len(),
                });
            }
            Ok(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let owned: &'static [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let raw = owned as *const [u8] as *mut [u8];
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, owned, tag as i32);
            MpiSend {
                finish: Some(Box::new(move || {
                    req.wait();
                    // SAFETY: the request completed, MPI no longer reads the buffer.
                    drop(unsafe { Box::from_raw(raw) });
                })),
            }
        }

        fn irecv(&self, peer: usize, tag: u16, len: usize) -> MpiRecv {
            MpiRecv {
                world: self.world.clone(),
                peer,
                tag,
                len,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn alltoall_words(
            &self,
            _tag: CommTag,
            words: &[u64],
        ) -> Result<Vec<u64>, ExchangeError> {
            let mut out = vec![0u64; self.size];
            self.world.all_to_all_into(words, &mut out[..]);
            Ok(out)
        }

        fn alltoallv(
            &self,
            _tag: CommTag,
            sends: &[(usize, &[u8])],
            recvs: &[(usize, usize)],
        ) -> Result<Vec<Vec<u8>>, ExchangeError> {
            let mut send_counts = vec![0 as Count; self.size];
            let mut send_bufs: Vec<&[u8]> = vec![&[]; self.size];
            for &(peer, bytes) in sends {
                send_counts[peer] = to_count(bytes.len())?;
                send_bufs[peer] = bytes;
            }
            let send_buf: Vec<u8> = send_bufs.concat();
            let send_displs = displacements(&send_counts)?;

            let mut recv_counts = vec![0 as Count; self.size];
            for &(peer, len) in recvs {
                recv_counts[peer] = to_count(len)?;
            }
            let recv_displs = displacements(&recv_counts)?;
            let total: usize = recvs.iter().map(|&(_, len)| len).sum();
            let mut recv_buf = vec![0u8; total];
            {
                let partition = Partition::new(&send_buf[..], &send_counts[..], &send_displs[..]);
                let mut partition_mut =
                    PartitionMut::new(&mut recv_buf[..], &recv_counts[..], &recv_displs[..]);
                self.world
                    .all_to_all_varcount_into(&partition, &mut partition_mut);
            }
            Ok(recvs
                .iter()
                .map(|&(peer, len)| {
                    let start = recv_displs[peer] as usize;
                    recv_buf[start..start + len].to_vec()
                })
                .collect())
        }

        fn allreduce_max(&self, _tag: CommTag, value: u64) -> Result<u64, ExchangeError> {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::max());
            Ok(out)
        }
    }

    /// MPI counts and displacements are `i32`; larger buffers are refused
    /// rather than truncated.
    fn to_count(len: usize) -> Result<Count, ExchangeError> {
        Count::try_from(len)
            .map_err(|_| ExchangeError::Unsupported("variable-count collective over i32::MAX bytes"))
    }

    fn displacements(counts: &[Count]) -> Result<Vec<Count>, ExchangeError> {
        let mut acc: Count = 0;
        counts
            .iter()
            .map(|&x| {
                let tmp = acc;
                acc = acc.checked_add(x).ok_or(ExchangeError::Unsupported(
                    "variable-count collective over i32::MAX bytes",
                ))?;
                Ok(tmp)
            })
            .collect()
    }

}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let group = LocalGroup::new(2);
        let comm0 = group.comm(0);
        let comm1 = group.comm(1);

        // post the receive on rank 1 before rank 0 sends
        let recv_handle = comm1.irecv(0, 7, 4);
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        assert!(send_handle.wait().is_ok());

        let data = recv_handle.wait().expect("data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn broken_link_fails_both_ends() {
        let group = LocalGroup::new(2);
        group.fail_link(0, 1);
        let s = group.comm(0).isend(1, 3, &[9]);
        assert_eq!(s.wait(), Err(TransportError::LinkDown(1)));
        let r = group.comm(1).irecv(0, 3, 1);
        assert_eq!(r.wait(), Err(TransportError::LinkDown(0)));

        // the reverse direction still works
        let _ = group.comm(1).isend(0, 3, &[5]);
        assert_eq!(group.comm(0).irecv(1, 3, 1).wait(), Ok(vec![5]));
    }

    #[test]
    fn length_mismatch_is_reported() {
        let group = LocalGroup::new(2);
        let _ = group.comm(0).isend(1, 1, &[1, 2, 3]);
        let got = group.comm(1).irecv(0, 1, 4).wait();
        assert_eq!(
            got,
            Err(TransportError::LengthMismatch {
                peer: 0,
                expected: 4,
                got: 3
            })
        );
    }

    #[test]
    fn windows_are_scoped_per_owner() {
        let group = LocalGroup::new(2);
        let c0 = group.comm(0);
        let c1 = group.comm(1);
        let w0 = c0.expose(vec![0; 2]).unwrap();
        let w1 = c1.expose(vec![0; 2]).unwrap();
        assert_eq!(w0, w1);
        c0.put(w0, 1, 0, &[11]).unwrap();
        c1.put(w1, 0, 1, &[22]).unwrap();
        assert_eq!(c1.read(w1).unwrap(), vec![11, 0]);
        assert_eq!(c0.retract(w0).unwrap(), vec![0, 22]);
        assert!(matches!(
            c1.put(w1, 0, 0, &[1]),
            Err(TransportError::WindowNotExposed { target: 0, .. })
        ));
        assert!(matches!(
            c0.put(w0, 1, 1, &[1, 2]),
            Err(TransportError::WindowOutOfBounds { target: 1, .. })
        ));
    }

    #[test]
    fn no_comm_has_no_peers() {
        let comm = NoComm;
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.irecv(0, 1, 0).wait(), Err(TransportError::NoPeers));
        assert!(comm.one_sided().is_none());
    }
}
