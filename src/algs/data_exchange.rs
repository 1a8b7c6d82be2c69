//! Sparse Data Exchange: move payload segments between listed peers.
//!
//! Three payload shapes share one core, [`exchange`]:
//! - **fixed**: every listed pair moves the same number of elements of one
//!   type ([`exchange_fixed`]);
//! - **variable**: one element type, a count per pair ([`exchange_variable`]);
//! - **heterogeneous**: a count *and* an element size per pair
//!   ([`exchange_heterogeneous`]).
//!
//! A call either returns a buffer in which every expected segment has been
//! written exactly once, or an error. Partially received data is dropped.

use crate::algs::communicator::{phase, CommTag, Communicator};
use crate::algs::proclist::{validate_lists, CountTable, ProcessList};
use crate::algs::round::sparse_round;
use crate::algs::selector::{self, DataStrategy};
use crate::config::ExchangeConfig;
use crate::debug_invariants::DebugInvariants;
use crate::exchange_error::ExchangeError;
use bytemuck::Pod;

/// Size descriptor of one element type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Datatype {
    size: usize,
}

impl Datatype {
    pub const fn of<T: Pod>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
        }
    }

    /// An opaque element of `size` bytes.
    pub const fn bytes(size: usize) -> Self {
        Self { size }
    }

    pub const fn size(self) -> usize {
        self.size
    }
}

/// One peer's slice of an [`ExchangeBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    pub peer: usize,
    /// Byte offset into the buffer.
    pub offset: usize,
    /// Element count.
    pub count: usize,
    pub elem: Datatype,
}

impl Segment {
    pub fn byte_len(&self) -> usize {
        self.count * self.elem.size()
    }

    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.byte_len()
    }
}

/// Contiguous payload partitioned into per-peer segments in list order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExchangeBuffer {
    data: Vec<u8>,
    segments: Vec<Segment>,
}

impl ExchangeBuffer {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> ExchangeBufferBuilder {
        ExchangeBufferBuilder::default()
    }

    /// Lay out `data` by `counts`, one element type throughout.
    ///
    /// # Errors
    /// `PayloadLengthMismatch` if `data` does not hold exactly
    /// `counts.total()` elements.
    pub fn from_counts<T: Pod>(data: &[T], counts: &CountTable) -> Result<Self, ExchangeError> {
        if data.len() != counts.total() {
            return Err(ExchangeError::PayloadLengthMismatch {
                expected: counts.total(),
                found: data.len(),
            });
        }
        let elem = Datatype::of::<T>();
        let segments = layout(counts.iter().map(|(peer, count)| (peer, count, elem)));
        Ok(Self {
            data: bytemuck::cast_slice(data).to_vec(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn peers(&self) -> ProcessList {
        self.segments.iter().map(|s| s.peer).collect()
    }

    /// Raw bytes of `peer`'s segment.
    pub fn segment(&self, peer: usize) -> Option<&[u8]> {
        self.find(peer).map(|s| &self.data[s.range()])
    }

    /// `peer`'s segment decoded as `T`. The buffer need not be aligned for `T`.
    pub fn read_segment<T: Pod>(&self, peer: usize) -> Option<Vec<T>> {
        self.segment(peer).map(bytemuck::pod_collect_to_vec::<u8, T>)
    }

    /// Element count of `peer`'s segment.
    pub fn count(&self, peer: usize) -> Option<usize> {
        self.find(peer).map(|s| s.count)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }

    /// No segments at all.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn find(&self, peer: usize) -> Option<&Segment> {
        self.segments.iter().find(|s| s.peer == peer)
    }
}

impl DebugInvariants for ExchangeBuffer {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "ExchangeBuffer");
    }

    fn validate_invariants(&self) -> Result<(), ExchangeError> {
        let mut next = 0usize;
        for s in &self.segments {
            if s.offset != next {
                return Err(ExchangeError::PayloadLengthMismatch {
                    expected: next,
                    found: s.offset,
                });
            }
            next += s.byte_len();
        }
        if next != self.data.len() {
            return Err(ExchangeError::PayloadLengthMismatch {
                expected: next,
                found: self.data.len(),
            });
        }
        self.peers().validate_invariants()
    }
}

/// Builds a send buffer one peer at a time, each with its own element type.
#[derive(Clone, Debug, Default)]
pub struct ExchangeBufferBuilder {
    data: Vec<u8>,
    segments: Vec<Segment>,
}

impl ExchangeBufferBuilder {
    pub fn push<T: Pod>(self, peer: usize, elems: &[T]) -> Self {
        self.append(peer, Datatype::of::<T>(), elems.len(), bytemuck::cast_slice(elems))
    }

    /// Append raw elements of type `elem`.
    ///
    /// # Errors
    /// `PayloadLengthMismatch` if `bytes` is not a whole number of `elem`s.
    /// A zero-sized `elem` only takes an empty slice.
    pub fn push_bytes(
        self,
        peer: usize,
        elem: Datatype,
        bytes: &[u8],
    ) -> Result<Self, ExchangeError> {
        let count = match elem.size() {
            0 if bytes.is_empty() => 0,
            0 => {
                return Err(ExchangeError::PayloadLengthMismatch {
                    expected: 0,
                    found: bytes.len(),
                })
            }
            size if bytes.len() % size == 0 => bytes.len() / size,
            size => {
                return Err(ExchangeError::PayloadLengthMismatch {
                    expected: bytes.len() - bytes.len() % size,
                    found: bytes.len(),
                })
            }
        };
        Ok(self.append(peer, elem, count, bytes))
    }

    fn append(mut self, peer: usize, elem: Datatype, count: usize, bytes: &[u8]) -> Self {
        self.segments.push(Segment {
            peer,
            offset: self.data.len(),
            count,
            elem,
        });
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> ExchangeBuffer {
        ExchangeBuffer {
            data: self.data,
            segments: self.segments,
        }
    }
}

/// Expected receive layout of one exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape<'a> {
    /// Same element type and the same count for every pair.
    Fixed(Datatype),
    /// One element type, per-pair counts.
    Variable(Datatype),
    /// Per-pair counts and per-pair element types, one type per receive peer.
    Heterogeneous(&'a [Datatype]),
}

fn layout(items: impl Iterator<Item = (usize, usize, Datatype)>) -> Vec<Segment> {
    let mut offset = 0;
    items
        .map(|(peer, count, elem)| {
            let seg = Segment {
                peer,
                offset,
                count,
                elem,
            };
            offset += seg.byte_len();
            seg
        })
        .collect()
}

/// Check `send` and `receive` against `shape` and build the receive layout.
fn receive_layout(
    send: &ExchangeBuffer,
    receive: &CountTable,
    shape: Shape<'_>,
) -> Result<Vec<Segment>, ExchangeError> {
    match shape {
        Shape::Fixed(elem) | Shape::Variable(elem) => {
            if let Some(s) = send.segments.iter().find(|s| s.elem != elem) {
                return Err(ExchangeError::PayloadLengthMismatch {
                    expected: elem.size(),
                    found: s.elem.size(),
                });
            }
            if let Shape::Fixed(_) = shape {
                let mut counts = send
                    .segments
                    .iter()
                    .map(|s| s.count)
                    .chain(receive.counts().iter().copied());
                if let Some(first) = counts.next() {
                    if let Some(other) = counts.find(|&c| c != first) {
                        return Err(ExchangeError::PayloadLengthMismatch {
                            expected: first,
                            found: other,
                        });
                    }
                }
            }
            Ok(layout(receive.iter().map(|(peer, count)| (peer, count, elem))))
        }
        Shape::Heterogeneous(types) => {
            if types.len() != receive.len() {
                return Err(ExchangeError::CountLengthMismatch {
                    expected: receive.len(),
                    found: types.len(),
                });
            }
            Ok(layout(
                receive
                    .iter()
                    .zip(types.iter().copied())
                    .map(|((peer, count), elem)| (peer, count, elem)),
            ))
        }
    }
}

/// Shape-generic exchange: send `send`'s segments to their peers and receive
/// the segments `receive` and `shape` describe, in receive-list order.
///
/// # Errors
/// Configuration errors for malformed lists or layouts, `Protocol` when a
/// peer's segment has a different length than expected, `Communication`
/// naming the peer whose transfer failed.
pub fn exchange<C: Communicator>(
    send: &ExchangeBuffer,
    receive: &CountTable,
    shape: Shape<'_>,
    comm: &C,
    cfg: &ExchangeConfig,
) -> Result<ExchangeBuffer, ExchangeError> {
    cfg.validate()?;
    let send_list = send.peers();
    validate_lists(&send_list, receive.peers(), comm.size())?;
    send.validate_invariants()?;
    let segments = receive_layout(send, receive, shape)?;
    let selection = selector::select(send_list.len(), receive.len(), comm, cfg)?;
    exchange_with(
        selection.data,
        send,
        segments,
        comm,
        cfg.tag.offset(phase::DATA),
    )
}

/// Move the payload with one pinned algorithm.
pub fn exchange_with<C: Communicator>(
    strategy: DataStrategy,
    send: &ExchangeBuffer,
    segments: Vec<Segment>,
    comm: &C,
    tag: CommTag,
) -> Result<ExchangeBuffer, ExchangeError> {
    // Empty segments never touch the wire, on either end.
    let sends: Vec<(usize, &[u8])> = send
        .segments
        .iter()
        .filter(|s| s.byte_len() > 0)
        .map(|s| (s.peer, &send.data[s.range()]))
        .collect();
    let recvs: Vec<(usize, usize)> = segments
        .iter()
        .filter(|s| s.byte_len() > 0)
        .map(|s| (s.peer, s.byte_len()))
        .collect();

    let received = match strategy {
        DataStrategy::Sparse => sparse_round(comm, tag, &sends, &recvs)?,
        DataStrategy::Collective => comm.alltoallv(tag, &sends, &recvs)?,
    };

    let total: usize = recvs.iter().map(|&(_, len)| len).sum();
    let mut data = Vec::with_capacity(total);
    for ((peer, len), bytes) in recvs.iter().zip(&received) {
        if bytes.len() != *len {
            return Err(ExchangeError::Protocol {
                peer: *peer,
                reason: format!("segment of {} bytes, expected {len}", bytes.len()),
            });
        }
        data.extend_from_slice(bytes);
    }
    let out = ExchangeBuffer { data, segments };
    out.debug_assert_invariants();
    log::debug!(
        "rank {}: {:?} moved {} bytes out, {} bytes in",
        comm.rank(),
        strategy,
        send.total_bytes(),
        out.total_bytes()
    );
    Ok(out)
}

/// Every listed pair moves exactly `count` elements of `T`. `send` holds
/// `count` elements per send-list peer, in send-list order.
pub fn exchange_fixed<T: Pod, C: Communicator>(
    send: &[T],
    count: usize,
    send_list: &ProcessList,
    receive_list: &ProcessList,
    comm: &C,
    cfg: &ExchangeConfig,
) -> Result<ExchangeBuffer, ExchangeError> {
    let send_counts = CountTable::uniform(send_list.clone(), count);
    let send = ExchangeBuffer::from_counts(send, &send_counts)?;
    let receive = CountTable::uniform(receive_list.clone(), count);
    exchange(&send, &receive, Shape::Fixed(Datatype::of::<T>()), comm, cfg)
}

/// Per-pair element counts of one element type. `send` is laid out by
/// `send_counts`; `recv_counts` is usually the result of
/// [`resolve_receive_counts`](crate::algs::count_exchange::resolve_receive_counts).
pub fn exchange_variable<T: Pod, C: Communicator>(
    send: &[T],
    send_counts: &CountTable,
    recv_counts: &CountTable,
    comm: &C,
    cfg: &ExchangeConfig,
) -> Result<ExchangeBuffer, ExchangeError> {
    let send = ExchangeBuffer::from_counts(send, send_counts)?;
    exchange(&send, recv_counts, Shape::Variable(Datatype::of::<T>()), comm, cfg)
}

/// Per-pair counts and element types. The send side carries its types in
/// `send`'s segments; `recv_types` has one entry per `recv_counts` peer.
pub fn exchange_heterogeneous<C: Communicator>(
    send: &ExchangeBuffer,
    recv_counts: &CountTable,
    recv_types: &[Datatype],
    comm: &C,
    cfg: &ExchangeConfig,
) -> Result<ExchangeBuffer, ExchangeError> {
    exchange(send, recv_counts, Shape::Heterogeneous(recv_types), comm, cfg)
}
