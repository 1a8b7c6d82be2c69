//! One non-blocking point-to-point round, and the collectives built from it.
//!
//! A round posts every receive, then every send, then waits on all receives
//! and finally on all sends. After the first failure it keeps draining the
//! remaining handles so no buffer is left in flight, and only then reports
//! that first failure. Messages to self never touch the transport.
//!
//! Algorithms that chain rounds never stop early: a participant whose round
//! failed still takes part in every later round and sends a status word
//! naming the failure instead of its data, so every peer waiting on it
//! returns an error instead of blocking.

use crate::algs::communicator::{CommTag, Communicator, TransportError, Wait};
use crate::algs::wire::{
    decode_counts, decode_status, encode_counts, encode_status, expect_exact_len, WireCount,
};
use crate::exchange_error::ExchangeError;

enum Pending<H> {
    Remote(H),
    Local(usize),
}

/// Exchange `sends` (peer, bytes) and `recvs` (peer, expected length) in one
/// round. Returns the received buffers in `recvs` order.
pub fn sparse_round<C: Communicator>(
    comm: &C,
    tag: CommTag,
    sends: &[(usize, &[u8])],
    recvs: &[(usize, usize)],
) -> Result<Vec<Vec<u8>>, ExchangeError> {
    let me = comm.rank();
    let t = tag.as_u16();

    // 1) post all receives
    let pending_recvs: Vec<Pending<C::RecvHandle>> = recvs
        .iter()
        .map(|&(peer, len)| {
            if peer == me {
                Pending::Local(len)
            } else {
                Pending::Remote(comm.irecv(peer, t, len))
            }
        })
        .collect();

    // 2) post all sends; the self segment is kept aside
    let mut own: Option<&[u8]> = None;
    let mut pending_sends = Vec::with_capacity(sends.len());
    for &(peer, bytes) in sends {
        if peer == me {
            own = Some(bytes);
        } else {
            pending_sends.push((peer, comm.isend(peer, t, bytes)));
        }
    }

    // 3) wait for all recvs (but do not early-return)
    let mut out = Vec::with_capacity(recvs.len());
    let mut maybe_err = None;
    for (&(peer, _), pending) in recvs.iter().zip(pending_recvs) {
        let got = match pending {
            Pending::Remote(h) => h.wait().map_err(|e| ExchangeError::from_transport(peer, e)),
            Pending::Local(len) => match own.take() {
                Some(bytes) if bytes.len() == len => Ok(bytes.to_vec()),
                Some(bytes) => Err(ExchangeError::Protocol {
                    peer: me,
                    reason: format!("self segment has {} bytes, expected {len}", bytes.len()),
                }),
                None => Err(ExchangeError::Protocol {
                    peer: me,
                    reason: "receive from self without a matching send".into(),
                }),
            },
        };
        match got {
            Ok(bytes) => out.push(bytes),
            Err(e) if maybe_err.is_none() => {
                log::warn!("rank {me}: receive from rank {peer} failed: {e}");
                maybe_err = Some(e);
            }
            Err(_) => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for (peer, h) in pending_sends {
        if let Err(e) = h.wait() {
            if maybe_err.is_none() {
                log::warn!("rank {me}: send to rank {peer} failed: {e}");
                maybe_err = Some(ExchangeError::from_transport(peer, e));
            }
        }
    }

    if own.is_some() && maybe_err.is_none() {
        maybe_err = Some(ExchangeError::Protocol {
            peer: me,
            reason: "send to self without a matching receive".into(),
        });
    }

    log::trace!(
        "rank {me}: round tag {t:#06x} sent {} / received {} messages",
        sends.len(),
        recvs.len()
    );

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Point-to-point rendition of a dense one-word all-to-all.
pub fn alltoall_words<C: Communicator>(
    comm: &C,
    tag: CommTag,
    words: &[u64],
) -> Result<Vec<u64>, ExchangeError> {
    let size = comm.size();
    if words.len() != size {
        return Err(ExchangeError::CountLengthMismatch {
            expected: size,
            found: words.len(),
        });
    }
    let encoded: Vec<Vec<u8>> = words.iter().map(|&w| encode_counts(&[w])).collect();
    let sends: Vec<(usize, &[u8])> = encoded
        .iter()
        .enumerate()
        .map(|(peer, bytes)| (peer, bytes.as_slice()))
        .collect();
    let recvs: Vec<(usize, usize)> = (0..size).map(|peer| (peer, WireCount::SIZE)).collect();
    let got = sparse_round(comm, tag, &sends, &recvs)?;
    got.iter()
        .enumerate()
        .map(|(peer, bytes)| decode_word(peer, bytes))
        .collect()
}

/// First failure of a multi-round algorithm on this participant.
pub(crate) struct Failure {
    me: usize,
    first: Option<ExchangeError>,
    origin: Option<usize>,
}

impl Failure {
    pub(crate) fn new(me: usize) -> Self {
        Self {
            me,
            first: None,
            origin: None,
        }
    }

    /// Record `err`; only the first one is reported.
    pub(crate) fn note(&mut self, err: ExchangeError) {
        if self.origin.is_none() {
            self.origin = Some(match &err {
                ExchangeError::Communication {
                    source: TransportError::Upstream { origin },
                    ..
                } => *origin,
                _ => self.me,
            });
        }
        if self.first.is_none() {
            self.first = Some(err);
        }
    }

    /// Rank the failure started at, to forward in the status word.
    pub(crate) fn origin(&self) -> Option<usize> {
        self.origin
    }

    /// Keep `value` if nothing failed.
    pub(crate) fn check<T>(self, value: T) -> Result<T, ExchangeError> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }
}

/// Decode `n` status-prefixed counts from `peer`. A forwarded failure is a
/// communication error on `peer`.
pub(crate) fn open_status(peer: usize, bytes: &[u8], n: usize) -> Result<Vec<u64>, ExchangeError> {
    match decode_status(bytes, n) {
        Ok((None, words)) => Ok(words),
        Ok((Some(origin), _)) => Err(ExchangeError::Communication {
            peer,
            source: TransportError::Upstream { origin },
        }),
        Err(reason) => Err(ExchangeError::Protocol { peer, reason }),
    }
}

/// Binomial-tree maximum: reduce towards rank 0, then broadcast back down.
/// `O(log P)` messages per participant.
///
/// Every participant walks both trees to the end. A failure anywhere is
/// forwarded to the root and broadcast from there, so either every rank
/// returns the maximum or every rank returns an error.
pub fn allreduce_max_tree<C: Communicator>(
    comm: &C,
    tag: CommTag,
    value: u64,
) -> Result<u64, ExchangeError> {
    let size = comm.size();
    let rank = comm.rank();
    let reduce = tag;
    let bcast = tag.offset(1);
    let record = 2 * WireCount::SIZE;
    let mut acc = value;
    let mut failure = Failure::new(rank);

    let mut mask = 1usize;
    while mask < size {
        if rank & mask != 0 {
            let bytes = encode_status(failure.origin(), &[acc]);
            if let Err(e) = sparse_round(comm, reduce, &[(rank - mask, bytes.as_slice())], &[]) {
                failure.note(e);
            }
            break;
        }
        let child = rank + mask;
        if child < size {
            match sparse_round(comm, reduce, &[], &[(child, record)])
                .and_then(|got| open_status(child, &got[0], 1))
            {
                Ok(words) => acc = acc.max(words[0]),
                Err(e) => failure.note(e),
            }
        }
        mask <<= 1;
    }

    // rank r > 0 left the loop with mask = lowest set bit of r
    if rank != 0 {
        let parent = rank - mask;
        match sparse_round(comm, bcast, &[], &[(parent, record)])
            .and_then(|got| open_status(parent, &got[0], 1))
        {
            Ok(words) => acc = words[0],
            Err(e) => failure.note(e),
        }
    }
    mask >>= 1;
    let bytes = encode_status(failure.origin(), &[acc]);
    while mask > 0 {
        if rank + mask < size {
            if let Err(e) = sparse_round(comm, bcast, &[(rank + mask, bytes.as_slice())], &[]) {
                failure.note(e);
            }
        }
        mask >>= 1;
    }
    failure.check(acc)
}

/// Decode the single count `peer` sent.
pub(crate) fn decode_word(peer: usize, bytes: &[u8]) -> Result<u64, ExchangeError> {
    expect_exact_len(bytes.len(), WireCount::SIZE)
        .and_then(|()| decode_counts(bytes))
        .map(|words| words[0])
        .map_err(|reason| ExchangeError::Protocol { peer, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalGroup, NoComm};

    #[test]
    fn self_only_round_needs_no_transport() {
        let comm = NoComm;
        let got = sparse_round(&comm, CommTag(1), &[(0, b"abc".as_slice())], &[(0, 3)]).unwrap();
        assert_eq!(got, vec![b"abc".to_vec()]);
    }

    #[test]
    fn unmatched_self_send_is_a_protocol_error() {
        let comm = NoComm;
        let err = sparse_round(&comm, CommTag(1), &[(0, b"x".as_slice())], &[]).unwrap_err();
        assert_eq!(err.kind(), crate::exchange_error::ErrorKind::Protocol);
    }

    #[test]
    fn allreduce_max_on_odd_group() {
        for size in [1, 2, 3, 5, 7, 8] {
            let group = LocalGroup::new(size);
            let got = group.run(|comm| {
                let v = (comm.rank() as u64 * 7) % 5;
                allreduce_max_tree(&comm, CommTag(0x40), v)
            });
            let want = (0..size as u64).map(|r| (r * 7) % 5).max().unwrap();
            for r in got {
                assert_eq!(r.unwrap(), want);
            }
        }
    }

    #[test]
    fn allreduce_failure_reaches_every_rank() {
        let group = LocalGroup::new(6);
        // rank 1 reports to rank 0 first
        group.fail_link(1, 0);
        let got = group.run(|comm| allreduce_max_tree(&comm, CommTag(0x60), comm.rank() as u64));
        for (rank, r) in got.into_iter().enumerate() {
            let err = r.unwrap_err();
            assert_eq!(err.kind(), crate::exchange_error::ErrorKind::Communication, "rank {rank}");
        }
    }

    #[test]
    fn dense_words_transpose() {
        let group = LocalGroup::new(3);
        let got = group.run(|comm| {
            let me = comm.rank() as u64;
            let words: Vec<u64> = (0..3).map(|q| me * 10 + q).collect();
            alltoall_words(&comm, CommTag(0x50), &words)
        });
        for (r, row) in got.into_iter().enumerate() {
            let want: Vec<u64> = (0..3).map(|q| q * 10 + r as u64).collect();
            assert_eq!(row.unwrap(), want);
        }
    }
}
