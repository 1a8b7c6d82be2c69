//! Count Exchange: resolve how many items each participant receives from each
//! peer on its receive-list, given what every participant intends to send.
//!
//! All algorithms are semantically equivalent; they differ only in message
//! count and synchronization. The group-wide ones (dense, two-step, group put)
//! see every sender's count, so a listed peer that sends nothing resolves to
//! zero, and an unlisted peer reporting a non-zero count is a protocol error.
//! The list-restricted ones wait on exactly the receive-list.

pub mod dense;
pub mod proclists;
pub mod put;
pub mod two_step;

use crate::algs::communicator::{phase, CommTag, Communicator};
use crate::algs::proclist::{validate_lists, CountTable, ProcessList};
use crate::algs::selector::{self, CountStrategy};
use crate::config::ExchangeConfig;
use crate::debug_invariants::DebugInvariants;
use crate::exchange_error::ExchangeError;

/// Resolve receive counts with the strategy the selector picks for `cfg`.
///
/// The send-list is `send.peers()`. The result is aligned with
/// `receive_list`.
///
/// # Errors
/// Configuration errors for malformed lists or configuration (before any
/// message is posted), `Protocol` if peers disagree about who sends to whom,
/// `Communication` naming the peer whose transfer failed.
pub fn resolve_receive_counts<C: Communicator>(
    send: &CountTable,
    receive_list: &ProcessList,
    comm: &C,
    cfg: &ExchangeConfig,
) -> Result<CountTable, ExchangeError> {
    cfg.validate()?;
    validate_lists(send.peers(), receive_list, comm.size())?;
    let selection = selector::select(send.len(), receive_list.len(), comm, cfg)?;
    resolve_receive_counts_with(selection.counts, send, receive_list, comm, cfg.tag)
}

/// Resolve receive counts with one pinned algorithm.
///
/// Every member of the group must pass the same `strategy` and `tag`.
pub fn resolve_receive_counts_with<C: Communicator>(
    strategy: CountStrategy,
    send: &CountTable,
    receive_list: &ProcessList,
    comm: &C,
    tag: CommTag,
) -> Result<CountTable, ExchangeError> {
    validate_lists(send.peers(), receive_list, comm.size())?;
    if let CountStrategy::Put { .. } = strategy {
        if comm.one_sided().is_none() {
            return Err(ExchangeError::Unsupported("one-sided windows"));
        }
    }

    let counts = match strategy {
        CountStrategy::Dense => dense::resolve(comm, tag.offset(phase::DENSE), send, receive_list)?,
        CountStrategy::TwoStep => two_step::resolve(comm, tag, send, receive_list)?,
        CountStrategy::Put { scope, config } => put::resolve(comm, send, receive_list, scope, config)?,
        CountStrategy::Proclists(method) => {
            proclists::resolve(comm, tag.offset(phase::LISTED), method, send, receive_list)?
        }
    };
    let table = CountTable::new(receive_list.clone(), counts)?;
    table.debug_assert_invariants();
    log::debug!(
        "rank {}: {:?} resolved {} items from {} peers",
        comm.rank(),
        strategy,
        table.total(),
        table.len()
    );
    Ok(table)
}

/// This participant's send counts as one word per group member.
pub(crate) fn dense_row(send: &CountTable, size: usize) -> Vec<u64> {
    let mut row = vec![0u64; size];
    for (peer, count) in send.iter() {
        row[peer] = count as u64;
    }
    row
}

/// Pick the receive-list entries out of a full column `from[q]` (count rank
/// `q` sends here).
pub(crate) fn listed_column(
    from: &[u64],
    receive_list: &ProcessList,
) -> Result<Vec<usize>, ExchangeError> {
    if let Some((peer, &count)) = from
        .iter()
        .enumerate()
        .find(|&(q, &c)| c != 0 && !receive_list.contains(q))
    {
        return Err(ExchangeError::Protocol {
            peer,
            reason: format!("sends {count} items but is not on the receive-list"),
        });
    }
    receive_list.iter().map(|q| to_count(q, from[q])).collect()
}

pub(crate) fn to_count(peer: usize, word: u64) -> Result<usize, ExchangeError> {
    usize::try_from(word).map_err(|_| ExchangeError::Protocol {
        peer,
        reason: format!("count {word} does not fit this platform"),
    })
}
