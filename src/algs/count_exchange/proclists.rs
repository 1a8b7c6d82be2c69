//! Process-list restricted count exchange.
//!
//! Only the pairs named by the lists talk. The receive-list is authoritative:
//! a participant waits for exactly one count from each peer on it, so a
//! listed peer that never sends keeps the call blocked (there is no timeout).

use super::to_count;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::proclist::{CountTable, ProcessList};
use crate::algs::round::{decode_word, sparse_round};
use crate::algs::selector::ListedMethod;
use crate::algs::wire::{encode_counts, WireCount};
use crate::exchange_error::ExchangeError;

pub fn resolve<C: Communicator>(
    comm: &C,
    tag: CommTag,
    method: ListedMethod,
    send: &CountTable,
    receive_list: &ProcessList,
) -> Result<Vec<usize>, ExchangeError> {
    let outbound: Vec<Vec<u8>> = send
        .counts()
        .iter()
        .map(|&c| encode_counts(&[c as u64]))
        .collect();
    let sends: Vec<(usize, &[u8])> = send
        .peers()
        .iter()
        .zip(&outbound)
        .map(|(peer, bytes)| (peer, bytes.as_slice()))
        .collect();
    let recvs: Vec<(usize, usize)> = receive_list.iter().map(|p| (p, WireCount::SIZE)).collect();

    let got = match method {
        ListedMethod::IsendIrecv => sparse_round(comm, tag, &sends, &recvs)?,
        ListedMethod::Alltoallv => comm.alltoallv(tag, &sends, &recvs)?,
    };
    receive_list
        .iter()
        .zip(&got)
        .map(|(peer, bytes)| to_count(peer, decode_word(peer, bytes)?))
        .collect()
}
