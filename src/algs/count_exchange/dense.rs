//! Dense count exchange: one word to and from every member of the group.
//!
//! `O(P)` messages per participant. Correct for any list shape, and the
//! fallback when lists are not sparse or the group is small.

use super::{dense_row, listed_column};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::proclist::{CountTable, ProcessList};
use crate::exchange_error::ExchangeError;

pub fn resolve<C: Communicator>(
    comm: &C,
    tag: CommTag,
    send: &CountTable,
    receive_list: &ProcessList,
) -> Result<Vec<usize>, ExchangeError> {
    let row = dense_row(send, comm.size());
    let column = comm.alltoall_words(tag, &row)?;
    listed_column(&column, receive_list)
}
