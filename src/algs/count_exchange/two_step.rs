//! Two-step count exchange over a `rows × cols` grid of the group.
//!
//! Rank `r` sits at `(r / cols, r % cols)`. Step one runs along the grid row:
//! each participant hands the row-mate in column `c` its counts for every
//! member of column `c`. Step two runs down the grid column: each participant
//! forwards to every column-mate what its row sent there. Per participant
//! that is `rows + cols` messages instead of `P`.
//!
//! Every participant takes part in both steps, even with nothing to send,
//! and even when its first step failed: it then forwards the failure down
//! its column in place of the counts.

use super::{dense_row, listed_column};
use crate::algs::communicator::{phase, CommTag, Communicator};
use crate::algs::proclist::{CountTable, ProcessList};
use crate::algs::round::{open_status, sparse_round, Failure};
use crate::algs::wire::{encode_status, WireCount};
use crate::exchange_error::ExchangeError;

/// Grid of `size` members: `cols` is the largest divisor not above `√size`.
/// A prime size gives a single column, which degenerates to the dense
/// exchange.
pub fn grid_shape(size: usize) -> (usize, usize) {
    let cols = (1..=size.isqrt().max(1))
        .rev()
        .find(|d| size % d == 0)
        .unwrap_or(1);
    (size / cols, cols)
}

pub fn resolve<C: Communicator>(
    comm: &C,
    tag: CommTag,
    send: &CountTable,
    receive_list: &ProcessList,
) -> Result<Vec<usize>, ExchangeError> {
    let size = comm.size();
    let me = comm.rank();
    let (rows, cols) = grid_shape(size);
    let (my_row, my_col) = (me / cols, me % cols);
    let row = dense_row(send, size);

    let mut failure = Failure::new(me);

    // step 1: along the grid row; payload for column c = my counts for (r, c)
    let outbound: Vec<Vec<u8>> = (0..cols)
        .map(|c| {
            let words: Vec<u64> = (0..rows).map(|r| row[r * cols + c]).collect();
            encode_status(None, &words)
        })
        .collect();
    let sends: Vec<(usize, &[u8])> = outbound
        .iter()
        .enumerate()
        .map(|(c, bytes)| (my_row * cols + c, bytes.as_slice()))
        .collect();
    let recvs: Vec<(usize, usize)> = (0..cols)
        .map(|c| (my_row * cols + c, (rows + 1) * WireCount::SIZE))
        .collect();
    // gathered[c][r] = count (my_row, c) sends to (r, my_col)
    let gathered = match sparse_round(comm, tag.offset(phase::GRID_ROW), &sends, &recvs)
        .and_then(|got| open_all(&recvs, &got, rows))
    {
        Ok(gathered) => gathered,
        Err(e) => {
            failure.note(e);
            vec![vec![0; rows]; cols]
        }
    };

    // step 2: down the grid column; payload for row r = what my row sends to (r, my_col)
    let outbound: Vec<Vec<u8>> = (0..rows)
        .map(|r| {
            let words: Vec<u64> = (0..cols).map(|c| gathered[c][r]).collect();
            encode_status(failure.origin(), &words)
        })
        .collect();
    let sends: Vec<(usize, &[u8])> = outbound
        .iter()
        .enumerate()
        .map(|(r, bytes)| (r * cols + my_col, bytes.as_slice()))
        .collect();
    let recvs: Vec<(usize, usize)> = (0..rows)
        .map(|r| (r * cols + my_col, (cols + 1) * WireCount::SIZE))
        .collect();
    // from_row[r][c] = count (r, c) sends to me
    let column: Vec<u64> = match sparse_round(comm, tag.offset(phase::GRID_COLUMN), &sends, &recvs)
        .and_then(|got| open_all(&recvs, &got, cols))
    {
        Ok(from_row) => from_row.into_iter().flatten().collect(),
        Err(e) => {
            failure.note(e);
            Vec::new()
        }
    };

    log::trace!(
        "rank {me}: two-step on {rows}x{cols} grid, {} messages",
        rows + cols
    );
    let column = failure.check(column)?;
    listed_column(&column, receive_list)
}

fn open_all(
    recvs: &[(usize, usize)],
    got: &[Vec<u8>],
    n: usize,
) -> Result<Vec<Vec<u64>>, ExchangeError> {
    recvs
        .iter()
        .zip(got)
        .map(|(&(peer, _), bytes)| open_status(peer, bytes, n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalGroup;

    #[test]
    fn grid_factorizations() {
        assert_eq!(grid_shape(1), (1, 1));
        assert_eq!(grid_shape(4), (2, 2));
        assert_eq!(grid_shape(6), (3, 2));
        assert_eq!(grid_shape(7), (7, 1));
        assert_eq!(grid_shape(12), (4, 3));
        assert_eq!(grid_shape(64), (8, 8));
    }

    #[test]
    fn ring_pattern_on_six() {
        let group = LocalGroup::new(6);
        let got = group.run(|comm| {
            let me = comm.rank();
            let next = (me + 1) % 6;
            let prev = (me + 5) % 6;
            let send = CountTable::from_pairs([(next, me + 10)]);
            resolve(&comm, CommTag(0x300), &send, &ProcessList::new([prev]))
        });
        for (me, counts) in got.into_iter().enumerate() {
            let prev = (me + 5) % 6;
            assert_eq!(counts.unwrap(), vec![prev + 10]);
        }
    }

    #[test]
    fn row_failure_is_forwarded_down_the_columns() {
        // 2x2 grid: ranks 0 and 1 share a row, 0/2 and 1/3 share columns
        let group = LocalGroup::new(4);
        group.fail_link(0, 1);
        let got = group.run(|comm| {
            let me = comm.rank();
            let send = CountTable::from_pairs([((me + 1) % 4, 1)]);
            resolve(&comm, CommTag(0x380), &send, &ProcessList::new([(me + 3) % 4]))
        });
        let errs: Vec<ExchangeError> = got.into_iter().map(|r| r.unwrap_err()).collect();
        assert_eq!(errs[0].peer(), Some(1));
        assert_eq!(errs[1].peer(), Some(0));
        assert_eq!(errs[2].peer(), Some(0));
        assert_eq!(errs[3].peer(), Some(1));
        for e in &errs {
            assert_eq!(e.kind(), crate::exchange_error::ErrorKind::Communication);
        }
    }
}
