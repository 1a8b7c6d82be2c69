//! One-sided count exchange.
//!
//! Each participant exposes a window of one word per group member; writers
//! put their count for the target at offset `writer_rank`. Phases:
//!
//! 1. expose, then barrier: every window exists before anyone writes;
//! 2. put, then barrier: every write has landed before anyone reads;
//! 3. (three-phase only) read, then barrier: nobody retracts before every
//!    participant has finished with the epoch.
//!
//! The barriers run on every path, including after a failed put, so a failure
//! on one participant never strands the others inside a phase.

use super::{dense_row, listed_column};
use crate::algs::communicator::{Communicator, TransportError};
use crate::algs::proclist::{CountTable, ProcessList};
use crate::algs::selector::PutScope;
use crate::algs::window::ExposedWindow;
use crate::config::{PutConfig, PutPhases, WindowMemory};
use crate::exchange_error::ExchangeError;

pub fn resolve<C: Communicator>(
    comm: &C,
    send: &CountTable,
    receive_list: &ProcessList,
    scope: PutScope,
    config: PutConfig,
) -> Result<Vec<usize>, ExchangeError> {
    let rma = comm
        .one_sided()
        .ok_or(ExchangeError::Unsupported("one-sided windows"))?;
    let size = comm.size();
    let me = comm.rank();

    let targets: Vec<(usize, u64)> = match scope {
        PutScope::Group => dense_row(send, size).into_iter().enumerate().collect(),
        PutScope::Listed => send.iter().map(|(p, c)| (p, c as u64)).collect(),
    };

    // phase 1: expose
    let exposed = ExposedWindow::expose(rma, vec![0u64; size]);
    comm.barrier();

    // phase 2: write
    let mut maybe_err = None;
    if let Ok(win) = &exposed {
        for &(target, count) in &targets {
            if let Err(e) = win.put(target, me, &[count]) {
                if maybe_err.is_none() {
                    log::warn!("rank {me}: put to rank {target} failed: {e}");
                    maybe_err = Some(ExchangeError::from_transport(target, e));
                }
            }
        }
    }
    comm.barrier();

    // phase 3: read, acknowledge, retract
    let column: Result<Vec<u64>, TransportError> = match exposed {
        Ok(win) => {
            let snapshot = match config.memory {
                WindowMemory::Dedicated => Some(win.read()),
                WindowMemory::Caller => None,
            };
            if config.phases == PutPhases::Three {
                comm.barrier();
            }
            let retracted = win.retract();
            snapshot.unwrap_or(retracted)
        }
        Err(e) => {
            if config.phases == PutPhases::Three {
                comm.barrier();
            }
            Err(e)
        }
    };

    if let Some(err) = maybe_err {
        return Err(err);
    }
    let column = column.map_err(|e| match e {
        // a writer's broken link poisons the window
        TransportError::LinkDown(writer) => ExchangeError::from_transport(writer, e),
        e => ExchangeError::from_transport(me, e),
    })?;
    listed_column(&column, receive_list)
}
