#![cfg_attr(docsrs, feature(doc_cfg))]
//! # sparse-alltoall
//!
//! sparse-alltoall is a personalized all-to-all exchange layer for distributed
//! process groups. Each participant knows how many items it sends to which
//! peers; the crate resolves how many items it receives from whom and then
//! moves the payload between only the pairs that need to talk.
//!
//! ## Features
//! - Count Exchange with interchangeable algorithms: dense all-to-all,
//!   two-step grid, one-sided put (two or three phases, dedicated or caller
//!   window memory) and process-list restricted exchanges
//! - Sparse Data Exchange for fixed, variable and heterogeneous payloads
//! - An Algorithm Selector that picks a strategy from group size and list
//!   density, identically on every participant
//! - Pluggable backends: serial ([`NoComm`](algs::communicator::NoComm)),
//!   in-process threads ([`LocalGroup`](algs::communicator::LocalGroup)) and
//!   MPI (feature `mpi-support`)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! sparse-alltoall = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! ```
//! use sparse_alltoall::prelude::*;
//!
//! let group = LocalGroup::new(3);
//! let cfg = ExchangeConfig::default();
//! let got = group.run(|comm| {
//!     // every rank sends its own rank number to the next one
//!     let next = (comm.rank() + 1) % comm.size();
//!     let prev = (comm.rank() + comm.size() - 1) % comm.size();
//!     let send = CountTable::from_pairs([(next, 1)]);
//!     let recv = resolve_receive_counts(&send, &ProcessList::new([prev]), &comm, &cfg)?;
//!     let out = exchange_variable(&[comm.rank() as u32], &send, &recv, &comm, &cfg)?;
//!     Ok::<_, ExchangeError>(out.read_segment::<u32>(prev))
//! });
//! assert_eq!(got[0].as_ref().unwrap(), &Some(vec![2]));
//! ```
//!
//! ## Blocking
//!
//! Every call blocks until this participant's sends are complete and its
//! expected receptions are resolved. There are no timeouts; a peer that never
//! sends blocks the call forever. Calls of one participant must not overlap.

pub mod algs;
pub mod config;
pub mod debug_invariants;
pub mod exchange_error;

pub use algs::{
    exchange, exchange_fixed, exchange_heterogeneous, exchange_variable, resolve_receive_counts,
    resolve_receive_counts_with, select,
};
pub use config::{ExchangeConfig, Strategy};
pub use debug_invariants::DebugInvariants;
pub use exchange_error::{ErrorKind, ExchangeError};

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, LocalGroup, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::data_exchange::{Datatype, ExchangeBuffer, Shape};
    pub use crate::algs::proclist::{CountTable, ProcessList};
    pub use crate::algs::selector::{CountStrategy, DataStrategy, ListedMethod, PutScope};
    pub use crate::algs::{
        exchange, exchange_fixed, exchange_heterogeneous, exchange_variable,
        resolve_receive_counts, resolve_receive_counts_with,
    };
    pub use crate::config::{
        ExchangeConfig, ProclistMethod, PutConfig, PutPhases, Strategy, WindowMemory,
    };
    pub use crate::exchange_error::{ErrorKind, ExchangeError, ListRole};
}
