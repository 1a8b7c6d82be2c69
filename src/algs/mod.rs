//! Re-export public algorithms.

pub mod communicator;
pub mod count_exchange;
pub mod data_exchange;
pub mod proclist;
pub mod round;
pub mod selector;
pub mod window;
pub mod wire;

pub use count_exchange::{resolve_receive_counts, resolve_receive_counts_with};
pub use data_exchange::{
    exchange, exchange_fixed, exchange_heterogeneous, exchange_variable, Datatype,
    ExchangeBuffer, Shape,
};
pub use selector::select;
