//! Algorithm selection.
//!
//! Every strategy except paired send/receive is collective, so all members of
//! a group must pick the same one. The selector therefore decides from values
//! every participant shares: the group size, the configuration, and the
//! group-wide widest list (one `allreduce_max`, skipped for small groups and
//! for explicit strategies).

use crate::algs::communicator::{phase, Communicator};
use crate::config::{ExchangeConfig, ProclistMethod, PutConfig, Strategy};
use crate::exchange_error::ExchangeError;

/// Whom a one-sided count exchange writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PutScope {
    /// Every member, zeros included.
    Group,
    /// Only the send-list.
    Listed,
}

/// Two-sided methods of the process-list restricted count exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListedMethod {
    IsendIrecv,
    Alltoallv,
}

/// A concrete count exchange algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CountStrategy {
    Dense,
    TwoStep,
    Put { scope: PutScope, config: PutConfig },
    Proclists(ListedMethod),
}

/// A concrete payload transfer algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataStrategy {
    /// Paired non-blocking send/receive between listed peers only.
    Sparse,
    /// The backend's variable-count collective.
    Collective,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Selection {
    pub counts: CountStrategy,
    pub data: DataStrategy,
}

/// Pick the strategies for one exchange call. Collective when
/// `cfg.strategy` is `Auto` and the group is larger than `small_group`.
pub fn select<C: Communicator>(
    send_len: usize,
    receive_len: usize,
    comm: &C,
    cfg: &ExchangeConfig,
) -> Result<Selection, ExchangeError> {
    let size = comm.size();
    let one_sided = comm.one_sided().is_some();
    let widest = if cfg.strategy == Strategy::Auto && size > cfg.small_group {
        let local = send_len.max(receive_len) as u64;
        Some(comm.allreduce_max(cfg.tag.offset(phase::SELECT), local)? as usize)
    } else {
        None
    };
    let selection = choose(size, widest, one_sided, cfg)?;
    log::debug!(
        "rank {}: {} over {size} ranks (widest list {:?}) -> {:?}",
        comm.rank(),
        cfg.strategy,
        widest,
        selection
    );
    Ok(selection)
}

/// Decision table behind [`select`]. `widest` is the group-wide widest list,
/// when it was reduced.
pub fn choose(
    size: usize,
    widest: Option<usize>,
    one_sided: bool,
    cfg: &ExchangeConfig,
) -> Result<Selection, ExchangeError> {
    let dense = Selection {
        counts: CountStrategy::Dense,
        data: DataStrategy::Collective,
    };
    match cfg.strategy {
        Strategy::Dense => Ok(dense),
        Strategy::TwoStep => Ok(Selection {
            counts: CountStrategy::TwoStep,
            data: DataStrategy::Collective,
        }),
        Strategy::OneSided => {
            if !one_sided {
                return Err(ExchangeError::Unsupported("one-sided windows"));
            }
            Ok(Selection {
                counts: CountStrategy::Put {
                    scope: PutScope::Group,
                    config: cfg.put,
                },
                data: DataStrategy::Sparse,
            })
        }
        Strategy::ProclistRestricted => listed(cfg.proclist_method, one_sided, cfg),
        Strategy::Auto => match widest {
            None => Ok(dense),
            Some(widest) => {
                let density = widest as f64 / size as f64;
                if density < cfg.density_threshold {
                    // all members share one backend, so this fallback is uniform
                    let method = match cfg.proclist_method {
                        ProclistMethod::Put if !one_sided => ProclistMethod::IsendIrecv,
                        m => m,
                    };
                    listed(method, one_sided, cfg)
                } else if size >= cfg.two_step_min_group {
                    Ok(Selection {
                        counts: CountStrategy::TwoStep,
                        data: DataStrategy::Collective,
                    })
                } else {
                    Ok(dense)
                }
            }
        },
    }
}

fn listed(
    method: ProclistMethod,
    one_sided: bool,
    cfg: &ExchangeConfig,
) -> Result<Selection, ExchangeError> {
    match method {
        ProclistMethod::IsendIrecv => Ok(Selection {
            counts: CountStrategy::Proclists(ListedMethod::IsendIrecv),
            data: DataStrategy::Sparse,
        }),
        ProclistMethod::Alltoallv => Ok(Selection {
            counts: CountStrategy::Proclists(ListedMethod::Alltoallv),
            data: DataStrategy::Collective,
        }),
        ProclistMethod::Put if one_sided => Ok(Selection {
            counts: CountStrategy::Put {
                scope: PutScope::Listed,
                config: cfg.put,
            },
            data: DataStrategy::Sparse,
        }),
        ProclistMethod::Put => Err(ExchangeError::Unsupported("one-sided windows")),
    }
}
